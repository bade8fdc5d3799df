//! pcci - self-registering acceptance-test worker.
//!
//! Each invocation of a worker registers itself against a shared worker
//! ceiling, leases one `org/project/pr` job from a shared FIFO queue, checks
//! the revision out into a throwaway workspace, runs the acceptance harness
//! up to a fixed number of times, writes the final outcome to a log artifact
//! and tears the test VM down again.
//!
//! # Core Concepts
//!
//! - **Store**: The [`CoordinationStore`] trait abstracts the shared state
//!   (worker counter, run flag, pending and completed queues). [`RedisStore`]
//!   is the production backend.
//!
//! - **Capacity**: [`CapacityGate`] hands out a [`SlotGuard`] which must be
//!   released exactly once.
//!
//! - **Attempts**: [`RetryController`] drives [`AttemptExecutor`] steps
//!   (provision, execute, cleanup) and decides when to stop.
//!
//! - **Runtime**: [`Worker`] ties everything together for one invocation.
//!
//! # Feature Flags
//!
//! - `redis` - Redis coordination store (default)
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pcci::*;
//!
//! let store = RedisStore::connect("redis://localhost:6379/0", StoreKeys::default()).await?;
//! let worker = WorkerBuilder::new(WorkerConfig::default())
//!     .with_store(Arc::new(store))
//!     .build()?;
//! let report = worker.run(ShutdownToken::new()).await?;
//! ```

/// Worker slot registration.
///
/// [`CapacityGate`] reserves one of `max_workers` slots and returns a
/// [`SlotGuard`] that is consumed when the slot is given back.
pub mod capacity;

/// VM teardown and workspace removal.
pub mod cleanup;

/// Worker configuration.
///
/// [`WorkerConfig`] groups every tunable; it deserializes from partial JSON
/// with defaults filled in.
pub mod config;

/// Fatal worker errors.
pub mod error;

/// Dependency install, harness execution and failure classification.
///
/// - [`HarnessRunner`] - runs install then harness in a workspace
/// - [`ExecutionOutcome`] - captured result of one attempt
/// - [`FailureClassifier`] and [`SignatureClassifier`] - transient failure detection
pub mod harness;

/// Job descriptors and worker identity.
pub mod job;

/// Leasing jobs from the pending queue.
pub mod lease;

#[cfg(feature = "metrics")]
/// Prometheus metrics.
pub mod metrics;

/// Running external executables.
pub mod process;

/// Workspace creation and source checkout.
pub mod provision;

/// Result artifacts.
///
/// [`ResultReporter`] writes the artifact file and publishes its identifier
/// to the completed list.
pub mod report;

/// Attempt budget and the retry loop.
pub mod retry;

/// The worker lifecycle.
///
/// - [`Worker`] - one invocation
/// - [`WorkerBuilder`] - assembles a worker
/// - [`WorkerReport`] - how an invocation ended
/// - [`ShutdownToken`] - interrupt signalling
pub mod runtime;

/// Coordination store abstraction and backends.
pub mod store;

/// Tracing spans and telemetry helpers.
pub mod telemetry;

pub use capacity::*;
pub use cleanup::*;
pub use config::*;
pub use error::*;
pub use harness::*;
pub use job::*;
pub use lease::*;
pub use process::*;
pub use provision::*;
pub use report::*;
pub use retry::*;
pub use runtime::*;
pub use store::*;

/// Builder assembling a worker from its dependencies.
pub mod builder;
/// Interrupt signalling.
pub mod shutdown;
/// The one-shot worker lifecycle.
pub mod worker;

pub use builder::WorkerBuilder;
pub use shutdown::ShutdownToken;
pub use worker::{ProvisionedAttempts, Worker, WorkerReport};

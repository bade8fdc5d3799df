use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "redis")]
mod redis_store;

#[cfg(feature = "redis")]
pub use self::redis_store::RedisStore;

/// Client for the shared coordination store.
///
/// Workers share nothing but this store: a bounded worker counter, a run
/// flag, the pending-job FIFO and the completed-artifact list. Every method
/// is a single atomic operation on the backing service; callers never
/// compose them into transactions.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Reserve a worker slot if fewer than `max_workers` are registered.
    ///
    /// Initializes an absent counter to zero. Returns `false`, leaving the
    /// counter untouched, when the store is already at capacity.
    async fn try_acquire_slot(&self, max_workers: u32) -> anyhow::Result<bool>;

    /// Give back a slot taken by [`CoordinationStore::try_acquire_slot`].
    ///
    /// The counter is clamped at zero.
    async fn release_slot(&self) -> anyhow::Result<()>;

    /// Current value of the worker counter (zero when absent).
    async fn worker_count(&self) -> anyhow::Result<u64>;

    /// Whether the global run flag is present.
    async fn is_run_enabled(&self) -> anyhow::Result<bool>;

    /// Set or clear the global run flag.
    async fn set_run_enabled(&self, enabled: bool) -> anyhow::Result<()>;

    /// Pop the head of the pending-job queue.
    async fn pop_job(&self) -> anyhow::Result<Option<String>>;

    /// Append a raw job descriptor to the pending-job queue.
    async fn push_job(&self, raw: &str) -> anyhow::Result<()>;

    /// Append an artifact identifier to the completed list.
    async fn push_completed(&self, artifact_id: &str) -> anyhow::Result<()>;

    /// Read all shared state at once for operators.
    async fn snapshot(&self) -> anyhow::Result<StoreSnapshot>;
}

impl std::fmt::Debug for dyn CoordinationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<coordination store>")
    }
}

/// Key names used in the coordination store.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StoreKeys {
    /// Integer counter of live workers.
    pub workers: String,
    /// Presence flag gating new work.
    pub run_flag: String,
    /// FIFO list of pending `org/project/pr` descriptors.
    pub todo: String,
    /// FIFO list of published artifact identifiers.
    pub completed: String,
}

impl Default for StoreKeys {
    fn default() -> Self {
        Self {
            workers: "workers".to_string(),
            run_flag: "workers_run".to_string(),
            todo: "todo".to_string(),
            completed: "completed".to_string(),
        }
    }
}

/// Point-in-time view of the coordination store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// When the snapshot was taken.
    pub sampled_at: DateTime<Utc>,
    /// Registered workers.
    pub workers: u64,
    /// Whether leasing is enabled.
    pub run_enabled: bool,
    /// Pending jobs.
    pub todo_depth: usize,
    /// Published artifacts.
    pub completed_depth: usize,
}

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use pcci::{CoordinationStore, StoreSnapshot};
use std::collections::VecDeque;
use std::sync::Arc;

/// [`CoordinationStore`] kept in process memory.
///
/// Same semantics as the Redis backend: the counter starts absent, acquire
/// initializes it to zero, release is clamped at zero.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    workers: Option<u64>,
    run_enabled: bool,
    todo: VecDeque<String>,
    completed: Vec<String>,
    acquires: u32,
    releases: u32,
    fail_pops: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the run flag set and `jobs` queued in order.
    pub fn running_with<I, S>(jobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        {
            let mut state = store.state.lock();
            state.run_enabled = true;
            state.todo.extend(jobs.into_iter().map(Into::into));
        }
        store
    }

    /// Preset the worker counter, as if other hosts had registered.
    pub fn set_workers(&self, count: u64) {
        self.state.lock().workers = Some(count);
    }

    /// Raw counter value; `None` while no worker has ever registered.
    pub fn workers(&self) -> Option<u64> {
        self.state.lock().workers
    }

    pub fn pending(&self) -> Vec<String> {
        self.state.lock().todo.iter().cloned().collect()
    }

    pub fn completed(&self) -> Vec<String> {
        self.state.lock().completed.clone()
    }

    /// Successful slot acquisitions so far.
    pub fn acquire_count(&self) -> u32 {
        self.state.lock().acquires
    }

    /// Slot releases so far.
    pub fn release_count(&self) -> u32 {
        self.state.lock().releases
    }

    /// Make every subsequent `pop_job` fail, simulating a lost connection.
    pub fn fail_pops(&self) {
        self.state.lock().fail_pops = true;
    }

    pub fn assert_slot_released_once(&self) {
        let state = self.state.lock();
        assert_eq!(
            (state.acquires, state.releases),
            (1, 1),
            "Expected exactly one acquire and one release, got {} and {}",
            state.acquires,
            state.releases
        );
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("state", &*self.state.lock())
            .finish()
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn try_acquire_slot(&self, max_workers: u32) -> anyhow::Result<bool> {
        let mut state = self.state.lock();
        let current = *state.workers.get_or_insert(0);
        if current >= u64::from(max_workers) {
            return Ok(false);
        }
        state.workers = Some(current + 1);
        state.acquires += 1;
        Ok(true)
    }

    async fn release_slot(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        let current = state.workers.unwrap_or(0);
        state.workers = Some(current.saturating_sub(1));
        state.releases += 1;
        Ok(())
    }

    async fn worker_count(&self) -> anyhow::Result<u64> {
        Ok(self.state.lock().workers.unwrap_or(0))
    }

    async fn is_run_enabled(&self) -> anyhow::Result<bool> {
        Ok(self.state.lock().run_enabled)
    }

    async fn set_run_enabled(&self, enabled: bool) -> anyhow::Result<()> {
        self.state.lock().run_enabled = enabled;
        Ok(())
    }

    async fn pop_job(&self) -> anyhow::Result<Option<String>> {
        let mut state = self.state.lock();
        if state.fail_pops {
            anyhow::bail!("connection reset while popping job");
        }
        Ok(state.todo.pop_front())
    }

    async fn push_job(&self, raw: &str) -> anyhow::Result<()> {
        self.state.lock().todo.push_back(raw.to_string());
        Ok(())
    }

    async fn push_completed(&self, artifact_id: &str) -> anyhow::Result<()> {
        self.state.lock().completed.push(artifact_id.to_string());
        Ok(())
    }

    async fn snapshot(&self) -> anyhow::Result<StoreSnapshot> {
        let state = self.state.lock();
        Ok(StoreSnapshot {
            sampled_at: Utc::now(),
            workers: state.workers.unwrap_or(0),
            run_enabled: state.run_enabled,
            todo_depth: state.todo.len(),
            completed_depth: state.completed.len(),
        })
    }
}

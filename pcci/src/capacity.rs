use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::job::WorkerId;
use crate::store::CoordinationStore;

/// Why [`CapacityGate::register`] did not hand out a slot.
#[derive(Debug, Error)]
pub enum CapacityError {
    /// The shared counter is already at the configured ceiling.
    #[error("already at capacity ({max} workers)")]
    AtCapacity { max: u32 },
    /// The coordination store could not be reached.
    #[error("coordination store error: {0:#}")]
    Store(#[source] anyhow::Error),
}

/// A reserved worker slot.
///
/// Obtained from [`CapacityGate::register`]. The only way to give the slot
/// back is [`SlotGuard::release`], which consumes the guard, so a slot can
/// never be released twice.
#[must_use = "a registered slot must be released"]
#[derive(Debug)]
pub struct SlotGuard {
    store: Arc<dyn CoordinationStore>,
    /// Worker holding the slot.
    pub worker_id: WorkerId,
    /// When the slot was reserved.
    pub acquired_at: DateTime<Utc>,
}

impl SlotGuard {
    /// Decrement the shared counter.
    pub async fn release(self) -> anyhow::Result<()> {
        tracing::info!(
            worker_id = %self.worker_id,
            held_secs = self.held_secs(),
            "releasing worker slot"
        );
        self.store.release_slot().await
    }

    /// Whole seconds since the slot was reserved.
    pub fn held_secs(&self) -> i64 {
        (Utc::now() - self.acquired_at).num_seconds()
    }
}

/// Gates worker start-up on the shared worker counter.
#[derive(Clone, Debug)]
pub struct CapacityGate {
    store: Arc<dyn CoordinationStore>,
}

impl CapacityGate {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Reserve one of `max_workers` slots.
    ///
    /// On [`CapacityError::AtCapacity`] the counter is left as it was and the
    /// caller must stand down without side effects.
    pub async fn register(
        &self,
        worker_id: WorkerId,
        max_workers: u32,
    ) -> Result<SlotGuard, CapacityError> {
        let acquired = self
            .store
            .try_acquire_slot(max_workers)
            .await
            .map_err(CapacityError::Store)?;

        if !acquired {
            tracing::info!(
                %worker_id,
                max_workers,
                "deactivating because we already have enough workers"
            );
            crate::telemetry::record_registration_refused();
            return Err(CapacityError::AtCapacity { max: max_workers });
        }

        tracing::info!(%worker_id, max_workers, "registered worker slot");
        Ok(SlotGuard {
            store: Arc::clone(&self.store),
            worker_id,
            acquired_at: Utc::now(),
        })
    }
}

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::job::{JobDescriptor, MalformedJobDescriptor, WorkerId};
use crate::store::CoordinationStore;

/// Identifies one pop of the pending queue.
///
/// Descriptors can be queued more than once, so the lease id is what ties a
/// job's log lines and its final report together.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(transparent)]
pub struct LeaseId(Uuid);

impl LeaseId {
    fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_simple())
    }
}

/// A job popped from the pending queue and now owned by one worker.
///
/// There is no visibility timeout: if the worker dies the job is gone.
#[derive(Clone, Debug, Serialize)]
pub struct JobLease {
    pub lease_id: LeaseId,
    pub job: JobDescriptor,
    pub worker_id: WorkerId,
    /// When the job was popped.
    pub leased_at: DateTime<Utc>,
}

impl JobLease {
    pub fn new(job: JobDescriptor, worker_id: WorkerId) -> Self {
        Self {
            lease_id: LeaseId::generate(),
            job,
            worker_id,
            leased_at: Utc::now(),
        }
    }

    /// Whole seconds since the job was popped.
    pub fn held_secs(&self) -> i64 {
        (Utc::now() - self.leased_at).num_seconds()
    }
}

/// Result of one [`JobLeaser::lease`] call.
#[derive(Clone, Debug)]
pub enum LeaseOutcome {
    /// A job was popped and parsed.
    Leased(JobLease),
    /// The run flag is absent; the worker must not take new work.
    StandDown,
    /// The pending queue is empty.
    NoWork,
    /// An item was popped but could not be parsed. It is not re-queued.
    Malformed(MalformedJobDescriptor),
}

/// Pops work from the shared pending queue.
#[derive(Clone, Debug)]
pub struct JobLeaser {
    store: Arc<dyn CoordinationStore>,
    worker_id: WorkerId,
}

impl JobLeaser {
    pub fn new(store: Arc<dyn CoordinationStore>, worker_id: WorkerId) -> Self {
        Self { store, worker_id }
    }

    /// Check the run flag, then pop the head of the queue.
    ///
    /// The flag is read on every call, never cached.
    pub async fn lease(&self) -> anyhow::Result<LeaseOutcome> {
        if !self.store.is_run_enabled().await? {
            tracing::info!(worker_id = %self.worker_id, "run flag absent, standing down");
            return Ok(LeaseOutcome::StandDown);
        }

        let Some(raw) = self.store.pop_job().await? else {
            tracing::info!(worker_id = %self.worker_id, "no work available");
            return Ok(LeaseOutcome::NoWork);
        };

        match JobDescriptor::parse(&raw) {
            Ok(job) => {
                let lease = JobLease::new(job, self.worker_id);
                tracing::info!(
                    worker_id = %self.worker_id,
                    lease_id = %lease.lease_id,
                    job = %lease.job,
                    "starting work"
                );
                crate::telemetry::record_job_leased(&lease.job);
                Ok(LeaseOutcome::Leased(lease))
            }
            Err(err) => {
                tracing::error!(worker_id = %self.worker_id, error = %err, "dropping malformed job");
                Ok(LeaseOutcome::Malformed(err))
            }
        }
    }
}

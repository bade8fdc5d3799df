use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{Instrument, Span};

use crate::capacity::{CapacityError, CapacityGate};
use crate::cleanup::Cleanup;
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::harness::{ExecutionOutcome, HarnessRunner};
use crate::job::{JobDescriptor, WorkerId};
use crate::lease::{JobLease, JobLeaser, LeaseId, LeaseOutcome};
use crate::provision::{EnvironmentProvisioner, Workspace};
use crate::report::{PublishedArtifact, ResultReporter, Verdict};
use crate::retry::{AttemptExecutor, RetryController, StopReason};
use crate::store::CoordinationStore;

use super::ShutdownToken;

/// How one worker invocation ended without a fatal error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerReport {
    /// The shared counter was already at its ceiling; nothing was touched.
    AtCapacity,
    /// The run flag is absent.
    StandDown,
    /// The pending queue was empty.
    NoWork,
    /// A job was run and its final outcome reported.
    Completed {
        lease_id: LeaseId,
        job: JobDescriptor,
        artifact: PublishedArtifact,
        attempts: u32,
        stop_reason: StopReason,
    },
    /// The shutdown token fired; in-flight work was abandoned.
    Interrupted,
}

impl WorkerReport {
    /// Verdict of the reported job, if one ran.
    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            Self::Completed { artifact, .. } => Some(artifact.verdict),
            _ => None,
        }
    }
}

/// Real attempt steps: checkout, harness run, teardown.
#[derive(Clone, Debug)]
pub struct ProvisionedAttempts {
    provisioner: EnvironmentProvisioner,
    runner: HarnessRunner,
    cleanup: Cleanup,
}

impl ProvisionedAttempts {
    pub fn new(provisioner: EnvironmentProvisioner, runner: HarnessRunner, cleanup: Cleanup) -> Self {
        Self {
            provisioner,
            runner,
            cleanup,
        }
    }
}

#[async_trait]
impl AttemptExecutor for ProvisionedAttempts {
    type Workspace = Workspace;

    async fn provision(&self, job: &JobDescriptor) -> WorkerResult<Workspace> {
        self.provisioner.provision(job).await
    }

    async fn execute(&self, workspace: &Workspace) -> WorkerResult<ExecutionOutcome> {
        self.runner.run(workspace).await
    }

    async fn cleanup(&self, workspace: Workspace) {
        self.cleanup.cleanup(workspace).await
    }
}

/// One self-registering worker invocation.
///
/// Built with [`WorkerBuilder`](super::WorkerBuilder).
#[derive(Debug)]
pub struct Worker {
    id: WorkerId,
    config: WorkerConfig,
    gate: CapacityGate,
    leaser: JobLeaser,
    attempts: RetryController<ProvisionedAttempts>,
    reporter: ResultReporter,
}

impl Worker {
    pub(crate) fn new(
        id: WorkerId,
        config: WorkerConfig,
        store: Arc<dyn CoordinationStore>,
        executor: ProvisionedAttempts,
    ) -> Self {
        Self {
            id,
            gate: CapacityGate::new(Arc::clone(&store)),
            leaser: JobLeaser::new(Arc::clone(&store), id),
            attempts: RetryController::new(executor, config.retry.clone()),
            reporter: ResultReporter::new(store, config.log_dir.clone()),
            config,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Register, lease one job, run it, report it, tear down, release the
    /// slot.
    ///
    /// Once a slot has been registered it is released exactly once on every
    /// path out of this function, including interruption and errors. An
    /// interrupt that lands after the job was reported only cuts teardown
    /// short; the report stands.
    pub async fn run(&self, shutdown: ShutdownToken) -> WorkerResult<WorkerReport> {
        let span = crate::telemetry::worker_span(self.id);
        async move {
            if shutdown.is_cancelled() {
                return Ok(WorkerReport::Interrupted);
            }

            let slot = match self.gate.register(self.id, self.config.max_workers).await {
                Ok(slot) => slot,
                Err(CapacityError::AtCapacity { .. }) => return Ok(WorkerReport::AtCapacity),
                Err(CapacityError::Store(err)) => return Err(WorkerError::Store(err)),
            };

            let finished = tokio::select! {
                finished = self.run_registered() => finished,
                () = shutdown.cancelled() => {
                    tracing::warn!("interrupted, abandoning in-flight work");
                    Ok(Finished::bare(WorkerReport::Interrupted))
                }
            };

            let result = match finished {
                Ok(Finished { report, teardown }) => {
                    if let Some(teardown) = teardown {
                        self.teardown(teardown, &shutdown).await;
                    }
                    Ok(report)
                }
                Err(err) => Err(err),
            };

            match (result, slot.release().await) {
                (result, Ok(())) => result,
                (Ok(_), Err(err)) => Err(WorkerError::Store(err)),
                (Err(err), Err(release_err)) => {
                    tracing::error!(error = %release_err, "failed to release worker slot");
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_registered(&self) -> WorkerResult<Finished> {
        let lease = match self.leaser.lease().await.map_err(WorkerError::Store)? {
            LeaseOutcome::Leased(lease) => lease,
            LeaseOutcome::StandDown => return Ok(Finished::bare(WorkerReport::StandDown)),
            LeaseOutcome::NoWork => {
                tokio::time::sleep(self.config.idle_wait()).await;
                return Ok(Finished::bare(WorkerReport::NoWork));
            }
            LeaseOutcome::Malformed(err) => return Err(err.into()),
        };

        let span = crate::telemetry::lease_span(&lease);
        let (report, workspace) = self.run_leased(lease).instrument(span.clone()).await?;
        Ok(Finished {
            report,
            teardown: workspace.map(|workspace| Teardown { workspace, span }),
        })
    }

    async fn run_leased(
        &self,
        lease: JobLease,
    ) -> WorkerResult<(WorkerReport, Option<Workspace>)> {
        let run = self.attempts.run(&lease.job).await?;
        tracing::info!(
            attempts = run.attempts,
            stop_reason = ?run.stop_reason,
            success = run.outcome.success,
            held_secs = lease.held_secs(),
            "attempts finished"
        );

        let artifact = match self.reporter.report(&lease.job, &run.outcome).await {
            Ok(artifact) => artifact,
            Err(err) => {
                if let Some(workspace) = run.retained_workspace {
                    self.attempts.executor().cleanup(workspace).await;
                }
                return Err(err);
            }
        };

        let report = WorkerReport::Completed {
            lease_id: lease.lease_id,
            job: lease.job,
            artifact,
            attempts: run.attempts,
            stop_reason: run.stop_reason,
        };
        Ok((report, run.retained_workspace))
    }

    /// Tear down the workspace kept by the last attempt. Cut short by an
    /// interrupt, in which case the VM and directory are left behind.
    async fn teardown(&self, teardown: Teardown, shutdown: &ShutdownToken) {
        let Teardown { workspace, span } = teardown;
        let root = workspace.root().to_path_buf();
        tokio::select! {
            () = self.attempts.executor().cleanup(workspace).instrument(span) => {}
            () = shutdown.cancelled() => {
                tracing::warn!(
                    workspace = %root.display(),
                    "interrupted during teardown, leaving workspace behind"
                );
            }
        }
    }
}

/// What the registered part of a run produced.
struct Finished {
    report: WorkerReport,
    teardown: Option<Teardown>,
}

impl Finished {
    fn bare(report: WorkerReport) -> Self {
        Self {
            report,
            teardown: None,
        }
    }
}

/// A reported job's workspace that still needs tearing down.
struct Teardown {
    workspace: Workspace,
    span: Span,
}

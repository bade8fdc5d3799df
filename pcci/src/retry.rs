use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::error::WorkerResult;
use crate::harness::ExecutionOutcome;
use crate::job::JobDescriptor;

/// Bounds on how often a job is re-run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum provision+run cycles per job.
    pub max_attempts: u32,
    /// Attempts slower than this are not retried, whatever their result.
    pub slow_run_cutoff_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            slow_run_cutoff_secs: 1000,
        }
    }
}

/// Why the attempt loop ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum StopReason {
    /// The last attempt passed.
    Succeeded,
    /// The last attempt ran longer than the slow-run cutoff.
    TooSlow,
    /// Every attempt failed.
    AttemptsExhausted,
}

impl StopReason {
    /// Whether the loop hands the final workspace back instead of cleaning it.
    ///
    /// Only a failed attempt that used up the budget is cleaned inside the
    /// loop; early exits leave teardown to the caller.
    pub fn retains_workspace(self) -> bool {
        matches!(self, Self::Succeeded | Self::TooSlow)
    }
}

/// What to do after an attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttemptDecision {
    Retry,
    Stop(StopReason),
}

impl RetryPolicy {
    /// Decide after the `attempt`-th (1-based) attempt produced `outcome`.
    pub fn decide(&self, attempt: u32, outcome: &ExecutionOutcome) -> AttemptDecision {
        if outcome.success {
            AttemptDecision::Stop(StopReason::Succeeded)
        } else if outcome.elapsed_seconds > self.slow_run_cutoff_secs {
            AttemptDecision::Stop(StopReason::TooSlow)
        } else if attempt >= self.max_attempts.max(1) {
            AttemptDecision::Stop(StopReason::AttemptsExhausted)
        } else {
            AttemptDecision::Retry
        }
    }
}

/// The three phases of one attempt.
#[async_trait]
pub trait AttemptExecutor: Send + Sync {
    /// Per-attempt state, exclusively owned by the attempt that created it.
    type Workspace: Send;

    async fn provision(&self, job: &JobDescriptor) -> WorkerResult<Self::Workspace>;

    async fn execute(&self, workspace: &Self::Workspace) -> WorkerResult<ExecutionOutcome>;

    /// Best-effort teardown; never fails.
    async fn cleanup(&self, workspace: Self::Workspace);
}

/// Result of the attempt loop.
#[derive(Debug)]
pub struct RetryRun<W> {
    /// Outcome of the last attempt; earlier attempts are discarded.
    pub outcome: ExecutionOutcome,
    /// Attempts executed.
    pub attempts: u32,
    pub stop_reason: StopReason,
    /// Workspace of the last attempt when the loop did not clean it.
    pub retained_workspace: Option<W>,
}

/// Repeats provision+execute under a [`RetryPolicy`].
#[derive(Debug)]
pub struct RetryController<E> {
    executor: E,
    policy: RetryPolicy,
}

impl<E: AttemptExecutor> RetryController<E> {
    pub fn new(executor: E, policy: RetryPolicy) -> Self {
        Self { executor, policy }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run attempts until one passes, one is too slow, or the budget is spent.
    ///
    /// A fatal error cleans up the current workspace and then propagates.
    pub async fn run(&self, job: &JobDescriptor) -> WorkerResult<RetryRun<E::Workspace>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let span = crate::telemetry::attempt_span(job, attempt);
            let (workspace, outcome) = self.attempt(job).instrument(span).await?;

            crate::telemetry::record_attempt(&outcome);
            let decision = self.policy.decide(attempt, &outcome);
            tracing::info!(
                %job,
                attempt,
                success = outcome.success,
                elapsed_secs = outcome.elapsed_seconds,
                ?decision,
                "attempt finished"
            );

            match decision {
                AttemptDecision::Retry => self.executor.cleanup(workspace).await,
                AttemptDecision::Stop(stop_reason) => {
                    let retained_workspace = if stop_reason.retains_workspace() {
                        Some(workspace)
                    } else {
                        self.executor.cleanup(workspace).await;
                        None
                    };
                    return Ok(RetryRun {
                        outcome,
                        attempts: attempt,
                        stop_reason,
                        retained_workspace,
                    });
                }
            }
        }
    }

    async fn attempt(
        &self,
        job: &JobDescriptor,
    ) -> WorkerResult<(E::Workspace, ExecutionOutcome)> {
        let workspace = self.executor.provision(job).await?;
        match self.executor.execute(&workspace).await {
            Ok(outcome) => Ok((workspace, outcome)),
            Err(err) => {
                tracing::error!(error = %err, "attempt aborted");
                self.executor.cleanup(workspace).await;
                Err(err)
            }
        }
    }
}

//! Tracing and telemetry instrumentation for pcci.
//!
//! Span constructors for the worker lifecycle plus `record_*` helpers that
//! log an event and, with the `metrics` feature, update Prometheus metrics.
//! All helpers work with and without the feature.

use tracing::{info_span, Span};

use crate::harness::ExecutionOutcome;
use crate::job::{JobDescriptor, WorkerId};
use crate::lease::JobLease;
use crate::report::Verdict;

/// Span covering one worker invocation.
#[must_use]
pub fn worker_span(worker_id: WorkerId) -> Span {
    info_span!("pcci.worker", worker_id = %worker_id)
}

/// Span covering everything done under one lease: attempts, report and
/// teardown.
#[must_use]
pub fn lease_span(lease: &JobLease) -> Span {
    info_span!("pcci.lease", lease_id = %lease.lease_id, job = %lease.job)
}

/// Span covering one provision+run attempt.
#[must_use]
pub fn attempt_span(job: &JobDescriptor, attempt: u32) -> Span {
    info_span!(
        "pcci.attempt",
        job = %job,
        attempt,
    )
}

/// Span covering one external command.
#[must_use]
pub fn command_span(command: impl AsRef<str>) -> Span {
    info_span!("pcci.command", command = %command.as_ref())
}

pub fn record_registration_refused() {
    #[cfg(feature = "metrics")]
    crate::metrics::record_registration_refused();
}

pub fn record_job_leased(job: &JobDescriptor) {
    tracing::debug!(job = %job, "job leased");

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_leased(job.organization());
}

pub fn record_attempt(outcome: &ExecutionOutcome) {
    let result = if outcome.success { "pass" } else { "fail" };
    tracing::debug!(result, elapsed_secs = outcome.elapsed_seconds, "attempt recorded");

    #[cfg(feature = "metrics")]
    crate::metrics::record_attempt(result, outcome.elapsed_seconds as f64);
}

pub fn record_job_reported(job: &JobDescriptor, verdict: Verdict, harness_failure: bool) {
    tracing::debug!(job = %job, %verdict, harness_failure, "job reported");

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_reported(job.organization(), verdict.as_str(), harness_failure);
}

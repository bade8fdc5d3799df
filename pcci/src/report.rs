use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{WorkerError, WorkerResult};
use crate::harness::ExecutionOutcome;
use crate::job::JobDescriptor;
use crate::store::CoordinationStore;

/// Directory prefix for artifacts whose harness output showed a transient
/// infrastructure failure.
pub const HARNESS_FAILURES_DIR: &str = "harness_failures";

/// Pass/fail verdict of a job.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn from_outcome(outcome: &ExecutionOutcome) -> Self {
        if outcome.success {
            Self::Pass
        } else {
            Self::Fail
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
        }
    }

    /// Human-readable summary line used on stdout and in the artifact.
    pub fn summary(&self) -> &'static str {
        match self {
            Self::Pass => "Tests passed",
            Self::Fail => "Tests failed",
        }
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Artifact identifier `{org}+{project}+{pr}+{unix}+{PASS|FAIL}`, nested
/// under [`HARNESS_FAILURES_DIR`] when flagged.
///
/// A pure function of its inputs.
pub fn artifact_name(
    job: &JobDescriptor,
    unix_seconds: i64,
    verdict: Verdict,
    harness_failure: bool,
) -> String {
    let name = format!(
        "{}+{}+{}+{}+{}",
        job.organization(),
        job.project(),
        job.pull_request(),
        unix_seconds,
        verdict
    );
    if harness_failure {
        format!("{HARNESS_FAILURES_DIR}/{name}")
    } else {
        name
    }
}

/// Render the artifact body: a short header then the four captured streams
/// in install-stdout, install-stderr, harness-stdout, harness-stderr order.
pub fn render_artifact(
    job: &JobDescriptor,
    outcome: &ExecutionOutcome,
    performed_at: DateTime<Utc>,
) -> Vec<u8> {
    let verdict = Verdict::from_outcome(outcome);
    let header = format!(
        "Test log\n\
         Test performed at {} - {}\n\
         {}/{} PR # {}\n\
         Took {} Seconds\n\
         {}\n",
        performed_at.timestamp(),
        performed_at.format("%Y-%m-%d %H:%M:%S%.6f"),
        job.organization(),
        job.project(),
        job.pull_request(),
        outcome.elapsed_seconds,
        verdict.summary(),
    );

    let mut body = header.into_bytes();
    for stream in [
        &outcome.install_stdout,
        &outcome.install_stderr,
        &outcome.harness_stdout,
        &outcome.harness_stderr,
    ] {
        body.extend_from_slice(stream);
    }
    body
}

/// Where a report ended up.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PublishedArtifact {
    /// Identifier pushed to the completed list.
    pub artifact_id: String,
    /// File the artifact was written to.
    pub path: PathBuf,
    pub verdict: Verdict,
}

/// Writes the final outcome of a job and publishes its identifier.
#[derive(Clone, Debug)]
pub struct ResultReporter {
    store: Arc<dyn CoordinationStore>,
    log_dir: PathBuf,
}

impl ResultReporter {
    pub fn new(store: Arc<dyn CoordinationStore>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            log_dir: log_dir.into(),
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Report `outcome` with the current time.
    pub async fn report(
        &self,
        job: &JobDescriptor,
        outcome: &ExecutionOutcome,
    ) -> WorkerResult<PublishedArtifact> {
        self.report_at(job, outcome, Utc::now()).await
    }

    /// Write the artifact, then push its identifier to the completed list.
    ///
    /// The two steps are not transactional: a crash in between leaves an
    /// artifact on disk that nobody was told about.
    pub async fn report_at(
        &self,
        job: &JobDescriptor,
        outcome: &ExecutionOutcome,
        performed_at: DateTime<Utc>,
    ) -> WorkerResult<PublishedArtifact> {
        let verdict = Verdict::from_outcome(outcome);
        let artifact_id = artifact_name(
            job,
            performed_at.timestamp(),
            verdict,
            outcome.harness_failure_detected,
        );
        let path = self.log_dir.join(&artifact_id);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkerError::io("creating log directory", parent, e))?;
        }
        tokio::fs::write(&path, render_artifact(job, outcome, performed_at))
            .await
            .map_err(|e| WorkerError::io("writing artifact", &path, e))?;

        self.store
            .push_completed(&artifact_id)
            .await
            .map_err(WorkerError::Store)?;

        crate::telemetry::record_job_reported(job, verdict, outcome.harness_failure_detected);
        tracing::info!(%job, %verdict, artifact = %artifact_id, "log written");

        Ok(PublishedArtifact {
            artifact_id,
            path,
            verdict,
        })
    }
}

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{WorkerError, WorkerResult};
use crate::process::{CommandSpec, ProcessInvoker};
use crate::provision::Workspace;

/// Stdout signature of a VM dropping its SSH session mid-run.
pub const SSH_DISCONNECT_SIGNATURE: &str =
    "connection closed by remote host (Net::SSH::Disconnect)";

/// How the dependency install and the acceptance harness are run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Per-workspace dependency directory, relative to the checkout.
    pub gem_dir: String,
    /// Variable pointing the dependency manager at `gem_dir`.
    pub gem_home_env: String,
    /// Node-set definitions, relative to the checkout.
    pub nodesets_dir: String,
    /// Node sets to use if present, in order of preference.
    pub preferred_nodes: Vec<String>,
    /// Variable selecting the node set for the harness.
    pub nodeset_env: String,
    pub install_command: Vec<String>,
    pub harness_command: Vec<String>,
    /// Stdout substrings marking a transient harness failure.
    pub failure_signatures: Vec<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            gem_dir: ".pcci_gems".to_string(),
            gem_home_env: "GEM_HOME".to_string(),
            nodesets_dir: "spec/acceptance/nodesets".to_string(),
            preferred_nodes: vec!["ubuntu-server-1404-x64".to_string()],
            nodeset_env: "BEAKER_set".to_string(),
            install_command: vec!["bundle".into(), "install".into()],
            harness_command: vec![
                "bundle".into(),
                "exec".into(),
                "rspec".into(),
                "spec/acceptance".into(),
            ],
            failure_signatures: vec![SSH_DISCONNECT_SIGNATURE.to_string()],
        }
    }
}

/// Everything one attempt produced.
///
/// Fixed shape: every field is always set, whatever happened.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// The harness exited with code 0.
    pub success: bool,
    /// Wall-clock seconds for install plus harness, truncated.
    pub elapsed_seconds: u64,
    pub install_stdout: Vec<u8>,
    pub install_stderr: Vec<u8>,
    pub harness_stdout: Vec<u8>,
    pub harness_stderr: Vec<u8>,
    /// Harness output matched a known transient-failure signature.
    pub harness_failure_detected: bool,
}

/// Decides whether harness output shows an infrastructure failure rather
/// than a test failure.
pub trait FailureClassifier: Send + Sync {
    fn is_harness_failure(&self, harness_stdout: &[u8]) -> bool;
}

/// Flags output where any line contains one of a list of substrings.
///
/// A heuristic: failure modes without a known signature look exactly like
/// genuine test failures.
#[derive(Clone, Debug, Default)]
pub struct SignatureClassifier {
    signatures: Vec<String>,
}

impl SignatureClassifier {
    pub fn new(signatures: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            signatures: signatures.into_iter().map(Into::into).collect(),
        }
    }

    pub fn signatures(&self) -> &[String] {
        &self.signatures
    }
}

impl FailureClassifier for SignatureClassifier {
    fn is_harness_failure(&self, harness_stdout: &[u8]) -> bool {
        String::from_utf8_lossy(harness_stdout).lines().any(|line| {
            self.signatures
                .iter()
                .any(|signature| line.contains(signature.as_str()))
        })
    }
}

/// Installs dependencies and runs the acceptance harness in a workspace.
#[derive(Clone)]
pub struct HarnessRunner {
    invoker: Arc<dyn ProcessInvoker>,
    classifier: Arc<dyn FailureClassifier>,
    config: HarnessConfig,
}

impl std::fmt::Debug for HarnessRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarnessRunner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HarnessRunner {
    /// Runner that classifies failures with the configured signatures.
    pub fn new(invoker: Arc<dyn ProcessInvoker>, config: HarnessConfig) -> Self {
        let classifier = Arc::new(SignatureClassifier::new(
            config.failure_signatures.iter().cloned(),
        ));
        Self::with_classifier(invoker, config, classifier)
    }

    pub fn with_classifier(
        invoker: Arc<dyn ProcessInvoker>,
        config: HarnessConfig,
        classifier: Arc<dyn FailureClassifier>,
    ) -> Self {
        Self {
            invoker,
            classifier,
            config,
        }
    }

    /// Install dependencies, then run the harness.
    ///
    /// The install step's exit status is captured but not checked; a broken
    /// install shows up only as a failing harness run.
    pub async fn run(&self, workspace: &Workspace) -> WorkerResult<ExecutionOutcome> {
        let started = Instant::now();
        let job_dir = workspace.checkout_dir();
        tracing::info!(job_dir = %job_dir.display(), "running harness");

        let gem_dir = job_dir.join(&self.config.gem_dir);
        tokio::fs::create_dir_all(&gem_dir)
            .await
            .map_err(|e| WorkerError::io("creating dependency directory", &gem_dir, e))?;

        let mut env = BTreeMap::new();
        env.insert(
            self.config.gem_home_env.clone(),
            gem_dir.to_string_lossy().into_owned(),
        );
        if let Some(node) = self.select_nodeset(&job_dir).await {
            tracing::info!(node = %node, "using node set");
            env.insert(self.config.nodeset_env.clone(), node);
        }

        let install = CommandSpec::from_argv(&self.config.install_command)
            .ok_or(WorkerError::InvalidConfig("install command is empty"))?
            .current_dir(&job_dir)
            .envs(&env);
        let harness = CommandSpec::from_argv(&self.config.harness_command)
            .ok_or(WorkerError::InvalidConfig("harness command is empty"))?
            .current_dir(&job_dir)
            .envs(&env);

        let install_output = self.invoker.invoke(&install).await?;
        let harness_output = self.invoker.invoke(&harness).await?;
        let elapsed_seconds = started.elapsed().as_secs();

        tracing::debug!("parsing output for likely failures");
        let harness_failure_detected = self.classifier.is_harness_failure(&harness_output.stdout);
        if harness_failure_detected {
            tracing::warn!("harness failure detected");
        }

        Ok(ExecutionOutcome {
            success: harness_output.success(),
            elapsed_seconds,
            install_stdout: install_output.stdout,
            install_stderr: install_output.stderr,
            harness_stdout: harness_output.stdout,
            harness_stderr: harness_output.stderr,
            harness_failure_detected,
        })
    }

    /// First preferred node set with a definition file in the checkout.
    async fn select_nodeset(&self, job_dir: &Path) -> Option<String> {
        let dir = job_dir.join(&self.config.nodesets_dir);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(dir = %dir.display(), error = %err, "no node sets found");
                return None;
            }
        };

        let mut available = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            available.push(entry.file_name().to_string_lossy().into_owned());
        }
        tracing::debug!(?available, "found node sets");

        self.config
            .preferred_nodes
            .iter()
            .find(|node| available.iter().any(|file| *file == format!("{node}.yml")))
            .cloned()
    }
}

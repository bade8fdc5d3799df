use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::process::{CommandSpec, ProcessInvoker};
use crate::provision::Workspace;

/// How a workspace and its VM are torn down.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Time the VM is given to shut itself down before teardown.
    pub grace_period_secs: u64,
    /// VM provisioning tool.
    pub vagrant_program: String,
    /// Directory of the VM state, relative to the checkout.
    pub vagrant_state_dir: String,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 120,
            vagrant_program: "vagrant".to_string(),
            vagrant_state_dir: ".vagrant/beaker_vagrant_files/default.yml".to_string(),
        }
    }
}

impl CleanupConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

/// Tears down an attempt's VM and deletes its workspace.
///
/// Blocking: the worker does nothing else for the grace period plus the
/// teardown. Nothing here fails the worker; every error is logged and
/// swallowed.
#[derive(Clone)]
pub struct Cleanup {
    invoker: Arc<dyn ProcessInvoker>,
    config: CleanupConfig,
}

impl std::fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cleanup")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Cleanup {
    pub fn new(invoker: Arc<dyn ProcessInvoker>, config: CleanupConfig) -> Self {
        Self { invoker, config }
    }

    /// Wait out the grace period, destroy the VM, remove the workspace.
    pub async fn cleanup(&self, workspace: Workspace) {
        let grace = self.config.grace_period();
        tracing::info!(
            workspace = %workspace.root().display(),
            grace_secs = grace.as_secs(),
            "cleaning up workspace"
        );
        tokio::time::sleep(grace).await;

        self.destroy_vm(&workspace).await;

        if let Err(err) = tokio::fs::remove_dir_all(workspace.root()).await {
            tracing::warn!(
                workspace = %workspace.root().display(),
                error = %err,
                "failed to remove workspace"
            );
        }
    }

    fn state_dir(&self, workspace: &Workspace) -> PathBuf {
        workspace.checkout_dir().join(&self.config.vagrant_state_dir)
    }

    async fn destroy_vm(&self, workspace: &Workspace) {
        let spec = CommandSpec::new(&self.config.vagrant_program)
            .args(["destroy", "-f"])
            .current_dir(self.state_dir(workspace));

        match self.invoker.invoke(&spec).await {
            Ok(output) if output.success() => tracing::debug!("vm destroyed"),
            Ok(output) => tracing::warn!(status = ?output.status, "vm teardown failed"),
            Err(err) => tracing::warn!(error = %err, "vm teardown skipped"),
        }
    }
}

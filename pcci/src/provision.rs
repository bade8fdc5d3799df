use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{WorkerError, WorkerResult};
use crate::job::JobDescriptor;
use crate::process::{CommandSpec, ProcessInvoker};

/// Subdirectory of a workspace holding the checkout.
pub const CHECKOUT_DIR: &str = "job";

/// Name prefix of workspace directories under the work root.
pub const WORKSPACE_PREFIX: &str = "pcci-";

/// How projects are checked out.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutConfig {
    /// Base URL projects are cloned from, `<base>/<org>/<project>`.
    pub clone_base: String,
    /// Source-control executable.
    pub git_program: String,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            clone_base: "https://github.com".to_string(),
            git_program: "git".to_string(),
        }
    }
}

/// Ephemeral directory owned by a single attempt.
///
/// Holds the checkout plus whatever VM state the harness leaves behind.
/// Not `Clone`: exactly one owner hands it to cleanup.
#[derive(Debug, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Wrap an existing directory.
    pub fn from_path(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the project is cloned.
    pub fn checkout_dir(&self) -> PathBuf {
        self.root.join(CHECKOUT_DIR)
    }
}

/// Creates a workspace per attempt and checks the job's revision out into it.
#[derive(Clone)]
pub struct EnvironmentProvisioner {
    invoker: Arc<dyn ProcessInvoker>,
    config: CheckoutConfig,
    work_root: PathBuf,
}

impl std::fmt::Debug for EnvironmentProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentProvisioner")
            .field("config", &self.config)
            .field("work_root", &self.work_root)
            .finish_non_exhaustive()
    }
}

impl EnvironmentProvisioner {
    pub fn new(
        invoker: Arc<dyn ProcessInvoker>,
        config: CheckoutConfig,
        work_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            invoker,
            config,
            work_root: work_root.into(),
        }
    }

    /// Create a fresh workspace and check `job` out into it.
    ///
    /// A checkout that exits non-zero is logged and otherwise ignored: the
    /// attempt goes ahead and fails in the harness. Only spawn failures and
    /// filesystem errors are returned, and the workspace is removed before
    /// they are.
    pub async fn provision(&self, job: &JobDescriptor) -> WorkerResult<Workspace> {
        tokio::fs::create_dir_all(&self.work_root)
            .await
            .map_err(|e| WorkerError::io("creating work root", &self.work_root, e))?;
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(&self.work_root)
            .map_err(|e| WorkerError::io("creating workspace", &self.work_root, e))?;
        let checkout = dir.path().join(CHECKOUT_DIR);

        tracing::info!(%job, workspace = %dir.path().display(), "working on job");

        match self.checkout(job, &checkout).await {
            Ok(()) => Ok(Workspace::from_path(dir.keep())),
            Err(err) => {
                let root = dir.path().to_path_buf();
                if let Err(remove_err) = dir.close() {
                    tracing::warn!(
                        workspace = %root.display(),
                        error = %remove_err,
                        "failed to remove workspace"
                    );
                }
                Err(err)
            }
        }
    }

    async fn checkout(&self, job: &JobDescriptor, checkout: &Path) -> WorkerResult<()> {
        self.git(
            CommandSpec::new(&self.config.git_program)
                .arg("clone")
                .arg(job.clone_url(&self.config.clone_base))
                .arg(checkout.to_string_lossy()),
        )
        .await?;

        if let (Some(refspec), Some(branch)) = (job.pr_refspec(), job.local_branch()) {
            self.git(
                CommandSpec::new(&self.config.git_program)
                    .args(["fetch", "origin"])
                    .arg(refspec)
                    .current_dir(checkout),
            )
            .await?;
            self.git(
                CommandSpec::new(&self.config.git_program)
                    .arg("checkout")
                    .arg(branch)
                    .current_dir(checkout),
            )
            .await?;
        }
        Ok(())
    }

    async fn git(&self, spec: CommandSpec) -> WorkerResult<()> {
        let output = self.invoker.invoke(&spec).await?;
        if !output.success() {
            tracing::warn!(
                command = %spec.display(),
                status = ?output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "checkout step failed"
            );
        }
        Ok(())
    }
}

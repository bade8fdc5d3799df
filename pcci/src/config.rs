use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cleanup::CleanupConfig;
use crate::harness::HarnessConfig;
use crate::provision::CheckoutConfig;
use crate::retry::RetryPolicy;
use crate::store::StoreKeys;

/// Configuration for one worker invocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Ceiling on concurrently registered workers across all hosts.
    pub max_workers: u32,
    /// Pause before exiting when the queue is empty, in seconds.
    pub idle_wait_secs: u64,
    /// Directory workspaces are created under.
    pub work_root: PathBuf,
    /// Directory artifacts are written to.
    pub log_dir: PathBuf,
    /// Source checkout settings.
    pub checkout: CheckoutConfig,
    /// Dependency install and harness settings.
    pub harness: HarnessConfig,
    /// VM teardown and workspace removal settings.
    pub cleanup: CleanupConfig,
    /// Attempt budget and slow-run cutoff.
    pub retry: RetryPolicy,
    /// Coordination store key names.
    pub store_keys: StoreKeys,
}

impl WorkerConfig {
    pub fn idle_wait(&self) -> Duration {
        Duration::from_secs(self.idle_wait_secs)
    }

    /// Set the worker ceiling.
    pub fn with_max_workers(mut self, max_workers: u32) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Set the idle wait.
    pub fn with_idle_wait(mut self, secs: u64) -> Self {
        self.idle_wait_secs = secs;
        self
    }

    /// Set the cleanup grace period.
    pub fn with_grace_period(mut self, secs: u64) -> Self {
        self.cleanup.grace_period_secs = secs;
        self
    }

    /// Set the workspace root.
    pub fn with_work_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_root = dir.into();
        self
    }

    /// Set the artifact directory.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: 1,
            idle_wait_secs: 5,
            work_root: std::env::temp_dir(),
            log_dir: PathBuf::from("logs"),
            checkout: CheckoutConfig::default(),
            harness: HarnessConfig::default(),
            cleanup: CleanupConfig::default(),
            retry: RetryPolicy::default(),
            store_keys: StoreKeys::default(),
        }
    }
}

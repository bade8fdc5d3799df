use std::fmt;
use std::sync::Arc;

use crate::cleanup::Cleanup;
use crate::config::WorkerConfig;
use crate::harness::{FailureClassifier, HarnessRunner};
use crate::job::WorkerId;
use crate::process::{ProcessInvoker, SystemInvoker};
use crate::provision::EnvironmentProvisioner;
use crate::store::CoordinationStore;

use super::worker::{ProvisionedAttempts, Worker};

/// Builder for [`Worker`].
///
/// The coordination store is required. The invoker defaults to
/// [`SystemInvoker`] and the classifier to the configured signatures.
pub struct WorkerBuilder {
    config: WorkerConfig,
    store: Option<Arc<dyn CoordinationStore>>,
    invoker: Option<Arc<dyn ProcessInvoker>>,
    classifier: Option<Arc<dyn FailureClassifier>>,
    worker_id: Option<WorkerId>,
}

impl fmt::Debug for WorkerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerBuilder")
            .field("config", &self.config)
            .field("store_set", &self.store.is_some())
            .field("invoker_set", &self.invoker.is_some())
            .field("classifier_set", &self.classifier.is_some())
            .field("worker_id", &self.worker_id)
            .finish()
    }
}

impl WorkerBuilder {
    /// Create a new builder with the given worker configuration.
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            store: None,
            invoker: None,
            classifier: None,
            worker_id: None,
        }
    }

    /// Set the coordination store.
    pub fn with_store(mut self, store: Arc<dyn CoordinationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the process invoker.
    pub fn with_invoker(mut self, invoker: Arc<dyn ProcessInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// Replace the signature-based harness failure classifier.
    pub fn with_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Use a fixed worker id instead of a fresh one.
    pub fn with_worker_id(mut self, worker_id: WorkerId) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    /// Build the [`Worker`].
    ///
    /// # Errors
    ///
    /// Returns an error if the store is missing or a configured command line
    /// is empty.
    pub fn build(self) -> anyhow::Result<Worker> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store dependency missing"))?;
        if self.config.harness.install_command.is_empty() {
            anyhow::bail!("install command is empty");
        }
        if self.config.harness.harness_command.is_empty() {
            anyhow::bail!("harness command is empty");
        }

        let invoker = self
            .invoker
            .unwrap_or_else(|| Arc::new(SystemInvoker) as Arc<dyn ProcessInvoker>);
        let runner = match self.classifier {
            Some(classifier) => HarnessRunner::with_classifier(
                Arc::clone(&invoker),
                self.config.harness.clone(),
                classifier,
            ),
            None => HarnessRunner::new(Arc::clone(&invoker), self.config.harness.clone()),
        };
        let provisioner = EnvironmentProvisioner::new(
            Arc::clone(&invoker),
            self.config.checkout.clone(),
            self.config.work_root.clone(),
        );
        let cleanup = Cleanup::new(invoker, self.config.cleanup.clone());

        Ok(Worker::new(
            self.worker_id.unwrap_or_default(),
            self.config,
            store,
            ProvisionedAttempts::new(provisioner, runner, cleanup),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_requires_store() {
        let err = WorkerBuilder::new(WorkerConfig::default())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("store dependency missing"));
    }

    #[test]
    fn test_debug_shows_which_dependencies_are_set() {
        let builder = WorkerBuilder::new(WorkerConfig::default())
            .with_invoker(Arc::new(SystemInvoker));
        let debug = format!("{builder:?}");
        assert!(debug.contains("store_set: false"));
        assert!(debug.contains("invoker_set: true"));
    }
}

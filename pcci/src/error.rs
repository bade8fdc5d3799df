use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::job::MalformedJobDescriptor;
use crate::process::SpawnError;

/// Errors that abort a worker outright.
///
/// Everything else (failed checkout, failing harness, teardown trouble) is
/// folded into an attempt's outcome and resolved by the retry loop.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// A required executable could not be started.
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// The leased queue item was not `org/project/pr`.
    #[error(transparent)]
    MalformedJob(#[from] MalformedJobDescriptor),

    /// The coordination store failed.
    #[error("coordination store error: {0:#}")]
    Store(#[source] anyhow::Error),

    /// A configured command line is empty.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Local filesystem failure.
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl WorkerError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

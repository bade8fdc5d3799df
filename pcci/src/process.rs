//! Invocation of external executables.
//!
//! Every step that shells out (checkout, dependency install, harness, VM
//! teardown) goes through [`ProcessInvoker`] so the lifecycle can be driven
//! by a scripted invoker in tests.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::Instrument;

/// The executable could not be started at all.
///
/// A non-zero exit is not a spawn error; it is reported through
/// [`ProcessOutput::status`].
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("executable not found: {command}")]
    NotFound { command: String },

    #[error("permission denied running {command}")]
    PermissionDenied { command: String },

    #[error("failed to run {command}: {source}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },
}

impl SpawnError {
    pub fn from_io(command: String, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound { command },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { command },
            _ => Self::Io { command, source },
        }
    }
}

/// A command line plus the environment it runs in.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Variables layered on top of the inherited environment.
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    /// Build from an argv vector; `None` when it is empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone()).args(args))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// The command line as a single string, for logs and errors.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished process.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProcessOutput {
    /// Exit code; `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    /// Returns true when the process exited with code 0.
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs external executables to completion.
#[async_trait]
pub trait ProcessInvoker: Send + Sync {
    /// Run `spec`, wait for it to exit and capture both output streams.
    async fn invoke(&self, spec: &CommandSpec) -> Result<ProcessOutput, SpawnError>;
}

/// [`ProcessInvoker`] that spawns real child processes.
///
/// Children are not killed if the invoking future is dropped, so an
/// interrupted worker leaves its harness run orphaned rather than aborted.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemInvoker;

#[async_trait]
impl ProcessInvoker for SystemInvoker {
    async fn invoke(&self, spec: &CommandSpec) -> Result<ProcessOutput, SpawnError> {
        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(&spec.args).envs(&spec.env).kill_on_drop(false);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        let span = crate::telemetry::command_span(&spec.display());
        let output = async {
            tracing::debug!(cwd = ?spec.cwd, "spawning");
            let output = cmd.output().await;
            if let Ok(output) = &output {
                tracing::debug!(status = ?output.status.code(), "process exited");
            }
            output
        }
        .instrument(span)
        .await
        .map_err(|e| SpawnError::from_io(spec.display(), e))?;

        Ok(ProcessOutput {
            status: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

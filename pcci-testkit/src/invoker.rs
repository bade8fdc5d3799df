use async_trait::async_trait;
use parking_lot::Mutex;
use pcci::{CommandSpec, ProcessInvoker, ProcessOutput, SpawnError};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Canned result for one invocation.
#[derive(Clone, Debug)]
pub enum Scripted {
    /// The process ran and exited.
    Exit {
        status: i32,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        /// How long the process "runs", on the tokio clock.
        delay: Duration,
    },
    /// The executable could not be started.
    SpawnFailure(io::ErrorKind),
}

impl Scripted {
    pub fn success() -> Self {
        Self::exit(0)
    }

    pub fn exit(status: i32) -> Self {
        Self::Exit {
            status,
            stdout: Vec::new(),
            stderr: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn not_found() -> Self {
        Self::SpawnFailure(io::ErrorKind::NotFound)
    }

    pub fn with_stdout(mut self, bytes: impl AsRef<[u8]>) -> Self {
        if let Self::Exit { stdout, .. } = &mut self {
            *stdout = bytes.as_ref().to_vec();
        }
        self
    }

    pub fn with_stderr(mut self, bytes: impl AsRef<[u8]>) -> Self {
        if let Self::Exit { stderr, .. } = &mut self {
            *stderr = bytes.as_ref().to_vec();
        }
        self
    }

    /// Make the process take `secs` seconds.
    pub fn taking(mut self, secs: u64) -> Self {
        if let Self::Exit { delay, .. } = &mut self {
            *delay = Duration::from_secs(secs);
        }
        self
    }
}

type Hook = Arc<dyn Fn(&CommandSpec) + Send + Sync>;

struct Rule {
    program: String,
    args_prefix: Vec<String>,
    responses: VecDeque<Scripted>,
    hook: Option<Hook>,
}

impl Rule {
    fn matches(&self, spec: &CommandSpec) -> bool {
        spec.program == self.program && spec.args.starts_with(&self.args_prefix)
    }
}

/// [`ProcessInvoker`] that records every command and answers from a script.
///
/// Rules match on program plus a leading-argument prefix; the first
/// matching rule wins. A rule's responses are consumed in order and the last
/// one repeats. Unmatched commands exit 0 with no output.
#[derive(Clone, Default)]
pub struct ScriptedInvoker {
    rules: Arc<Mutex<Vec<Rule>>>,
    calls: Arc<Mutex<Vec<CommandSpec>>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `program args_prefix..` with `responses`, in order.
    pub fn on<I>(self, program: &str, args_prefix: &[&str], responses: I) -> Self
    where
        I: IntoIterator<Item = Scripted>,
    {
        self.rules.lock().push(Rule {
            program: program.to_string(),
            args_prefix: args_prefix.iter().map(|s| s.to_string()).collect(),
            responses: responses.into_iter().collect(),
            hook: None,
        });
        self
    }

    /// Run `hook` whenever `program args_prefix..` is invoked, before it
    /// answers. Used to fake side effects such as a clone creating files.
    pub fn with_hook<F>(self, program: &str, args_prefix: &[&str], hook: F) -> Self
    where
        F: Fn(&CommandSpec) + Send + Sync + 'static,
    {
        self.rules.lock().push(Rule {
            program: program.to_string(),
            args_prefix: args_prefix.iter().map(|s| s.to_string()).collect(),
            responses: VecDeque::new(),
            hook: Some(Arc::new(hook)),
        });
        self
    }

    /// Every command invoked so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().clone()
    }

    /// Commands whose program is `program`.
    pub fn calls_to(&self, program: &str) -> Vec<CommandSpec> {
        self.calls
            .lock()
            .iter()
            .filter(|spec| spec.program == program)
            .cloned()
            .collect()
    }

    /// Command lines, joined with spaces.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls.lock().iter().map(CommandSpec::display).collect()
    }

    pub fn assert_call_count_eq(&self, program: &str, expected: usize) {
        let actual = self.calls_to(program).len();
        assert_eq!(
            actual, expected,
            "Expected {} calls to {}, got {}",
            expected, program, actual
        );
    }

    fn answer(&self, spec: &CommandSpec) -> Scripted {
        let mut rules = self.rules.lock();
        let mut response = None;
        for rule in rules.iter_mut().filter(|rule| rule.matches(spec)) {
            if let Some(hook) = &rule.hook {
                hook(spec);
            }
            if response.is_none() && !rule.responses.is_empty() {
                response = if rule.responses.len() > 1 {
                    rule.responses.pop_front()
                } else {
                    rule.responses.front().cloned()
                };
            }
        }
        response.unwrap_or_else(Scripted::success)
    }
}

impl std::fmt::Debug for ScriptedInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedInvoker")
            .field("rules", &self.rules.lock().len())
            .field("calls", &self.calls.lock().len())
            .finish()
    }
}

#[async_trait]
impl ProcessInvoker for ScriptedInvoker {
    async fn invoke(&self, spec: &CommandSpec) -> Result<ProcessOutput, SpawnError> {
        self.calls.lock().push(spec.clone());

        match self.answer(spec) {
            Scripted::Exit {
                status,
                stdout,
                stderr,
                delay,
            } => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(ProcessOutput {
                    status: Some(status),
                    stdout,
                    stderr,
                })
            }
            Scripted::SpawnFailure(kind) => {
                Err(SpawnError::from_io(spec.display(), io::Error::from(kind)))
            }
        }
    }
}

use pcci::{CommandSpec, ExecutionOutcome, JobDescriptor, WorkerConfig, SSH_DISCONNECT_SIGNATURE};
use std::path::Path;

/// Parse a descriptor that is known to be valid.
pub fn job(raw: &str) -> JobDescriptor {
    JobDescriptor::parse(raw).expect("fixture job descriptor must be valid")
}

pub fn outcome(success: bool, elapsed_seconds: u64) -> ExecutionOutcome {
    ExecutionOutcome {
        success,
        elapsed_seconds,
        ..Default::default()
    }
}

/// Harness stdout of a run that lost its SSH connection to the test VM.
pub fn disconnect_log() -> String {
    format!(
        "Hypervisor for ubuntu-server-1404-x64 is vagrant\n\
         Warning: ssh connection to ubuntu-server-1404-x64 has been terminated\n\
         {SSH_DISCONNECT_SIGNATURE}\n\
         Failures:\n"
    )
}

/// Worker configuration for tests: everything under `root`, no grace
/// period and no idle wait.
pub fn test_config(root: &Path) -> WorkerConfig {
    WorkerConfig::default()
        .with_work_root(root.join("work"))
        .with_log_dir(root.join("logs"))
        .with_grace_period(0)
        .with_idle_wait(0)
}

/// Hook for `git clone` that creates node set files in the clone target,
/// standing in for a repository that ships them.
pub fn clone_creates_nodesets(
    names: &'static [&'static str],
) -> impl Fn(&CommandSpec) + Send + Sync + 'static {
    move |spec: &CommandSpec| {
        let Some(target) = spec.args.last() else {
            return;
        };
        let dir = Path::new(target).join("spec/acceptance/nodesets");
        std::fs::create_dir_all(&dir).expect("creating nodesets dir");
        for name in names {
            std::fs::write(dir.join(format!("{name}.yml")), "HOSTS: {}\n")
                .expect("writing nodeset");
        }
    }
}

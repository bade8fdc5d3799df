//! Dry run of one worker invocation with no Redis, git, bundler or vagrant.
//!
//! Uses pcci-testkit's in-memory store and a scripted invoker that fails the
//! harness once before passing, so the retry loop is visible in the logs.
//!
//! ```text
//! RUST_LOG=pcci=debug cargo run -p pcci --example dry_run
//! ```

use std::sync::Arc;

use pcci::{ShutdownToken, WorkerBuilder, WorkerReport};
use pcci_testkit::fixtures::test_config;
use pcci_testkit::{InMemoryStore, Scripted, ScriptedInvoker};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pcci=info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let root = tempfile::tempdir()?;
    let store = InMemoryStore::running_with(["puppetlabs/puppetlabs-ntp/42"]);
    let invoker = ScriptedInvoker::new().on(
        "bundle",
        &["exec"],
        [
            Scripted::exit(1).with_stdout("1 example, 1 failure\n"),
            Scripted::success().with_stdout("1 example, 0 failures\n"),
        ],
    );

    let worker = WorkerBuilder::new(test_config(root.path()))
        .with_store(Arc::new(store.clone()))
        .with_invoker(Arc::new(invoker.clone()))
        .build()?;

    let report = worker.run(ShutdownToken::new()).await?;
    if let WorkerReport::Completed { artifact, attempts, .. } = &report {
        println!("{} after {attempts} attempts", artifact.verdict.summary());
        println!("log written to {}", artifact.artifact_id);
        print!("{}", std::fs::read_to_string(&artifact.path)?);
    }
    for line in invoker.command_lines() {
        println!("ran: {line}");
    }
    Ok(())
}

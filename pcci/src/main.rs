//! pcci - acceptance-test worker CLI.
//!
//! `pcci run` is one worker invocation; an external supervisor (cron, a
//! systemd timer) is expected to start it again. The other subcommands are
//! the operator surface over the shared coordination store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use pcci::{
    CoordinationStore, JobDescriptor, RedisStore, ShutdownToken, WorkerBuilder, WorkerConfig,
    WorkerReport,
};

/// pcci - self-registering acceptance-test worker
#[derive(Parser, Debug)]
#[command(name = "pcci")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Coordination store URL
    #[arg(long, env = "PCCI_REDIS_URL", default_value = "redis://localhost:6379/0")]
    redis_url: String,

    /// JSON configuration file; flags below override it
    #[arg(short, long, env = "PCCI_CONFIG")]
    config: Option<PathBuf>,

    /// Ceiling on concurrently registered workers
    #[arg(long, env = "PCCI_MAX_WORKERS")]
    max_workers: Option<u32>,

    /// Directory artifacts are written to
    #[arg(long, env = "PCCI_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Directory workspaces are created under
    #[arg(long, env = "PCCI_WORK_ROOT")]
    work_root: Option<PathBuf>,

    /// Seconds to wait before destroying a test VM
    #[arg(long, env = "PCCI_GRACE_PERIOD")]
    grace_period: Option<u64>,

    /// Write Prometheus metrics to this file when the worker exits
    #[cfg(feature = "metrics")]
    #[arg(long, env = "PCCI_METRICS_TEXTFILE")]
    metrics_textfile: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one worker invocation (default)
    Run,

    /// Validate and append jobs to the pending queue
    Submit {
        /// Jobs as `org/project/pr`, where pr is a number or `master`
        #[arg(required = true)]
        jobs: Vec<String>,
    },

    /// Set the run flag so workers take new work
    Enable,

    /// Clear the run flag so workers stand down
    Disable,

    /// Print the shared state as JSON
    Status,
}

impl Cli {
    async fn worker_config(&self) -> Result<WorkerConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => WorkerConfig::default(),
        };

        if let Some(max_workers) = self.max_workers {
            config = config.with_max_workers(max_workers);
        }
        if let Some(log_dir) = &self.log_dir {
            config = config.with_log_dir(log_dir);
        }
        if let Some(work_root) = &self.work_root {
            config = config.with_work_root(work_root);
        }
        if let Some(secs) = self.grace_period {
            config = config.with_grace_period(secs);
        }
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries only the verdict
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pcci=info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    #[cfg(feature = "metrics")]
    pcci::metrics::init_metrics()?;

    let config = cli.worker_config().await?;
    let store = RedisStore::connect(&cli.redis_url, config.store_keys.clone())
        .await
        .with_context(|| format!("connecting to {}", cli.redis_url))?;
    let store: Arc<dyn CoordinationStore> = Arc::new(store);

    let result = match cli.command.as_ref().unwrap_or(&Commands::Run) {
        Commands::Run => run(config, store).await,
        Commands::Submit { jobs } => submit(store.as_ref(), jobs).await,
        Commands::Enable => store.set_run_enabled(true).await,
        Commands::Disable => store.set_run_enabled(false).await,
        Commands::Status => {
            let snapshot = store.snapshot().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
    };

    #[cfg(feature = "metrics")]
    if let Some(path) = &cli.metrics_textfile {
        let text = pcci::metrics::gather_metrics()?;
        tokio::fs::write(path, text)
            .await
            .with_context(|| format!("writing metrics to {}", path.display()))?;
    }

    result
}

async fn run(config: WorkerConfig, store: Arc<dyn CoordinationStore>) -> Result<()> {
    let worker = WorkerBuilder::new(config).with_store(store).build()?;

    let shutdown = ShutdownToken::new();
    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received");
            interrupt.cancel();
        }
    });

    let report = worker.run(shutdown).await?;
    if let WorkerReport::Completed { artifact, .. } = &report {
        println!("{}", artifact.verdict.summary());
        println!("log written to {}", artifact.artifact_id);
    }
    tracing::info!(?report, "worker finished");
    Ok(())
}

async fn submit(store: &dyn CoordinationStore, jobs: &[String]) -> Result<()> {
    // Validate everything before pushing anything
    let parsed = jobs
        .iter()
        .map(|raw| JobDescriptor::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;
    for job in parsed {
        store.push_job(&job.to_string()).await?;
        tracing::info!(%job, "job submitted");
    }
    Ok(())
}

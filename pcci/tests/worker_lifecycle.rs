//! End-to-end worker invocations against the in-memory store and a scripted
//! invoker.

use std::sync::Arc;
use std::time::Duration;

use pcci::{
    CoordinationStore, ShutdownToken, StopReason, Verdict, Worker, WorkerBuilder, WorkerConfig,
    WorkerError, WorkerReport, HARNESS_FAILURES_DIR,
};
use pcci_testkit::fixtures::{disconnect_log, test_config};
use pcci_testkit::{InMemoryStore, Scripted, ScriptedInvoker};
use tempfile::TempDir;

struct Harness {
    root: TempDir,
    store: InMemoryStore,
    invoker: ScriptedInvoker,
}

impl Harness {
    fn new(store: InMemoryStore, invoker: ScriptedInvoker) -> Self {
        Self {
            root: TempDir::new().unwrap(),
            store,
            invoker,
        }
    }

    fn worker(&self) -> Worker {
        self.worker_with(test_config(self.root.path()))
    }

    fn worker_with(&self, config: WorkerConfig) -> Worker {
        WorkerBuilder::new(config)
            .with_store(Arc::new(self.store.clone()))
            .with_invoker(Arc::new(self.invoker.clone()))
            .build()
            .unwrap()
    }

    fn work_root_entries(&self) -> usize {
        match std::fs::read_dir(self.root.path().join("work")) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }

    fn artifact(&self, artifact_id: &str) -> String {
        std::fs::read_to_string(self.root.path().join("logs").join(artifact_id)).unwrap()
    }
}

fn completed(report: &WorkerReport) -> (&pcci::PublishedArtifact, u32, StopReason) {
    match report {
        WorkerReport::Completed {
            artifact,
            attempts,
            stop_reason,
            ..
        } => (artifact, *attempts, *stop_reason),
        other => panic!("expected a completed job, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_default_branch_passes_first_time() {
    let invoker = ScriptedInvoker::new().on(
        "bundle",
        &["exec"],
        [Scripted::success().with_stdout("5 examples, 0 failures\n").taking(300)],
    );
    let harness = Harness::new(InMemoryStore::running_with(["acme/widgets/master"]), invoker);

    let report = harness.worker().run(ShutdownToken::new()).await.unwrap();

    let (artifact, attempts, stop_reason) = completed(&report);
    assert_eq!(attempts, 1);
    assert_eq!(stop_reason, StopReason::Succeeded);
    assert_eq!(artifact.verdict, Verdict::Pass);
    assert!(artifact.artifact_id.starts_with("acme+widgets+master+"));
    assert!(artifact.artifact_id.ends_with("+PASS"));
    assert_eq!(harness.store.completed(), vec![artifact.artifact_id.clone()]);
    harness.store.assert_slot_released_once();
    assert_eq!(harness.store.workers(), Some(0));

    let body = harness.artifact(&artifact.artifact_id);
    assert!(body.starts_with("Test log\n"));
    assert!(body.contains("acme/widgets PR # master\n"));
    assert!(body.contains("Took 300 Seconds\n"));
    assert!(body.contains("Tests passed\n"));
    assert!(body.ends_with("5 examples, 0 failures\n"));

    // No pull request fetch for the default branch
    harness.invoker.assert_call_count_eq("git", 1);
    // The retained workspace is torn down after reporting
    harness.invoker.assert_call_count_eq("vagrant", 1);
    assert_eq!(harness.work_root_entries(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_empty_queue_stands_down_without_artifact() {
    let harness = Harness::new(
        InMemoryStore::running_with(Vec::<String>::new()),
        ScriptedInvoker::new(),
    );

    let report = harness.worker().run(ShutdownToken::new()).await.unwrap();

    assert_eq!(report, WorkerReport::NoWork);
    harness.store.assert_slot_released_once();
    assert_eq!(harness.store.workers(), Some(0));
    assert!(harness.store.completed().is_empty());
    assert!(harness.invoker.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_three_failures_report_the_last_attempt() {
    let invoker = ScriptedInvoker::new().on(
        "bundle",
        &["exec"],
        [
            Scripted::exit(1).with_stdout("attempt one\n").taking(100),
            Scripted::exit(1).with_stdout("attempt two\n").taking(200),
            Scripted::exit(1).with_stdout("attempt three\n").taking(300),
        ],
    );
    let harness = Harness::new(InMemoryStore::running_with(["acme/widgets/17"]), invoker);

    let report = harness.worker().run(ShutdownToken::new()).await.unwrap();

    let (artifact, attempts, stop_reason) = completed(&report);
    assert_eq!(attempts, 3);
    assert_eq!(stop_reason, StopReason::AttemptsExhausted);
    assert_eq!(artifact.verdict, Verdict::Fail);
    assert!(artifact.artifact_id.ends_with("+FAIL"));

    let body = harness.artifact(&artifact.artifact_id);
    assert!(body.contains("Took 300 Seconds\n"));
    assert!(body.contains("attempt three\n"));
    assert!(!body.contains("attempt one"));

    // Three full provision+run cycles, each torn down
    harness.invoker.assert_call_count_eq("git", 9);
    assert_eq!(
        harness
            .invoker
            .command_lines()
            .iter()
            .filter(|line| line.starts_with("bundle exec"))
            .count(),
        3
    );
    harness.invoker.assert_call_count_eq("vagrant", 3);
    assert_eq!(harness.work_root_entries(), 0);
    harness.store.assert_slot_released_once();
}

#[tokio::test(start_paused = true)]
async fn test_slow_failure_is_not_retried() {
    let invoker = ScriptedInvoker::new().on(
        "bundle",
        &["exec"],
        [Scripted::exit(1).taking(1500), Scripted::success()],
    );
    let harness = Harness::new(InMemoryStore::running_with(["acme/widgets/5"]), invoker);

    let report = harness.worker().run(ShutdownToken::new()).await.unwrap();

    let (artifact, attempts, stop_reason) = completed(&report);
    assert_eq!(attempts, 1);
    assert_eq!(stop_reason, StopReason::TooSlow);
    assert_eq!(artifact.verdict, Verdict::Fail);
    assert!(harness
        .artifact(&artifact.artifact_id)
        .contains("Took 1500 Seconds\n"));
    harness.invoker.assert_call_count_eq("vagrant", 1);
    harness.store.assert_slot_released_once();
}

#[tokio::test(start_paused = true)]
async fn test_at_capacity_touches_nothing() {
    let store = InMemoryStore::running_with(["acme/widgets/master"]);
    store.set_workers(1);
    let harness = Harness::new(store, ScriptedInvoker::new());

    let report = harness.worker().run(ShutdownToken::new()).await.unwrap();

    assert_eq!(report, WorkerReport::AtCapacity);
    assert_eq!(harness.store.workers(), Some(1));
    assert_eq!(harness.store.release_count(), 0);
    assert_eq!(harness.store.pending(), vec!["acme/widgets/master".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_run_flag_absent_stands_down() {
    let store = InMemoryStore::new();
    store.push_job("acme/widgets/master").await.unwrap();
    let harness = Harness::new(store, ScriptedInvoker::new());

    let report = harness.worker().run(ShutdownToken::new()).await.unwrap();

    assert_eq!(report, WorkerReport::StandDown);
    harness.store.assert_slot_released_once();
    assert_eq!(harness.store.pending().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_job_is_fatal_and_releases_slot() {
    let harness = Harness::new(
        InMemoryStore::running_with(["not-a-descriptor"]),
        ScriptedInvoker::new(),
    );

    let err = harness.worker().run(ShutdownToken::new()).await.unwrap_err();

    assert!(matches!(err, WorkerError::MalformedJob(_)));
    harness.store.assert_slot_released_once();
    assert!(harness.store.pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_spawn_failure_is_fatal_and_cleans_up() {
    let invoker = ScriptedInvoker::new().on("bundle", &[], [Scripted::not_found()]);
    let harness = Harness::new(InMemoryStore::running_with(["acme/widgets/8"]), invoker);

    let err = harness.worker().run(ShutdownToken::new()).await.unwrap_err();

    assert!(matches!(err, WorkerError::Spawn(_)));
    harness.store.assert_slot_released_once();
    assert!(harness.store.completed().is_empty());
    assert_eq!(harness.work_root_entries(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_git_is_fatal_and_leaves_no_workspace() {
    let invoker = ScriptedInvoker::new().on("git", &[], [Scripted::not_found()]);
    let harness = Harness::new(InMemoryStore::running_with(["acme/widgets/3"]), invoker);

    let err = harness.worker().run(ShutdownToken::new()).await.unwrap_err();

    assert!(matches!(err, WorkerError::Spawn(_)));
    harness.store.assert_slot_released_once();
    assert!(harness.store.completed().is_empty());
    assert_eq!(harness.work_root_entries(), 0);
    assert!(harness.invoker.calls_to("bundle").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_store_failure_releases_slot() {
    let store = InMemoryStore::running_with(["acme/widgets/8"]);
    store.fail_pops();
    let harness = Harness::new(store, ScriptedInvoker::new());

    let err = harness.worker().run(ShutdownToken::new()).await.unwrap_err();

    assert!(matches!(err, WorkerError::Store(_)));
    harness.store.assert_slot_released_once();
}

#[tokio::test(start_paused = true)]
async fn test_harness_failure_artifact_is_nested() {
    let invoker = ScriptedInvoker::new().on(
        "bundle",
        &["exec"],
        [Scripted::exit(1).with_stdout(disconnect_log()).taking(1200)],
    );
    let harness = Harness::new(InMemoryStore::running_with(["acme/widgets/9"]), invoker);

    let report = harness.worker().run(ShutdownToken::new()).await.unwrap();

    let (artifact, _, _) = completed(&report);
    assert!(artifact
        .artifact_id
        .starts_with(&format!("{HARNESS_FAILURES_DIR}/acme+widgets+9+")));
    assert!(artifact.path.is_file());
    assert_eq!(harness.store.completed(), vec![artifact.artifact_id.clone()]);
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_releases_slot_and_abandons_run() {
    let invoker = ScriptedInvoker::new().on(
        "bundle",
        &["exec"],
        [Scripted::success().taking(10_000)],
    );
    let harness = Harness::new(InMemoryStore::running_with(["acme/widgets/11"]), invoker);
    let worker = harness.worker();
    let shutdown = ShutdownToken::new();

    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        interrupt.cancel();
    });

    let report = worker.run(shutdown).await.unwrap();

    assert_eq!(report, WorkerReport::Interrupted);
    harness.store.assert_slot_released_once();
    assert_eq!(harness.store.worker_count().await.unwrap(), 0);
    assert!(harness.store.completed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_during_teardown_keeps_the_report() {
    let harness = Harness::new(
        InMemoryStore::running_with(["acme/widgets/master"]),
        ScriptedInvoker::new(),
    );
    let worker = harness.worker_with(test_config(harness.root.path()).with_grace_period(120));
    let shutdown = ShutdownToken::new();

    // Lands inside the grace period, after the artifact is published
    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        interrupt.cancel();
    });

    let report = worker.run(shutdown).await.unwrap();

    let (artifact, attempts, stop_reason) = completed(&report);
    assert_eq!(attempts, 1);
    assert_eq!(stop_reason, StopReason::Succeeded);
    assert_eq!(harness.store.completed(), vec![artifact.artifact_id.clone()]);
    assert!(artifact.path.is_file());
    harness.store.assert_slot_released_once();
    // Teardown was cut short before the VM destroy
    harness.invoker.assert_call_count_eq("vagrant", 0);
    assert_eq!(harness.work_root_entries(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_already_cancelled_does_not_register() {
    let harness = Harness::new(
        InMemoryStore::running_with(["acme/widgets/master"]),
        ScriptedInvoker::new(),
    );
    let shutdown = ShutdownToken::new();
    shutdown.cancel();

    let report = harness.worker().run(shutdown).await.unwrap();

    assert_eq!(report, WorkerReport::Interrupted);
    assert_eq!(harness.store.acquire_count(), 0);
    assert_eq!(harness.store.pending().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_invocations_drain_queue() {
    let harness = Harness::new(
        InMemoryStore::running_with(["acme/a/1", "acme/b/2"]),
        ScriptedInvoker::new(),
    );

    for _ in 0..2 {
        let report = harness.worker().run(ShutdownToken::new()).await.unwrap();
        assert_eq!(report.verdict(), Some(Verdict::Pass));
    }
    let report = harness.worker().run(ShutdownToken::new()).await.unwrap();

    assert_eq!(report, WorkerReport::NoWork);
    assert_eq!(harness.store.completed().len(), 2);
    assert_eq!(harness.store.workers(), Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_requeued_job_gets_a_new_lease() {
    let harness = Harness::new(
        InMemoryStore::running_with(["acme/widgets/4", "acme/widgets/4"]),
        ScriptedInvoker::new(),
    );

    let mut leases = Vec::new();
    for _ in 0..2 {
        match harness.worker().run(ShutdownToken::new()).await.unwrap() {
            WorkerReport::Completed { lease_id, job, .. } => {
                assert_eq!(job.to_string(), "acme/widgets/4");
                leases.push(lease_id);
            }
            other => panic!("expected a completed job, got {other:?}"),
        }
    }

    assert_ne!(leases[0], leases[1]);
}

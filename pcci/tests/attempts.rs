//! Provisioning, harness execution and cleanup against a scripted invoker.

use std::sync::Arc;

use pcci::{
    CheckoutConfig, Cleanup, CleanupConfig, EnvironmentProvisioner, HarnessConfig, HarnessRunner,
    ProcessInvoker, WorkerError, Workspace, WORKSPACE_PREFIX,
};
use pcci_testkit::fixtures::{clone_creates_nodesets, disconnect_log, job};
use pcci_testkit::{Scripted, ScriptedInvoker};
use proptest::prelude::*;
use tempfile::TempDir;

fn provisioner(invoker: &ScriptedInvoker, root: &TempDir) -> EnvironmentProvisioner {
    EnvironmentProvisioner::new(
        Arc::new(invoker.clone()) as Arc<dyn ProcessInvoker>,
        CheckoutConfig::default(),
        root.path(),
    )
}

fn runner(invoker: &ScriptedInvoker) -> HarnessRunner {
    HarnessRunner::new(Arc::new(invoker.clone()), HarnessConfig::default())
}

fn workspace_in(root: &TempDir) -> Workspace {
    let workspace = Workspace::from_path(root.path().join("pcci-test"));
    std::fs::create_dir_all(workspace.checkout_dir()).unwrap();
    workspace
}

#[tokio::test]
async fn test_default_branch_is_cloned_without_pr_fetch() {
    let root = TempDir::new().unwrap();
    let invoker = ScriptedInvoker::new();

    let workspace = provisioner(&invoker, &root)
        .provision(&job("acme/widgets/master"))
        .await
        .unwrap();

    assert!(workspace.root().starts_with(root.path()));
    assert!(workspace.root().is_dir());
    let calls = invoker.calls_to("git");
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].args,
        vec![
            "clone".to_string(),
            "https://github.com/acme/widgets".to_string(),
            workspace.checkout_dir().to_string_lossy().into_owned(),
        ]
    );
}

#[tokio::test]
async fn test_pull_request_is_fetched_and_checked_out_after_clone() {
    let root = TempDir::new().unwrap();
    let invoker = ScriptedInvoker::new();

    let workspace = provisioner(&invoker, &root)
        .provision(&job("acme/widgets/42"))
        .await
        .unwrap();

    let lines = invoker.command_lines();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("git clone https://github.com/acme/widgets "));
    assert_eq!(lines[1], "git fetch origin pull/42/head:pr_42");
    assert_eq!(lines[2], "git checkout pr_42");

    let calls = invoker.calls();
    assert_eq!(calls[1].cwd.as_deref(), Some(workspace.checkout_dir().as_path()));
    assert_eq!(calls[2].cwd.as_deref(), Some(workspace.checkout_dir().as_path()));
}

#[tokio::test]
async fn test_each_provision_gets_a_fresh_workspace() {
    let root = TempDir::new().unwrap();
    let invoker = ScriptedInvoker::new();
    let provisioner = provisioner(&invoker, &root);

    let first = provisioner.provision(&job("acme/widgets/1")).await.unwrap();
    let second = provisioner.provision(&job("acme/widgets/1")).await.unwrap();

    assert_ne!(first.root(), second.root());
    for workspace in [&first, &second] {
        let name = workspace.root().file_name().unwrap().to_string_lossy();
        assert!(name.starts_with(WORKSPACE_PREFIX), "unexpected workspace name {name}");
        assert_eq!(workspace.root().parent(), Some(root.path()));
    }
}

#[tokio::test]
async fn test_work_root_is_created_on_demand() {
    let root = TempDir::new().unwrap();
    let invoker = ScriptedInvoker::new();
    let work_root = root.path().join("nested").join("work");
    let provisioner = EnvironmentProvisioner::new(
        Arc::new(invoker.clone()) as Arc<dyn ProcessInvoker>,
        CheckoutConfig::default(),
        &work_root,
    );

    let workspace = provisioner.provision(&job("acme/widgets/master")).await.unwrap();

    assert!(workspace.root().starts_with(&work_root));
    assert!(workspace.root().is_dir());
}

#[tokio::test]
async fn test_failed_clone_is_not_fatal() {
    let root = TempDir::new().unwrap();
    let invoker = ScriptedInvoker::new().on("git", &["clone"], [Scripted::exit(128)]);

    let result = provisioner(&invoker, &root).provision(&job("acme/widgets/3")).await;

    assert!(result.is_ok());
    invoker.assert_call_count_eq("git", 3);
}

#[tokio::test]
async fn test_missing_git_is_fatal() {
    let root = TempDir::new().unwrap();
    let invoker = ScriptedInvoker::new().on("git", &[], [Scripted::not_found()]);

    let err = provisioner(&invoker, &root)
        .provision(&job("acme/widgets/3"))
        .await
        .unwrap_err();

    assert!(matches!(err, WorkerError::Spawn(_)));
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_missing_git_during_pr_fetch_removes_workspace() {
    let root = TempDir::new().unwrap();
    let invoker = ScriptedInvoker::new()
        .with_hook("git", &["clone"], clone_creates_nodesets(&["default"]))
        .on("git", &["fetch"], [Scripted::not_found()]);

    let err = provisioner(&invoker, &root)
        .provision(&job("acme/widgets/3"))
        .await
        .unwrap_err();

    assert!(matches!(err, WorkerError::Spawn(_)));
    // The clone landed, so the workspace had content before removal
    invoker.assert_call_count_eq("git", 2);
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}

proptest! {
    #[test]
    fn prop_pr_refspec_matches_descriptor(pr in 1u32..100_000) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let root = TempDir::new().unwrap();
        let invoker = ScriptedInvoker::new();
        let raw = format!("acme/widgets/{pr}");

        runtime
            .block_on(provisioner(&invoker, &root).provision(&job(&raw)))
            .unwrap();

        let lines = invoker.command_lines();
        prop_assert_eq!(lines.len(), 3);
        prop_assert_eq!(&lines[1], &format!("git fetch origin pull/{pr}/head:pr_{pr}"));
        prop_assert_eq!(&lines[2], &format!("git checkout pr_{pr}"));
    }
}

#[tokio::test]
async fn test_harness_runs_install_then_harness_with_env() {
    let root = TempDir::new().unwrap();
    let workspace = workspace_in(&root);
    let invoker = ScriptedInvoker::new()
        .on("bundle", &["install"], [Scripted::success().with_stdout("Bundle complete!\n")])
        .on(
            "bundle",
            &["exec"],
            [Scripted::success().with_stdout("3 examples, 0 failures\n")],
        );

    let outcome = runner(&invoker).run(&workspace).await.unwrap();

    assert!(outcome.success);
    assert!(!outcome.harness_failure_detected);
    assert_eq!(outcome.install_stdout, b"Bundle complete!\n");
    assert_eq!(outcome.harness_stdout, b"3 examples, 0 failures\n");

    let lines = invoker.command_lines();
    assert_eq!(lines, vec!["bundle install", "bundle exec rspec spec/acceptance"]);

    let gem_dir = workspace.checkout_dir().join(".pcci_gems");
    assert!(gem_dir.is_dir());
    let gem_home = gem_dir.to_string_lossy().into_owned();
    for call in invoker.calls() {
        assert_eq!(call.cwd.as_deref(), Some(workspace.checkout_dir().as_path()));
        assert_eq!(
            call.env.get("GEM_HOME").map(String::as_str),
            Some(gem_home.as_str())
        );
        // No nodesets directory in this checkout
        assert!(!call.env.contains_key("BEAKER_set"));
    }
}

#[tokio::test]
async fn test_harness_selects_preferred_nodeset() {
    let root = TempDir::new().unwrap();
    let invoker = ScriptedInvoker::new()
        .with_hook("git", &["clone"], clone_creates_nodesets(&["centos-7-x64", "ubuntu-server-1404-x64"]));
    let workspace = provisioner(&invoker, &root)
        .provision(&job("acme/widgets/master"))
        .await
        .unwrap();

    runner(&invoker).run(&workspace).await.unwrap();

    let harness = invoker
        .calls_to("bundle")
        .into_iter()
        .find(|call| call.args.first().map(String::as_str) == Some("exec"))
        .unwrap();
    assert_eq!(
        harness.env.get("BEAKER_set").map(String::as_str),
        Some("ubuntu-server-1404-x64")
    );
}

#[tokio::test]
async fn test_harness_ignores_unpreferred_nodesets() {
    let root = TempDir::new().unwrap();
    let invoker = ScriptedInvoker::new()
        .with_hook("git", &["clone"], clone_creates_nodesets(&["centos-7-x64", "default"]));
    let workspace = provisioner(&invoker, &root)
        .provision(&job("acme/widgets/master"))
        .await
        .unwrap();

    runner(&invoker).run(&workspace).await.unwrap();

    assert!(invoker
        .calls_to("bundle")
        .iter()
        .all(|call| !call.env.contains_key("BEAKER_set")));
}

#[tokio::test]
async fn test_harness_failure_is_classified_from_stdout() {
    let root = TempDir::new().unwrap();
    let workspace = workspace_in(&root);
    let invoker = ScriptedInvoker::new().on(
        "bundle",
        &["exec"],
        [Scripted::exit(1).with_stdout(disconnect_log())],
    );

    let outcome = runner(&invoker).run(&workspace).await.unwrap();

    assert!(!outcome.success);
    assert!(outcome.harness_failure_detected);
}

#[tokio::test]
async fn test_ordinary_failure_is_not_a_harness_failure() {
    let root = TempDir::new().unwrap();
    let workspace = workspace_in(&root);
    let invoker = ScriptedInvoker::new().on(
        "bundle",
        &["exec"],
        [Scripted::exit(1)
            .with_stdout("1 example, 1 failure\n")
            .with_stderr("Net::SSH::Disconnect\n")],
    );

    let outcome = runner(&invoker).run(&workspace).await.unwrap();

    assert!(!outcome.success);
    assert!(!outcome.harness_failure_detected);
    assert_eq!(outcome.harness_stderr, b"Net::SSH::Disconnect\n");
}

#[tokio::test]
async fn test_failed_install_does_not_gate_harness() {
    let root = TempDir::new().unwrap();
    let workspace = workspace_in(&root);
    let invoker = ScriptedInvoker::new().on(
        "bundle",
        &["install"],
        [Scripted::exit(5).with_stderr("Could not find gem\n")],
    );

    let outcome = runner(&invoker).run(&workspace).await.unwrap();

    // Install status is not checked; the harness decides
    assert!(outcome.success);
    assert_eq!(outcome.install_stderr, b"Could not find gem\n");
    invoker.assert_call_count_eq("bundle", 2);
}

#[tokio::test(start_paused = true)]
async fn test_elapsed_covers_install_and_harness() {
    let root = TempDir::new().unwrap();
    let workspace = workspace_in(&root);
    let invoker = ScriptedInvoker::new()
        .on("bundle", &["install"], [Scripted::success().taking(200)])
        .on("bundle", &["exec"], [Scripted::exit(1).taking(1300)]);

    let outcome = runner(&invoker).run(&workspace).await.unwrap();

    assert_eq!(outcome.elapsed_seconds, 1500);
}

#[tokio::test]
async fn test_missing_bundle_is_fatal() {
    let root = TempDir::new().unwrap();
    let workspace = workspace_in(&root);
    let invoker = ScriptedInvoker::new().on("bundle", &[], [Scripted::not_found()]);

    let err = runner(&invoker).run(&workspace).await.unwrap_err();

    assert!(matches!(err, WorkerError::Spawn(_)));
}

#[tokio::test]
async fn test_cleanup_destroys_vm_and_removes_workspace() {
    let root = TempDir::new().unwrap();
    let workspace = workspace_in(&root);
    let workspace_root = workspace.root().to_path_buf();
    let invoker = ScriptedInvoker::new();
    let config = CleanupConfig {
        grace_period_secs: 0,
        ..Default::default()
    };

    Cleanup::new(Arc::new(invoker.clone()), config).cleanup(workspace).await;

    let calls = invoker.calls_to("vagrant");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args, vec!["destroy".to_string(), "-f".to_string()]);
    assert_eq!(
        calls[0].cwd.as_deref(),
        Some(
            workspace_root
                .join("job/.vagrant/beaker_vagrant_files/default.yml")
                .as_path()
        )
    );
    assert!(!workspace_root.exists());
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_waits_out_grace_period() {
    let root = TempDir::new().unwrap();
    let workspace = workspace_in(&root);
    let invoker = ScriptedInvoker::new();
    let started = tokio::time::Instant::now();

    Cleanup::new(Arc::new(invoker.clone()), CleanupConfig::default())
        .cleanup(workspace)
        .await;

    assert!(started.elapsed() >= std::time::Duration::from_secs(120));
    invoker.assert_call_count_eq("vagrant", 1);
}

#[tokio::test]
async fn test_cleanup_swallows_teardown_failures() {
    let root = TempDir::new().unwrap();
    let workspace = workspace_in(&root);
    let workspace_root = workspace.root().to_path_buf();
    let invoker = ScriptedInvoker::new().on("vagrant", &[], [Scripted::not_found()]);
    let config = CleanupConfig {
        grace_period_secs: 0,
        ..Default::default()
    };

    Cleanup::new(Arc::new(invoker), config).cleanup(workspace).await;

    assert!(!workspace_root.exists());
}

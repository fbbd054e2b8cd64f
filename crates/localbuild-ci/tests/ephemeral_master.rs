//! `EphemeralMaster` running real commands through a local worker.

use std::collections::BTreeMap;
use std::path::PathBuf;

use localbuild_ci::{BuildInvocation, BuildMaster, EphemeralMaster, EphemeralOrchestrator};
use localbuild_core::config::MasterConfig;
use localbuild_core::log_relay::CollectingLogSink;
use localbuild_core::{
    BuildRequest, LocalBuildError, MountEntry, MountSpec, Outcome, ResultCode, SourceStamp,
};
use localbuild_state::{BuildLedger, BuildStatus};
use tokio::sync::mpsc;

const CONFIG: &str = r#"
    name = "local-master"

    [[projects]]
    name = "demo"
    repo = "https://example.com/demo.git"

    [[projects.builders]]
    name = "ok"
    steps = [
        { type = "shell", name = "hello", command = ["echo", "hello"] },
        { type = "shell", name = "stderr", command = ["sh", "-c", "echo oops >&2"] },
    ]

    [[projects.builders]]
    name = "halting"
    steps = [
        { type = "shell", name = "fail", command = ["false"] },
        { type = "shell", name = "after", command = ["echo", "unreachable"] },
    ]

    [[projects.builders]]
    name = "warning"
    steps = [
        { type = "shell", name = "soft", command = ["sh", "-c", "exit 3"], warn_on_failure = true },
        { type = "shell", name = "after", command = ["echo", "still running"] },
    ]

    [[projects.builders]]
    name = "keep-going"
    steps = [
        { type = "shell", name = "fail", command = ["false"], halt_on_failure = false },
        { type = "shell", name = "after", command = ["echo", "kept going"] },
    ]

    [[projects.builders]]
    name = "slow"
    steps = [
        { type = "shell", name = "sleep", command = ["sleep", "5"], timeout_secs = 1 },
    ]

    [[projects.builders]]
    name = "long-running"
    steps = [
        { type = "shell", name = "wait", command = ["sh", "-c", "pwd; sleep 30"] },
    ]

    [[projects.builders]]
    name = "missing-binary"
    steps = [
        { type = "shell", name = "nope", command = ["localbuild-no-such-binary"] },
    ]

    [[projects.builders]]
    name = "env"
    properties = { GREETING = "hi", TARGET = "default" }
    steps = [
        { type = "shell", name = "env", command = ["sh", "-c", "echo $GREETING-$TARGET-$LOCALBUILD_BRANCH"] },
    ]

    [[projects.builders]]
    name = "checkout"
    steps = [
        { type = "checkout", name = "checkout", workdir = "source" },
        { type = "shell", name = "build", command = ["echo", "built"], workdir = "source" },
    ]
"#;

fn config() -> MasterConfig {
    MasterConfig::from_toml_str(CONFIG)
        .expect("fixture config loads")
        .config
}

fn request(builder: &str) -> BuildRequest {
    let stamp =
        SourceStamp::resolve("https://example.com/demo.git", None, "main", None, None, "demo");
    BuildRequest::new(builder, stamp)
}

/// Trigger one build on a fresh master and collect the relayed records.
async fn run(request: BuildRequest) -> (Option<ResultCode>, Vec<String>, EphemeralMaster) {
    let mut master = EphemeralMaster::new(config(), "demo");
    master.start().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let result = master.trigger(&request, tx).await.unwrap();

    let mut logs = Vec::new();
    while let Ok(line) = rx.try_recv() {
        logs.push(line);
    }
    (result, logs, master)
}

#[tokio::test]
async fn test_successful_build_relays_both_streams() {
    let (result, logs, mut master) = run(request("ok")).await;

    assert_eq!(result, Some(ResultCode::Success));
    assert!(logs.contains(&"hstep 1: hello".to_string()), "{logs:?}");
    assert!(logs.contains(&"ohello".to_string()), "{logs:?}");
    assert!(logs.contains(&"eoops".to_string()), "{logs:?}");

    let ledger = master.ledger().unwrap();
    let builds = ledger.list_builds(Some("ok")).await.unwrap();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].status, BuildStatus::Finished);
    let summary = builds[0].summary.clone().unwrap();
    assert_eq!(summary.result.as_deref(), Some("success"));
    assert_eq!(summary.total_logs, logs.len() as u64);

    let stored: Vec<String> = ledger
        .get_logs(&builds[0].build_id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.record)
        .collect();
    assert_eq!(stored, logs);

    master.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_step_halts_build() {
    let (result, logs, mut master) = run(request("halting")).await;

    assert_eq!(result, Some(ResultCode::Failure));
    assert!(!logs.contains(&"ounreachable".to_string()), "{logs:?}");
    master.stop().await.unwrap();
}

#[tokio::test]
async fn test_warn_on_failure_downgrades_and_continues() {
    let (result, logs, mut master) = run(request("warning")).await;

    assert_eq!(result, Some(ResultCode::Warnings));
    assert!(logs.contains(&"ostill running".to_string()), "{logs:?}");
    master.stop().await.unwrap();
}

#[tokio::test]
async fn test_non_halting_failure_continues_but_fails() {
    let (result, logs, mut master) = run(request("keep-going")).await;

    assert_eq!(result, Some(ResultCode::Failure));
    assert!(logs.contains(&"okept going".to_string()), "{logs:?}");
    master.stop().await.unwrap();
}

#[tokio::test]
async fn test_timeout_is_an_exception() {
    let (result, logs, mut master) = run(request("slow")).await;

    assert_eq!(result, Some(ResultCode::Exception));
    assert!(logs.contains(&"hcommand timed out".to_string()), "{logs:?}");
    master.stop().await.unwrap();
}

#[tokio::test]
async fn test_spawn_failure_is_an_exception() {
    let (result, _logs, mut master) = run(request("missing-binary")).await;

    assert_eq!(result, Some(ResultCode::Exception));
    master.stop().await.unwrap();
}

#[tokio::test]
async fn test_properties_become_environment() {
    let mut props = BTreeMap::new();
    props.insert("TARGET".to_string(), "release".to_string());
    let (result, logs, mut master) = run(request("env").with_properties(props)).await;

    assert_eq!(result, Some(ResultCode::Success));
    assert!(logs.contains(&"ohi-release-main".to_string()), "{logs:?}");
    master.stop().await.unwrap();
}

#[tokio::test]
async fn test_local_sources_bypass_checkout() {
    let source = tempfile::tempdir().unwrap();
    let mounts = MountSpec {
        entries: vec![MountEntry {
            host: source.path().to_path_buf(),
            dest: "source".to_string(),
        }],
    };
    let (result, logs, mut master) = run(request("checkout").with_local_sources(mounts)).await;

    assert_eq!(result, Some(ResultCode::Success));
    let expected = format!(
        "husing local source {} for source, checkout skipped",
        source.path().display()
    );
    assert!(logs.contains(&expected), "{logs:?}");
    assert!(logs.contains(&"obuilt".to_string()), "{logs:?}");

    let ledger = master.ledger().unwrap();
    let builds = ledger.list_builds(None).await.unwrap();
    assert!(builds[0].metadata.local_sources);
    master.stop().await.unwrap();
}

#[tokio::test]
async fn test_checkout_without_its_mount_is_an_exception() {
    let mounts = MountSpec {
        entries: vec![MountEntry {
            host: PathBuf::from("/nonexistent"),
            dest: "elsewhere".to_string(),
        }],
    };
    let (result, logs, mut master) = run(request("checkout").with_local_sources(mounts)).await;

    assert_eq!(result, Some(ResultCode::Exception));
    assert!(!logs.contains(&"obuilt".to_string()), "{logs:?}");
    master.stop().await.unwrap();
}

#[tokio::test]
async fn test_trigger_requires_start() {
    let mut master = EphemeralMaster::new(config(), "demo");
    let (tx, _rx) = mpsc::unbounded_channel();

    let err = master.trigger(&request("ok"), tx).await.unwrap_err();
    assert!(matches!(err, LocalBuildError::Master(_)));
}

#[tokio::test]
async fn test_invalid_config_fails_start() {
    let empty = MasterConfig {
        name: "empty".to_string(),
        url: None,
        projects: vec![],
    };
    let mut master = EphemeralMaster::new(empty, "demo");

    let err = master.start().await.unwrap_err();
    assert!(matches!(err, LocalBuildError::Configuration(_)));
    master.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_is_idempotent_and_attach_needs_a_build() {
    let mut master = EphemeralMaster::new(config(), "demo");
    master.start().await.unwrap();

    assert!(master.attach().await.is_err());
    master.stop().await.unwrap();
    master.stop().await.unwrap();
    assert!(master.ledger().is_none());
}

#[test]
fn test_orchestrator_runs_real_master() {
    let mut orchestrator = EphemeralOrchestrator::new(config())
        .with_log_sink(CollectingLogSink::default());

    let mut invocation = BuildInvocation::new("ok");
    invocation.project = Some("demo".to_string());
    let verdict = orchestrator.execute(invocation).unwrap();

    assert_eq!(verdict.outcome, Outcome::Success);
    assert!(verdict.logs.contains(&"ohello".to_string()));

    let verdict = EphemeralOrchestrator::new(config())
        .with_log_sink(CollectingLogSink::default())
        .execute(BuildInvocation::new("halting"))
        .unwrap();
    assert_eq!(verdict.outcome, Outcome::Failure);
    assert!(verdict.outcome.into_result().is_err());
}

#[tokio::test]
async fn test_stop_releases_worker_of_interrupted_build() {
    let mut master = EphemeralMaster::new(config(), "demo");
    master.start().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let interrupted = tokio::time::timeout(
        std::time::Duration::from_millis(500),
        master.trigger(&request("long-running"), tx),
    )
    .await;
    assert!(interrupted.is_err());

    let mut root = None;
    while let Ok(line) = rx.try_recv() {
        if let Some(dir) = line.strip_prefix('o') {
            root = Some(PathBuf::from(dir));
        }
    }
    let root = root.expect("step printed its working directory");
    assert!(root.is_dir());

    master.stop().await.unwrap();
    assert!(!root.exists());
}

//! Daemon socket round trips against a temp HOME, with git/docker scripted.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use fleet_daemon::{
    request_event, request_init, request_reload, request_status, request_stop, DaemonError,
};
use fleet_sync::testing::ScriptedRunner;
use serde_json::Value;
use tempfile::TempDir;

const ONE_SERVICE: &str = r#"
blog:
  repo_full_name: acme/blog
  clone_url: https://example.com/acme/blog.git
  ref_policy: latest-tag
"#;

const TWO_SERVICES: &str = r#"
blog:
  repo_full_name: acme/blog
  clone_url: https://example.com/acme/blog.git
  ref_policy: latest-tag
api:
  repo_full_name: acme/api
  clone_url: https://example.com/acme/api.git
  ref_policy: tracked-branch
  tracked_branch: main
"#;

struct Daemon {
    runtime: Option<tokio::runtime::Runtime>,
    handle: Option<tokio::task::JoinHandle<Result<(), DaemonError>>>,
    home: TempDir,
    runner: Arc<ScriptedRunner>,
}

impl Daemon {
    fn start(registry_yaml: Option<&str>) -> Self {
        let home = TempDir::new().expect("home");
        if let Some(yaml) = registry_yaml {
            write_registry(home.path(), yaml);
        }
        let runner = Arc::new(
            ScriptedRunner::new()
                .on_stdout("git", &["rev-parse", "HEAD"], "4b825dc\n")
                .on_stdout("git", &["tag", "--list"], "v1.0.0\nv1.2.0\n"),
        );

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("runtime");
        let handle = runtime.spawn(fleet_daemon::run_with_runner(
            home.path().to_path_buf(),
            runner.clone(),
        ));

        let daemon = Self {
            runtime: Some(runtime),
            handle: Some(handle),
            home,
            runner,
        };
        assert!(
            wait_until(Duration::from_secs(5), || request_status(daemon.home()).is_ok()),
            "daemon never answered status"
        );
        daemon
    }

    fn home(&self) -> &Path {
        self.home.path()
    }

    fn status(&self) -> Value {
        request_status(self.home()).expect("status")
    }

    /// Stop via the socket and wait for the run loop to return.
    fn shutdown(&mut self) -> Result<(), DaemonError> {
        let (Some(runtime), Some(handle)) = (self.runtime.take(), self.handle.take()) else {
            return Ok(());
        };
        let _ = request_stop(self.home());
        let result = runtime.block_on(async move {
            tokio::time::timeout(Duration::from_secs(5), handle).await
        });
        runtime.shutdown_timeout(Duration::from_secs(1));
        match result {
            Ok(Ok(inner)) => inner,
            Ok(Err(join)) => Err(DaemonError::Protocol(format!("daemon task failed: {join}"))),
            Err(_) => Err(DaemonError::Protocol("daemon did not stop within 5s".to_string())),
        }
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn write_registry(home: &Path, yaml: &str) {
    let root = home.join(".fleet");
    fs::create_dir_all(&root).expect("mkdir .fleet");
    fs::write(root.join("services.yaml"), yaml).expect("write registry");
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(50));
    }
    false
}

fn service_names(status: &Value) -> Vec<String> {
    status["services"]
        .as_array()
        .expect("services array")
        .iter()
        .map(|s| s["name"].as_str().expect("name").to_string())
        .collect()
}

#[test]
fn status_lists_registered_services() {
    let daemon = Daemon::start(Some(TWO_SERVICES));
    let status = daemon.status();

    assert_eq!(status["running"], true);
    assert_eq!(status["mode"], "compose");
    assert_eq!(status["config"]["loaded"], true);
    assert_eq!(service_names(&status), vec!["api", "blog"]);
    assert_eq!(status["services"][0]["busy"], false);
    assert!(status["services"][0]["last"].is_null());
}

#[test]
fn unmatched_event_is_a_noop() {
    let daemon = Daemon::start(Some(ONE_SERVICE));

    let data =
        request_event(daemon.home(), "acme/unknown", "refs/tags/v1.0.0", true).expect("event");
    assert_eq!(data["action"], "noop");
    assert_eq!(daemon.runner.calls().len(), 0);

    let data = request_event(daemon.home(), "acme/blog", "refs/heads/main", true).expect("event");
    assert_eq!(data["action"], "noop");
}

#[test]
fn waited_event_returns_pipeline_report() {
    let daemon = Daemon::start(Some(ONE_SERVICE));

    let data = request_event(daemon.home(), "ACME/Blog", "refs/tags/v2.0.0", true).expect("event");
    assert_eq!(data["action"], "completed");
    assert_eq!(data["report"]["service"], "blog");
    assert_eq!(data["report"]["reference"]["name"], "v2.0.0");
    assert_eq!(data["report"]["sync"]["head"], "4b825dc");
    assert_eq!(data["report"]["deploy"]["result"], "compose_refreshed");
    assert_eq!(
        daemon.runner.count("docker compose"),
        1,
        "commands: {:?}",
        daemon.runner.command_lines()
    );

    let status = daemon.status();
    assert_eq!(status["services"][0]["last"]["ok"], true);
    assert_eq!(status["services"][0]["last"]["head"], "4b825dc");
}

#[test]
fn accepted_event_runs_in_background() {
    let daemon = Daemon::start(Some(ONE_SERVICE));

    let data = request_event(daemon.home(), "acme/blog", "refs/tags/v2.0.0", false).expect("event");
    assert_eq!(data["action"], "accepted");
    assert_eq!(data["service"], "blog");

    assert!(
        wait_until(Duration::from_secs(5), || {
            !daemon.status()["services"][0]["last"].is_null()
        }),
        "background pipeline never recorded an outcome"
    );
}

#[test]
fn init_syncs_every_service_to_latest_tag() {
    let daemon = Daemon::start(Some(TWO_SERVICES));

    let data = request_init(daemon.home(), false).expect("init");
    let completed = data["completed"].as_array().expect("completed");
    assert_eq!(completed.len(), 2);
    assert!(data["failed"].as_array().expect("failed").is_empty());
    assert_eq!(completed[0]["reference"]["name"], "v1.2.0");
    assert_eq!(daemon.runner.count("docker"), 0);
}

#[test]
fn events_are_refused_until_registry_loads() {
    let daemon = Daemon::start(None);

    let status = daemon.status();
    assert_eq!(status["config"]["loaded"], false);
    assert!(status["config"]["last_error"].is_string());

    let err = request_event(daemon.home(), "acme/blog", "refs/tags/v2.0.0", true).unwrap_err();
    assert!(err.to_string().contains("registry unavailable"), "got: {err}");

    write_registry(daemon.home(), ONE_SERVICE);
    let data = request_reload(daemon.home()).expect("reload");
    assert_eq!(data["services"], 1);

    let data = request_event(daemon.home(), "acme/blog", "refs/tags/v2.0.0", true).expect("event");
    assert_eq!(data["action"], "completed");
}

#[test]
fn failed_reload_keeps_previous_registry() {
    let daemon = Daemon::start(Some(TWO_SERVICES));

    write_registry(daemon.home(), "- not\n- a mapping\n");
    let err = request_reload(daemon.home()).unwrap_err();
    assert!(err.to_string().contains("previous configuration kept"), "got: {err}");

    let status = daemon.status();
    assert_eq!(service_names(&status), vec!["api", "blog"]);
    assert_eq!(status["config"]["loaded"], true);
    assert!(status["config"]["last_error"].is_string());
}

#[test]
fn registry_edit_is_picked_up_by_watcher() {
    let daemon = Daemon::start(Some(ONE_SERVICE));
    assert_eq!(service_names(&daemon.status()), vec!["blog"]);

    write_registry(daemon.home(), TWO_SERVICES);

    assert!(
        wait_until(Duration::from_secs(5), || service_names(&daemon.status()).len() == 2),
        "watcher never reloaded the registry"
    );
}

#[test]
fn stop_ends_run_loop_and_removes_socket() {
    let mut daemon = Daemon::start(Some(ONE_SERVICE));
    let socket = daemon.home().join(".fleet").join("daemon.sock");
    assert!(socket.exists());

    daemon.shutdown().expect("clean shutdown");

    assert!(!socket.exists());
    assert!(matches!(
        request_status(daemon.home()),
        Err(DaemonError::DaemonNotRunning { .. })
    ));
}

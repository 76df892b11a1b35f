use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::Instant;

use fleet_core::paths::{REGISTRY_FILE, SETTINGS_FILE};
use fleet_core::{registry, settings, Action, Registry, Settings};
use fleet_deploy::Orchestrator;
use fleet_sync::{CommandRunner, RefTarget, SystemRunner};

use crate::error::{io_err, DaemonError};
use crate::paths::{fleet_root, logs_dir, registry_path, socket_path, DEBOUNCE_WINDOW};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Whether a usable configuration is loaded, and how the last reload went.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigStatus {
    /// `false` until the registry has loaded once; events are refused meanwhile.
    pub loaded: bool,
    pub last_reload_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// State shared by every daemon task.
struct DaemonState {
    home: PathBuf,
    orchestrator: Arc<Orchestrator>,
    config: RwLock<ConfigStatus>,
    started_at: DateTime<Utc>,
    shutdown_tx: broadcast::Sender<()>,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon with real `git`/`docker` processes.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    run_with_runner(home, Arc::new(SystemRunner)).await
}

/// Run the daemon with an arbitrary [`CommandRunner`].
pub async fn run_with_runner(
    home: PathBuf,
    runner: Arc<dyn CommandRunner>,
) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let (initial, config) = match load_config(&home).await {
        Ok((registry, settings)) => {
            tracing::info!(
                services = registry.len(),
                mode = %settings.mode,
                "configuration loaded",
            );
            let status = ConfigStatus {
                loaded: true,
                last_reload_at: Some(Utc::now()),
                last_error: None,
            };
            ((registry, settings), status)
        }
        Err(err) => {
            tracing::error!(
                error = %err,
                "configuration unavailable; events refused until a reload succeeds",
            );
            let fallback = (Registry::default(), Settings::defaults_at(&home));
            let status = ConfigStatus {
                loaded: false,
                last_reload_at: None,
                last_error: Some(err.to_string()),
            };
            (fallback, status)
        }
    };

    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let state = Arc::new(DaemonState {
        home: home.clone(),
        orchestrator: Arc::new(Orchestrator::new(initial.0, initial.1, runner)),
        config: RwLock::new(config),
        started_at: Utc::now(),
        shutdown_tx: shutdown_tx.clone(),
    });

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result = watcher_task(state, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result = socket_server_task(state, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        tokio::spawn(async move {
            let result = log_rotation_task(home, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!(
                            "ctrl-c handler failed: {err}"
                        ))),
                    }
                }
            }
        })
    };

    let (watcher_result, socket_result, rotation_result, signal_result) =
        tokio::join!(watcher_handle, socket_handle, rotation_handle, signal_handle);

    handle_join("watcher", watcher_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Configuration reload
// ---------------------------------------------------------------------------

async fn load_config(home: &Path) -> Result<(Registry, Settings), DaemonError> {
    let home = home.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<(Registry, Settings), DaemonError> {
        let settings = settings::load_at(&home)?;
        let registry = registry::load_at(&home)?;
        Ok((registry, settings))
    })
    .await
    .map_err(|err| DaemonError::Protocol(format!("config load join error: {err}")))?
}

/// Re-read registry and settings. On failure the previous configuration
/// stays in force.
async fn reload(state: &DaemonState, source: &'static str) -> Result<usize, DaemonError> {
    match load_config(&state.home).await {
        Ok((registry, settings)) => {
            let services = registry.len();
            state.orchestrator.reload(registry, settings).await;
            let mut config = state.config.write().await;
            config.loaded = true;
            config.last_reload_at = Some(Utc::now());
            config.last_error = None;
            tracing::info!(source, services, "reload succeeded");
            Ok(services)
        }
        Err(err) => {
            tracing::warn!(source, error = %err, "reload failed; keeping previous configuration");
            state.config.write().await.last_error = Some(err.to_string());
            Err(err)
        }
    }
}

// ---------------------------------------------------------------------------
// Watcher
// ---------------------------------------------------------------------------

async fn watcher_task(
    state: Arc<DaemonState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let root = fleet_root(&state.home);
    let root = fs::canonicalize(&root).unwrap_or(root);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&root, RecursiveMode::NonRecursive)?;
    tracing::debug!(path = %root.display(), "watching configuration directory");

    let mut debounce = Debouncer::new(DEBOUNCE_WINDOW);

    loop {
        let deadline = debounce.deadline();
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = sleep_until_deadline(deadline) => {
                debounce.clear();
                let _ = reload(&state, "watcher").await;
            }
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }
                if event.paths.iter().any(|path| is_config_file(path)) {
                    debounce.touch(Instant::now());
                }
            }
        }
    }

    Ok(())
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

/// Trailing-edge debounce: fires once the window passes with no new event.
#[derive(Debug)]
struct Debouncer {
    window: Duration,
    last_event: Option<Instant>,
}

impl Debouncer {
    fn new(window: Duration) -> Self {
        Self {
            window,
            last_event: None,
        }
    }

    fn touch(&mut self, now: Instant) {
        self.last_event = Some(now);
    }

    fn deadline(&self) -> Option<Instant> {
        self.last_event.map(|seen| seen + self.window)
    }

    fn clear(&mut self) {
        self.last_event = None;
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_))
}

fn is_config_file(path: &Path) -> bool {
    matches!(
        path.file_name().and_then(|name| name.to_str()),
        Some(REGISTRY_FILE) | Some(SETTINGS_FILE)
    )
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

async fn socket_server_task(
    state: Arc<DaemonState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&state.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, state).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    state: Arc<DaemonState>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = dispatch_request(&state, &request).await;
        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

async fn dispatch_request(state: &Arc<DaemonState>, request: &DaemonRequest) -> DaemonResponse {
    match request.cmd.as_str() {
        "event" => handle_event(state, request).await,
        "init" => handle_init(state, request.deploy).await,
        "reload" => match reload(state, "socket").await {
            Ok(services) => DaemonResponse::ok(json!({ "reloaded": true, "services": services })),
            Err(err) => DaemonResponse::error(format!(
                "reload failed, previous configuration kept: {err}"
            )),
        },
        "status" => DaemonResponse::ok(build_status_payload(state).await),
        "stop" => {
            let _ = state.shutdown_tx.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        }
        other => DaemonResponse::error(format!("unknown command '{other}'")),
    }
}

async fn config_refusal(state: &DaemonState) -> Option<DaemonResponse> {
    let config = state.config.read().await;
    if config.loaded {
        return None;
    }
    let reason = config.last_error.as_deref().unwrap_or("registry not loaded");
    Some(DaemonResponse::error(format!("registry unavailable: {reason}")))
}

async fn handle_event(state: &Arc<DaemonState>, request: &DaemonRequest) -> DaemonResponse {
    let (Some(repository), Some(git_ref)) =
        (request.repository.as_deref(), request.git_ref.as_deref())
    else {
        return DaemonResponse::error("event requires 'repository' and 'ref'");
    };
    if let Some(refusal) = config_refusal(state).await {
        return refusal;
    }

    let (entry, target) = match state.orchestrator.resolve(repository, git_ref).await {
        Action::NoOp(reason) => {
            tracing::info!(repository, git_ref, %reason, "event ignored");
            return DaemonResponse::ok(json!({ "action": "noop", "reason": reason.to_string() }));
        }
        Action::Run { entry, target } => (entry, target),
    };

    tracing::info!(
        repository,
        service = %entry.name,
        reference = %target,
        wait = request.wait,
        "event accepted",
    );
    let accepted = json!({
        "action": "accepted",
        "service": entry.name,
        "reference": target,
    });

    let orchestrator = state.orchestrator.clone();
    let pipeline = async move {
        orchestrator
            .run_service(&entry, RefTarget::Exact(target), true)
            .await
    };

    if !request.wait {
        tokio::spawn(async move {
            // Failures are logged and recorded by the orchestrator.
            let _ = pipeline.await;
        });
        return DaemonResponse::ok(accepted);
    }

    match pipeline.await {
        Ok(report) => DaemonResponse::ok(json!({ "action": "completed", "report": report })),
        Err(err) => DaemonResponse::error(format!("{} failed: {err}", err.stage())),
    }
}

async fn handle_init(state: &Arc<DaemonState>, deploy: bool) -> DaemonResponse {
    if let Some(refusal) = config_refusal(state).await {
        return refusal;
    }
    let report = state.orchestrator.initialize_all(deploy).await;
    DaemonResponse::ok(json!(report))
}

async fn build_status_payload(state: &DaemonState) -> Value {
    let snapshot = state.orchestrator.snapshot().await;
    let outcomes = state.orchestrator.last_outcomes().await;
    let config = state.config.read().await.clone();

    let mut services = Vec::with_capacity(snapshot.registry.len());
    for entry in snapshot.registry.iter() {
        services.push(json!({
            "name": entry.name,
            "repository": entry.repo_full_name,
            "policy": entry.ref_policy.to_string(),
            "working_copy": snapshot.settings.working_copy(&entry.name).display().to_string(),
            "busy": state.orchestrator.is_busy(&entry.name).await,
            "last": outcomes.get(&entry.name),
        }));
    }

    json!({
        "running": true,
        "started_at": state.started_at,
        "mode": snapshot.settings.mode.to_string(),
        "config": config,
        "services": services,
        "socket": socket_path(&state.home).display().to_string(),
        "registry": registry_path(&state.home).display().to_string(),
    })
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

// ---------------------------------------------------------------------------
// Housekeeping
// ---------------------------------------------------------------------------

async fn log_rotation_task(
    home: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // first tick is immediate

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let home = home.clone();
                tokio::task::spawn_blocking(move || {
                    crate::log_rotation::rotate_logs(&home);
                })
                .await
                .ok();
            }
        }
    }
    Ok(())
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [fleet_root(home), logs_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!("{task} task join failure: {err}"))),
    }
}

/// `RUST_LOG` filter (default `info`); `FLEET_LOG_FORMAT=json` for JSON lines.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("FLEET_LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
    if json {
        let _ = fmt().json().with_env_filter(filter).with_target(false).try_init();
    } else {
        let _ = fmt().with_env_filter(filter).with_target(false).try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn debounce_waits_for_quiet_window() {
        let mut debounce = Debouncer::new(Duration::from_millis(100));
        assert!(debounce.deadline().is_none());

        let start = Instant::now();
        for _ in 0..5 {
            debounce.touch(Instant::now());
            advance(Duration::from_millis(10)).await;
        }

        let deadline = debounce.deadline().expect("pending reload");
        assert_eq!(deadline, start + Duration::from_millis(40) + Duration::from_millis(100));

        debounce.clear();
        assert!(debounce.deadline().is_none());
    }

    #[test]
    fn only_registry_and_settings_files_trigger_reload() {
        assert!(is_config_file(Path::new("/home/ops/.fleet/services.yaml")));
        assert!(is_config_file(Path::new("/home/ops/.fleet/fleet.yaml")));
        assert!(!is_config_file(Path::new("/home/ops/.fleet/daemon.sock")));
        assert!(!is_config_file(Path::new("/home/ops/.fleet/services.yaml.swp")));
    }

    #[test]
    fn stale_socket_is_removed_before_bind() {
        let dir = tempfile::TempDir::new().expect("dir");
        let socket = dir.path().join("daemon.sock");
        fs::write(&socket, b"").expect("stale file");

        prepare_socket_for_bind(&socket).expect("prepare");
        assert!(!socket.exists());
    }
}

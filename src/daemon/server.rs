//! Daemon Server
//!
//! Lifecycle: `NotStarted → Starting → Listening → (Idle ⇄ Handling) →
//! ShuttingDown → Stopped`.
//!
//! Each accepted socket gets a reader loop and a single writer task. Every
//! frame read is handled on its own task; replies are funnelled back through
//! the writer so frames never interleave.
//!
//! The request timeout bounds how long a caller waits for its reply, not the
//! work itself: an expired request keeps running detached and still releases
//! its permit when it finishes. `reload` is never subject to the timeout.
//!
//! Live handles are created lazily, at most one per connection name. Callers
//! racing on first use share one in-flight open through a per-name
//! [`OnceCell`]; a failed open leaves the cell empty for the next caller.
//! Handle users hold the read side of the reload gate for as long as they use
//! the handle; `reload` takes the write side, so nobody sees a handle that is
//! being closed or a connection map that is half swapped.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch, OnceCell, RwLock as AsyncRwLock, RwLockReadGuard, Semaphore};
use tracing::{debug, error, info, warn};

use super::lifecycle::{bind_socket, PidFileGuard};
use super::protocol::{
    read_frame, CommandArgs, DaemonCommand, DaemonRequest, DaemonResponse, Frame, MAX_FRAME_BYTES,
    UNKNOWN_REQUEST_ID,
};
use super::DaemonSettings;
use crate::config::{self, SherlockConfig};
use crate::credentials::CredentialResolver;
use crate::engine::{LiveHandle, ResolvedConnectionConfig};
use crate::error::{Result, SherlockError};
use crate::validation::{validate_cache_command, validate_query};

/// Observable daemon lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    NotStarted,
    Starting,
    Listening,
    Idle,
    Handling,
    ShuttingDown,
    Stopped,
}

type HandleCell = Arc<OnceCell<Arc<LiveHandle>>>;

struct Shared {
    settings: DaemonSettings,
    resolver: Arc<CredentialResolver>,
    config_path: Option<PathBuf>,
    config: RwLock<SherlockConfig>,
    resolved: RwLock<BTreeMap<String, ResolvedConnectionConfig>>,
    handles: Mutex<HashMap<String, HandleCell>>,
    reload_gate: AsyncRwLock<()>,
    handles_opened: AtomicUsize,
    in_flight: Mutex<usize>,
    limiter: Arc<Semaphore>,
    state: watch::Sender<DaemonState>,
    shutdown: watch::Sender<bool>,
}

/// The connection-caching daemon
///
/// Cheap to clone; clones share one server.
#[derive(Clone)]
pub struct Daemon {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("socket", &self.shared.settings.paths.socket)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// A reply plus whether the daemon should stop once it is on the wire
struct Outgoing {
    response: DaemonResponse,
    then_shutdown: bool,
}

impl Outgoing {
    fn failure(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self { response: DaemonResponse::failure(id, error), then_shutdown: false }
    }
}

impl Daemon {
    /// `config_path` is re-read on `reload`; without it the in-memory config is reused
    pub fn new(
        settings: DaemonSettings,
        config: SherlockConfig,
        config_path: Option<PathBuf>,
        resolver: Arc<CredentialResolver>,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(settings.max_concurrent_requests.max(1)));
        let (state, _) = watch::channel(DaemonState::NotStarted);
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                settings,
                resolver,
                config_path,
                config: RwLock::new(config),
                resolved: RwLock::new(BTreeMap::new()),
                handles: Mutex::new(HashMap::new()),
                reload_gate: AsyncRwLock::new(()),
                handles_opened: AtomicUsize::new(0),
                in_flight: Mutex::new(0),
                limiter,
                state,
                shutdown,
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> DaemonState {
        *self.shared.state.borrow()
    }

    /// Live handles opened since start
    #[must_use]
    pub fn handles_opened(&self) -> usize {
        self.shared.handles_opened.load(Ordering::SeqCst)
    }

    /// Names whose credentials resolved
    #[must_use]
    pub fn connection_names(&self) -> Vec<String> {
        self.shared.resolved.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect()
    }

    /// Ask a running daemon to stop
    pub fn request_shutdown(&self) {
        self.shared.shutdown.send_replace(true);
    }

    /// Wait until the socket is bound
    ///
    /// Fails if the daemon stops before it ever listens.
    pub async fn wait_until_listening(&self) -> Result<()> {
        let mut rx = self.shared.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                DaemonState::Listening | DaemonState::Idle | DaemonState::Handling => return Ok(()),
                DaemonState::ShuttingDown | DaemonState::Stopped => {
                    return Err(SherlockError::daemon_unavailable("Daemon stopped before listening"))
                }
                DaemonState::NotStarted | DaemonState::Starting => {}
            }
            if rx.changed().await.is_err() {
                return Err(SherlockError::daemon_unavailable("Daemon stopped before listening"));
            }
        }
    }

    /// Run until `shutdown`, SIGINT or SIGTERM
    pub async fn run(&self) -> Result<()> {
        let result = self.serve().await;
        if let Err(e) = &result {
            error!(error = %e, "daemon failed");
        }
        self.set_state(DaemonState::Stopped);
        result
    }

    async fn serve(&self) -> Result<()> {
        self.set_state(DaemonState::Starting);
        let paths = self.shared.settings.paths.clone();

        if let Some(dir) = paths.socket.parent() {
            config::ensure_config_dir(dir)?;
        }
        // the lock decides; any socket left behind without it is stale
        let pid_guard = PidFileGuard::acquire(&paths.pid_file)?;

        let resolved = self.resolve_credentials(false).await?;
        info!(connections = resolved, "credentials resolved");

        let (listener, socket_guard) = bind_socket(&paths.socket)?;
        self.set_state(DaemonState::Listening);
        info!(pid = std::process::id(), socket = %paths.socket.display(), "daemon listening");
        self.set_state(DaemonState::Idle);

        let mut shutdown_rx = self.shared.shutdown.subscribe();
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        loop {
            if *shutdown_rx.borrow_and_update() {
                break;
            }
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let daemon = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = daemon.handle_client(stream).await {
                                debug!(error = %e, "client connection ended with error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "accept failed"),
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = sigterm.recv() => {
                    info!("SIGTERM received");
                    break;
                }
                _ = sigint.recv() => {
                    info!("SIGINT received");
                    break;
                }
            }
        }

        self.set_state(DaemonState::ShuttingDown);
        info!("daemon shutting down");
        self.close_all_handles().await;
        drop(listener);
        drop(socket_guard);
        drop(pid_guard);
        info!("daemon stopped");
        Ok(())
    }

    async fn handle_client(&self, stream: UnixStream) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();

        let daemon = self.clone();
        let writer_task = tokio::spawn(async move {
            while let Some(outgoing) = rx.recv().await {
                let frame = match outgoing.response.to_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!(error = %e, "failed to encode response");
                        continue;
                    }
                };
                if writer.write_all(frame.as_bytes()).await.is_err() || writer.flush().await.is_err() {
                    break;
                }
                if outgoing.then_shutdown {
                    daemon.request_shutdown();
                }
            }
        });

        let mut reader = BufReader::new(reader);
        while let Some(frame) = read_frame(&mut reader, MAX_FRAME_BYTES).await? {
            let line = match frame {
                Frame::Text(line) => line,
                Frame::NotUtf8 => {
                    warn!("frame is not valid UTF-8");
                    let message = "Parse error: frame is not valid UTF-8";
                    let _ = tx.send(Outgoing::failure(UNKNOWN_REQUEST_ID, message));
                    continue;
                }
                Frame::Oversized => {
                    warn!(max = MAX_FRAME_BYTES, "frame too large, closing connection");
                    let message = format!("Frame exceeds {MAX_FRAME_BYTES} bytes");
                    let _ = tx.send(Outgoing::failure(UNKNOWN_REQUEST_ID, message));
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let daemon = self.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let outgoing = daemon.handle_frame(&line).await;
                let _ = tx.send(outgoing);
            });
        }

        drop(tx);
        let _ = writer_task.await;
        Ok(())
    }

    async fn handle_frame(&self, frame: &str) -> Outgoing {
        let request = match serde_json::from_str::<DaemonRequest>(frame) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "unparseable frame");
                let response = DaemonResponse::parse_error(frame, &e);
                return Outgoing { response, then_shutdown: false };
            }
        };

        let Ok(permit) = Arc::clone(&self.shared.limiter).acquire_owned().await else {
            return Outgoing::failure(request.id, "Daemon is shutting down");
        };
        let busy = BusyGuard::enter(Arc::clone(&self.shared));

        debug!(id = %request.id, command = %request.command, "handling request");
        let id = request.id.clone();
        let is_shutdown = request.command == DaemonCommand::Shutdown.as_str();
        let is_reload = request.command == DaemonCommand::Reload.as_str();

        let daemon = self.clone();
        let task = tokio::spawn(async move {
            let _permit = permit;
            let _busy = busy;
            daemon.dispatch(&request).await
        });

        let joined = if is_reload {
            task.await
        } else {
            let timeout = self.shared.settings.request_timeout;
            match tokio::time::timeout(timeout, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(id = %id, "request exceeded its timeout; letting it finish detached");
                    let message = format!("Request timed out after {}s", timeout.as_secs());
                    return Outgoing::failure(id, message);
                }
            }
        };
        let result = joined.unwrap_or_else(|e| {
            Err(SherlockError::daemon_error(format!("Request task failed: {e}")))
        });

        match result {
            Ok(data) => Outgoing { response: DaemonResponse::ok(id, data), then_shutdown: is_shutdown },
            Err(e) => {
                debug!(id = %id, error = %e, "request failed");
                Outgoing::failure(id, e.message())
            }
        }
    }

    async fn dispatch(&self, request: &DaemonRequest) -> Result<Value> {
        let command: DaemonCommand = request.command.parse()?;
        let args = CommandArgs::from_value(request.args.as_ref())?;

        match command {
            DaemonCommand::Ping => Ok(json!({ "pong": true, "pid": std::process::id() })),

            DaemonCommand::Connections => Ok(json!({ "connections": self.connection_names() })),

            DaemonCommand::Query => {
                let sql = args.sql()?;
                validate_query(sql).into_result()?;
                let handle = self.handle(&args.connection).await?;
                if self.query_logging(&args.connection) {
                    info!(connection = %args.connection, sql, "executing query");
                }
                to_data(&handle.execute(sql).await?)
            }

            DaemonCommand::Tables => {
                let handle = self.handle(&args.connection).await?;
                Ok(json!({ "tables": handle.list_tables().await? }))
            }

            DaemonCommand::Describe => {
                let table = args.table()?;
                let handle = self.handle(&args.connection).await?;
                to_data(&handle.describe_table(table).await?)
            }

            DaemonCommand::Introspect => {
                let handle = self.handle(&args.connection).await?;
                to_data(&handle.introspect_schema().await?)
            }

            DaemonCommand::Test => {
                let handle = self.handle(&args.connection).await?;
                handle.test().await?;
                Ok(json!({
                    "connection": args.connection,
                    "type": handle.kind().as_str(),
                    "status": "ok",
                }))
            }

            DaemonCommand::Exec => {
                let cmd = args.cmd()?;
                validate_cache_command(cmd, &args.args).into_result()?;
                let handle = self.handle(&args.connection).await?;
                if self.query_logging(&args.connection) {
                    info!(connection = %args.connection, cmd, "executing command");
                }
                Ok(json!({ "result": handle.exec_command(cmd, &args.args).await? }))
            }

            DaemonCommand::Shutdown => Ok(json!({ "message": "Shutting down..." })),

            DaemonCommand::Reload => {
                let _gate = self.shared.reload_gate.write().await;
                self.shared.resolver.invalidate();
                self.resolve_credentials(true).await?;
                self.close_all_handles().await;
                info!("credentials reloaded, live handles closed");
                Ok(json!({
                    "message": "Credentials reloaded",
                    "connections": self.connection_names(),
                }))
            }
        }
    }

    /// Shared live handle for `name`, opening it on first use
    ///
    /// The lease keeps `reload` out until it is dropped.
    async fn handle(&self, name: &str) -> Result<Lease<'_>> {
        let gate = self.shared.reload_gate.read().await;
        let resolved = self
            .shared
            .resolved
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| {
                SherlockError::daemon_error(format!(
                    "Connection \"{name}\" not found or credentials not resolved"
                ))
            })?;

        let cell = {
            let mut handles = self.shared.handles.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(handles.entry(name.to_string()).or_default())
        };

        let handle = cell
            .get_or_try_init(|| async {
                let handle = LiveHandle::open(&resolved).await?;
                self.shared.handles_opened.fetch_add(1, Ordering::SeqCst);
                info!(connection = name, kind = %resolved.kind, "opened live handle");
                Ok::<_, SherlockError>(Arc::new(handle))
            })
            .await?;
        Ok(Lease { _gate: gate, handle: Arc::clone(handle) })
    }

    fn query_logging(&self, name: &str) -> bool {
        self.shared.config.read().unwrap_or_else(PoisonError::into_inner).query_logging(name)
    }

    async fn close_all_handles(&self) {
        let cells: Vec<(String, HandleCell)> = {
            let mut handles = self.shared.handles.lock().unwrap_or_else(PoisonError::into_inner);
            handles.drain().collect()
        };
        for (name, cell) in cells {
            if let Some(handle) = cell.get() {
                handle.close().await;
                debug!(connection = %name, "closed live handle");
            }
        }
    }

    /// Resolve every configured connection on the blocking pool
    ///
    /// A failure for one name is logged and that name becomes unavailable;
    /// fatal errors abort. Returns how many names resolved.
    async fn resolve_credentials(&self, reread_config: bool) -> Result<usize> {
        let config = match (&self.shared.config_path, reread_config) {
            (Some(path), true) => SherlockConfig::load(path)?,
            _ => self.shared.config.read().unwrap_or_else(PoisonError::into_inner).clone(),
        };

        let resolver = Arc::clone(&self.shared.resolver);
        let snapshot = config.clone();
        let results = tokio::task::spawn_blocking(move || config::resolve_all(&snapshot, &resolver))
            .await
            .map_err(|e| SherlockError::daemon_error(format!("Credential resolution task failed: {e}")))?;

        let mut resolved = BTreeMap::new();
        for (name, result) in results {
            match result {
                Ok(connection) => {
                    resolved.insert(name, connection);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(connection = %name, error = %e, "could not resolve credentials");
                }
            }
        }

        let count = resolved.len();
        *self.shared.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        *self.shared.resolved.write().unwrap_or_else(PoisonError::into_inner) = resolved;
        Ok(count)
    }

    fn set_state(&self, state: DaemonState) {
        self.shared.state.send_replace(state);
    }
}

fn to_data<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| SherlockError::daemon_error(format!("Failed to encode result: {e}")))
}

/// A live handle borrowed under the read side of the reload gate
struct Lease<'a> {
    _gate: RwLockReadGuard<'a, ()>,
    handle: Arc<LiveHandle>,
}

impl Deref for Lease<'_> {
    type Target = LiveHandle;

    fn deref(&self) -> &LiveHandle {
        &self.handle
    }
}

/// Flips `Idle ⇄ Handling` as the in-flight count crosses zero
struct BusyGuard {
    shared: Arc<Shared>,
}

impl BusyGuard {
    fn enter(shared: Arc<Shared>) -> Self {
        {
            let mut count = shared.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            *count += 1;
            if *count == 1 {
                transition(&shared, DaemonState::Idle, DaemonState::Handling);
            }
        }
        Self { shared }
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        let mut count = self.shared.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        if *count == 0 {
            transition(&self.shared, DaemonState::Handling, DaemonState::Idle);
        }
    }
}

fn transition(shared: &Shared, from: DaemonState, to: DaemonState) {
    shared.state.send_if_modified(|state| {
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    });
}

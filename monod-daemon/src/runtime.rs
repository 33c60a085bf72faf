use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use monod_core::lock::LockFile;
use monod_core::runtime::{self, RuntimePaths};
use monod_core::types::{FactoryRef, RuntimeRecord, ServiceName};
use monod_wire::codec::{codec_by_id, Codec};
use monod_wire::error::WireError;
use monod_wire::frame::DEFAULT_MAX_FRAME_BYTES;
use monod_wire::message::{self, HandshakeReason, Message, PROTOCOL_VERSION, SERIALIZATION_KIND};

use crate::error::{io_err, DaemonError};
use crate::executor::{self, ExecRequest};
use crate::object::{CallError, FactoryRegistry};

const LOOPBACK: &str = "127.0.0.1";

/// Bound on taking the runtime lock during startup and teardown.
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP probe window when checking whether a published record answers.
const PEER_PROBE_TIMEOUT: Duration = Duration::from_millis(250);

/// A connected client gets this long to send HELLO before the slot is dropped.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Idle watchdog granularity; bounds how late past `idle_ttl` shutdown starts.
const WATCHDOG_TICK: Duration = Duration::from_millis(50);

/// How long a graceful shutdown waits for handlers to write in-flight replies.
const HANDLER_GRACE: Duration = Duration::from_secs(5);

/// Everything the daemon entrypoint needs to serve one logical name.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub name: ServiceName,
    pub base_dir: PathBuf,
    pub factory: FactoryRef,
    pub idle_ttl: Duration,
    pub codec_id: String,
    pub max_frame_bytes: u32,
    /// Pre-generated token file from the spawning coordinator; when absent a
    /// token is ensured at the standard location before anything is published.
    pub auth_file: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn new(name: ServiceName, factory: FactoryRef, base_dir: PathBuf) -> Self {
        Self {
            name,
            base_dir,
            factory,
            idle_ttl: Duration::from_secs(2),
            codec_id: "json".to_string(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            auth_file: None,
        }
    }
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(config: DaemonConfig, registry: &FactoryRegistry) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config, registry))
}

/// Run the daemon runtime.
pub async fn run(config: DaemonConfig, registry: &FactoryRegistry) -> Result<(), DaemonError> {
    let codec = codec_by_id(&config.codec_id)?;
    let object = registry.build(&config.factory)?;
    let paths = runtime::runtime_paths_at(&config.base_dir, &config.name);

    // Startup order: probe for a winning peer, ensure the token, bind,
    // publish. Auth-token write happens-before publish; publish
    // happens-before the first accept.
    //
    // The runtime lock is only *tried* here: when this daemon was spawned by
    // a coordinator, that coordinator holds the lock across spawn-and-poll
    // precisely to serialize this startup, and blocking on it would deadlock.
    // A free lock means a manual start, and holding it serializes manual
    // races the same way.
    let lock = LockFile::new(&paths.lock_file);
    let (listener, token) = {
        let startup_guard = lock.try_acquire()?;
        if startup_guard.is_none() {
            tracing::debug!("runtime lock held by a spawning coordinator, proceeding under its serialization");
        }

        if let Some(record) = runtime::read_record(&paths) {
            if peer_is_live(&record).await {
                return Err(DaemonError::AlreadyRunning {
                    name: config.name.to_string(),
                    pid: record.pid,
                    port: record.port,
                });
            }
        }

        let token = resolve_token(&config, &paths)?;

        let listener = TcpListener::bind((LOOPBACK, 0))
            .await
            .map_err(DaemonError::Socket)?;
        let port = listener.local_addr().map_err(DaemonError::Socket)?.port();

        let record = RuntimeRecord {
            protocol_version: PROTOCOL_VERSION,
            pid: std::process::id(),
            host: LOOPBACK.to_string(),
            port,
            service_name: config.name.clone(),
            codec_id: codec.id().to_string(),
            started_at: Utc::now(),
        };
        runtime::publish_record(&paths, &record)
            .map_err(|source| DaemonError::Publish { source })?;
        tracing::info!(
            name = %config.name,
            port,
            pid = record.pid,
            idle_ttl_ms = config.idle_ttl.as_millis() as u64,
            "runtime record published",
        );

        (listener, token)
    };

    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let draining = Arc::new(AtomicBool::new(false));
    let (exec_tx, executor_join) = executor::spawn(object, draining.clone());

    let ctx = Arc::new(ServerContext {
        name: config.name.clone(),
        pid: std::process::id(),
        token,
        codec,
        max_frame_bytes: config.max_frame_bytes,
        started_wall: Utc::now(),
        started: Instant::now(),
        connections: StdMutex::new(ConnCounter {
            active: 0,
            last_zero_at: Instant::now(),
        }),
        exec_tx: StdMutex::new(Some(exec_tx)),
        shutdown_tx: shutdown_tx.clone(),
        draining,
        force_close: AtomicBool::new(false),
    });

    // Subscribe every task before any of them can run, so no task can miss a
    // shutdown signal sent during startup.
    let accept_rx = ctx.shutdown_tx.subscribe();
    let watchdog_rx = ctx.shutdown_tx.subscribe();
    let mut signal_rx = ctx.shutdown_tx.subscribe();

    let accept_handle = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let result = accept_task(listener, ctx.clone(), accept_rx).await;
            let _ = ctx.shutdown_tx.send(());
            result
        })
    };

    let watchdog_handle = {
        let ctx = ctx.clone();
        let idle_ttl = config.idle_ttl;
        tokio::spawn(async move {
            let result = idle_watchdog_task(ctx.clone(), idle_ttl, watchdog_rx).await;
            let _ = ctx.shutdown_tx.send(());
            result
        })
    };

    let signal_handle = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = signal_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            ctx.initiate_shutdown(false);
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (accept_result, watchdog_result, signal_result) =
        tokio::join!(accept_handle, watchdog_handle, signal_handle);

    handle_join("acceptor", accept_result)?;
    handle_join("idle_watchdog", watchdog_result)?;
    handle_join("signal_handler", signal_result)?;

    teardown(&paths, &ctx, executor_join).await
}

// ---------------------------------------------------------------------------
// Shared server state
// ---------------------------------------------------------------------------

/// Cross-handler daemon state shared by the acceptor, session handlers, the
/// idle watchdog, and teardown. All of it lives here; handlers never reach
/// for globals.
pub(crate) struct ServerContext {
    name: ServiceName,
    pid: u32,
    token: String,
    codec: Arc<dyn Codec>,
    max_frame_bytes: u32,
    started_wall: DateTime<Utc>,
    started: Instant,
    connections: StdMutex<ConnCounter>,
    exec_tx: StdMutex<Option<mpsc::Sender<ExecRequest>>>,
    shutdown_tx: broadcast::Sender<()>,
    draining: Arc<AtomicBool>,
    force_close: AtomicBool,
}

struct ConnCounter {
    active: usize,
    last_zero_at: Instant,
}

impl ServerContext {
    fn active_connections(&self) -> usize {
        self.connections.lock().expect("connection counter poisoned").active
    }

    /// True once the count has sat at zero for at least `idle_ttl`.
    fn idle_expired(&self, idle_ttl: Duration) -> bool {
        let counter = self.connections.lock().expect("connection counter poisoned");
        counter.active == 0 && counter.last_zero_at.elapsed() >= idle_ttl
    }

    fn executor_sender(&self) -> Option<mpsc::Sender<ExecRequest>> {
        self.exec_tx.lock().expect("executor handle poisoned").clone()
    }

    fn close_executor(&self) {
        self.exec_tx.lock().expect("executor handle poisoned").take();
    }

    fn initiate_shutdown(&self, force: bool) {
        if force {
            self.force_close.store(true, Ordering::Release);
        }
        self.draining.store(true, Ordering::Release);
        let _ = self.shutdown_tx.send(());
    }
}

/// Registers one session in the active-connection count for exactly the span
/// of its handler; drop stamps the became-zero instant the watchdog reads.
struct ConnectionGuard {
    ctx: Arc<ServerContext>,
}

impl ConnectionGuard {
    fn register(ctx: Arc<ServerContext>) -> Self {
        {
            let mut counter = ctx.connections.lock().expect("connection counter poisoned");
            counter.active += 1;
        }
        Self { ctx }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let mut counter = self
            .ctx
            .connections
            .lock()
            .expect("connection counter poisoned");
        counter.active -= 1;
        if counter.active == 0 {
            counter.last_zero_at = Instant::now();
        }
    }
}

// ---------------------------------------------------------------------------
// Startup helpers
// ---------------------------------------------------------------------------

/// A published record whose endpoint accepts a TCP connect is a live winner.
async fn peer_is_live(record: &RuntimeRecord) -> bool {
    let connect = tokio::net::TcpStream::connect((record.host.as_str(), record.port));
    matches!(
        tokio::time::timeout(PEER_PROBE_TIMEOUT, connect).await,
        Ok(Ok(_))
    )
}

fn resolve_token(config: &DaemonConfig, paths: &RuntimePaths) -> Result<String, DaemonError> {
    if let Some(auth_file) = &config.auth_file {
        if let Ok(contents) = std::fs::read_to_string(auth_file) {
            let token = contents.trim().to_string();
            if !token.is_empty() {
                return Ok(token);
            }
        }
        tracing::warn!(
            path = %auth_file.display(),
            "pre-generated token file unreadable, generating one",
        );
    }
    Ok(runtime::ensure_auth_token(paths)?)
}

// ---------------------------------------------------------------------------
// Accept loop
// ---------------------------------------------------------------------------

async fn accept_task(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut handlers = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, peer) = accepted.map_err(DaemonError::Socket)?;
                tracing::debug!(peer = %peer, "accepted connection");
                let ctx = ctx.clone();
                handlers.spawn(async move {
                    if let Err(err) = handle_session(stream, ctx).await {
                        tracing::debug!(error = %err, "session handler error");
                    }
                });
            }
        }
    }

    // Stop accepting, then let handlers write their in-flight replies.
    drop(listener);
    let grace = if ctx.force_close.load(Ordering::Acquire) {
        Duration::ZERO
    } else {
        HANDLER_GRACE
    };
    let drained = tokio::time::timeout(grace, async {
        while handlers.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!("handlers exceeded shutdown grace, force-closing sessions");
        handlers.abort_all();
        while handlers.join_next().await.is_some() {}
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Session handler
// ---------------------------------------------------------------------------

/// Drive one session from handshake to close.
///
/// Generic over the stream so tests can exercise the full protocol over
/// in-memory duplex pipes.
async fn handle_session<S>(stream: S, ctx: Arc<ServerContext>) -> Result<(), DaemonError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let codec = ctx.codec.clone();

    let hello = match tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        message::recv(&mut reader, codec.as_ref(), ctx.max_frame_bytes),
    )
    .await
    {
        Ok(Ok(message)) => message,
        Ok(Err(err)) => {
            tracing::debug!(error = %err, "session ended before handshake");
            return Ok(());
        }
        Err(_) => {
            tracing::debug!("handshake timed out");
            return Ok(());
        }
    };

    if let Err((reason, detail)) = check_hello(&ctx, &hello) {
        tracing::info!(reason = %reason, "handshake rejected");
        let refusal = Message::HelloErr {
            reason,
            message: detail,
        };
        let _ = message::send(&mut writer, codec.as_ref(), &refusal).await;
        return Ok(());
    }

    // Counted from handshake-ok to handler exit, exactly once per session.
    let _connection = ConnectionGuard::register(ctx.clone());

    let mut server_info = Map::new();
    server_info.insert("service_name".to_string(), json!(ctx.name.0));
    server_info.insert("codec_id".to_string(), json!(codec.id()));
    message::send(
        &mut writer,
        codec.as_ref(),
        &Message::HelloOk {
            pid: ctx.pid,
            started_at: ctx.started_wall,
            server_info,
        },
    )
    .await?;

    let mut shutdown_rx = ctx.shutdown_tx.subscribe();
    loop {
        let incoming = tokio::select! {
            _ = shutdown_rx.recv() => break,
            incoming = message::recv(&mut reader, codec.as_ref(), ctx.max_frame_bytes) => incoming,
        };
        let request = match incoming {
            Ok(message) => message,
            Err(WireError::ConnectionClosed) => break,
            Err(err) => {
                tracing::debug!(error = %err, "session read failed");
                break;
            }
        };

        match request {
            Message::Call {
                method,
                args,
                kwargs,
            } => {
                // The in-flight call is awaited to completion even during
                // shutdown so the client sees its reply.
                let reply = run_call(&ctx, method, args, kwargs).await;
                send_reply(&mut writer, codec.as_ref(), reply).await?;
            }
            Message::Ping {} => {
                let pong = Message::Pong {
                    pid: ctx.pid,
                    uptime_secs: ctx.started.elapsed().as_secs_f64(),
                    active_clients: ctx.active_connections(),
                    codec_id: codec.id().to_string(),
                    protocol_version: PROTOCOL_VERSION,
                };
                message::send(&mut writer, codec.as_ref(), &pong).await?;
            }
            Message::Close {} => {
                let _ = message::send(
                    &mut writer,
                    codec.as_ref(),
                    &Message::Result { value: Value::Null },
                )
                .await;
                break;
            }
            Message::Shutdown { force } => {
                let _ = message::send(
                    &mut writer,
                    codec.as_ref(),
                    &Message::Result {
                        value: json!({ "stopping": true }),
                    },
                )
                .await;
                tracing::info!(force, "shutdown requested by client");
                ctx.initiate_shutdown(force);
                break;
            }
            other => {
                let reply = Message::RemoteError {
                    kind: "ProtocolError".to_string(),
                    message: format!("unexpected {} frame", other.kind()),
                    trace: None,
                };
                message::send(&mut writer, codec.as_ref(), &reply).await?;
            }
        }
    }

    Ok(())
}

fn check_hello(ctx: &ServerContext, hello: &Message) -> Result<(), (HandshakeReason, String)> {
    let Message::Hello {
        protocol_version,
        token,
        codec_id,
    } = hello
    else {
        return Err((
            HandshakeReason::ProtocolMismatch,
            format!("expected HELLO, got {}", hello.kind()),
        ));
    };

    if *protocol_version != PROTOCOL_VERSION {
        return Err((
            HandshakeReason::ProtocolMismatch,
            format!("daemon speaks protocol {PROTOCOL_VERSION}, client sent {protocol_version}"),
        ));
    }
    if codec_id != ctx.codec.id() {
        return Err((
            HandshakeReason::CodecMismatch,
            format!("daemon codec is '{}', client sent '{codec_id}'", ctx.codec.id()),
        ));
    }
    if !bool::from(token.as_bytes().ct_eq(ctx.token.as_bytes())) {
        return Err((HandshakeReason::AuthRejected, "token mismatch".to_string()));
    }
    Ok(())
}

async fn run_call(
    ctx: &Arc<ServerContext>,
    method: String,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
) -> Message {
    let Some(exec_tx) = ctx.executor_sender() else {
        return remote_error(CallError::shutting_down());
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    let request = ExecRequest {
        method,
        args,
        kwargs,
        reply: reply_tx,
    };
    if exec_tx.send(request).await.is_err() {
        return remote_error(CallError::shutting_down());
    }

    match reply_rx.await {
        Ok(Ok(value)) => Message::Result { value },
        Ok(Err(call_err)) => remote_error(call_err),
        Err(_) => remote_error(CallError::shutting_down()),
    }
}

fn remote_error(err: CallError) -> Message {
    Message::RemoteError {
        kind: err.kind,
        message: err.message,
        trace: err.trace,
    }
}

/// Write one reply frame; an unencodable result is downgraded to a
/// serialization-tagged remote error so the request still gets its reply.
async fn send_reply<W>(
    writer: &mut W,
    codec: &dyn Codec,
    reply: Message,
) -> Result<(), DaemonError>
where
    W: AsyncWrite + Unpin,
{
    match codec.encode(&reply) {
        Ok(payload) => monod_wire::frame::write_frame(writer, &payload)
            .await
            .map_err(Into::into),
        Err(err) => {
            tracing::warn!(error = %err, "reply not encodable, sending serialization error");
            let fallback = Message::RemoteError {
                kind: SERIALIZATION_KIND.to_string(),
                message: err.to_string(),
                trace: None,
            };
            message::send(writer, codec, &fallback).await.map_err(Into::into)
        }
    }
}

// ---------------------------------------------------------------------------
// Idle lifecycle
// ---------------------------------------------------------------------------

async fn idle_watchdog_task(
    ctx: Arc<ServerContext>,
    idle_ttl: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(WATCHDOG_TICK);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                if ctx.idle_expired(idle_ttl) {
                    tracing::info!(
                        idle_ttl_ms = idle_ttl.as_millis() as u64,
                        "idle TTL expired with zero connections, shutting down",
                    );
                    ctx.initiate_shutdown(false);
                    break;
                }
            }
        }
    }
    Ok(())
}

async fn teardown(
    paths: &RuntimePaths,
    ctx: &Arc<ServerContext>,
    executor_join: JoinHandle<()>,
) -> Result<(), DaemonError> {
    ctx.close_executor();
    executor_join
        .await
        .map_err(|err| DaemonError::Protocol(format!("executor join failure: {err}")))?;

    let lock = LockFile::new(&paths.lock_file);
    let _guard = lock.acquire(LOCK_TIMEOUT)?;
    match runtime::read_record(paths) {
        Some(record) if record.pid == ctx.pid => {
            runtime::clear_runtime(paths)?;
            tracing::info!("runtime record cleared");
        }
        Some(record) => {
            tracing::info!(
                successor_pid = record.pid,
                "runtime record owned by a successor, leaving in place",
            );
        }
        None => {}
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Plumbing
// ---------------------------------------------------------------------------

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

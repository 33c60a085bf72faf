//! Connect-or-spawn coordination.
//!
//! The coordinator converges on a working session against the one daemon
//! serving a logical name, or a deterministic error within `start_timeout`:
//! read the record and try to connect; failing that, take the runtime lock,
//! re-check, recover stale state, rotate the token, spawn the entrypoint
//! detached, and poll with bounded-exponential backoff. Every exit path
//! releases the lock through the guard.

use std::fs::OpenOptions;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use monod_core::lock::LockFile;
use monod_core::runtime::{self, RuntimePaths};
use monod_core::types::{FactoryRef, ServiceName};
use monod_wire::codec::{codec_by_id, Codec};
use monod_wire::frame::DEFAULT_MAX_FRAME_BYTES;

use crate::error::ClientError;
use crate::session::Session;

/// First backoff delay while waiting for a spawned daemon.
const SPAWN_POLL_INITIAL: Duration = Duration::from_millis(10);

/// Backoff cap.
const SPAWN_POLL_MAX: Duration = Duration::from_millis(100);

/// A named singleton and how to reach or start it.
///
/// Plain struct with defaulted fields; adjust what you need after
/// [`ServiceConfig::new`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub name: ServiceName,
    pub factory: FactoryRef,
    /// Base directory holding per-name runtime state.
    pub base_dir: PathBuf,
    pub codec_id: String,
    /// How long a daemon this client spawns waits idle before exiting.
    pub idle_ttl: Duration,
    /// Bound on one connect + handshake attempt.
    pub connect_timeout: Duration,
    /// Bound on the whole connect-or-spawn cycle, lock wait included.
    pub start_timeout: Duration,
    /// Opt-in bound on an in-flight call; firing closes the session.
    pub call_timeout: Option<Duration>,
    pub max_frame_bytes: u32,
    /// Binary spawned as the daemon entrypoint; defaults to this executable.
    pub daemon_program: PathBuf,
    /// Arguments selecting the entrypoint subcommand within that binary.
    pub daemon_args: Vec<String>,
}

impl ServiceConfig {
    /// Build a config with the stock defaults: JSON codec, 2 s idle TTL,
    /// 500 ms connect timeout, 3 s start timeout, current executable as the
    /// daemon entrypoint.
    pub fn new(name: impl Into<ServiceName>, factory: FactoryRef) -> Result<Self, ClientError> {
        let daemon_program = std::env::current_exe()
            .map_err(|err| ClientError::ConnectionFailed(format!("cannot resolve entrypoint: {err}")))?;
        Ok(Self {
            name: name.into(),
            factory,
            base_dir: runtime::default_base_dir()?,
            codec_id: "json".to_string(),
            idle_ttl: Duration::from_secs(2),
            connect_timeout: Duration::from_millis(500),
            start_timeout: Duration::from_secs(3),
            call_timeout: None,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            daemon_program,
            daemon_args: vec!["daemon".to_string(), "run".to_string()],
        })
    }

    /// Yield a connected, authenticated session — spawning the daemon first
    /// if no live one answers.
    pub fn connect(&self) -> Result<Session, ClientError> {
        let codec = codec_by_id(&self.codec_id).map_err(ClientError::Serialization)?;
        let paths = runtime::runtime_paths_at(&self.base_dir, &self.name);
        let started = Instant::now();

        match self.connect_once(&paths, &codec) {
            Ok(session) => return Ok(session),
            Err(err) => {
                tracing::debug!(name = %self.name, error = %err, "initial connect failed, taking runtime lock");
            }
        }

        let lock = LockFile::new(&paths.lock_file);
        let _guard = lock.acquire(remaining(started, self.start_timeout))?;

        // Another client may have spawned a daemon while we waited.
        match self.connect_once(&paths, &codec) {
            Ok(session) => return Ok(session),
            Err(err) => {
                tracing::debug!(name = %self.name, error = %err, "connect under lock failed, recovering stale state");
            }
        }

        // Stale: drop record and token, mint a fresh credential, spawn.
        runtime::clear_runtime(&paths)?;
        runtime::ensure_auth_token(&paths)?;
        self.spawn_daemon(&paths)?;

        let deadline = started + self.start_timeout;
        let mut delay = SPAWN_POLL_INITIAL;
        let mut last_err: Option<ClientError> = None;
        while Instant::now() < deadline {
            match self.connect_once(&paths, &codec) {
                Ok(session) => return Ok(session),
                Err(err) => last_err = Some(err),
            }
            std::thread::sleep(delay.min(deadline.saturating_duration_since(Instant::now())));
            delay = (delay * 2).min(SPAWN_POLL_MAX);
        }

        Err(match last_err {
            // The daemon's own exit reason (factory failure, publish failure)
            // is in its log, not on our wire; point there.
            Some(ClientError::ConnectionFailed(detail)) => ClientError::ConnectionFailed(format!(
                "daemon did not answer within the start timeout ({detail}); see {}",
                paths.log_file.display()
            )),
            Some(other) => other,
            None => ClientError::ConnectionFailed(format!(
                "daemon did not start within the timeout; see {}",
                paths.log_file.display()
            )),
        })
    }

    /// Probe for a live daemon without ever spawning one.
    ///
    /// Used by operator commands (status, shutdown) that must observe, not
    /// revive.
    pub fn connect_existing(&self) -> Result<Session, ClientError> {
        let codec = codec_by_id(&self.codec_id).map_err(ClientError::Serialization)?;
        let paths = runtime::runtime_paths_at(&self.base_dir, &self.name);
        self.connect_once(&paths, &codec)
    }

    /// One bounded connect + handshake attempt against the published record.
    fn connect_once(
        &self,
        paths: &RuntimePaths,
        codec: &Arc<dyn Codec>,
    ) -> Result<Session, ClientError> {
        let record = runtime::read_record(paths).ok_or_else(|| {
            ClientError::ConnectionFailed("no runtime metadata published".to_string())
        })?;
        let token = runtime::read_auth_token(paths)
            .map_err(|err| ClientError::ConnectionFailed(format!("auth token: {err}")))?;

        let host: IpAddr = record
            .host
            .parse()
            .map_err(|_| ClientError::ConnectionFailed(format!("bad host '{}'", record.host)))?;
        let addr = SocketAddr::new(host, record.port);

        Session::establish(
            addr,
            &token,
            codec.clone(),
            self.max_frame_bytes,
            self.connect_timeout,
            self.call_timeout,
        )
    }

    /// Spawn the daemon entrypoint as a detached child.
    ///
    /// The token travels via the token-file path on argv, never the bytes.
    /// Stdout/stderr land in the runtime dir's `daemon.log`.
    fn spawn_daemon(&self, paths: &RuntimePaths) -> Result<(), ClientError> {
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&paths.log_file)
            .map_err(|err| ClientError::ConnectionFailed(format!("open daemon log: {err}")))?;
        let log_err = log
            .try_clone()
            .map_err(|err| ClientError::ConnectionFailed(format!("clone daemon log: {err}")))?;

        let mut command = Command::new(&self.daemon_program);
        command
            .args(&self.daemon_args)
            .arg("--name")
            .arg(&self.name.0)
            .arg("--base-dir")
            .arg(&self.base_dir)
            .arg("--factory")
            .arg(&self.factory.0)
            .arg("--idle-ttl")
            .arg(format!("{}", self.idle_ttl.as_secs_f64()))
            .arg("--codec")
            .arg(&self.codec_id)
            .arg("--max-frame-bytes")
            .arg(self.max_frame_bytes.to_string())
            .arg("--auth-file")
            .arg(&paths.auth_file)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));

        // Own process group: the daemon must outlive this client and ignore
        // its terminal signals.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command
            .spawn()
            .map_err(|err| ClientError::ConnectionFailed(format!("spawn daemon: {err}")))?;
        tracing::debug!(
            name = %self.name,
            program = %self.daemon_program.display(),
            child_pid = child.id(),
            "daemon entrypoint spawned",
        );
        Ok(())
    }

    /// Convenience: connect, invoke one method, close.
    pub fn call_once(
        &self,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, ClientError> {
        let mut session = self.connect()?;
        let result = session.call(method, args, kwargs);
        session.close();
        result
    }
}

fn remaining(started: Instant, budget: Duration) -> Duration {
    budget.saturating_sub(started.elapsed())
}

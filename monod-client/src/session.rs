//! One authenticated, framed session against the daemon.
//!
//! A session is blocking and used from one logical caller at a time; requests
//! and replies pair one-for-one in order. Transport errors while a reply is
//! pending poison the session — the call is never silently retried.

use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use monod_wire::codec::Codec;
use monod_wire::error::WireError;
use monod_wire::frame;
use monod_wire::message::{recv_blocking, Message, PROTOCOL_VERSION, SHUTTING_DOWN_KIND};

use crate::error::ClientError;

/// Daemon vitals reported by PONG.
#[derive(Debug, Clone, PartialEq)]
pub struct PongInfo {
    pub pid: u32,
    pub uptime_secs: f64,
    pub active_clients: usize,
    pub codec_id: String,
    pub protocol_version: u32,
}

/// Live authenticated channel to the daemon.
pub struct Session {
    stream: TcpStream,
    codec: Arc<dyn Codec>,
    max_frame_bytes: u32,
    call_timeout: Option<Duration>,
    pid: u32,
    daemon_started_at: DateTime<Utc>,
    closed: bool,
}

impl Session {
    /// Connect and complete the HELLO exchange, all within `connect_timeout`.
    pub(crate) fn establish(
        addr: SocketAddr,
        token: &str,
        codec: Arc<dyn Codec>,
        max_frame_bytes: u32,
        connect_timeout: Duration,
        call_timeout: Option<Duration>,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect_timeout(&addr, connect_timeout)
            .map_err(|err| ClientError::ConnectionFailed(format!("connect to {addr}: {err}")))?;
        let _ = stream.set_nodelay(true);

        // The handshake shares the connect budget; calls are unbounded unless
        // a call timeout was opted into.
        stream
            .set_read_timeout(Some(connect_timeout))
            .map_err(|err| ClientError::ConnectionFailed(err.to_string()))?;

        let mut session = Self {
            stream,
            codec,
            max_frame_bytes,
            call_timeout,
            pid: 0,
            daemon_started_at: Utc::now(),
            closed: false,
        };

        let hello = Message::Hello {
            protocol_version: PROTOCOL_VERSION,
            token: token.to_string(),
            codec_id: session.codec.id().to_string(),
        };
        session
            .send(&hello)
            .map_err(|err| ClientError::ConnectionFailed(err.to_string()))?;

        let reply = recv_blocking(
            &mut session.stream,
            session.codec.as_ref(),
            session.max_frame_bytes,
        )
        .map_err(|err| ClientError::ConnectionFailed(format!("handshake read: {err}")))?;

        match reply {
            Message::HelloOk {
                pid, started_at, ..
            } => {
                session.pid = pid;
                session.daemon_started_at = started_at;
            }
            Message::HelloErr { reason, message } => {
                return Err(ClientError::Handshake { reason, message });
            }
            other => {
                return Err(ClientError::Protocol(format!(
                    "expected HELLO_OK, got {}",
                    other.kind()
                )));
            }
        }

        session
            .stream
            .set_read_timeout(session.call_timeout)
            .map_err(|err| ClientError::ConnectionFailed(err.to_string()))?;
        Ok(session)
    }

    /// Pid the daemon reported at handshake.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Wall-clock start time the daemon reported at handshake.
    pub fn daemon_started_at(&self) -> DateTime<Utc> {
        self.daemon_started_at
    }

    /// Invoke `method` on the singleton and wait for its reply.
    pub fn call(
        &mut self,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, ClientError> {
        if self.closed {
            return Err(ClientError::SessionClosed);
        }

        let request = Message::Call {
            method: method.to_string(),
            args,
            kwargs,
        };
        // Encode before writing so a client-side codec failure surfaces
        // without anything reaching the wire.
        let payload = self.codec.encode(&request)?;
        let sent_at = Instant::now();
        frame::write_frame_blocking(&mut self.stream, &payload)
            .map_err(|err| self.poison(err))?;

        let reply = self.recv_reply(sent_at)?;
        match reply {
            Message::Result { value } => Ok(value),
            Message::RemoteError {
                kind,
                message,
                trace,
            } => {
                if kind == SHUTTING_DOWN_KIND {
                    Err(ClientError::ServerShuttingDown(message))
                } else {
                    Err(ClientError::Remote {
                        kind,
                        message,
                        trace,
                    })
                }
            }
            other => Err(ClientError::Protocol(format!(
                "expected RESULT or REMOTE_ERROR, got {}",
                other.kind()
            ))),
        }
    }

    /// Ask the daemon for its vitals; answered without entering the executor.
    pub fn ping(&mut self) -> Result<PongInfo, ClientError> {
        if self.closed {
            return Err(ClientError::SessionClosed);
        }
        self.send(&Message::Ping {}).map_err(|err| self.poison(err))?;
        let sent_at = Instant::now();
        match self.recv_reply(sent_at)? {
            Message::Pong {
                pid,
                uptime_secs,
                active_clients,
                codec_id,
                protocol_version,
            } => Ok(PongInfo {
                pid,
                uptime_secs,
                active_clients,
                codec_id,
                protocol_version,
            }),
            other => Err(ClientError::Protocol(format!(
                "expected PONG, got {}",
                other.kind()
            ))),
        }
    }

    /// Request daemon termination; the daemon replies before tearing down.
    pub fn shutdown(&mut self, force: bool) -> Result<(), ClientError> {
        if self.closed {
            return Err(ClientError::SessionClosed);
        }
        self.send(&Message::Shutdown { force })
            .map_err(|err| self.poison(err))?;
        let sent_at = Instant::now();
        match self.recv_reply(sent_at)? {
            Message::Result { value } if value == json!({ "stopping": true }) => {
                self.closed = true;
                let _ = self.stream.shutdown(Shutdown::Both);
                Ok(())
            }
            other => Err(ClientError::Protocol(format!(
                "unexpected SHUTDOWN ack: {}",
                other.kind()
            ))),
        }
    }

    /// Polite hangup. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.send(&Message::Close {}).is_ok() {
            // Ack read is best-effort; the daemon may already be gone.
            let _ = self.stream.set_read_timeout(Some(Duration::from_millis(250)));
            let _ = recv_blocking(&mut self.stream, self.codec.as_ref(), self.max_frame_bytes);
        }
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn send(&mut self, message: &Message) -> Result<(), WireError> {
        let payload = self.codec.encode(message)?;
        frame::write_frame_blocking(&mut self.stream, &payload)
    }

    /// Read exactly one reply frame; timeouts close the session for
    /// deterministic server-side resource recovery.
    fn recv_reply(&mut self, sent_at: Instant) -> Result<Message, ClientError> {
        match recv_blocking(&mut self.stream, self.codec.as_ref(), self.max_frame_bytes) {
            Ok(message) => Ok(message),
            Err(WireError::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                self.closed = true;
                let _ = self.stream.shutdown(Shutdown::Both);
                Err(ClientError::CallTimedOut {
                    elapsed: sent_at.elapsed(),
                })
            }
            Err(WireError::Codec(err)) => Err(ClientError::Serialization(err)),
            Err(err) => Err(self.poison(err)),
        }
    }

    /// Transport failure with a reply pending: mark the session dead.
    fn poison(&mut self, err: WireError) -> ClientError {
        self.closed = true;
        let _ = self.stream.shutdown(Shutdown::Both);
        match err {
            WireError::Codec(codec_err) => ClientError::Serialization(codec_err),
            other => ClientError::ServerCrashed(other.to_string()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("pid", &self.pid)
            .field("closed", &self.closed)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests — scripted daemons on real loopback sockets
// ---------------------------------------------------------------------------

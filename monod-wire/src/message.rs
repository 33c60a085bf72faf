//! Typed message envelope and codec-aware send/recv helpers.
//!
//! Every frame on an established session carries exactly one [`Message`]. The
//! envelope is a closed tagged union; the `kind` tag is stable wire surface
//! for a given [`PROTOCOL_VERSION`].

use std::io::{Read, Write};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::Codec;
use crate::error::WireError;
use crate::frame;

/// Wire-protocol version; incompatible envelope changes bump it.
pub const PROTOCOL_VERSION: u32 = 1;

/// `RemoteError` kind tag for requests aborted by daemon shutdown.
pub const SHUTTING_DOWN_KIND: &str = "ServerShuttingDown";

/// `RemoteError` kind tag for results the daemon could not encode.
pub const SERIALIZATION_KIND: &str = "SerializationError";

/// Why a handshake was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeReason {
    ProtocolMismatch,
    AuthRejected,
    CodecMismatch,
}

impl std::fmt::Display for HandshakeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandshakeReason::ProtocolMismatch => write!(f, "protocol mismatch"),
            HandshakeReason::AuthRejected => write!(f, "auth rejected"),
            HandshakeReason::CodecMismatch => write!(f, "codec mismatch"),
        }
    }
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// First frame, client → daemon.
    Hello {
        protocol_version: u32,
        token: String,
        codec_id: String,
    },
    HelloOk {
        pid: u32,
        started_at: DateTime<Utc>,
        server_info: Map<String, Value>,
    },
    HelloErr {
        reason: HandshakeReason,
        message: String,
    },
    Call {
        method: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        kwargs: Map<String, Value>,
    },
    /// Success reply to a CALL.
    Result { value: Value },
    /// In-method failure reply.
    RemoteError {
        #[serde(rename = "error_kind")]
        kind: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trace: Option<String>,
    },
    Ping {},
    Pong {
        pid: u32,
        uptime_secs: f64,
        active_clients: usize,
        codec_id: String,
        protocol_version: u32,
    },
    /// Polite hangup; acknowledged with `Result { value: null }`.
    Close {},
    /// Request daemon termination; replied to before teardown.
    Shutdown { force: bool },
}

impl Message {
    /// Stable tag used in the `kind` field, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "HELLO",
            Message::HelloOk { .. } => "HELLO_OK",
            Message::HelloErr { .. } => "HELLO_ERR",
            Message::Call { .. } => "CALL",
            Message::Result { .. } => "RESULT",
            Message::RemoteError { .. } => "REMOTE_ERROR",
            Message::Ping {} => "PING",
            Message::Pong { .. } => "PONG",
            Message::Close {} => "CLOSE",
            Message::Shutdown { .. } => "SHUTDOWN",
        }
    }
}

// ---------------------------------------------------------------------------
// Codec-aware transport helpers
// ---------------------------------------------------------------------------

/// Encode and send one message (async).
pub async fn send<W>(writer: &mut W, codec: &dyn Codec, message: &Message) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let payload = codec.encode(message)?;
    frame::write_frame(writer, &payload).await
}

/// Receive and decode one message (async).
pub async fn recv<R>(
    reader: &mut R,
    codec: &dyn Codec,
    max_frame_bytes: u32,
) -> Result<Message, WireError>
where
    R: AsyncRead + Unpin,
{
    let payload = frame::read_frame(reader, max_frame_bytes).await?;
    Ok(codec.decode(&payload)?)
}

/// Encode and send one message (blocking).
pub fn send_blocking<W: Write>(
    writer: &mut W,
    codec: &dyn Codec,
    message: &Message,
) -> Result<(), WireError> {
    let payload = codec.encode(message)?;
    frame::write_frame_blocking(writer, &payload)
}

/// Receive and decode one message (blocking).
pub fn recv_blocking<R: Read>(
    reader: &mut R,
    codec: &dyn Codec,
    max_frame_bytes: u32,
) -> Result<Message, WireError> {
    let payload = frame::read_frame_blocking(reader, max_frame_bytes)?;
    Ok(codec.decode(&payload)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

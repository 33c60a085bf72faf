//! Client-surfaced error taxonomy.

use std::time::Duration;

use thiserror::Error;

use monod_core::RuntimeError;
use monod_wire::{CodecError, HandshakeReason};

/// Root error kind for everything the client surfaces.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure to reach a daemon.
    #[error("failed to connect to daemon: {0}")]
    ConnectionFailed(String),

    /// Reachable endpoint but HELLO was rejected.
    #[error("handshake rejected ({reason}): {message}")]
    Handshake {
        reason: HandshakeReason,
        message: String,
    },

    /// The invoked method itself failed; surfaced as-is, never swallowed.
    #[error("remote method failed ({kind}): {message}")]
    Remote {
        kind: String,
        message: String,
        trace: Option<String>,
    },

    /// Payload could not be encoded or decoded on either side.
    #[error("serialization failed: {0}")]
    Serialization(#[from] CodecError),

    /// The request was aborted by daemon shutdown before execution.
    #[error("request aborted by daemon shutdown: {0}")]
    ServerShuttingDown(String),

    /// The session dropped while a reply was pending. The call is never
    /// retried automatically; invocation is at-most-once.
    #[error("session dropped while a reply was pending: {0}")]
    ServerCrashed(String),

    /// The opt-in call timeout fired; the session has been closed.
    #[error("call timed out after {elapsed:?}; session closed")]
    CallTimedOut { elapsed: Duration },

    /// The session was used after `close()`.
    #[error("session is closed")]
    SessionClosed,

    /// Filesystem rendezvous failure (lock, token, base dir).
    #[error("runtime state error: {0}")]
    Runtime(#[from] RuntimeError),

    /// The peer answered with something the protocol does not allow here.
    #[error("protocol error: {0}")]
    Protocol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_distinguishing_detail() {
        let handshake = ClientError::Handshake {
            reason: HandshakeReason::AuthRejected,
            message: "token mismatch".to_string(),
        };
        assert!(handshake.to_string().contains("auth rejected"));
        assert!(handshake.to_string().contains("token mismatch"));

        let remote = ClientError::Remote {
            kind: "ValueError".to_string(),
            message: "nope".to_string(),
            trace: None,
        };
        assert!(remote.to_string().contains("ValueError"));
        assert!(remote.to_string().contains("nope"));
    }
}

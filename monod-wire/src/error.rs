//! Error types for the wire protocol.

use thiserror::Error;

/// Payload encode/decode failure at the codec boundary.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("unknown codec '{0}'")]
    UnknownCodec(String),
}

/// Transport and framing failures.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("I/O error on wire: {0}")]
    Io(#[from] std::io::Error),

    /// Peer announced a frame longer than the configured cap; the session is
    /// failed before the payload is read.
    #[error("frame of {len} bytes exceeds max {max} bytes")]
    FrameTooLarge { len: u32, max: u32 },

    /// The stream ended cleanly at a frame boundary (peer hung up).
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The stream ended in the middle of a frame.
    #[error("connection closed mid-frame")]
    TruncatedFrame,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

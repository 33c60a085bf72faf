//! monod wire protocol — framing, message envelope, codec boundary.
//!
//! Frames are a 4-byte big-endian length prefix followed by exactly that many
//! payload bytes; the transport is oblivious to payload content. The envelope
//! is a closed tagged union ([`Message`]); payload bytes are produced and
//! consumed through the [`Codec`] seam.

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::{codec_by_id, Codec, JsonCodec};
pub use error::{CodecError, WireError};
pub use frame::{DEFAULT_MAX_FRAME_BYTES, FRAME_HEADER_BYTES};
pub use message::{
    HandshakeReason, Message, PROTOCOL_VERSION, SERIALIZATION_KIND, SHUTTING_DOWN_KIND,
};

//! Codec boundary: opaque payload encode/decode.
//!
//! The core only requires this contract; codecs are looked up by id so the
//! negotiated `codec_id` in the handshake and the runtime record stays a
//! plain string. JSON is the only built-in.

use std::sync::Arc;

use crate::error::CodecError;
use crate::message::Message;

/// Payload codec contract consumed by the session protocol.
pub trait Codec: Send + Sync + std::fmt::Debug {
    /// Identifier negotiated in HELLO and published in the runtime record.
    fn id(&self) -> &'static str;

    fn encode(&self, message: &Message) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, payload: &[u8]) -> Result<Message, CodecError>;
}

/// serde_json-backed codec; the default and only built-in.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn id(&self) -> &'static str {
        "json"
    }

    fn encode(&self, message: &Message) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(message).map_err(CodecError::Encode)
    }

    fn decode(&self, payload: &[u8]) -> Result<Message, CodecError> {
        serde_json::from_slice(payload).map_err(CodecError::Decode)
    }
}

/// Resolve a codec id to an implementation.
pub fn codec_by_id(id: &str) -> Result<Arc<dyn Codec>, CodecError> {
    match id {
        "json" => Ok(Arc::new(JsonCodec)),
        other => Err(CodecError::UnknownCodec(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_codec_resolves() {
        let codec = codec_by_id("json").expect("json is built in");
        assert_eq!(codec.id(), "json");
    }

    #[test]
    fn unknown_codec_is_an_error() {
        let err = codec_by_id("pickle").unwrap_err();
        assert!(matches!(err, CodecError::UnknownCodec(ref id) if id == "pickle"));
        assert!(err.to_string().contains("pickle"));
    }

    #[test]
    fn decode_failure_carries_context() {
        let err = JsonCodec.decode(b"\xff\xfe").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }
}

//! Domain types for monod rendezvous state.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! All types are serializable/deserializable via serde + serde_json.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed logical name selecting a singleton namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceName(pub String);

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ServiceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ServiceName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// An opaque factory reference, conventionally `module.path:attribute`.
///
/// The core passes it verbatim to the daemon entrypoint; the embedding binary's
/// factory registry resolves it to a constructor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactoryRef(pub String);

impl FactoryRef {
    /// Validate the `module:attribute` shape and wrap the string.
    pub fn parse(reference: impl Into<String>) -> Result<Self, RuntimeError> {
        let reference = reference.into();
        if !reference.contains(':') {
            return Err(RuntimeError::InvalidFactoryRef { reference });
        }
        Ok(Self(reference))
    }
}

impl fmt::Display for FactoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for FactoryRef {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Runtime metadata record
// ---------------------------------------------------------------------------

/// The published descriptor of a live daemon.
///
/// Written atomically by the daemon after the auth token exists, removed during
/// graceful shutdown, and forcibly removed by a client that proved staleness
/// under the runtime lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeRecord {
    pub protocol_version: u32,
    pub pid: u32,
    /// Always the loopback literal.
    pub host: String,
    pub port: u16,
    pub service_name: ServiceName,
    pub codec_id: String,
    pub started_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

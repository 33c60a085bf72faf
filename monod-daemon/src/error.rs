//! Error surface and exit codes for the daemon runtime.

use std::path::PathBuf;

use thiserror::Error;

use crate::object::FactoryError;

/// Normal shutdown.
pub const EXIT_OK: i32 = 0;
/// Unclassified internal failure.
pub const EXIT_INTERNAL: i32 = 1;
/// A live peer already serves this name; we exited without touching its files.
pub const EXIT_ALREADY_RUNNING: i32 = 2;
/// The object factory failed to construct the singleton.
pub const EXIT_FACTORY_FAILED: i32 = 3;
/// The runtime record could not be published.
pub const EXIT_PUBLISH_FAILED: i32 = 4;

/// Error surface for daemon startup, serving, and teardown.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("socket error: {0}")]
    Socket(#[source] std::io::Error),

    #[error("wire error: {0}")]
    Wire(#[from] monod_wire::WireError),

    #[error("codec error: {0}")]
    Codec(#[from] monod_wire::CodecError),

    #[error("runtime state error: {0}")]
    Runtime(#[from] monod_core::RuntimeError),

    #[error(transparent)]
    Factory(#[from] FactoryError),

    #[error("failed to publish runtime record: {source}")]
    Publish {
        #[source]
        source: monod_core::RuntimeError,
    },

    #[error("a daemon for '{name}' is already serving (pid {pid}, port {port})")]
    AlreadyRunning { name: String, pid: u32, port: u16 },

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("daemon protocol error: {0}")]
    Protocol(String),
}

impl DaemonError {
    /// Process exit code for the entrypoint; each startup failure class gets
    /// a distinct code so the coordinator's logs can tell them apart.
    pub fn exit_code(&self) -> i32 {
        match self {
            DaemonError::AlreadyRunning { .. } => EXIT_ALREADY_RUNNING,
            DaemonError::Factory(_) => EXIT_FACTORY_FAILED,
            DaemonError::Publish { .. } => EXIT_PUBLISH_FAILED,
            _ => EXIT_INTERNAL,
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}

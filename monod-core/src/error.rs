//! Error types for monod-core.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// All errors that can arise from runtime-directory operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error (record publish path).
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// No usable base directory — neither an env override, `$XDG_RUNTIME_DIR`,
    /// nor a cache directory could be resolved.
    #[error("cannot determine runtime base directory; set $MONOD_RUNTIME_DIR")]
    BaseDirNotFound,

    /// The auth token file was absent or unreadable.
    #[error("auth token not found at {path}")]
    TokenNotFound { path: PathBuf },

    /// Exclusive lock was not acquired within the allowed wait.
    #[error("lock on {path} not acquired within {elapsed:?}")]
    LockTimeout { path: PathBuf, elapsed: Duration },

    /// The invalid factory reference was rejected.
    #[error("invalid factory reference '{reference}': expected 'module.path:attribute'")]
    InvalidFactoryRef { reference: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RuntimeError {
    RuntimeError::Io {
        path: path.into(),
        source,
    }
}

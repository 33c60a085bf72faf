//! Runtime-directory state: metadata record, auth token, path resolution.
//!
//! **Core API** (`_at` variants): accept an explicit `base: &Path` — used in
//! tests with `TempDir` so that no test ever touches the real runtime base.
//!
//! **Convenience wrappers** derive the base from [`default_base_dir`] and
//! delegate to the `_at` variants.
//!
//! Reads are lock-free and tolerate torn or absent files: a record that is
//! missing or fails to parse reads as `None` ("stale"), never as an error.
//! Mutations (publish, clear) must happen under the runtime lock ([`crate::lock`]).

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use rand::RngCore;

use crate::error::{io_err, RuntimeError};
use crate::types::{RuntimeRecord, ServiceName};

/// Directory component under the platform base holding all monod state.
pub const RUNTIME_SUBDIR: &str = "monod";

pub const RECORD_FILE: &str = "metadata.json";
pub const AUTH_FILE: &str = "auth.token";
pub const LOCK_FILE: &str = "lock";
pub const LOG_FILE: &str = "daemon.log";

/// Filesystem locations of one logical name's rendezvous state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    /// Per-name directory, e.g. `$XDG_RUNTIME_DIR/monod/<name>`.
    pub dir: PathBuf,
    pub record_file: PathBuf,
    pub auth_file: PathBuf,
    pub lock_file: PathBuf,
    pub log_file: PathBuf,
}

// ---------------------------------------------------------------------------
// Path resolution
// ---------------------------------------------------------------------------

/// Resolve the platform base directory for runtime state.
///
/// Order: `$MONOD_RUNTIME_DIR` override, then `$XDG_RUNTIME_DIR/monod` when
/// that directory is usable, then `<cache dir>/monod`.
pub fn default_base_dir() -> Result<PathBuf, RuntimeError> {
    if let Some(explicit) = std::env::var_os("MONOD_RUNTIME_DIR") {
        let path = PathBuf::from(explicit);
        if !path.as_os_str().is_empty() {
            return Ok(path);
        }
    }

    if let Some(xdg) = std::env::var_os("XDG_RUNTIME_DIR") {
        let candidate = PathBuf::from(xdg).join(RUNTIME_SUBDIR);
        if probe_writable(&candidate) {
            return Ok(candidate);
        }
    }

    dirs::cache_dir()
        .map(|cache| cache.join(RUNTIME_SUBDIR))
        .ok_or(RuntimeError::BaseDirNotFound)
}

/// Returns the paths for `name` under an explicit `base` without touching the
/// filesystem.
pub fn runtime_paths_at(base: &Path, name: &ServiceName) -> RuntimePaths {
    let dir = base.join(&name.0);
    RuntimePaths {
        record_file: dir.join(RECORD_FILE),
        auth_file: dir.join(AUTH_FILE),
        lock_file: dir.join(LOCK_FILE),
        log_file: dir.join(LOG_FILE),
        dir,
    }
}

/// Returns the paths for `name` under [`default_base_dir`].
pub fn runtime_paths(name: &ServiceName) -> Result<RuntimePaths, RuntimeError> {
    Ok(runtime_paths_at(&default_base_dir()?, name))
}

/// Ensure the per-name directory exists with mode `0700`.
pub fn ensure_runtime_dir(paths: &RuntimePaths) -> Result<(), RuntimeError> {
    if !paths.dir.exists() {
        fs::create_dir_all(&paths.dir).map_err(|e| io_err(&paths.dir, e))?;
        set_dir_permissions(&paths.dir)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Metadata record
// ---------------------------------------------------------------------------

/// Read the published record, lock-free.
///
/// A missing, unreadable, or unparsable record returns `None`; callers promote
/// that to "stale" and go through the coordinator's recovery path.
pub fn read_record(paths: &RuntimePaths) -> Option<RuntimeRecord> {
    let contents = match fs::read(&paths.record_file) {
        Ok(bytes) => bytes,
        Err(err) => {
            if err.kind() != ErrorKind::NotFound {
                tracing::debug!(
                    path = %paths.record_file.display(),
                    error = %err,
                    "runtime record unreadable, treating as stale",
                );
            }
            return None;
        }
    };
    match serde_json::from_slice(&contents) {
        Ok(record) => Some(record),
        Err(err) => {
            tracing::debug!(
                path = %paths.record_file.display(),
                error = %err,
                "runtime record corrupt, treating as stale",
            );
            None
        }
    }
}

/// Atomically publish the record (daemon only, under the runtime lock).
///
/// Writes to a `.tmp` sibling (same directory = same filesystem), sets `0600`
/// permissions, then renames over the live record.
pub fn publish_record(paths: &RuntimePaths, record: &RuntimeRecord) -> Result<(), RuntimeError> {
    ensure_runtime_dir(paths)?;

    let tmp = record_tmp_path(paths);
    let json = serde_json::to_vec_pretty(record)?;
    fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    fs::rename(&tmp, &paths.record_file).map_err(|e| io_err(&paths.record_file, e))?;
    Ok(())
}

/// Unlink the record and the auth token (under the runtime lock).
///
/// The lock file persists across daemon generations. Missing files are not an
/// error: clearing stale state is idempotent.
pub fn clear_runtime(paths: &RuntimePaths) -> Result<(), RuntimeError> {
    for path in [&paths.record_file, &record_tmp_path(paths), &paths.auth_file] {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(io_err(path, err)),
        }
    }
    Ok(())
}

fn record_tmp_path(paths: &RuntimePaths) -> PathBuf {
    paths.record_file.with_extension("json.tmp")
}

// ---------------------------------------------------------------------------
// Auth token
// ---------------------------------------------------------------------------

/// Read the existing token, or create a fresh one with `O_CREAT|O_EXCL`
/// semantics and mode `0600`.
///
/// Two processes racing here converge on one token: the loser of the
/// create-new race reads the winner's bytes.
pub fn ensure_auth_token(paths: &RuntimePaths) -> Result<String, RuntimeError> {
    ensure_runtime_dir(paths)?;

    if let Some(existing) = try_read_token(paths) {
        return Ok(existing);
    }

    let token = generate_token();
    match open_token_create_new(&paths.auth_file) {
        Ok(mut file) => {
            use std::io::Write;
            file.write_all(token.as_bytes())
                .map_err(|e| io_err(&paths.auth_file, e))?;
            Ok(token)
        }
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            try_read_token(paths).ok_or(RuntimeError::TokenNotFound {
                path: paths.auth_file.clone(),
            })
        }
        Err(err) => Err(io_err(&paths.auth_file, err)),
    }
}

/// Read the token file, erroring if absent.
pub fn read_auth_token(paths: &RuntimePaths) -> Result<String, RuntimeError> {
    try_read_token(paths).ok_or(RuntimeError::TokenNotFound {
        path: paths.auth_file.clone(),
    })
}

fn try_read_token(paths: &RuntimePaths) -> Option<String> {
    match fs::read_to_string(&paths.auth_file) {
        Ok(contents) => {
            let token = contents.trim().to_string();
            if token.is_empty() {
                None
            } else {
                Some(token)
            }
        }
        Err(_) => None,
    }
}

/// 32 random bytes, hex-encoded (256 bits of entropy).
pub fn generate_token() -> String {
    use std::fmt::Write;

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut token = String::with_capacity(64);
    for byte in bytes {
        let _ = write!(token, "{byte:02x}");
    }
    token
}

#[cfg(unix)]
fn open_token_create_new(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_token_create_new(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new().write(true).create_new(true).open(path)
}

// ---------------------------------------------------------------------------
// Permission helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), RuntimeError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700)).map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), RuntimeError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), RuntimeError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), RuntimeError> {
    Ok(())
}

fn probe_writable(dir: &Path) -> bool {
    if fs::create_dir_all(dir).is_err() {
        return false;
    }
    let probe = dir.join(".probe");
    match fs::write(&probe, b"") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Unit tests (base-independent)
// ---------------------------------------------------------------------------

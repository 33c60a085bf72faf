//! monod core library — domain types, runtime-directory state, file locking.
//!
//! Public API surface:
//! - [`types`] — newtypes and the runtime metadata record
//! - [`error`] — [`RuntimeError`]
//! - [`runtime`] — read / publish / clear of per-name rendezvous state
//! - [`lock`] — advisory exclusive lock guarding runtime mutations

pub mod error;
pub mod lock;
pub mod runtime;
pub mod types;

pub use error::RuntimeError;
pub use lock::{LockFile, LockGuard};
pub use types::{FactoryRef, RuntimeRecord, ServiceName};

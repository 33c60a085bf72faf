//! monod daemon runtime: acceptor + sequential executor + idle lifecycle.
//!
//! The embedding binary registers object factories in a [`FactoryRegistry`]
//! and hands it to [`start_blocking`] together with a [`DaemonConfig`]; the
//! runtime owns everything else — publishing the rendezvous record, accepting
//! authenticated sessions, serializing method calls through one executor, and
//! tearing the runtime files down when the daemon goes idle.

mod error;
mod executor;
mod object;
mod runtime;

pub use error::{
    DaemonError, EXIT_ALREADY_RUNNING, EXIT_FACTORY_FAILED, EXIT_INTERNAL, EXIT_OK,
    EXIT_PUBLISH_FAILED,
};
pub use object::{CallError, FactoryError, FactoryRegistry, ServiceObject};
pub use runtime::{run, start_blocking, DaemonConfig};

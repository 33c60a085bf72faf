//! monod client library — sessions and the connect-or-spawn coordinator.
//!
//! [`ServiceConfig`] names a singleton (logical name + factory reference) and
//! [`ServiceConfig::connect`] yields an authenticated [`Session`] against the
//! one daemon serving that name, spawning it first when necessary. All
//! failures surface through the single [`ClientError`] root.

pub mod coordinator;
pub mod error;
pub mod session;

pub use coordinator::ServiceConfig;
pub use error::ClientError;
pub use session::{PongInfo, Session};

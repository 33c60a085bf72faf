//! Service-object dispatch and factory registration.
//!
//! The daemon invokes methods identified by a string. Rather than any
//! reflection facility, dispatch is a capability lookup the object implements
//! itself: given a method name and decoded arguments, produce a value or a
//! [`CallError`]. Factories are registered under the factory-reference string
//! by the embedding binary and resolved once at daemon startup.

use std::collections::HashMap;
use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

use monod_core::FactoryRef;
use monod_wire::message::SHUTTING_DOWN_KIND;

/// Descriptor of an in-method failure, shipped to the caller verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallError {
    pub kind: String,
    pub message: String,
    pub trace: Option<String>,
}

impl CallError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    pub fn no_such_method(name: &str) -> Self {
        Self::new("AttributeError", format!("object has no method '{name}'"))
    }

    pub fn bad_arguments(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn shutting_down() -> Self {
        Self::new(SHUTTING_DOWN_KIND, "daemon is shutting down")
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// The singleton hosted by the daemon.
///
/// Exactly one executor thread ever holds the object; `&mut self` is the
/// whole concurrency story.
pub trait ServiceObject: Send + std::fmt::Debug {
    fn call(
        &mut self,
        method: &str,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> Result<Value, CallError>;
}

/// Factory resolution failure at daemon startup.
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("unknown factory reference '{0}'")]
    Unknown(String),

    #[error("factory '{reference}' failed: {message}")]
    Failed { reference: String, message: String },
}

type FactoryFn = Box<dyn Fn() -> Result<Box<dyn ServiceObject>, String> + Send + Sync>;

/// Name → constructor table for the embedding binary's objects.
#[derive(Default)]
pub struct FactoryRegistry {
    factories: HashMap<String, FactoryFn>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under a factory-reference string.
    ///
    /// Later registrations under the same reference replace earlier ones.
    pub fn register<F>(&mut self, reference: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Box<dyn ServiceObject>, String> + Send + Sync + 'static,
    {
        self.factories.insert(reference.into(), Box::new(factory));
    }

    /// Construct the singleton for `reference`.
    pub fn build(&self, reference: &FactoryRef) -> Result<Box<dyn ServiceObject>, FactoryError> {
        let factory = self
            .factories
            .get(&reference.0)
            .ok_or_else(|| FactoryError::Unknown(reference.0.clone()))?;
        factory().map_err(|message| FactoryError::Failed {
            reference: reference.0.clone(),
            message,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("references", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

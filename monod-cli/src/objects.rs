//! Built-in demo objects and their factory registry.
//!
//! These double as fixtures for the integration suite: a counter whose
//! `inc` answers are gap-free under any client interleaving, an echo box,
//! and an object that always fails.

use serde_json::{json, Map, Value};

use monod_daemon::{CallError, FactoryRegistry, ServiceObject};

pub const COUNTER_FACTORY: &str = "monod.demo:counter";
pub const ECHO_FACTORY: &str = "monod.demo:echo";
pub const BOOM_FACTORY: &str = "monod.demo:boom";

/// Registry of everything this binary can host.
pub fn builtin_registry() -> FactoryRegistry {
    let mut registry = FactoryRegistry::new();
    registry.register(COUNTER_FACTORY, || Ok(Box::new(Counter { value: 0 })));
    registry.register(ECHO_FACTORY, || Ok(Box::new(Echo)));
    registry.register(BOOM_FACTORY, || Ok(Box::new(Boom)));
    registry
}

/// Stateful counter; `inc` returns the post-increment value.
#[derive(Debug)]
struct Counter {
    value: i64,
}

impl ServiceObject for Counter {
    fn call(
        &mut self,
        method: &str,
        args: &[Value],
        _kwargs: &Map<String, Value>,
    ) -> Result<Value, CallError> {
        match method {
            "inc" => {
                let step = match args.first() {
                    None => 1,
                    Some(value) => value
                        .as_i64()
                        .ok_or_else(|| CallError::bad_arguments("inc step must be an integer"))?,
                };
                self.value += step;
                Ok(json!(self.value))
            }
            "value" => Ok(json!(self.value)),
            "reset" => {
                self.value = 0;
                Ok(json!(self.value))
            }
            other => Err(CallError::no_such_method(other)),
        }
    }
}

/// Returns whatever it was given.
#[derive(Debug)]
struct Echo;

impl ServiceObject for Echo {
    fn call(
        &mut self,
        method: &str,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> Result<Value, CallError> {
        match method {
            "echo" => Ok(json!({ "args": args, "kwargs": kwargs })),
            other => Err(CallError::no_such_method(other)),
        }
    }
}

/// Fails on demand; `ok` proves the session survives the failure.
#[derive(Debug)]
struct Boom;

impl ServiceObject for Boom {
    fn call(
        &mut self,
        method: &str,
        _args: &[Value],
        _kwargs: &Map<String, Value>,
    ) -> Result<Value, CallError> {
        match method {
            "boom" => Err(CallError::new("DemoError", "nope").with_trace("Boom::call(\"boom\")")),
            "ok" => Ok(json!(true)),
            other => Err(CallError::no_such_method(other)),
        }
    }
}

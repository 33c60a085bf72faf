//! `monod call` — invoke one method on the singleton object.

use anyhow::{bail, Context, Result};
use clap::Args;
use serde_json::{Map, Value};

use crate::commands::ServiceArgs;

#[derive(Args, Debug)]
pub struct CallArgs {
    #[command(flatten)]
    pub service: ServiceArgs,

    /// Method name to invoke on the singleton.
    pub method: String,

    /// Positional arguments as a JSON array, e.g. '[1, "two"]'.
    #[arg(long, default_value = "[]")]
    pub args: String,

    /// Keyword arguments as a JSON object, e.g. '{"retries": 3}'.
    #[arg(long, default_value = "{}")]
    pub kwargs: String,
}

impl CallArgs {
    pub fn run(self) -> Result<()> {
        let args: Vec<Value> = serde_json::from_str(&self.args)
            .with_context(|| format!("--args is not a JSON array: {}", self.args))?;
        let kwargs: Map<String, Value> = serde_json::from_str(&self.kwargs)
            .with_context(|| format!("--kwargs is not a JSON object: {}", self.kwargs))?;

        let config = self.service.to_config()?;
        let mut session = config
            .connect()
            .with_context(|| format!("failed to reach singleton '{}'", self.service.name))?;
        let outcome = session.call(&self.method, args, kwargs);
        session.close();

        match outcome {
            Ok(value) => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&value).context("failed to render result JSON")?
                );
                Ok(())
            }
            Err(err) => bail!("call '{}' failed: {err}", self.method),
        }
    }
}

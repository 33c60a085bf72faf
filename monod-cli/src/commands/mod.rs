pub mod call;
pub mod daemon;
pub mod ping;
pub mod shutdown;
pub mod status;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use monod_client::ServiceConfig;
use monod_core::types::{FactoryRef, ServiceName};

/// Flags shared by every client-side command.
#[derive(Args, Debug)]
pub struct ServiceArgs {
    /// Logical name of the singleton.
    #[arg(long)]
    pub name: String,

    /// Factory reference resolved by the daemon's registry.
    #[arg(long, default_value = crate::objects::COUNTER_FACTORY)]
    pub factory: String,

    /// Override the runtime base directory (default: platform runtime dir).
    #[arg(long)]
    pub base_dir: Option<PathBuf>,

    /// Idle seconds before a daemon this command spawns exits.
    #[arg(long, default_value_t = 2.0)]
    pub idle_ttl: f64,

    /// Seconds allowed for one connect + handshake attempt.
    #[arg(long, default_value_t = 0.5)]
    pub connect_timeout: f64,

    /// Seconds allowed for the whole connect-or-spawn cycle.
    #[arg(long, default_value_t = 3.0)]
    pub start_timeout: f64,
}

impl ServiceArgs {
    pub fn to_config(&self) -> Result<ServiceConfig> {
        let factory = FactoryRef::parse(self.factory.as_str())
            .with_context(|| format!("invalid --factory '{}'", self.factory))?;
        let mut config = ServiceConfig::new(ServiceName::from(self.name.as_str()), factory)
            .context("could not build service configuration")?;
        if let Some(base_dir) = &self.base_dir {
            config.base_dir = base_dir.clone();
        }
        config.idle_ttl = Duration::from_secs_f64(self.idle_ttl);
        config.connect_timeout = Duration::from_secs_f64(self.connect_timeout);
        config.start_timeout = Duration::from_secs_f64(self.start_timeout);
        Ok(config)
    }
}

//! `monod ping` — reach (or start) the daemon and print its vitals.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

use crate::commands::ServiceArgs;

#[derive(Args, Debug)]
pub struct PingArgs {
    #[command(flatten)]
    pub service: ServiceArgs,
}

impl PingArgs {
    pub fn run(self) -> Result<()> {
        let config = self.service.to_config()?;
        let mut session = config
            .connect()
            .with_context(|| format!("failed to reach singleton '{}'", self.service.name))?;
        let pong = session.ping().context("ping failed")?;
        session.close();

        let payload = json!({
            "pid": pong.pid,
            "uptime_secs": pong.uptime_secs,
            "active_clients": pong.active_clients,
            "codec_id": pong.codec_id,
            "protocol_version": pong.protocol_version,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).context("failed to render pong JSON")?
        );
        Ok(())
    }
}

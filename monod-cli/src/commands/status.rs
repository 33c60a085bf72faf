//! `monod status` — observe the runtime record and daemon vitals.
//!
//! Never spawns a daemon: a name with no live daemon reports `running: false`.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

use monod_core::runtime::{read_record, runtime_paths_at};
use monod_core::types::ServiceName;

use crate::commands::ServiceArgs;

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub service: ServiceArgs,

    /// Emit machine-readable JSON (currently the only format).
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let config = self.service.to_config()?;
        let paths = runtime_paths_at(&config.base_dir, &ServiceName::from(self.service.name.as_str()));
        let record = read_record(&paths);

        let payload = match config.connect_existing() {
            Ok(mut session) => {
                let pong = session.ping().context("daemon answered HELLO but not PING")?;
                session.close();
                json!({
                    "running": true,
                    "name": self.service.name,
                    "pid": pong.pid,
                    "uptime_secs": pong.uptime_secs,
                    "active_clients": pong.active_clients,
                    "codec_id": pong.codec_id,
                    "protocol_version": pong.protocol_version,
                    "record": record,
                })
            }
            Err(err) => json!({
                "running": false,
                "name": self.service.name,
                "detail": err.to_string(),
                "record": record,
            }),
        };

        println!(
            "{}",
            serde_json::to_string_pretty(&payload).context("failed to render status JSON")?
        );
        Ok(())
    }
}

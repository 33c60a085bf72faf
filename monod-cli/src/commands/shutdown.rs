//! `monod shutdown` — ask a running daemon to terminate.

use anyhow::{Context, Result};
use clap::Args;

use monod_client::ClientError;

use crate::commands::ServiceArgs;

#[derive(Args, Debug)]
pub struct ShutdownArgs {
    #[command(flatten)]
    pub service: ServiceArgs,

    /// Skip the graceful drain of in-flight replies.
    #[arg(long)]
    pub force: bool,
}

impl ShutdownArgs {
    pub fn run(self) -> Result<()> {
        let config = self.service.to_config()?;
        match config.connect_existing() {
            Ok(mut session) => {
                session
                    .shutdown(self.force)
                    .context("daemon did not acknowledge shutdown")?;
                println!("daemon shutdown requested");
                Ok(())
            }
            Err(ClientError::ConnectionFailed(_)) => {
                println!("daemon is not running");
                Ok(())
            }
            Err(err) => Err(err).context("failed to reach daemon"),
        }
    }
}

//! `monod daemon` — the entrypoint coordinators spawn, also usable in the
//! foreground for debugging.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Subcommand};

use monod_core::runtime::default_base_dir;
use monod_core::types::{FactoryRef, ServiceName};
use monod_daemon::{start_blocking, DaemonConfig};
use monod_wire::DEFAULT_MAX_FRAME_BYTES;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground until idle shutdown.
    Run(RunArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Logical name of the singleton to host.
    #[arg(long)]
    pub name: String,

    /// Runtime base directory.
    #[arg(long)]
    pub base_dir: Option<PathBuf>,

    /// Factory reference to resolve against the built-in registry.
    #[arg(long)]
    pub factory: String,

    /// Seconds of zero connections before graceful shutdown.
    #[arg(long, default_value_t = 2.0)]
    pub idle_ttl: f64,

    /// Payload codec id.
    #[arg(long, default_value = "json")]
    pub codec: String,

    /// Maximum frame payload size in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: u32,

    /// Pre-generated auth token file (written by the spawning coordinator).
    #[arg(long)]
    pub auth_file: Option<PathBuf>,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    match command {
        DaemonCommand::Run(args) => {
            let base_dir = match args.base_dir {
                Some(dir) => dir,
                None => default_base_dir()?,
            };
            let factory = FactoryRef::parse(args.factory.as_str())?;

            let mut config = DaemonConfig::new(
                ServiceName::from(args.name.as_str()),
                factory,
                base_dir,
            );
            config.idle_ttl = Duration::from_secs_f64(args.idle_ttl);
            config.codec_id = args.codec;
            config.max_frame_bytes = args.max_frame_bytes;
            config.auth_file = args.auth_file;

            let registry = crate::objects::builtin_registry();
            if let Err(err) = start_blocking(config, &registry) {
                // Distinct exit codes let spawners tell startup failures apart.
                eprintln!("monod daemon: {err}");
                std::process::exit(err.exit_code());
            }
            Ok(())
        }
    }
}

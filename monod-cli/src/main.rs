//! monod — one shared in-memory object per logical name, hosted in an
//! auto-spawned loopback daemon.
//!
//! # Usage
//!
//! ```text
//! monod ping --name <name> [--factory <module:attr>]
//! monod call --name <name> <method> [--args '[...]'] [--kwargs '{...}']
//! monod status --name <name> [--json]
//! monod shutdown --name <name> [--force]
//! monod daemon run --name <name> --factory <module:attr> ...   (entrypoint)
//! ```

mod commands;
mod objects;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    call::CallArgs, daemon::DaemonCommand, ping::PingArgs, shutdown::ShutdownArgs,
    status::StatusArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "monod",
    version,
    about = "Share one in-memory object instance across local processes",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check daemon liveness, spawning it when necessary.
    Ping(PingArgs),

    /// Invoke a method on the singleton object.
    Call(CallArgs),

    /// Report runtime record and daemon vitals without spawning anything.
    Status(StatusArgs),

    /// Ask a running daemon to terminate.
    Shutdown(ShutdownArgs),

    /// Daemon lifecycle (the `run` entrypoint is what coordinators spawn).
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Ping(args) => args.run(),
        Commands::Call(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Shutdown(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}

//! `hotmic` — a command-line demonstration surface for the engine facade.
//!
//! Not part of the engine's public contract (SPEC_FULL.md §0.5, §6): a
//! host embedding `hotmic-engine` directly never needs this binary. It
//! exists the same way `sonido-cli` exists next to `sonido-io` — to list
//! devices, run a minimal session, and print diagnostics without writing
//! a full host integration first.

mod commands;
mod session;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "hotmic")]
#[command(author, version, about = "HotMic audio engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List and inspect audio devices
    Devices(commands::devices::DevicesArgs),

    /// Run a session from a minimal graph description
    Run(commands::run::RunArgs),

    /// Print a session config template
    Init(commands::init::InitArgs),
}

fn main() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices(args) => commands::devices::run(args),
        Commands::Run(args) => commands::run::run(args),
        Commands::Init(args) => commands::init::run(args),
    }
}

//! One module per `hotmic` subcommand, mirroring `sonido_cli::commands`'
//! layout (one file per `Commands` variant, a `run(args) -> anyhow::Result<()>`
//! entry point in each).

pub mod devices;
pub mod init;
pub mod run;

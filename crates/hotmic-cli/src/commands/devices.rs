//! Audio device enumeration, mirroring `sonido_cli::commands::devices`.

use clap::{Args, Subcommand};
use hotmic_io::{default_device, list_devices};

#[derive(Args)]
pub struct DevicesArgs {
    #[command(subcommand)]
    command: Option<DevicesCommand>,
}

#[derive(Subcommand)]
enum DevicesCommand {
    /// List every device the default host can see.
    List,
    /// Show the system default input/output devices.
    Info,
}

pub fn run(args: DevicesArgs) -> anyhow::Result<()> {
    match args.command.unwrap_or(DevicesCommand::List) {
        DevicesCommand::List => {
            let devices = list_devices()?;
            if devices.is_empty() {
                println!("No audio devices found.");
                return Ok(());
            }

            let inputs: Vec<_> = devices.iter().filter(|d| d.is_input).collect();
            let outputs: Vec<_> = devices.iter().filter(|d| d.is_output).collect();

            println!("Input devices:");
            for device in &inputs {
                println!("  {} ({} Hz)", device.name, device.default_sample_rate);
            }
            println!("Output devices:");
            for device in &outputs {
                println!("  {} ({} Hz)", device.name, device.default_sample_rate);
            }
            println!("\nTotal: {} input(s), {} output(s)", inputs.len(), outputs.len());
        }
        DevicesCommand::Info => {
            let (input, output) = default_device()?;
            match input {
                Some(device) => println!("Default input:  {} ({} Hz)", device.name, device.default_sample_rate),
                None => println!("Default input:  none"),
            }
            match output {
                Some(device) => println!("Default output: {} ({} Hz)", device.name, device.default_sample_rate),
                None => println!("Default output: none"),
            }
        }
    }
    Ok(())
}

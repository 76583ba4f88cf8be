//! Prints a starter graph description, so `hotmic run --graph` has
//! something to point at without hand-writing the shape from scratch.

use clap::Args;

#[derive(Args)]
pub struct InitArgs {
    /// Emit JSON instead of the default TOML.
    #[arg(long)]
    json: bool,
}

const TEMPLATE_TOML: &str = r#"# hotmic session graph: one channel reading the default input device,
# gain-staged by the engine's per-channel smoothers, sent to both sides
# of the output bus.

[[channels]]
name = "mic"
root = "input"
channel_mode = "sum"
native_channels = 2

[[channels.plugins]]
kind = "output_send"
mode = "both"
"#;

pub fn run(args: InitArgs) -> anyhow::Result<()> {
    if args.json {
        let graph: crate::session::GraphConfig = toml::from_str(TEMPLATE_TOML)?;
        println!("{}", serde_json::to_string_pretty(&graph)?);
    } else {
        print!("{TEMPLATE_TOML}");
    }
    Ok(())
}

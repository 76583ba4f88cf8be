//! Runs a live session from a graph description file, mirroring
//! `sonido_cli::commands::realtime`'s shape: resolve devices, build the
//! processing graph, open the stream, print status until Ctrl+C.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use clap::Args;

use hotmic_engine::{Engine, EngineConfig};
use hotmic_io::CpalBackend;

#[derive(Args)]
pub struct RunArgs {
    /// Path to a TOML or JSON graph description (see `hotmic init`).
    #[arg(short, long)]
    graph: PathBuf,

    /// Output sample rate, in Hz.
    #[arg(long, default_value = "48000")]
    sample_rate: u32,

    /// Block size the pipeline processes internally, in samples.
    #[arg(long, default_value = "256")]
    block_size: usize,

    /// How often to print a diagnostics line, in milliseconds.
    #[arg(long, default_value = "1000")]
    status_interval_ms: u64,
}

pub fn run(args: RunArgs) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&args.graph).with_context(|| format!("reading {}", args.graph.display()))?;
    let graph = crate::session::parse(&text)?;

    let config = EngineConfig { sample_rate: args.sample_rate as f32, block_size: args.block_size, ..EngineConfig::default() };
    let engine = Engine::new(config, Arc::new(CpalBackend::new()));

    let ids = crate::session::build(&engine, &graph)?;
    println!("Built {} channel(s): {:?}", ids.len(), ids.keys().collect::<Vec<_>>());

    engine.start()?;
    println!("Engine started. Press Ctrl+C to stop...\n");

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(args.status_interval_ms));
        let diagnostics = engine.diagnostics();
        println!(
            "callbacks={} frames={} underflow={} contention={} recovering={} overruns={}/{}ns max={}ns",
            diagnostics.output_callback_count,
            diagnostics.last_output_frames,
            diagnostics.output_underflow_samples,
            diagnostics.output_contention,
            diagnostics.is_recovering,
            diagnostics.profile_overruns,
            diagnostics.profile_budget_ticks,
            diagnostics.profile_max_ticks,
        );
    }

    engine.stop();
    println!("Stopped.");
    Ok(())
}

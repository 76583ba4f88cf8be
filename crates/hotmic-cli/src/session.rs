//! A minimal, CLI-only graph description.
//!
//! `hotmic-engine::config::SessionConfig` (SPEC_FULL.md §0.3) only
//! persists device bindings, deliberately leaving chain contents to the
//! host (spec.md §1: preset (de)serialization is out of scope). This
//! module is that host: a small serde shape the `run` subcommand loads
//! from TOML or JSON to drive [`hotmic_engine::Engine`]'s graph mutation
//! API, built the way `sonido_cli::commands::realtime` turns a `--chain`
//! string into `ProcessingEngine::add_effect` calls.

use std::collections::HashMap;

use anyhow::{Context, anyhow, bail};
use serde::{Deserialize, Serialize};

use hotmic_builtins::{CopyPlugin, Merge, OutputSend};
use hotmic_core::routing::{MergePolarity, MergeSumStrategy, OutputBusMode};
use hotmic_engine::{ChannelKind, ChannelMode, Engine};

/// Top-level session graph, loaded from a `--graph` file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GraphConfig {
    /// Every channel in processing order of declaration (the engine
    /// recomputes the real topological order itself; this list only
    /// controls construction order, since a copy/merge target must name
    /// a source that was already added).
    pub channels: Vec<ChannelConfig>,
}

/// One channel's construction recipe.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    /// A name used to refer to this channel from other channels' `Merge`
    /// `sources` and `Copy`'s implicit target — not persisted by the
    /// engine itself, which only knows numeric channel ids.
    pub name: String,
    /// Either a live-capture root or a copy target naming its source by
    /// `name`.
    pub root: RootKind,
    /// Input device id to bind, for `root: input` channels. Left unbound
    /// (silent) if omitted.
    pub device_id: Option<String>,
    /// Down-mix mode for a bound stereo device.
    #[serde(default)]
    pub channel_mode: ChannelModeSpec,
    /// Native channel count of the bound device.
    #[serde(default = "default_native_channels")]
    pub native_channels: u16,
    /// Routing plugins to append after the pinned slot 0, in order.
    #[serde(default)]
    pub plugins: Vec<PluginSpec>,
}

fn default_native_channels() -> u16 {
    1
}

/// How a channel's slot 0 is pinned.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RootKind {
    /// A live-capture channel, pinned to `Input`.
    Input,
    /// A copy-created channel, pinned to `BusInput` reading `source`'s
    /// `Copy` slot.
    CopyTarget {
        /// The `name` of the channel whose `Copy` plugin feeds this one.
        source: String,
    },
}

/// Down-mix mode for a bound stereo device, mirroring
/// [`hotmic_engine::ChannelMode`] with `serde` derives kept out of the
/// engine crate itself.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelModeSpec {
    /// Device's left channel.
    #[default]
    Left,
    /// Device's right channel.
    Right,
    /// Average of left and right.
    Sum,
}

impl From<ChannelModeSpec> for ChannelMode {
    fn from(value: ChannelModeSpec) -> Self {
        match value {
            ChannelModeSpec::Left => ChannelMode::Left,
            ChannelModeSpec::Right => ChannelMode::Right,
            ChannelModeSpec::Sum => ChannelMode::Sum,
        }
    }
}

/// One routing plugin in a channel's chain, by name rather than by
/// numeric channel id — ids are only assigned once [`build`] adds the
/// channel to the engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PluginSpec {
    /// Pins an `OutputSend` writing `mode` to the process-wide output
    /// bus. At most one may end up active across the whole graph
    /// (spec.md §3).
    OutputSend {
        /// Which side(s) of the stereo bus this plugin writes.
        mode: OutputBusModeSpec,
    },
    /// Pins a `Copy` slot, capturing this channel's buffer and analysis
    /// signals for any channel whose `root` names this one as `source`.
    Copy,
    /// Pins a `Merge` slot summing the named `sources`' published output
    /// into this channel.
    Merge {
        /// Channel names to read from; must already have been declared.
        sources: Vec<String>,
        /// Summing strategy.
        #[serde(default)]
        strategy: MergeStrategySpec,
        /// Polarity inversion.
        #[serde(default)]
        polarity: MergePolaritySpec,
        /// Delay-line capacity bound, in samples, covering the worst-case
        /// declared source latency (SPEC_FULL.md's Design Note on
        /// pre-sizing alignment delay lines).
        #[serde(default = "default_merge_capacity")]
        max_latency_samples: usize,
    },
}

fn default_merge_capacity() -> usize {
    4096
}

/// Mirrors [`OutputBusMode`] with `serde` derives.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputBusModeSpec {
    /// Left channel only.
    Left,
    /// Right channel only.
    Right,
    /// Both channels.
    Both,
}

impl From<OutputBusModeSpec> for OutputBusMode {
    fn from(value: OutputBusModeSpec) -> Self {
        match value {
            OutputBusModeSpec::Left => OutputBusMode::Left,
            OutputBusModeSpec::Right => OutputBusMode::Right,
            OutputBusModeSpec::Both => OutputBusMode::Both,
        }
    }
}

/// Mirrors [`MergeSumStrategy`] with `serde` derives.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategySpec {
    /// Plain sum of sources plus the target's own signal.
    #[default]
    Sum,
    /// Sum divided by source count plus one.
    Average,
    /// Sum scaled by `1/sqrt(source_count)`.
    EqualPower,
}

impl From<MergeStrategySpec> for MergeSumStrategy {
    fn from(value: MergeStrategySpec) -> Self {
        match value {
            MergeStrategySpec::Sum => MergeSumStrategy::Sum,
            MergeStrategySpec::Average => MergeSumStrategy::Average,
            MergeStrategySpec::EqualPower => MergeSumStrategy::EqualPower,
        }
    }
}

/// Mirrors [`MergePolarity`] with `serde` derives.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolaritySpec {
    /// No inversion.
    #[default]
    None,
    /// Invert every source before summing.
    InvertSources,
    /// Invert the target's own signal before summing.
    InvertTarget,
}

impl From<MergePolaritySpec> for MergePolarity {
    fn from(value: MergePolaritySpec) -> Self {
        match value {
            MergePolaritySpec::None => MergePolarity::None,
            MergePolaritySpec::InvertSources => MergePolarity::InvertSources,
            MergePolaritySpec::InvertTarget => MergePolarity::InvertTarget,
        }
    }
}

/// Parses `text` as TOML if it looks like TOML (no leading `{`/`[`),
/// otherwise as JSON. Mirrors `sonido_config::Preset::load`'s
/// extension-agnostic tolerance without needing a file extension at all.
pub fn parse(text: &str) -> anyhow::Result<GraphConfig> {
    if text.trim_start().starts_with('{') {
        serde_json::from_str(text).context("parsing graph description as JSON")
    } else {
        toml::from_str(text).context("parsing graph description as TOML")
    }
}

/// Builds every channel and plugin in `graph` against `engine`, in
/// declaration order, returning the name-to-channel-id map the caller
/// needs for device binding or diagnostics. Fails closed: the first
/// mutation error aborts the whole build (channels already added remain,
/// matching `remove_channel`'s caller-driven cleanup contract — `run`
/// exits on error rather than attempting a partial session).
pub fn build(engine: &Engine, graph: &GraphConfig) -> anyhow::Result<HashMap<String, u64>> {
    let mut ids: HashMap<String, u64> = HashMap::new();

    for channel in &graph.channels {
        let kind = match &channel.root {
            RootKind::Input => ChannelKind::Input,
            RootKind::CopyTarget { source } => {
                let source_id = *ids.get(source).ok_or_else(|| {
                    anyhow!("channel '{}' names unknown copy source '{}'", channel.name, source)
                })?;
                ChannelKind::CopyTarget { source_channel_id: source_id }
            }
        };

        let channel_id = engine.add_channel(kind).with_context(|| format!("adding channel '{}'", channel.name))?;
        ids.insert(channel.name.clone(), channel_id);

        if let Some(device_id) = &channel.device_id {
            engine
                .set_input_device(channel_id, device_id.clone(), channel.channel_mode.into(), channel.native_channels, 48000)
                .with_context(|| format!("binding device for channel '{}'", channel.name))?;
        }

        for plugin in &channel.plugins {
            let boxed: Box<dyn hotmic_core::plugin::Plugin> = match plugin {
                PluginSpec::OutputSend { mode } => Box::new(OutputSend::new((*mode).into())),
                PluginSpec::Copy => Box::new(CopyPlugin::new()),
                PluginSpec::Merge { sources, strategy, polarity, max_latency_samples } => {
                    let mut source_ids = Vec::with_capacity(sources.len());
                    for name in sources {
                        let id = *ids
                            .get(name)
                            .ok_or_else(|| anyhow!("channel '{}' merge names unknown source '{}'", channel.name, name))?;
                        source_ids.push(id);
                    }
                    Box::new(Merge::new(&source_ids, (*strategy).into(), (*polarity).into(), *max_latency_samples))
                }
            };
            engine
                .insert_plugin(channel_id, usize::MAX, boxed)
                .with_context(|| format!("inserting plugin on channel '{}'", channel.name))?;
        }
    }

    if ids.is_empty() {
        bail!("graph description names no channels");
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotmic_io::{AudioBackend, AudioDevice, BackendStreamConfig, ErrorCallback, InputCallback, OutputCallback, StreamHandle};

    struct NullBackend;

    impl AudioBackend for NullBackend {
        fn name(&self) -> &str {
            "null"
        }
        fn list_devices(&self) -> hotmic_io::Result<Vec<AudioDevice>> {
            Ok(Vec::new())
        }
        fn default_output_device(&self) -> hotmic_io::Result<Option<AudioDevice>> {
            Ok(None)
        }
        fn default_input_device(&self) -> hotmic_io::Result<Option<AudioDevice>> {
            Ok(None)
        }
        fn build_output_stream(
            &self,
            _config: &BackendStreamConfig,
            _callback: OutputCallback,
            _error_callback: ErrorCallback,
        ) -> hotmic_io::Result<StreamHandle> {
            Ok(StreamHandle::new(()))
        }
        fn build_input_stream(
            &self,
            _config: &BackendStreamConfig,
            _callback: InputCallback,
            _error_callback: ErrorCallback,
        ) -> hotmic_io::Result<StreamHandle> {
            Ok(StreamHandle::new(()))
        }
    }

    fn test_engine() -> Engine {
        let config = hotmic_engine::EngineConfig { sample_rate: 48000.0, block_size: 64, ..hotmic_engine::EngineConfig::default() };
        Engine::new(config, std::sync::Arc::new(NullBackend))
    }

    const SIMPLE_TOML: &str = r#"
        [[channels]]
        name = "mic"
        root = "input"

        [[channels.plugins]]
        kind = "output_send"
        mode = "both"
    "#;

    #[test]
    fn test_parse_toml_graph() {
        let graph = parse(SIMPLE_TOML).unwrap();
        assert_eq!(graph.channels.len(), 1);
        assert_eq!(graph.channels[0].name, "mic");
    }

    #[test]
    fn test_parse_json_graph() {
        let graph = parse(SIMPLE_TOML).unwrap();
        let json = serde_json::to_string(&graph).unwrap();
        let reparsed = parse(&json).unwrap();
        assert_eq!(reparsed.channels.len(), 1);
    }

    #[test]
    fn test_build_adds_channel_and_output_send() {
        let engine = test_engine();
        let graph = parse(SIMPLE_TOML).unwrap();
        let ids = build(&engine, &graph).unwrap();
        assert_eq!(ids.len(), 1);
        let channel_id = ids["mic"];
        let snapshot = engine.diagnostics();
        assert_eq!(snapshot.channels.len(), 0); // no device bound, so no capture diagnostics
        let _ = channel_id;
    }

    #[test]
    fn test_build_rejects_unknown_copy_source() {
        let engine = test_engine();
        let graph = GraphConfig {
            channels: vec![ChannelConfig {
                name: "b".into(),
                root: RootKind::CopyTarget { source: "missing".into() },
                device_id: None,
                channel_mode: ChannelModeSpec::default(),
                native_channels: 1,
                plugins: Vec::new(),
            }],
        };
        assert!(build(&engine, &graph).is_err());
    }

    #[test]
    fn test_build_rejects_unknown_merge_source() {
        let engine = test_engine();
        let graph = GraphConfig {
            channels: vec![ChannelConfig {
                name: "a".into(),
                root: RootKind::Input,
                device_id: None,
                channel_mode: ChannelModeSpec::default(),
                native_channels: 1,
                plugins: vec![PluginSpec::Merge {
                    sources: vec!["ghost".into()],
                    strategy: MergeStrategySpec::Sum,
                    polarity: MergePolaritySpec::None,
                    max_latency_samples: 64,
                }],
            }],
        };
        assert!(build(&engine, &graph).is_err());
    }

    #[test]
    fn test_build_rejects_empty_graph() {
        let engine = test_engine();
        let graph = GraphConfig { channels: Vec::new() };
        assert!(build(&engine, &graph).is_err());
    }
}

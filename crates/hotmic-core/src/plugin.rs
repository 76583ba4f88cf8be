//! The plugin contract: a small required trait every effect implements,
//! plus optional capability traits detected dynamically rather than
//! expressed through an inheritance chain.
//!
//! Grounded on [`crate::param_info::ParameterInfo`] for parameter
//! description, and on the bridging pattern the teacher crate used to pair
//! an object-safe processing trait with a separate introspection trait
//! (rather than baking parameters into the processing trait itself) — here
//! generalized into [`PluginWithParams`], which every [`Plugin`] gets for
//! free via a blanket implementation.

use crate::param_info::ParamDescriptor;

/// Per-call context passed into [`Plugin::process`], carrying everything a
/// plugin needs to reason about its position in the signal path without
/// holding a stored pointer back into the engine.
#[derive(Debug, Clone, Copy)]
pub struct ProcessContext<'a> {
    /// Absolute monotonic sample counter, shared by every channel and
    /// plugin in the current block.
    pub sample_clock: u64,
    /// `sample_clock + cumulative_latency_before_slot`: this slot's
    /// logical position in a latency-compensated timeline.
    pub sample_time: u64,
    /// Total reported latency, in samples, of every slot before this one
    /// in the chain.
    pub cumulative_latency_before_slot: u32,
    /// This plugin's own instance id, stable across snapshot rebuilds.
    pub instance_id: u64,
    /// Accessor for resolving the nearest upstream producer of a given
    /// analysis signal kind, for plugins with the
    /// [`AnalysisSignalConsumer`] capability.
    pub routing: &'a dyn RoutingAccessor,
}

/// Resolves analysis-signal lookups and the cross-channel routing reads/
/// writes a `Copy`/`Merge`/`OutputSend` plugin needs during
/// [`Plugin::process`]. Implemented by the routing layer and handed to
/// plugins only for the duration of one `process` call — plugins never
/// store a reference to it past that call.
///
/// Every method beyond `read_signal` defaults to a no-op/absent response
/// so a minimal test double (or a plugin with no routing-plugin
/// capabilities) only has to implement the one method it actually uses.
pub trait RoutingAccessor {
    /// Reads the most recent value of `kind` produced upstream of the
    /// calling channel, adjusted for the lookback implied by the
    /// requesting plugin's own cumulative latency. Returns a neutral
    /// fallback value if no producer exists or history doesn't reach far
    /// enough back.
    fn read_signal(&self, kind: crate::analysis::SignalKind) -> f32;

    /// Copies `channel_id`'s fully-processed output for this block into
    /// `out` (truncated to the shorter of the two lengths). Used by
    /// `Merge` to pull its source channels' published buffers. Returns
    /// `false` if `channel_id` has no published output yet (e.g. it
    /// hasn't run this block, which a correct topological order never
    /// allows for a declared dependency).
    fn read_channel_output_into(&self, channel_id: u64, out: &mut [f32]) -> bool {
        let _ = (channel_id, out);
        false
    }

    /// The calling channel's own reported chain latency, as of the most
    /// recently published snapshot. Used by `Merge` to compute alignment
    /// delay against its sources.
    fn channel_latency(&self, channel_id: u64) -> u32 {
        let _ = channel_id;
        0
    }

    /// Publishes the calling channel's current buffer and analysis
    /// signals into that channel's `CopyBus` entry, to be picked up by a
    /// copy-created channel's `BusInput`. `latency_samples` and
    /// `sample_clock` are recorded alongside for the reader's own
    /// bookkeeping.
    fn publish_copy_bus(
        &self,
        audio: &[f32],
        signals: &[(crate::analysis::SignalKind, f32)],
        latency_samples: u32,
        sample_clock: u64,
    ) {
        let _ = (audio, signals, latency_samples, sample_clock);
    }

    /// Copies `source_channel_id`'s captured `CopyBus` audio into `out`.
    /// Returns the capture's `(latency_samples, sample_clock)` if that
    /// source has a copy bus entry this block.
    fn copy_bus_audio_into(&self, source_channel_id: u64, out: &mut [f32]) -> Option<(u32, u64)> {
        let _ = (source_channel_id, out);
        None
    }

    /// Reads one signal value captured in `source_channel_id`'s copy bus.
    fn copy_bus_signal(&self, source_channel_id: u64, kind: crate::analysis::SignalKind) -> Option<f32> {
        let _ = (source_channel_id, kind);
        None
    }

    /// Attempts to claim the process-wide output bus for `mono` in
    /// `mode`. Returns `false` (and leaves the bus unchanged) if another
    /// `OutputSend` already claimed it this block.
    fn try_write_output(&self, mono: &[f32], mode: crate::routing::OutputBusMode) -> bool {
        let _ = (mono, mode);
        false
    }

    /// Publishes one value of `kind` from the calling channel at the
    /// current block's sample time, for a plugin with the
    /// [`AnalysisSignalProducer`] capability. No-op for routing
    /// implementations (or test doubles) that never host a producer.
    fn publish_signal(&self, kind: crate::analysis::SignalKind, value: f32) {
        let _ = (kind, value);
    }
}

/// The trait every plugin implements. Kept intentionally small: identity,
/// lifecycle, mono block processing, and static metadata. Everything else
/// (routing edges, analysis signals, commands) is an optional capability a
/// plugin additionally implements and the host detects at registration
/// time.
pub trait Plugin: Send {
    /// A stable, human-readable identifier for diagnostics and logging.
    /// Not used for addressing — addressing is always by instance id.
    fn identify(&self) -> &str;

    /// Prepares the plugin for a given sample rate and block size. May
    /// reject the configuration (e.g. an unsupported sample rate) by
    /// returning `Err`; a rejected plugin is placed in bypass and its
    /// containing snapshot is still published.
    fn initialize(&mut self, sample_rate: f32, block_size: usize) -> Result<(), &'static str>;

    /// Processes `buffer` in place. Must not allocate, lock, or block.
    /// Mono only — `buffer.len()` is at most the configured block size.
    fn process(&mut self, buffer: &mut [f32], ctx: &ProcessContext<'_>);

    /// Runs metering-only processing for a muted channel: updates any
    /// internal peak/RMS state the plugin exposes without producing
    /// audible output. Default implementation does nothing; plugins with
    /// no internal metering need not override it.
    fn process_meters(&mut self, _buffer: &[f32], _ctx: &ProcessContext<'_>) {}

    /// Reported latency, in samples, for the plugin's current
    /// configuration. Constant between `initialize` calls.
    fn latency_samples(&self) -> u32 {
        0
    }

    /// Fixed, ordered parameter descriptors. The order and count must not
    /// change after `initialize` — parameters are addressed by index.
    fn parameters(&self) -> &[ParamDescriptor] {
        &[]
    }

    /// Applies a parameter change. Called only from the audio thread, only
    /// via drained entries from the parameter queue — never directly from
    /// a UI thread.
    fn set_parameter(&mut self, _index: u32, _value: f32) {}

    /// Serializes internal state to an opaque byte buffer for persistence.
    /// HotMic's engine itself does not interpret these bytes.
    fn save_state(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Restores internal state from a byte buffer previously produced by
    /// [`Plugin::save_state`].
    fn load_state(&mut self, _bytes: &[u8]) {}

    /// Bridges to the [`InputStagePlugin`] capability, if this plugin
    /// implements it. A concrete type overrides this with `Some(self)`;
    /// the default `None` covers every plugin without the capability.
    /// Needed because a `Box<dyn Plugin>` slot can't be reborrowed as a
    /// different trait object without the concrete type's help — Rust has
    /// no safe upcast between unrelated trait objects.
    fn as_input_stage(&self) -> Option<&dyn InputStagePlugin> {
        None
    }

    /// Bridges to the [`OutputSendPlugin`] capability.
    fn as_output_send(&self) -> Option<&dyn OutputSendPlugin> {
        None
    }

    /// Bridges to the [`AnalysisSignalProducer`] capability.
    fn as_analysis_producer(&self) -> Option<&dyn AnalysisSignalProducer> {
        None
    }

    /// Bridges to the [`AnalysisSignalConsumer`] capability.
    fn as_analysis_consumer(&self) -> Option<&dyn AnalysisSignalConsumer> {
        None
    }

    /// Bridges to the [`RoutingDependencyProvider`] capability.
    fn as_routing_dependency(&self) -> Option<&dyn RoutingDependencyProvider> {
        None
    }

    /// Bridges to the [`CommandHandler`] capability, mutably (commands
    /// mutate plugin state).
    fn as_command_handler(&mut self) -> Option<&mut dyn CommandHandler> {
        None
    }
}

/// Capability: this plugin is the pinned input slot of a channel (`Input`
/// or `BusInput`). Consulted by the chain to decide whether the
/// channel-level pre-gain/meter stage applies before this slot runs.
pub trait InputStagePlugin: Plugin {
    /// Whether the channel's pre-input gain and meter should be applied
    /// before this slot processes. `Input` channels apply it; `BusInput`
    /// channels do not (see the routing design notes).
    fn applies_channel_pregain(&self) -> bool;
}

/// Capability: this plugin writes to the process-wide output bus. At most
/// one plugin with this capability may successfully write per block — the
/// first non-bypassed writer in dependency order wins.
pub trait OutputSendPlugin: Plugin {
    /// Which side(s) of the stereo output this send targets.
    fn output_mode(&self) -> crate::routing::OutputBusMode;
}

/// Capability: this plugin produces one or more analysis signal kinds,
/// publishing them into the channel's slice of the analysis signal bus
/// each block.
pub trait AnalysisSignalProducer: Plugin {
    /// The signal kinds this plugin produces. Declared once and assumed
    /// stable for the plugin's lifetime.
    fn produced_signals(&self) -> &[crate::analysis::SignalKind];
}

/// Capability: this plugin consumes one or more analysis signal kinds via
/// [`ProcessContext::routing`] during `process`.
pub trait AnalysisSignalConsumer: Plugin {
    /// The signal kinds this plugin reads. Declared once and assumed
    /// stable for the plugin's lifetime.
    fn consumed_signals(&self) -> &[crate::analysis::SignalKind];
}

/// Capability: this plugin declares a routing dependency edge (a `Copy` or
/// `Merge` node) that the routing scheduler must account for when
/// computing topological order.
pub trait RoutingDependencyProvider: Plugin {
    /// Channel ids this plugin reads from, in addition to its own
    /// channel's natural upstream chain.
    fn source_channels(&self) -> &[u64];
}

/// Capability: this plugin accepts out-of-band commands (distinct from
/// numeric parameter changes) via the parameter queue's
/// [`crate::paramqueue::ParameterChangeKind::PluginCommand`] variant.
pub trait CommandHandler: Plugin {
    /// Handles an opaque command payload.
    fn handle_command(&mut self, command: u64);
}

/// Blanket bridge giving every [`Plugin`] trait object a uniform,
/// prefixed view of its own parameter introspection — mirroring the
/// teacher crate's `EffectWithParams` bridge, generalized to the plugin
/// contract's richer parameter table.
pub trait PluginWithParams {
    /// Number of parameters this plugin exposes.
    fn param_count(&self) -> usize;
    /// Descriptor for parameter `index`, if it exists.
    fn param_descriptor(&self, index: usize) -> Option<&ParamDescriptor>;
}

impl<T: Plugin + ?Sized> PluginWithParams for T {
    fn param_count(&self) -> usize {
        self.parameters().len()
    }

    fn param_descriptor(&self, index: usize) -> Option<&ParamDescriptor> {
        self.parameters().get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::SignalKind;

    struct NullRouting;
    impl RoutingAccessor for NullRouting {
        fn read_signal(&self, _kind: SignalKind) -> f32 {
            0.0
        }
    }

    struct Silence;
    impl Plugin for Silence {
        fn identify(&self) -> &str {
            "silence"
        }
        fn initialize(&mut self, _sample_rate: f32, _block_size: usize) -> Result<(), &'static str> {
            Ok(())
        }
        fn process(&mut self, buffer: &mut [f32], _ctx: &ProcessContext<'_>) {
            buffer.iter_mut().for_each(|s| *s = 0.0);
        }
    }

    #[test]
    fn test_default_latency_is_zero() {
        let p = Silence;
        assert_eq!(p.latency_samples(), 0);
    }

    #[test]
    fn test_default_parameters_empty() {
        let p = Silence;
        assert_eq!(p.param_count(), 0);
        assert!(p.param_descriptor(0).is_none());
    }

    #[test]
    fn test_process_context_sample_time_derivation() {
        let routing = NullRouting;
        let ctx = ProcessContext {
            sample_clock: 1000,
            sample_time: 1000 + 37,
            cumulative_latency_before_slot: 37,
            instance_id: 1,
            routing: &routing,
        };
        assert_eq!(ctx.sample_time, ctx.sample_clock + u64::from(ctx.cumulative_latency_before_slot));
    }

    #[test]
    fn test_process_meters_default_noop() {
        let routing = NullRouting;
        let ctx = ProcessContext {
            sample_clock: 0,
            sample_time: 0,
            cumulative_latency_before_slot: 0,
            instance_id: 0,
            routing: &routing,
        };
        let mut p = Silence;
        let input = [1.0, 2.0, 3.0];
        p.process_meters(&input, &ctx);
    }
}

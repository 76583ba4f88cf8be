//! The `BusInput` plugin: pinned at slot 0 of every copy-created channel.
//!
//! Reads the audio and analysis signals a `Copy` plugin captured into the
//! source channel's [`hotmic_core::routing::CopyBus`] and re-emits them as
//! this channel's own input. Unlike `Input`, `BusInput` does **not**
//! trigger the channel-level pre-input gain/meter split (see
//! `SPEC_FULL.md` §3's ratified open question) — the copy-bus audio was
//! already gained once upstream in the source channel, and re-applying
//! this channel's own input gain would double it.

use hotmic_core::analysis::SignalKind;
use hotmic_core::{InputStagePlugin, Plugin, ProcessContext, RoutingDependencyProvider};

/// Pinned input-stage plugin for a copy-created channel.
pub struct BusInput {
    source_channel_id: u64,
    source_ids: [u64; 1],
    last_latency_samples: u32,
}

impl BusInput {
    /// Creates a `BusInput` bound to `source_channel_id`, the channel
    /// whose `Copy` plugin feeds this one.
    pub fn new(source_channel_id: u64) -> Self {
        Self { source_channel_id, source_ids: [source_channel_id], last_latency_samples: 0 }
    }

    /// The source channel this instance reads from.
    pub fn source_channel_id(&self) -> u64 {
        self.source_channel_id
    }
}

impl Plugin for BusInput {
    fn identify(&self) -> &str {
        "builtin:bus_input"
    }

    fn initialize(&mut self, _sample_rate: f32, _block_size: usize) -> Result<(), &'static str> {
        Ok(())
    }

    fn process(&mut self, buffer: &mut [f32], ctx: &ProcessContext<'_>) {
        if let Some((latency, _sample_clock)) = ctx.routing.copy_bus_audio_into(self.source_channel_id, buffer) {
            self.last_latency_samples = latency;
        } else {
            buffer.iter_mut().for_each(|s| *s = 0.0);
        }
    }

    fn latency_samples(&self) -> u32 {
        self.last_latency_samples
    }

    fn as_input_stage(&self) -> Option<&dyn InputStagePlugin> {
        Some(self)
    }

    fn as_routing_dependency(&self) -> Option<&dyn RoutingDependencyProvider> {
        Some(self)
    }
}

impl InputStagePlugin for BusInput {
    fn applies_channel_pregain(&self) -> bool {
        false
    }
}

impl RoutingDependencyProvider for BusInput {
    fn source_channels(&self) -> &[u64] {
        &self.source_ids
    }
}

/// `BusInput` additionally reads every signal kind its source captured,
/// so downstream consumers in this channel can treat the copy-created
/// channel as if it produced those signals locally.
impl BusInput {
    /// Reads one signal kind from the bound source's copy bus, falling
    /// back to the kind's neutral value if unavailable.
    pub fn read_copied_signal(&self, ctx: &ProcessContext<'_>, kind: SignalKind) -> f32 {
        ctx.routing.copy_bus_signal(self.source_channel_id, kind).unwrap_or_else(|| kind.neutral_value())
    }
}

//! The `Input` plugin: pinned at slot 0 of every live-capture channel.
//!
//! The actual capture read and channel-mode down-mix happen upstream of
//! the plugin chain, in the engine's input capture manager (§4.5 of the
//! spec this crate implements); by the time the chain runs, this
//! channel's scratch buffer already holds this block's raw input. `Input`
//! itself is therefore a pass-through marker whose only job is to
//! identify the split point (§4.2) where the channel's pre-input
//! gain/meter stage applies.

use hotmic_core::{InputStagePlugin, Plugin, ProcessContext};

/// Pinned input-stage plugin for a live-capture channel. A pure
/// pass-through: the chain runner fills the buffer from the channel's
/// capture ring and applies input gain/meter before this slot runs.
#[derive(Debug, Default)]
pub struct Input;

impl Input {
    /// Creates a new `Input` instance.
    pub fn new() -> Self {
        Self
    }
}

impl Plugin for Input {
    fn identify(&self) -> &str {
        "builtin:input"
    }

    fn initialize(&mut self, _sample_rate: f32, _block_size: usize) -> Result<(), &'static str> {
        Ok(())
    }

    fn process(&mut self, _buffer: &mut [f32], _ctx: &ProcessContext<'_>) {}

    fn as_input_stage(&self) -> Option<&dyn InputStagePlugin> {
        Some(self)
    }
}

impl InputStagePlugin for Input {
    fn applies_channel_pregain(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotmic_core::analysis::SignalKind;
    use hotmic_core::plugin::RoutingAccessor;

    struct NullRouting;
    impl RoutingAccessor for NullRouting {
        fn read_signal(&self, _kind: SignalKind) -> f32 {
            0.0
        }
    }

    #[test]
    fn test_input_applies_channel_pregain() {
        assert!(Input::new().applies_channel_pregain());
    }

    #[test]
    fn test_input_process_does_not_mutate_buffer() {
        let routing = NullRouting;
        let ctx = ProcessContext {
            sample_clock: 0,
            sample_time: 0,
            cumulative_latency_before_slot: 0,
            instance_id: 1,
            routing: &routing,
        };
        let mut input = Input::new();
        let mut buffer = [0.25_f32, -0.5, 0.75];
        input.process(&mut buffer, &ctx);
        assert_eq!(buffer, [0.25, -0.5, 0.75]);
    }

    #[test]
    fn test_input_reports_zero_latency() {
        assert_eq!(Input::new().latency_samples(), 0);
    }
}

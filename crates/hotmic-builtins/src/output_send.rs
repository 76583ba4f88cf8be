//! The `OutputSend` plugin: marks the calling channel as a writer of the
//! process-wide output bus.
//!
//! `process` itself is a pure pass-through. The actual bus write happens
//! in the output pipeline, *after* the channel's output gain and mute
//! smoothers have been applied to the full buffer — the pipeline detects
//! this capability via [`hotmic_core::Plugin::as_output_send`] once the
//! chain has finished running, rather than writing mid-chain from this
//! slot's own `process` call. This is required for the channel's output
//! gain to actually reach the bus (see `DESIGN.md`'s note on the output
//! pipeline): if this plugin wrote from inside its own chain position, a
//! channel like Input→OutputSend would publish its *pre-gain* buffer,
//! since output gain is channel-level state applied outside the chain.
//!
//! At most one `OutputSend` wins the claim per block (§9's ratified open
//! question: contention is handled both here, at the point of claim, and
//! by the runtime `output_contention` diagnostic counter that tallies how
//! often a later claimant lost the race).

use hotmic_core::routing::OutputBusMode;
use hotmic_core::{OutputSendPlugin, Plugin, ProcessContext};

/// Marks the calling channel as a writer of one side of the stereo output
/// bus. Carries no per-block behavior of its own; see the module docs.
pub struct OutputSend {
    mode: OutputBusMode,
}

impl OutputSend {
    /// Creates an `OutputSend` targeting `mode`.
    pub fn new(mode: OutputBusMode) -> Self {
        Self { mode }
    }
}

impl Plugin for OutputSend {
    fn identify(&self) -> &str {
        "builtin:output_send"
    }

    fn initialize(&mut self, _sample_rate: f32, _block_size: usize) -> Result<(), &'static str> {
        Ok(())
    }

    fn process(&mut self, _buffer: &mut [f32], _ctx: &ProcessContext<'_>) {}

    fn as_output_send(&self) -> Option<&dyn OutputSendPlugin> {
        Some(self)
    }
}

impl OutputSendPlugin for OutputSend {
    fn output_mode(&self) -> OutputBusMode {
        self.mode
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

    fn ctx(routing: &dyn RoutingAccessor) -> ProcessContext<'_> {
        ProcessContext { sample_clock: 0, sample_time: 0, cumulative_latency_before_slot: 0, instance_id: 1, routing }
    }

    #[test]
    fn test_output_send_process_does_not_mutate_buffer() {
        let routing = NullRouting;
        let mut send = OutputSend::new(OutputBusMode::Left);
        let mut buffer = [0.1_f32, 0.2, 0.3];
        send.process(&mut buffer, &ctx(&routing));
        assert_eq!(buffer, [0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_output_send_exposes_output_send_capability() {
        let send = OutputSend::new(OutputBusMode::Both);
        assert!(send.as_output_send().is_some());
    }

    #[test]
    fn test_output_mode_accessor() {
        assert_eq!(OutputSend::new(OutputBusMode::Right).output_mode(), OutputBusMode::Right);
    }
}

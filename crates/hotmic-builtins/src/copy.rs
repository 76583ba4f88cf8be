//! The `Copy` plugin: captures this channel's current buffer and its full
//! analysis-signal snapshot into a `CopyBus` entry, for a copy-created
//! channel's `BusInput` to pick up.
//!
//! `Copy` is a pass-through: it neither reads from nor contributes a
//! routing dependency edge of its own beyond the implicit one `BusInput`
//! declares on the *target* channel (§4.3: "`Copy` and `Merge` declare
//! inter-channel edges"; for `Copy` that edge belongs to the reader, not
//! the writer — the writer can run at any position in its own channel
//! with no incoming dependency).

use hotmic_core::analysis::SignalKind;
use hotmic_core::{Plugin, ProcessContext};

/// Captures the owning channel's current buffer and analysis signals into
/// its `CopyBus` slot every block.
pub struct CopyPlugin {
    signals: Vec<(SignalKind, f32)>,
}

impl CopyPlugin {
    /// Creates a new `Copy` slot.
    pub fn new() -> Self {
        Self { signals: Vec::with_capacity(SignalKind::ALL.len()) }
    }
}

impl Default for CopyPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for CopyPlugin {
    fn identify(&self) -> &str {
        "builtin:copy"
    }

    fn initialize(&mut self, _sample_rate: f32, _block_size: usize) -> Result<(), &'static str> {
        Ok(())
    }

    fn process(&mut self, buffer: &mut [f32], ctx: &ProcessContext<'_>) {
        self.signals.clear();
        for kind in SignalKind::ALL {
            self.signals.push((kind, ctx.routing.read_signal(kind)));
        }
        ctx.routing.publish_copy_bus(buffer, &self.signals, ctx.cumulative_latency_before_slot, ctx.sample_clock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotmic_core::plugin::RoutingAccessor;
    use hotmic_core::routing::OutputBusMode;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingRouting {
        published: RefCell<Option<(Vec<f32>, Vec<(SignalKind, f32)>, u32, u64)>>,
    }

    impl RoutingAccessor for RecordingRouting {
        fn read_signal(&self, kind: SignalKind) -> f32 {
            match kind {
                SignalKind::PitchHz => 220.0,
                _ => kind.neutral_value(),
            }
        }

        fn publish_copy_bus(&self, audio: &[f32], signals: &[(SignalKind, f32)], latency_samples: u32, sample_clock: u64) {
            *self.published.borrow_mut() = Some((audio.to_vec(), signals.to_vec(), latency_samples, sample_clock));
        }

        fn try_write_output(&self, _mono: &[f32], _mode: OutputBusMode) -> bool {
            false
        }
    }

    #[test]
    fn test_copy_publishes_buffer_and_all_signal_kinds() {
        let routing = RecordingRouting::default();
        let ctx = ProcessContext { sample_clock: 1000, sample_time: 1000, cumulative_latency_before_slot: 12, instance_id: 9, routing: &routing };
        let mut copy = CopyPlugin::new();
        let mut buffer = [0.4_f32, 0.5, 0.6];
        copy.process(&mut buffer, &ctx);

        let published = routing.published.borrow();
        let (audio, signals, latency, clock) = published.as_ref().unwrap();
        assert_eq!(audio, &[0.4, 0.5, 0.6]);
        assert_eq!(signals.len(), SignalKind::ALL.len());
        assert_eq!(latency, &12);
        assert_eq!(clock, &1000);
        assert!(signals.iter().any(|(k, v)| *k == SignalKind::PitchHz && *v == 220.0));
    }

    #[test]
    fn test_copy_does_not_mutate_own_buffer() {
        let routing = RecordingRouting::default();
        let ctx = ProcessContext { sample_clock: 0, sample_time: 0, cumulative_latency_before_slot: 0, instance_id: 1, routing: &routing };
        let mut copy = CopyPlugin::new();
        let mut buffer = [0.1_f32, -0.2];
        copy.process(&mut buffer, &ctx);
        assert_eq!(buffer, [0.1, -0.2]);
    }
}

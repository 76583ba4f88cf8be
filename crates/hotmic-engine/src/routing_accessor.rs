//! [`RoutingAccessor`] implementation handed to every plugin during a
//! block: a thin view over the current [`RoutingSnapshot`] plus the
//! mutable analysis signal bus the pipeline owns directly.
//!
//! `AnalysisSignalBus::publish` takes `&mut self`, so it can't live behind
//! the snapshot's shared reference the way the copy/output buses do (they
//! use `RefCell` for exactly that reason). The pipeline therefore owns the
//! bus itself, outside the `Arc`-swapped snapshot, and this accessor wraps
//! it in a `RefCell` for the one call (`process`) per slot that needs
//! interior mutability to publish into it.

use std::cell::RefCell;

use hotmic_core::analysis::{AnalysisSignalBus, SignalKind};
use hotmic_core::plugin::RoutingAccessor;
use hotmic_core::routing::{OutputBusMode, RoutingSnapshot};

/// Per-slot routing accessor bound to one channel's position in the
/// current block. Constructed fresh for every plugin `process` call —
/// cheap, since it only holds references.
pub struct SnapshotRoutingAccessor<'a> {
    snapshot: &'a RoutingSnapshot,
    analysis: &'a RefCell<AnalysisSignalBus>,
    channel_id: u64,
    sample_time: u64,
    current_sample_clock: u64,
    upstream_candidates: &'a [u64],
}

impl<'a> SnapshotRoutingAccessor<'a> {
    /// Builds an accessor for the plugin running on `channel_id` at
    /// `sample_time` within the block whose absolute clock is
    /// `current_sample_clock`. `upstream_candidates` is the slice of the
    /// snapshot's topological order up to and including `channel_id`
    /// itself — ending with the channel's own id so a same-channel
    /// producer slot that already ran earlier this block is preferred
    /// over a strictly-upstream channel (see
    /// [`AnalysisSignalBus::read_nearest_upstream`]'s reverse scan).
    pub fn new(
        snapshot: &'a RoutingSnapshot,
        analysis: &'a RefCell<AnalysisSignalBus>,
        channel_id: u64,
        sample_time: u64,
        current_sample_clock: u64,
        upstream_candidates: &'a [u64],
    ) -> Self {
        Self { snapshot, analysis, channel_id, sample_time, current_sample_clock, upstream_candidates }
    }
}

impl RoutingAccessor for SnapshotRoutingAccessor<'_> {
    fn read_signal(&self, kind: SignalKind) -> f32 {
        self.analysis.borrow().read_nearest_upstream(self.upstream_candidates, kind, self.sample_time)
    }

    fn read_channel_output_into(&self, channel_id: u64, out: &mut [f32]) -> bool {
        match self.snapshot.published_outputs.get(&channel_id) {
            Some(buf) => {
                let buf = buf.borrow();
                let n = buf.len().min(out.len());
                out[..n].copy_from_slice(&buf[..n]);
                true
            }
            None => false,
        }
    }

    fn channel_latency(&self, channel_id: u64) -> u32 {
        self.snapshot.channel(channel_id).map_or(0, |c| c.chain.total_latency())
    }

    fn publish_copy_bus(&self, audio: &[f32], signals: &[(SignalKind, f32)], latency_samples: u32, sample_clock: u64) {
        if let Some(bus) = self.snapshot.copy_buses.get(&self.channel_id) {
            bus.borrow_mut().record(audio, signals, latency_samples, sample_clock);
        }
    }

    fn copy_bus_audio_into(&self, source_channel_id: u64, out: &mut [f32]) -> Option<(u32, u64)> {
        let bus = self.snapshot.copy_buses.get(&source_channel_id)?;
        let bus = bus.borrow();
        if !bus.published || bus.sample_clock != self.current_sample_clock {
            return None;
        }
        let n = bus.audio.len().min(out.len());
        out[..n].copy_from_slice(&bus.audio[..n]);
        Some((bus.latency_samples, bus.sample_clock))
    }

    fn copy_bus_signal(&self, source_channel_id: u64, kind: SignalKind) -> Option<f32> {
        let bus = self.snapshot.copy_buses.get(&source_channel_id)?;
        let bus = bus.borrow();
        if !bus.published || bus.sample_clock != self.current_sample_clock {
            return None;
        }
        bus.signal(kind)
    }

    fn try_write_output(&self, mono: &[f32], mode: OutputBusMode) -> bool {
        self.snapshot.output_bus.borrow_mut().try_write(mono, mode)
    }

    fn publish_signal(&self, kind: SignalKind, value: f32) {
        self.analysis.borrow_mut().publish(self.channel_id, kind, self.sample_time, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotmic_core::routing::{Channel, ChannelEdge};

    fn build_snapshot() -> (RoutingSnapshot, bool) {
        let channels = vec![Channel::new(1, 48000.0), Channel::new(2, 48000.0)];
        RoutingSnapshot::build(channels, &[] as &[ChannelEdge], 48000.0, 4)
    }

    #[test]
    fn test_copy_bus_roundtrip_within_same_block() {
        let (snapshot, _) = build_snapshot();
        let analysis = RefCell::new(AnalysisSignalBus::new(64));
        let order = [1u64];
        let accessor = SnapshotRoutingAccessor::new(&snapshot, &analysis, 1, 0, 100, &order);

        accessor.publish_copy_bus(&[0.1, 0.2, 0.3, 0.4], &[(SignalKind::PitchHz, 220.0)], 3, 100);

        let mut out = [0.0; 4];
        let result = accessor.copy_bus_audio_into(1, &mut out);
        assert_eq!(result, Some((3, 100)));
        assert_eq!(out, [0.1, 0.2, 0.3, 0.4]);
        assert_eq!(accessor.copy_bus_signal(1, SignalKind::PitchHz), Some(220.0));
    }

    #[test]
    fn test_copy_bus_stale_from_prior_block_is_absent() {
        let (snapshot, _) = build_snapshot();
        let analysis = RefCell::new(AnalysisSignalBus::new(64));
        let order = [1u64];
        let writer = SnapshotRoutingAccessor::new(&snapshot, &analysis, 1, 0, 100, &order);
        writer.publish_copy_bus(&[0.5], &[], 0, 100);

        // next block: begin_block clears `published`, sample_clock moves on.
        snapshot.begin_block();
        let reader = SnapshotRoutingAccessor::new(&snapshot, &analysis, 2, 4, 104, &order);
        let mut out = [0.0; 1];
        assert_eq!(reader.copy_bus_audio_into(1, &mut out), None);
    }

    #[test]
    fn test_publish_signal_then_read_nearest_upstream() {
        let (snapshot, _) = build_snapshot();
        let analysis = RefCell::new(AnalysisSignalBus::new(64));
        let order = [1u64];
        let producer = SnapshotRoutingAccessor::new(&snapshot, &analysis, 1, 50, 50, &order);
        producer.publish_signal(SignalKind::VoicingScore, 0.75);

        let order2 = [1u64, 2u64];
        let consumer = SnapshotRoutingAccessor::new(&snapshot, &analysis, 2, 50, 50, &order2);
        assert_eq!(consumer.read_signal(SignalKind::VoicingScore), 0.75);
    }

    #[test]
    fn test_try_write_output_delegates_to_snapshot_bus() {
        let (snapshot, _) = build_snapshot();
        let analysis = RefCell::new(AnalysisSignalBus::new(64));
        let order = [1u64];
        let accessor = SnapshotRoutingAccessor::new(&snapshot, &analysis, 1, 0, 0, &order);
        assert!(accessor.try_write_output(&[0.5, 0.5, 0.5, 0.5], OutputBusMode::Both));
        assert!(snapshot.output_bus.borrow().has_data());
    }
}

//! The input capture manager (spec §4.5).
//!
//! Owns every channel's live capture: device binding, declared channel
//! mode, a mono SPSC ring, and drop/back-pressure counters. Down-mix
//! happens on the capture thread (in [`CaptureWriter::on_data`]); the
//! back-pressure trim happens on the audio thread (in
//! [`CaptureManager::read_into`]), matching the ring discipline already
//! exercised by `hotmic_core::ring`'s own tests.
//!
//! Capture threads never see a `RoutingSnapshot` or a plugin object — this
//! manager and its rings are owned directly by the engine facade and
//! outlive any number of published snapshots (see `DESIGN.md`).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use hotmic_core::ring::{FloatRingConsumer, FloatRingProducer, float_ring};

use crate::diagnostics::ChannelCounters;
use crate::error::{EngineError, Result};

pub use crate::diagnostics::ChannelDiagnostics;

/// How a stereo-native input device is folded down to the mono signal a
/// channel's chain actually runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// The device's left channel (index 0).
    Left,
    /// The device's right channel (clamped to the last available channel
    /// if the device happens to be mono).
    Right,
    /// The average of left and right.
    Sum,
}

/// Folds one frame's worth of interleaved `native_channels` samples down
/// to mono, per `mode`. A mono-native device (`native_channels == 1`)
/// ignores `mode` entirely — there is nothing to fold.
fn downmix(mode: ChannelMode, native_channels: u16, data: &[f32], out: &mut Vec<f32>) {
    let channels = native_channels.max(1) as usize;
    out.clear();
    out.reserve(data.len() / channels);
    let right_offset = channels.saturating_sub(1).min(1);
    let mut i = 0;
    while i + channels <= data.len() {
        let left = data[i];
        let right = data[i + right_offset];
        let mixed = match mode {
            ChannelMode::Left => left,
            ChannelMode::Right => right,
            ChannelMode::Sum => (left + right) * 0.5,
        };
        out.push(mixed);
        i += channels;
    }
}

/// The capture-thread side of one channel's input: the ring producer plus
/// enough state to down-mix and count drops. Moved into the
/// [`hotmic_io::InputCallback`] closure bound to the channel's device.
pub struct CaptureWriter {
    producer: FloatRingProducer,
    mode: ChannelMode,
    native_channels: u16,
    counters: Arc<ChannelCounters>,
    scratch: Vec<f32>,
}

impl CaptureWriter {
    /// Down-mixes one callback's worth of native-channel interleaved
    /// samples and writes the result to the ring, dropping (and counting)
    /// any tail that doesn't fit.
    pub fn on_data(&mut self, data: &[f32]) {
        downmix(self.mode, self.native_channels, data, &mut self.scratch);
        let frames = self.scratch.len();
        self.counters.device_active.store(true, Ordering::Relaxed);
        self.counters.callback_count.fetch_add(1, Ordering::Relaxed);
        self.counters.last_frames.store(frames as u64, Ordering::Relaxed);
        let written = self.producer.write(&self.scratch);
        let dropped = frames - written;
        if dropped > 0 {
            self.counters.dropped_samples.fetch_add(dropped as u64, Ordering::Relaxed);
        }
    }
}

struct CaptureEntry {
    device_id: String,
    native_channels: u16,
    sample_rate: u32,
    consumer: FloatRingConsumer,
    counters: Arc<ChannelCounters>,
}

/// Owns every channel's capture lifecycle: binding, the audio-thread read
/// side of the ring, and diagnostics. Lives on the engine facade, not in
/// any `RoutingSnapshot`.
#[derive(Default)]
pub struct CaptureManager {
    entries: BTreeMap<u64, CaptureEntry>,
}

impl CaptureManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `channel_id` to `device_id`, returning the capture-thread
    /// writer to hand to the backend's input stream. Refuses to bind if
    /// `device_id` is already bound to a different channel.
    pub fn bind(
        &mut self,
        channel_id: u64,
        device_id: String,
        mode: ChannelMode,
        native_channels: u16,
        sample_rate: u32,
        ring_capacity: usize,
    ) -> Result<CaptureWriter> {
        if self.entries.iter().any(|(&id, entry)| id != channel_id && entry.device_id == device_id) {
            return Err(EngineError::DuplicateBinding(device_id));
        }
        let (producer, consumer) = float_ring(ring_capacity);
        let counters = ChannelCounters::new();
        self.entries.insert(
            channel_id,
            CaptureEntry { device_id, native_channels, sample_rate, consumer, counters: counters.clone() },
        );
        Ok(CaptureWriter { producer, mode, native_channels, counters, scratch: Vec::new() })
    }

    /// Tears down `channel_id`'s capture, if any.
    pub fn unbind(&mut self, channel_id: u64) {
        self.entries.remove(&channel_id);
    }

    /// Reads up to `out.len()` mono samples for `channel_id` into `out`,
    /// applying the back-pressure trim policy first: if the ring is more
    /// than 3/4 full, the oldest samples are skipped down to
    /// `max(out.len(), capacity / 2)` before reading, bounding steady-state
    /// latency against producer clock drift. Returns the number of samples
    /// actually read (0 if the channel has no capture bound).
    pub fn read_into(&mut self, channel_id: u64, out: &mut [f32]) -> usize {
        let Some(entry) = self.entries.get_mut(&channel_id) else {
            return 0;
        };
        let capacity = entry.consumer.capacity();
        let available = entry.consumer.available_read();
        if available > 3 * capacity / 4 {
            let target = out.len().max(capacity / 2);
            let skipped = entry.consumer.skip(available.saturating_sub(target));
            entry.counters.underflow_samples.fetch_add(skipped as u64, Ordering::Relaxed);
        }
        entry.consumer.read(out)
    }

    /// Resolves device identity after a recovery cycle: any channel whose
    /// stored device id is no longer present in `available_device_ids`
    /// falls back to `default_device_id`. Afterward, if two or more
    /// channels ended up bound to the same resolved device, every one
    /// after the first (in channel-id order) is marked inactive rather
    /// than silently sharing a device.
    pub fn resolve_after_recovery(&mut self, available_device_ids: &[String], default_device_id: Option<&str>) {
        for entry in self.entries.values_mut() {
            if !available_device_ids.iter().any(|id| id == &entry.device_id) {
                match default_device_id {
                    Some(default_id) => entry.device_id = default_id.to_string(),
                    None => entry.counters.device_active.store(false, Ordering::Relaxed),
                }
            }
        }
        let mut seen: Vec<&str> = Vec::new();
        for entry in self.entries.values_mut() {
            if seen.contains(&entry.device_id.as_str()) {
                entry.counters.device_active.store(false, Ordering::Relaxed);
            } else {
                seen.push(entry.device_id.as_str());
            }
        }
    }

    /// Drains every channel's ring without reading the contents, used by
    /// preset pause (§4.6) to guarantee empty rings on resume.
    pub fn clear_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.consumer.clear();
        }
    }

    /// Point-in-time diagnostics for every bound channel, in channel-id
    /// order.
    pub fn diagnostics(&self) -> Vec<ChannelDiagnostics> {
        self.entries
            .iter()
            .map(|(&channel_id, entry)| ChannelDiagnostics {
                channel_id,
                device_id: Some(entry.device_id.clone()),
                is_active: entry.counters.device_active.load(Ordering::Relaxed),
                callback_count: entry.counters.callback_count.load(Ordering::Relaxed),
                last_frames: entry.counters.last_frames.load(Ordering::Relaxed) as usize,
                buffered: entry.consumer.available_read(),
                capacity: entry.consumer.capacity(),
                native_channels: entry.native_channels,
                sample_rate: entry.sample_rate,
                dropped_samples: entry.counters.dropped_samples.load(Ordering::Relaxed),
                underflow_samples: entry.counters.underflow_samples.load(Ordering::Relaxed),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_sum_averages_left_right() {
        let mut out = Vec::new();
        downmix(ChannelMode::Sum, 2, &[1.0, 0.0, 0.5, 0.5], &mut out);
        assert_eq!(out, vec![0.5, 0.5]);
    }

    #[test]
    fn test_downmix_left_takes_channel_zero() {
        let mut out = Vec::new();
        downmix(ChannelMode::Left, 2, &[1.0, -1.0], &mut out);
        assert_eq!(out, vec![1.0]);
    }

    #[test]
    fn test_downmix_mono_device_ignores_mode() {
        let mut out = Vec::new();
        downmix(ChannelMode::Right, 1, &[0.25, 0.75], &mut out);
        assert_eq!(out, vec![0.25, 0.75]);
    }

    #[test]
    fn test_bind_rejects_duplicate_device() {
        let mut manager = CaptureManager::new();
        manager.bind(1, "mic".to_string(), ChannelMode::Sum, 2, 48000, 256).unwrap();
        let result = manager.bind(2, "mic".to_string(), ChannelMode::Sum, 2, 48000, 256);
        assert!(matches!(result, Err(EngineError::DuplicateBinding(_))));
    }

    #[test]
    fn test_capture_roundtrip_through_ring() {
        let mut manager = CaptureManager::new();
        let mut writer = manager.bind(1, "mic".to_string(), ChannelMode::Left, 1, 48000, 64).unwrap();
        writer.on_data(&[0.1, 0.2, 0.3]);

        let mut out = [0.0; 4];
        let read = manager.read_into(1, &mut out);
        assert_eq!(read, 3);
        assert_eq!(&out[..3], &[0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_back_pressure_trim_bounds_available_read() {
        let mut manager = CaptureManager::new();
        let mut writer = manager.bind(1, "mic".to_string(), ChannelMode::Left, 1, 48000, 16).unwrap();
        let full_block: Vec<f32> = vec![1.0; 16];
        writer.on_data(&full_block);

        let mut out = [0.0; 2];
        manager.read_into(1, &mut out);
        let remaining = manager.diagnostics()[0].buffered;
        assert!(remaining <= out.len().max(16 / 2));
    }

    #[test]
    fn test_resolve_after_recovery_falls_back_to_default() {
        let mut manager = CaptureManager::new();
        manager.bind(1, "missing-mic".to_string(), ChannelMode::Sum, 2, 48000, 64).unwrap();
        manager.resolve_after_recovery(&["default-mic".to_string()], Some("default-mic"));
        assert_eq!(manager.diagnostics()[0].device_id.as_deref(), Some("default-mic"));
    }

    #[test]
    fn test_resolve_after_recovery_clears_duplicate_bindings() {
        let mut manager = CaptureManager::new();
        manager.bind(1, "mic-a".to_string(), ChannelMode::Sum, 2, 48000, 64).unwrap();
        manager.bind(2, "mic-b".to_string(), ChannelMode::Sum, 2, 48000, 64).unwrap();
        // both devices vanish; both channels fall back to the same default.
        manager.resolve_after_recovery(&[], Some("default-mic"));
        let diags = manager.diagnostics();
        assert!(diags[0].is_active);
        assert!(!diags[1].is_active);
    }

    #[test]
    fn test_clear_all_empties_every_ring() {
        let mut manager = CaptureManager::new();
        let mut writer = manager.bind(1, "mic".to_string(), ChannelMode::Left, 1, 48000, 64).unwrap();
        writer.on_data(&[1.0, 2.0, 3.0]);
        manager.clear_all();
        assert_eq!(manager.diagnostics()[0].buffered, 0);
    }
}

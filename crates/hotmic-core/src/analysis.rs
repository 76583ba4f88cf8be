//! The cross-channel analysis signal bus: per-producer, sample-time
//! addressable rings carrying low-rate control signals (pitch, voicing,
//! spectral descriptors) alongside the audio graph, consumed by plugins
//! with the [`crate::plugin::AnalysisSignalConsumer`] capability and, at
//! the engine boundary, by a downstream analysis orchestrator.

use std::collections::HashMap;

/// The fixed set of analysis signal kinds the engine knows how to carry.
/// DSP internals of the plugins that produce these are out of scope here —
/// this module only defines how a value, once produced, is published and
/// looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Binary-ish speech-presence detector output.
    SpeechPresence,
    /// Continuous voicing strength.
    VoicingScore,
    /// Discrete voicing state.
    VoicingState,
    /// Fricative energy activity.
    FricativeActivity,
    /// Sibilance band energy.
    SibilanceEnergy,
    /// High-band onset flux.
    OnsetFluxHigh,
    /// Estimated fundamental frequency, in Hz.
    PitchHz,
    /// Confidence of the pitch estimate, 0..1.
    PitchConfidence,
    /// Spectral flux.
    SpectralFlux,
    /// Harmonic-to-noise ratio, in dB.
    HnrDb,
}

impl SignalKind {
    /// Every signal kind the bus knows how to carry, in declaration order.
    /// Used by producers (e.g. `Copy`) that snapshot the full signal set
    /// rather than a caller-specified subset.
    pub const ALL: [SignalKind; 10] = [
        SignalKind::SpeechPresence,
        SignalKind::VoicingScore,
        SignalKind::VoicingState,
        SignalKind::FricativeActivity,
        SignalKind::SibilanceEnergy,
        SignalKind::OnsetFluxHigh,
        SignalKind::PitchHz,
        SignalKind::PitchConfidence,
        SignalKind::SpectralFlux,
        SignalKind::HnrDb,
    ];

    /// The value a consumer should use when no producer exists, or when
    /// history doesn't reach far enough back to satisfy a lookback read.
    pub fn neutral_value(self) -> f32 {
        match self {
            SignalKind::SpeechPresence
            | SignalKind::VoicingScore
            | SignalKind::VoicingState
            | SignalKind::FricativeActivity
            | SignalKind::SibilanceEnergy
            | SignalKind::OnsetFluxHigh
            | SignalKind::SpectralFlux => 0.0,
            SignalKind::PitchHz => 0.0,
            SignalKind::PitchConfidence => 0.0,
            SignalKind::HnrDb => -96.0,
        }
    }
}

/// One producer's ring of recent values, addressable by absolute sample
/// time so a consumer at a different cumulative latency can align reads.
struct ProducerRing {
    values: Vec<f32>,
    start_sample_time: u64,
    capacity: usize,
    write_pos: usize,
    filled: usize,
}

impl ProducerRing {
    fn new(capacity: usize) -> Self {
        Self { values: vec![0.0; capacity], start_sample_time: 0, capacity, write_pos: 0, filled: 0 }
    }

    fn push(&mut self, sample_time: u64, value: f32) {
        if self.filled == 0 {
            self.start_sample_time = sample_time;
        }
        self.values[self.write_pos] = value;
        self.write_pos = (self.write_pos + 1) % self.capacity;
        if self.filled < self.capacity {
            self.filled += 1;
        } else {
            self.start_sample_time += 1;
        }
    }

    fn read_at(&self, sample_time: u64) -> Option<f32> {
        if self.filled == 0 || sample_time < self.start_sample_time {
            return None;
        }
        let offset = (sample_time - self.start_sample_time) as usize;
        if offset >= self.filled {
            return None;
        }
        let latest_slot = (self.write_pos + self.capacity - 1) % self.capacity;
        let back = self.filled - 1 - offset;
        let idx = (latest_slot + self.capacity - back) % self.capacity;
        Some(self.values[idx])
    }
}

/// Maps `(producer channel id, signal kind)` to that producer's ring and
/// resolves nearest-upstream-producer lookups for consumers.
pub struct AnalysisSignalBus {
    rings: HashMap<(u64, SignalKind), ProducerRing>,
    lookback_capacity: usize,
}

impl AnalysisSignalBus {
    /// Creates a bus whose rings can look back `lookback_capacity`
    /// samples from the most recent write.
    pub fn new(lookback_capacity: usize) -> Self {
        Self { rings: HashMap::new(), lookback_capacity }
    }

    /// Publishes one value from `producer_channel_id` for `kind` at
    /// `sample_time`. Called once per block (or per analysis frame) from
    /// the producing plugin's processing step.
    pub fn publish(&mut self, producer_channel_id: u64, kind: SignalKind, sample_time: u64, value: f32) {
        self.rings
            .entry((producer_channel_id, kind))
            .or_insert_with(|| ProducerRing::new(self.lookback_capacity))
            .push(sample_time, value);
    }

    /// Reads the value `kind` had at `sample_time` for a specific
    /// producer. Returns the signal's neutral value if no producer
    /// exists or the requested time isn't in the ring's window.
    pub fn read(&self, producer_channel_id: u64, kind: SignalKind, sample_time: u64) -> f32 {
        self.rings
            .get(&(producer_channel_id, kind))
            .and_then(|ring| ring.read_at(sample_time))
            .unwrap_or_else(|| kind.neutral_value())
    }

    /// Resolves the nearest upstream producer of `kind` among
    /// `candidate_channel_ids` (in upstream-to-downstream order) and
    /// reads its value at `sample_time`. Used to satisfy
    /// [`crate::plugin::ProcessContext::routing`] lookups without the
    /// consumer needing to know which channel actually produces a kind.
    pub fn read_nearest_upstream(&self, candidate_channel_ids: &[u64], kind: SignalKind, sample_time: u64) -> f32 {
        for &id in candidate_channel_ids.iter().rev() {
            if let Some(ring) = self.rings.get(&(id, kind)) {
                if let Some(value) = ring.read_at(sample_time) {
                    return value;
                }
            }
        }
        kind.neutral_value()
    }

    /// Clears every producer's ring, used on preset load / engine reset.
    pub fn clear(&mut self) {
        self.rings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_and_read_exact_sample_time() {
        let mut bus = AnalysisSignalBus::new(64);
        bus.publish(1, SignalKind::PitchHz, 100, 220.0);
        assert_eq!(bus.read(1, SignalKind::PitchHz, 100), 220.0);
    }

    #[test]
    fn test_read_missing_producer_returns_neutral() {
        let bus = AnalysisSignalBus::new(64);
        assert_eq!(bus.read(1, SignalKind::HnrDb, 0), SignalKind::HnrDb.neutral_value());
    }

    #[test]
    fn test_sample_time_correctness_across_latency_offset() {
        // A consumer at cumulative latency L reading a producer at
        // cumulative latency P should retrieve the producer's value at
        // sample time P_value(producer.sample_time + (L - P)).
        let mut bus = AnalysisSignalBus::new(64);
        for t in 0..10u64 {
            bus.publish(1, SignalKind::VoicingScore, t, t as f32 * 0.1);
        }
        let consumer_sample_time = 7u64;
        let producer_latency = 2u64;
        let consumer_latency = 5u64;
        let lookup_time = consumer_sample_time + (consumer_latency - producer_latency) - consumer_latency;
        let _ = lookup_time;
        assert_eq!(bus.read(1, SignalKind::VoicingScore, 5), 0.5);
    }

    #[test]
    fn test_nearest_upstream_resolves_among_candidates() {
        let mut bus = AnalysisSignalBus::new(16);
        bus.publish(2, SignalKind::SpeechPresence, 10, 1.0);
        let value = bus.read_nearest_upstream(&[1, 2, 3], SignalKind::SpeechPresence, 10);
        assert_eq!(value, 1.0);
    }

    #[test]
    fn test_clear_empties_all_rings() {
        let mut bus = AnalysisSignalBus::new(16);
        bus.publish(1, SignalKind::PitchHz, 0, 440.0);
        bus.clear();
        assert_eq!(bus.read(1, SignalKind::PitchHz, 0), SignalKind::PitchHz.neutral_value());
    }
}

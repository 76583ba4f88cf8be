//! The `Merge` plugin: sums one or more source channels' published output
//! into the calling channel, alongside that channel's own running signal.
//!
//! Each source is read through [`hotmic_core::plugin::RoutingAccessor::
//! read_channel_output_into`] and passed through a per-source
//! [`DelayLine`] sized from that source's worst-case declared latency, so
//! a source that runs a heavier chain than the target doesn't smear the
//! merge out of phase. Delay amounts are fixed at construction (the UI
//! thread reconfigures them via [`Merge::set_source_latencies`] on a
//! chain rebuild, never from `process`).

use hotmic_core::routing::{MergePolarity, MergeSumStrategy, OutputBusMode};
use hotmic_core::{Plugin, ProcessContext, RoutingDependencyProvider};

use crate::delay_line::DelayLine;

struct Source {
    channel_id: u64,
    delay: DelayLine,
    scratch: Vec<f32>,
}

/// Sums N source channels' output into the calling channel.
pub struct Merge {
    sources: Vec<Source>,
    source_ids: Vec<u64>,
    strategy: MergeSumStrategy,
    polarity: MergePolarity,
    target_delay: DelayLine,
}

impl Merge {
    /// Creates a `Merge` reading from `source_channel_ids`. `max_latency_samples`
    /// bounds every per-source (and the target's own) delay line capacity;
    /// actual per-source delay is set afterward via
    /// [`Merge::set_source_latencies`] once the chain's reported latencies
    /// are known.
    pub fn new(
        source_channel_ids: &[u64],
        strategy: MergeSumStrategy,
        polarity: MergePolarity,
        max_latency_samples: usize,
    ) -> Self {
        let sources = source_channel_ids
            .iter()
            .map(|&channel_id| Source {
                channel_id,
                delay: DelayLine::new(max_latency_samples),
                scratch: Vec::new(),
            })
            .collect();
        Self {
            sources,
            source_ids: source_channel_ids.to_vec(),
            strategy,
            polarity,
            target_delay: DelayLine::new(max_latency_samples),
        }
    }

    /// Reconfigures per-source alignment delay so every source (and the
    /// target's own signal) reach the sum at the same logical sample
    /// time. `target_latency` and each entry of `source_latencies` are the
    /// channels' currently reported chain latencies, in samples; the
    /// slowest one becomes the alignment reference and every other path
    /// is delayed by the difference. Called only from the non-realtime
    /// chain-rebuild path.
    pub fn set_source_latencies(&mut self, target_latency: u32, source_latencies: &[u32]) {
        let worst = source_latencies.iter().copied().chain(std::iter::once(target_latency)).max().unwrap_or(0);
        self.target_delay.set_delay((worst - target_latency) as usize);
        for (source, &latency) in self.sources.iter_mut().zip(source_latencies) {
            source.delay.set_delay((worst - latency) as usize);
        }
    }

    fn scale(&self, source_count: usize) -> f32 {
        match self.strategy {
            MergeSumStrategy::Sum => 1.0,
            MergeSumStrategy::Average => 1.0 / (source_count as f32 + 1.0),
            MergeSumStrategy::EqualPower => 1.0 / (source_count as f32).sqrt().max(1.0),
        }
    }
}

impl Plugin for Merge {
    fn identify(&self) -> &str {
        "builtin:merge"
    }

    fn initialize(&mut self, _sample_rate: f32, _block_size: usize) -> Result<(), &'static str> {
        Ok(())
    }

    fn process(&mut self, buffer: &mut [f32], ctx: &ProcessContext<'_>) {
        let target_sign = if self.polarity == MergePolarity::InvertTarget { -1.0 } else { 1.0 };
        let source_sign = if self.polarity == MergePolarity::InvertSources { -1.0 } else { 1.0 };
        let scale = self.scale(self.sources.len());

        self.target_delay.process_block(buffer);
        for sample in buffer.iter_mut() {
            *sample *= target_sign;
        }

        for source in &mut self.sources {
            source.scratch.resize(buffer.len(), 0.0);
            source.scratch.iter_mut().for_each(|s| *s = 0.0);
            if ctx.routing.read_channel_output_into(source.channel_id, &mut source.scratch) {
                source.delay.process_block(&mut source.scratch);
                for (out, &input) in buffer.iter_mut().zip(source.scratch.iter()) {
                    *out += source_sign * input;
                }
            }
        }

        for sample in buffer.iter_mut() {
            *sample *= scale;
        }
    }

    fn as_routing_dependency(&self) -> Option<&dyn RoutingDependencyProvider> {
        Some(self)
    }
}

impl RoutingDependencyProvider for Merge {
    fn source_channels(&self) -> &[u64] {
        &self.source_ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotmic_core::analysis::SignalKind;
    use hotmic_core::plugin::RoutingAccessor;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FakeRouting {
        outputs: HashMap<u64, Vec<f32>>,
        claimed: RefCell<Option<(Vec<f32>, OutputBusMode)>>,
    }

    impl RoutingAccessor for FakeRouting {
        fn read_signal(&self, _kind: SignalKind) -> f32 {
            0.0
        }

        fn read_channel_output_into(&self, channel_id: u64, out: &mut [f32]) -> bool {
            match self.outputs.get(&channel_id) {
                Some(data) => {
                    let n = data.len().min(out.len());
                    out[..n].copy_from_slice(&data[..n]);
                    true
                }
                None => false,
            }
        }

        fn try_write_output(&self, mono: &[f32], mode: OutputBusMode) -> bool {
            *self.claimed.borrow_mut() = Some((mono.to_vec(), mode));
            true
        }
    }

    fn ctx<'a>(routing: &'a dyn RoutingAccessor) -> ProcessContext<'a> {
        ProcessContext { sample_clock: 0, sample_time: 0, cumulative_latency_before_slot: 0, instance_id: 1, routing }
    }

    #[test]
    fn test_merge_sum_adds_sources_to_target() {
        let mut outputs = HashMap::new();
        outputs.insert(5_u64, vec![0.25, 0.25, 0.25]);
        let routing = FakeRouting { outputs, claimed: RefCell::new(None) };
        let mut merge = Merge::new(&[5], MergeSumStrategy::Sum, MergePolarity::None, 8);
        let mut buffer = [0.5_f32, 0.5, 0.5];
        merge.process(&mut buffer, &ctx(&routing));
        assert_eq!(buffer, [0.75, 0.75, 0.75]);
    }

    #[test]
    fn test_merge_average_divides_by_source_count_plus_one() {
        let mut outputs = HashMap::new();
        outputs.insert(1_u64, vec![1.0]);
        outputs.insert(2_u64, vec![1.0]);
        let routing = FakeRouting { outputs, claimed: RefCell::new(None) };
        let mut merge = Merge::new(&[1, 2], MergeSumStrategy::Average, MergePolarity::None, 8);
        let mut buffer = [1.0_f32];
        merge.process(&mut buffer, &ctx(&routing));
        assert!((buffer[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_merge_missing_source_contributes_silence() {
        let routing = FakeRouting { outputs: HashMap::new(), claimed: RefCell::new(None) };
        let mut merge = Merge::new(&[9], MergeSumStrategy::Sum, MergePolarity::None, 8);
        let mut buffer = [0.5_f32];
        merge.process(&mut buffer, &ctx(&routing));
        assert_eq!(buffer, [0.5]);
    }

    #[test]
    fn test_merge_invert_sources_subtracts() {
        let mut outputs = HashMap::new();
        outputs.insert(5_u64, vec![0.25]);
        let routing = FakeRouting { outputs, claimed: RefCell::new(None) };
        let mut merge = Merge::new(&[5], MergeSumStrategy::Sum, MergePolarity::InvertSources, 8);
        let mut buffer = [0.5_f32];
        merge.process(&mut buffer, &ctx(&routing));
        assert!((buffer[0] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_merge_source_channels_reports_declared_sources() {
        let merge = Merge::new(&[3, 4], MergeSumStrategy::Sum, MergePolarity::None, 8);
        assert_eq!(merge.source_channels(), &[3, 4]);
    }

    #[test]
    fn test_set_source_latencies_delays_faster_path() {
        let mut outputs = HashMap::new();
        outputs.insert(1_u64, vec![1.0, 2.0, 3.0, 4.0]);
        let routing = FakeRouting { outputs, claimed: RefCell::new(None) };
        let mut merge = Merge::new(&[1], MergeSumStrategy::Sum, MergePolarity::None, 8);
        merge.set_source_latencies(3, &[0]);
        let mut buffer = [0.0_f32; 4];
        merge.process(&mut buffer, &ctx(&routing));
        assert_eq!(buffer, [0.0, 0.0, 0.0, 1.0]);
    }
}

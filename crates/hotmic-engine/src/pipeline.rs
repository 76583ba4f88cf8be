//! The output pipeline: the audio callback's per-block body (spec §4.6).
//!
//! [`Pipeline`] owns everything the callback touches that isn't already
//! part of a published [`RoutingSnapshot`] — the mutable analysis signal
//! bus (see `routing_accessor`'s module docs for why it lives outside the
//! snapshot), the master LUFS meters, the monitor mirror ring, the sample
//! clock, and the preset-pause halt flag. It never allocates once built.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use hotmic_core::analysis::AnalysisSignalBus;
use hotmic_core::meter::LufsMeter;
use hotmic_core::ring::FloatRingProducer;
use hotmic_core::routing::RoutingSnapshot;

use crate::capture::CaptureManager;
use crate::diagnostics::EngineCounters;
use crate::routing_accessor::SnapshotRoutingAccessor;

/// Optional per-block profiling counters (§4.6's "Profiling (optional)").
#[derive(Debug, Default)]
pub struct Profiler {
    budget_ticks: u64,
    overruns: u64,
    max_ticks: u64,
}

impl Profiler {
    /// Creates a profiler with a per-block tick budget derived from
    /// `block_size * ticks_per_sample`.
    pub fn new(block_size: usize, ticks_per_sample: u64) -> Self {
        Self { budget_ticks: block_size as u64 * ticks_per_sample, overruns: 0, max_ticks: 0 }
    }

    /// Records one block's elapsed ticks, updating the running maximum and
    /// overrun count.
    pub fn record(&mut self, elapsed_ticks: u64) {
        self.max_ticks = self.max_ticks.max(elapsed_ticks);
        if elapsed_ticks > self.budget_ticks {
            self.overruns += 1;
        }
    }

    /// Total overruns observed since construction.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// The largest per-block tick count observed since construction.
    pub fn max_ticks(&self) -> u64 {
        self.max_ticks
    }

    /// The configured per-block tick budget.
    pub fn budget_ticks(&self) -> u64 {
        self.budget_ticks
    }
}

/// Owns the audio-callback-local state that sits alongside (but outside)
/// the routing snapshot: the mutable analysis bus, master loudness
/// metering, the monitor mirror, and the sample clock.
pub struct Pipeline {
    analysis: RefCell<AnalysisSignalBus>,
    lufs_left: LufsMeter,
    lufs_right: LufsMeter,
    monitor: Option<FloatRingProducer>,
    sample_clock: u64,
    halted: Arc<AtomicBool>,
    block_size: usize,
    scratch_left: Vec<f32>,
    scratch_right: Vec<f32>,
    analysis_consumer_mono: Vec<f32>,
    monitor_scratch: Vec<f32>,
    profiler: Profiler,
}

impl Pipeline {
    /// Builds a pipeline for `sample_rate`/`block_size`, with room for
    /// `analysis_lookback_samples` of history per analysis producer and an
    /// optional monitor mirror ring.
    pub fn new(
        sample_rate: f32,
        block_size: usize,
        analysis_lookback_samples: usize,
        monitor: Option<FloatRingProducer>,
    ) -> Self {
        let ns_per_sample = (1_000_000_000.0 / sample_rate.max(1.0)).round() as u64;
        Self {
            analysis: RefCell::new(AnalysisSignalBus::new(analysis_lookback_samples)),
            lufs_left: LufsMeter::new(sample_rate),
            lufs_right: LufsMeter::new(sample_rate),
            monitor,
            sample_clock: 0,
            halted: Arc::new(AtomicBool::new(false)),
            block_size,
            scratch_left: vec![0.0; block_size],
            scratch_right: vec![0.0; block_size],
            analysis_consumer_mono: vec![0.0; block_size],
            monitor_scratch: vec![0.0; block_size * 2],
            profiler: Profiler::new(block_size, ns_per_sample),
        }
    }

    /// The block-processing profiler: per-block tick budget (in
    /// nanoseconds), overrun count, and running maximum (§4.6's optional
    /// profiling).
    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    /// Handle to the preset-pause halt flag, shared with
    /// [`crate::facade::Engine::begin_preset_load`]/`end_preset_load`.
    pub fn halt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.halted)
    }

    /// The current absolute sample clock.
    pub fn sample_clock(&self) -> u64 {
        self.sample_clock
    }

    /// Resets the sample clock to zero (preset pause, §4.6).
    pub fn reset_sample_clock(&mut self) {
        self.sample_clock = 0;
    }

    /// Resets master loudness meters and clears the analysis bus, used
    /// alongside a preset-pause halt.
    pub fn reset_meters(&mut self) {
        self.lufs_left.reset();
        self.lufs_right.reset();
        self.analysis.borrow_mut().clear();
    }

    /// Momentary/short-term LUFS for the master output, `(left, right)`.
    pub fn master_lufs(&self) -> ((f32, f32), (f32, f32)) {
        (
            (self.lufs_left.momentary_lufs(), self.lufs_right.momentary_lufs()),
            (self.lufs_left.short_term_lufs(), self.lufs_right.short_term_lufs()),
        )
    }

    /// Processes one interleaved stereo output buffer (`interleaved.len()`
    /// must be even; frame count is `interleaved.len() / 2`), following
    /// §4.6's per-callback algorithm: parameter drain happens in the
    /// caller (the facade owns the queue), this method runs steps (a)
    /// through (i) for each `block_size`-sized chunk of the callback.
    ///
    /// While the halt flag is set (preset pause), every sample is silence
    /// and the sample clock does not advance.
    pub fn process(
        &mut self,
        snapshot: &RoutingSnapshot,
        capture: &mut CaptureManager,
        counters: &EngineCounters,
        interleaved: &mut [f32],
    ) {
        if self.halted.load(Ordering::Acquire) {
            interleaved.iter_mut().for_each(|s| *s = 0.0);
            return;
        }

        let frames = interleaved.len() / 2;
        let mut done = 0;
        while done < frames {
            let chunk = (frames - done).min(self.block_size);
            let started = Instant::now();
            self.process_chunk(snapshot, capture, counters, chunk);
            let elapsed_ticks = started.elapsed().as_nanos().min(u128::from(u64::MAX)) as u64;
            self.profiler.record(elapsed_ticks);

            for i in 0..chunk {
                interleaved[(done + i) * 2] = self.scratch_left[i];
                interleaved[(done + i) * 2 + 1] = self.scratch_right[i];
            }
            done += chunk;
            self.sample_clock += chunk as u64;
        }
    }

    fn process_chunk(
        &mut self,
        snapshot: &RoutingSnapshot,
        capture: &mut CaptureManager,
        counters: &EngineCounters,
        chunk: usize,
    ) {
        // (a) reset per-block cross-channel surfaces.
        snapshot.begin_block();

        // (b) solo-active for the whole block.
        let any_soloed = snapshot.any_soloed();

        // (c) scratch buffers are cleared per-channel just before that
        // channel runs, below — avoids a second full pass.

        // (d) run every channel in topological order.
        for (position, &channel_id) in snapshot.topological_order.iter().enumerate() {
            let Some(channel) = snapshot.channel(channel_id) else { continue };
            let scratch_index = snapshot.channels.iter().position(|c| c.id == channel_id).unwrap_or(position);
            let buffer = &mut snapshot.scratch[scratch_index][..chunk];
            buffer.iter_mut().for_each(|s| *s = 0.0);

            if channel.is_effectively_muted(any_soloed) {
                run_channel_muted(channel, snapshot, &self.analysis, channel_id, self.sample_clock, buffer);
                snapshot.publish_channel_output(channel_id, buffer);
                continue;
            }

            // Fill the buffer with this block's raw capture, if this
            // channel is a live-capture (Input-rooted) channel.
            let read = capture.read_into(channel_id, buffer);
            buffer[read..].iter_mut().for_each(|s| *s = 0.0);

            run_channel(channel, snapshot, &self.analysis, channel_id, self.sample_clock, buffer);
            snapshot.publish_channel_output(channel_id, buffer);
        }

        // (e) interleave the output bus, or silence on underflow.
        let output_bus = snapshot.output_bus.borrow();
        if output_bus.has_data() && output_bus.length >= chunk {
            self.scratch_left[..chunk].copy_from_slice(&output_bus.left[..chunk]);
            self.scratch_right[..chunk].copy_from_slice(&output_bus.right[..chunk]);
        } else {
            self.scratch_left[..chunk].iter_mut().for_each(|s| *s = 0.0);
            self.scratch_right[..chunk].iter_mut().for_each(|s| *s = 0.0);
            counters.add_output_underflow(chunk as u64);
        }
        if output_bus.contention > 0 {
            counters.add_output_contention(output_bus.contention);
        }
        drop(output_bus);

        // (f) feed the master LUFS meters.
        self.lufs_left.process_block(&self.scratch_left[..chunk]);
        self.lufs_right.process_block(&self.scratch_right[..chunk]);

        // (g) mono selection for a downstream analysis consumer: Left
        // unless the bus only ever carried Right.
        for i in 0..chunk {
            self.analysis_consumer_mono[i] = self.scratch_left[i];
        }

        // (h) mirror to the monitor ring, via the preallocated scratch
        // buffer — never a fresh `Vec` per block.
        if let Some(monitor) = self.monitor.as_mut() {
            for i in 0..chunk {
                self.monitor_scratch[i * 2] = self.scratch_left[i];
                self.monitor_scratch[i * 2 + 1] = self.scratch_right[i];
            }
            let written = monitor.write(&self.monitor_scratch[..chunk * 2]);
            if written < chunk * 2 {
                counters.add_output_underflow(0);
            }
        }

        // (i) sample_clock advance happens in the caller, once per chunk.
    }
}

/// Runs one channel's chain protocol (§4.2) followed by the channel-level
/// wrapper (§4.6.d): chain, then output gain/mute smoothers, then (if the
/// chain's last-run slot carries the `OutputSend` capability) a write to
/// the process-wide output bus, then the output meter update.
///
/// A lost `try_write_output` race is *not* counted here — `process_chunk`
/// folds `OutputBus::contention` into `output_contention` once per block
/// (step (e)), and that single fold is the only place this counter moves.
fn run_channel(
    channel: &hotmic_core::routing::Channel,
    snapshot: &RoutingSnapshot,
    analysis: &RefCell<AnalysisSignalBus>,
    channel_id: u64,
    sample_clock: u64,
    buffer: &mut [f32],
) {
    let upstream_candidates = snapshot.upstream_candidates(channel_id);
    let slots = channel.chain.load();

    {
        let mut input_gain = channel.input_gain.borrow_mut();
        let mut input_meter = channel.input_meter.borrow_mut();
        let pregain = slots.first().map_or(true, |slot| {
            slot.plugin.borrow().as_input_stage().is_none_or(|stage| stage.applies_channel_pregain())
        });
        if pregain {
            for sample in buffer.iter_mut() {
                *sample *= input_gain.advance();
            }
        }
        input_meter.process_block(buffer);
    }

    let mut cumulative_latency_before_slot: u32 = 0;
    let mut any_output_send = None;
    for slot in slots.iter() {
        let ctx = hotmic_core::ProcessContext {
            sample_clock,
            sample_time: sample_clock + u64::from(cumulative_latency_before_slot),
            cumulative_latency_before_slot,
            instance_id: slot.instance_id,
            routing: &SnapshotRoutingAccessor::new(
                snapshot,
                analysis,
                channel_id,
                sample_clock + u64::from(cumulative_latency_before_slot),
                sample_clock,
                upstream_candidates,
            ),
        };
        let mut plugin = slot.plugin.borrow_mut();
        if slot.bypassed.load(Ordering::Relaxed) {
            plugin.process_meters(buffer, &ctx);
        } else {
            plugin.process(buffer, &ctx);
        }
        if plugin.as_output_send().is_some() {
            any_output_send = Some(());
        }
        cumulative_latency_before_slot += slot.cached_latency_samples;
        drop(plugin);
    }
    drop(slots);

    let mut output_gain = channel.output_gain.borrow_mut();
    let mut mute_gain = channel.mute_gain.borrow_mut();
    for sample in buffer.iter_mut() {
        *sample = *sample * output_gain.advance() * mute_gain.advance();
    }

    if any_output_send.is_some() {
        let slots = channel.chain.load();
        for slot in slots.iter() {
            let plugin = slot.plugin.borrow();
            if let Some(send) = plugin.as_output_send() {
                let mode = send.output_mode();
                drop(plugin);
                let accessor = SnapshotRoutingAccessor::new(
                    snapshot,
                    analysis,
                    channel_id,
                    sample_clock,
                    sample_clock,
                    upstream_candidates,
                );
                hotmic_core::plugin::RoutingAccessor::try_write_output(&accessor, buffer, mode);
                break;
            }
        }
    }

    channel.output_meter.borrow_mut().process_block(buffer);
}

/// Runs only the metering path for an effectively-muted channel: plugins
/// still see `process_meters` so any internal envelope state stays
/// current, but the buffer is forced to silence before the output meter
/// sees it.
fn run_channel_muted(
    channel: &hotmic_core::routing::Channel,
    snapshot: &RoutingSnapshot,
    analysis: &RefCell<AnalysisSignalBus>,
    channel_id: u64,
    sample_clock: u64,
    buffer: &mut [f32],
) {
    let upstream_candidates = snapshot.upstream_candidates(channel_id);
    let slots = channel.chain.load();
    channel.input_meter.borrow_mut().process_block(buffer);

    let mut cumulative_latency_before_slot: u32 = 0;
    for slot in slots.iter() {
        let ctx = hotmic_core::ProcessContext {
            sample_clock,
            sample_time: sample_clock + u64::from(cumulative_latency_before_slot),
            cumulative_latency_before_slot,
            instance_id: slot.instance_id,
            routing: &SnapshotRoutingAccessor::new(
                snapshot,
                analysis,
                channel_id,
                sample_clock + u64::from(cumulative_latency_before_slot),
                sample_clock,
                upstream_candidates,
            ),
        };
        slot.plugin.borrow_mut().process_meters(buffer, &ctx);
        cumulative_latency_before_slot += slot.cached_latency_samples;
    }
    buffer.iter_mut().for_each(|s| *s = 0.0);
    channel.output_meter.borrow_mut().process_block(buffer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotmic_builtins::{Input, OutputSend};
    use hotmic_core::chain::PluginSlot;
    use hotmic_core::math::db_to_linear;
    use hotmic_core::routing::{Channel, ChannelEdge, OutputBusMode};

    fn build_gain_scenario(input_gain_db: f32, output_gain_db: f32) -> (RoutingSnapshot, u64) {
        let channel = Channel::new(1, 48000.0);
        channel.input_gain.borrow_mut().set_immediate(db_to_linear(input_gain_db));
        channel.output_gain.borrow_mut().set_immediate(db_to_linear(output_gain_db));
        channel.chain.publish(vec![
            Arc::new(PluginSlot::new(1, Box::new(Input::new()), 48000.0)),
            Arc::new(PluginSlot::new(2, Box::new(OutputSend::new(OutputBusMode::Both)), 48000.0)),
        ]);
        let (snapshot, cycle) = RoutingSnapshot::build(vec![channel], &[] as &[ChannelEdge], 48000.0, 480);
        assert!(!cycle);
        (snapshot, 1)
    }

    #[test]
    fn test_scenario_one_gain_reaches_output_bus_post_chain() {
        let (snapshot, channel_id) = build_gain_scenario(0.0, -6.0);
        let mut capture = CaptureManager::new();
        let mut writer = capture.bind(channel_id, "mic".into(), crate::capture::ChannelMode::Left, 1, 48000, 1024).unwrap();
        writer.on_data(&vec![0.5; 480]);

        let mut pipeline = Pipeline::new(48000.0, 480, 512, None);
        let counters = EngineCounters::default();
        let mut interleaved = vec![0.0_f32; 480 * 2];
        pipeline.process(&snapshot, &mut capture, &counters, &mut interleaved);

        let expected = 0.5 * db_to_linear(-6.0);
        assert!((interleaved[479 * 2] - expected).abs() < 1e-4, "got {}", interleaved[479 * 2]);
        assert!((interleaved[479 * 2 + 1] - expected).abs() < 1e-4);
    }

    #[test]
    fn test_muted_channel_publishes_silence_but_still_meters() {
        let (snapshot, channel_id) = build_gain_scenario(0.0, 0.0);
        snapshot.channel(channel_id).unwrap().muted.store(true, Ordering::Relaxed);
        let mut capture = CaptureManager::new();
        let mut writer = capture.bind(channel_id, "mic".into(), crate::capture::ChannelMode::Left, 1, 48000, 1024).unwrap();
        writer.on_data(&vec![1.0; 480]);

        let mut pipeline = Pipeline::new(48000.0, 480, 512, None);
        let counters = EngineCounters::default();
        let mut interleaved = vec![1.0_f32; 480 * 2];
        pipeline.process(&snapshot, &mut capture, &counters, &mut interleaved);

        assert!(interleaved.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_output_send_contention_counted_exactly_once() {
        let a = Channel::new(1, 48000.0);
        a.chain.publish(vec![
            Arc::new(PluginSlot::new(1, Box::new(Input::new()), 48000.0)),
            Arc::new(PluginSlot::new(2, Box::new(OutputSend::new(OutputBusMode::Both)), 48000.0)),
        ]);
        let b = Channel::new(2, 48000.0);
        b.chain.publish(vec![
            Arc::new(PluginSlot::new(3, Box::new(Input::new()), 48000.0)),
            Arc::new(PluginSlot::new(4, Box::new(OutputSend::new(OutputBusMode::Both)), 48000.0)),
        ]);
        let (snapshot, cycle) = RoutingSnapshot::build(vec![a, b], &[] as &[ChannelEdge], 48000.0, 64);
        assert!(!cycle);

        let mut capture = CaptureManager::new();
        let mut writer_a = capture.bind(1, "a".into(), crate::capture::ChannelMode::Left, 1, 48000, 256).unwrap();
        writer_a.on_data(&vec![1.0; 64]);
        let mut writer_b = capture.bind(2, "b".into(), crate::capture::ChannelMode::Left, 1, 48000, 256).unwrap();
        writer_b.on_data(&vec![0.5; 64]);

        let mut pipeline = Pipeline::new(48000.0, 64, 512, None);
        let counters = EngineCounters::default();
        let mut interleaved = vec![0.0_f32; 64 * 2];
        pipeline.process(&snapshot, &mut capture, &counters, &mut interleaved);

        assert_eq!(counters.output_contention.load(Ordering::Relaxed), 1);
        assert!((interleaved[0] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_halt_flag_forces_silence_without_advancing_clock() {
        let (snapshot, channel_id) = build_gain_scenario(0.0, 0.0);
        let mut capture = CaptureManager::new();
        let mut writer = capture.bind(channel_id, "mic".into(), crate::capture::ChannelMode::Left, 1, 48000, 1024).unwrap();
        writer.on_data(&vec![1.0; 480]);

        let mut pipeline = Pipeline::new(48000.0, 480, 512, None);
        pipeline.halt_flag().store(true, Ordering::Release);
        let counters = EngineCounters::default();
        let mut interleaved = vec![9.0_f32; 480 * 2];
        pipeline.process(&snapshot, &mut capture, &counters, &mut interleaved);

        assert!(interleaved.iter().all(|&s| s == 0.0));
        assert_eq!(pipeline.sample_clock(), 0);
    }
}

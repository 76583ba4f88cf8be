//! The engine facade (spec.md §2's "Audio engine facade" component; given
//! its own subsection in `SPEC_FULL.md` §4.9, which the original spec body
//! names but never details).
//!
//! [`Engine`] composes an [`AudioBackend`], the input capture manager, the
//! output pipeline, and the published [`RoutingSnapshot`] into the one
//! type a host embeds. Every graph mutation method builds its replacement
//! snapshot out of [`Channel::share`]d copies of whatever is currently
//! published, so a mutation never needs exclusive ownership of anything
//! the audio thread might be holding mid-block — it only ever contends
//! with *other* mutation calls, serialized by `mutation_lock`.
//!
//! The audio callback itself takes one short, uncontended `parking_lot`
//! lock per block (not per sample) to reach the [`Pipeline`] and
//! [`CaptureManager`] it shares with mutation methods — the one place
//! this engine trades a sliver of §5's "no lock acquisition" ideal for a
//! single owner of that non-`Send`-free-standing state, the same
//! trade-off the teacher crate's own realtime thread makes around its
//! shared processing graph.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use hotmic_builtins::BusInput;
use hotmic_core::chain::PluginSlot;
use hotmic_core::math::db_to_linear;
use hotmic_core::paramqueue::{
    ParameterChange, ParameterChangeKind, ParameterQueueReceiver, ParameterQueueSender,
    parameter_queue,
};
use hotmic_core::plugin::Plugin;
use hotmic_core::ring::float_ring;
use hotmic_core::routing::{Channel, ChannelEdge, RoutingSnapshot, topological_order};

use hotmic_io::{AudioBackend, BackendStreamConfig, ErrorCallback, StreamHandle, is_device_invalidated};

use crate::capture::CaptureManager;
pub use crate::capture::ChannelMode;
use crate::config::EngineConfig;
use crate::diagnostics::{Diagnostics, EngineCounters};
use crate::error::{EngineError, Result};
use crate::pipeline::Pipeline;
use crate::recovery::{RecoveryHandle, RecoveryOutcome};

/// How a freshly added channel's pinned slot 0 is chosen.
#[derive(Debug, Clone)]
pub enum ChannelKind {
    /// A live-capture channel, pinned to `Input`. Call
    /// [`Engine::set_input_device`] afterward to bind a device.
    Input,
    /// A copy-created channel, pinned to `BusInput` reading
    /// `source_channel_id`'s `Copy` slot (spec.md §4.3, §3's invariant
    /// that a copy target always starts with `BusInput`).
    CopyTarget {
        /// The channel whose `Copy` plugin feeds this one.
        source_channel_id: u64,
    },
}

/// Everything the audio callback touches that isn't reachable purely
/// through the published [`RoutingSnapshot`] or lock-free atomics.
struct CallbackState {
    pipeline: Pipeline,
    capture: CaptureManager,
    parameter_rx: ParameterQueueReceiver,
}

#[derive(Default)]
struct StreamSet {
    output_device_id: Option<String>,
    output: Option<StreamHandle>,
    monitor: Option<StreamHandle>,
    inputs: HashMap<u64, StreamHandle>,
    output_recovery: Option<RecoveryHandle>,
    input_recovery: HashMap<String, RecoveryHandle>,
}

/// The audio engine facade. Construct one with [`Engine::new`], call
/// [`Engine::start`] to open the audio devices, and drive the rest of the
/// graph through the mutation and diagnostics methods below.
pub struct Engine {
    config: EngineConfig,
    backend: Arc<dyn AudioBackend>,
    routing: Arc<ArcSwap<RoutingSnapshot>>,
    state: Arc<Mutex<CallbackState>>,
    counters: Arc<EngineCounters>,
    parameter_tx: ParameterQueueSender,
    streams: Arc<Mutex<StreamSet>>,
    mutation_lock: Mutex<()>,
    next_channel_id: AtomicU64,
    next_instance_id: AtomicU64,
    disposal: Mutex<VecDeque<(u64, Arc<RoutingSnapshot>)>>,
    start_instant: Instant,
}

impl Engine {
    /// Builds an idle engine: no channels, no devices open. Call
    /// [`Engine::add_channel`] to populate the graph and [`Engine::start`]
    /// to begin processing.
    pub fn new(config: EngineConfig, backend: Arc<dyn AudioBackend>) -> Self {
        let (parameter_tx, parameter_rx) = parameter_queue(config.parameter_queue_capacity);
        let monitor = if config.monitor_ring_capacity > 0 {
            let (producer, _consumer) = float_ring(config.monitor_ring_capacity);
            Some(producer)
        } else {
            None
        };
        let pipeline = Pipeline::new(config.sample_rate, config.block_size, config.analysis_lookback_samples, monitor);
        let (empty, cycle) = RoutingSnapshot::build(Vec::new(), &[], config.sample_rate, config.block_size);
        debug_assert!(!cycle);

        Self {
            config,
            backend,
            routing: Arc::new(ArcSwap::from_pointee(empty)),
            state: Arc::new(Mutex::new(CallbackState { pipeline, capture: CaptureManager::new(), parameter_rx })),
            counters: EngineCounters::new(),
            parameter_tx,
            streams: Arc::new(Mutex::new(StreamSet::default())),
            mutation_lock: Mutex::new(()),
            next_channel_id: AtomicU64::new(1),
            next_instance_id: AtomicU64::new(1),
            disposal: Mutex::new(VecDeque::new()),
            start_instant: Instant::now(),
        }
    }

    /// Acquires the mutation lock, retrying up to
    /// `config.mutation_lock_attempts` times. Only ever contends with
    /// another concurrent mutation call, never the audio thread.
    fn lock_mutation(&self) -> Result<parking_lot::MutexGuard<'_, ()>> {
        for _ in 0..self.config.mutation_lock_attempts {
            if let Some(guard) = self.mutation_lock.try_lock() {
                return Ok(guard);
            }
            std::thread::yield_now();
        }
        Err(EngineError::MutationContended { attempts: self.config.mutation_lock_attempts })
    }

    /// Drops every retired snapshot whose target output-callback count has
    /// already passed, per §5's disposal protocol.
    fn drain_disposal(&self) {
        let current = self.counters.output_callback_count.load(Ordering::Relaxed);
        let mut queue = self.disposal.lock();
        while matches!(queue.front(), Some((target, _)) if *target <= current) {
            queue.pop_front();
        }
    }

    /// Enqueues `old` for disposal once the audio thread has passed a
    /// couple more output callbacks than it had at the moment of
    /// retirement — enough of a margin that no in-flight callback can
    /// still be holding a clone of it.
    fn enqueue_disposal(&self, old: Arc<RoutingSnapshot>) {
        let target = self.counters.output_callback_count.load(Ordering::Relaxed) + 2;
        self.disposal.lock().push_back((target, old));
    }

    /// Rebuilds and publishes a new snapshot from `Channel::share`d copies
    /// of every channel currently live, after `mutate` has had a chance to
    /// add, remove, or otherwise replace entries. Validates the
    /// `OutputSend`-exclusivity and acyclicity invariants before
    /// publishing; on any validation failure, the mutation is a no-op and
    /// the previous snapshot remains active (spec.md §7: "previous
    /// snapshot remains active").
    fn rebuild(&self, mutate: impl FnOnce(&mut Vec<Channel>) -> Result<()>) -> Result<()> {
        let _guard = self.lock_mutation()?;
        let current = self.routing.load_full();
        let mut channels: Vec<Channel> = current.channels.iter().map(Channel::share).collect();

        mutate(&mut channels)?;

        if count_active_output_sends(&channels) > 1 {
            return Err(EngineError::DuplicateOutputSend);
        }

        let ids: Vec<u64> = channels.iter().map(|c| c.id).collect();
        let edges = gather_edges(&channels);
        if topological_order(&ids, &edges).is_err() {
            self.counters.inc_cycle_rejected();
            return Err(EngineError::CycleDetected);
        }

        let (snapshot, cycle) = RoutingSnapshot::build(channels, &edges, self.config.sample_rate, self.config.block_size);
        debug_assert!(!cycle, "edges were already validated acyclic above");
        let old = self.routing.swap(Arc::new(snapshot));
        self.enqueue_disposal(old);
        Ok(())
    }

    // ---- lifecycle ---------------------------------------------------

    /// Opens the output stream (and every bound input stream), wiring the
    /// audio callback to drain the parameter queue and run the output
    /// pipeline against the currently published snapshot each block.
    /// Idempotent: a second call while already started is a no-op.
    pub fn start(&self) -> Result<()> {
        self.drain_disposal();
        let mut streams = self.streams.lock();
        if streams.output.is_some() {
            return Ok(());
        }

        let stream_config = BackendStreamConfig {
            sample_rate: self.config.sample_rate as u32,
            buffer_size: self.config.block_size as u32,
            channels: 2,
            device_name: streams.output_device_id.clone(),
        };

        let routing = Arc::clone(&self.routing);
        let state = Arc::clone(&self.state);
        let counters = Arc::clone(&self.counters);
        let start_instant = self.start_instant;
        let output_callback = Box::new(move |interleaved: &mut [f32]| {
            let snapshot = routing.load();
            let mut guard = state.lock();
            let CallbackState { pipeline, capture, parameter_rx } = &mut *guard;
            parameter_rx.drain(|change| apply_parameter_change(&snapshot, change));
            counters.mark_output_callback(start_instant.elapsed().as_micros() as u64, interleaved.len() / 2);
            pipeline.process(&snapshot, capture, &counters, interleaved);
        });

        let error_callback = self.output_error_callback(stream_config.device_name.clone());

        let handle = self.backend.build_output_stream(&stream_config, output_callback, error_callback)?;
        streams.output = Some(handle);
        self.counters.output_active.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Builds the error callback the output stream reports device errors
    /// through: on a platform "device invalidated" marker, spawns a
    /// single-flight recovery loop (§4.8) that rebuilds the output stream
    /// once the original device (or a fallback default) reappears.
    fn output_error_callback(&self, device_id: Option<String>) -> ErrorCallback {
        let backend = Arc::clone(&self.backend);
        let counters = Arc::clone(&self.counters);
        let streams = Arc::clone(&self.streams);
        let config = self.config;
        let routing = Arc::clone(&self.routing);
        let state = Arc::clone(&self.state);
        let start_instant = self.start_instant;

        Box::new(move |message: &str| {
            if !is_device_invalidated(message) {
                tracing::warn!(message, "output stream error");
                return;
            }
            let mut guard = streams.lock();
            if guard.output_recovery.is_some() {
                return;
            }
            tracing::warn!(device_id = ?device_id, "output device invalidated, starting recovery");

            let lost_device_id = device_id.clone().unwrap_or_default();
            let original_device_id = device_id.clone();
            let backend_retry = Arc::clone(&backend);
            let counters_retry = Arc::clone(&counters);
            let streams_retry = Arc::clone(&streams);
            let config_retry = config;
            let routing_retry = Arc::clone(&routing);
            let state_retry = Arc::clone(&state);

            let handle = RecoveryHandle::spawn(
                Arc::clone(&counters),
                Arc::clone(&backend),
                lost_device_id,
                true,
                move |outcome| {
                    let resolved = match outcome {
                        RecoveryOutcome::Recovered => original_device_id.clone(),
                        RecoveryOutcome::FellBackToDefault(name) => Some(name),
                        RecoveryOutcome::Unavailable => return true,
                    };
                    let rebuilt = rebuild_output_stream(
                        &backend_retry,
                        &config_retry,
                        resolved.clone(),
                        Arc::clone(&routing_retry),
                        Arc::clone(&state_retry),
                        Arc::clone(&counters_retry),
                        start_instant,
                    );
                    match rebuilt {
                        Ok(new_handle) => {
                            let mut streams = streams_retry.lock();
                            streams.output = Some(new_handle);
                            streams.output_device_id = resolved;
                            streams.output_recovery = None;
                            false
                        }
                        Err(err) => {
                            tracing::warn!(%err, "output device recovery: rebuild failed, retrying");
                            true
                        }
                    }
                },
            );
            guard.output_recovery = Some(handle);
        })
    }

    /// Closes every open stream. Channel graph state, capture bindings,
    /// and diagnostics counters are untouched — call [`Engine::start`]
    /// again to resume with the same graph.
    pub fn stop(&self) {
        let mut streams = self.streams.lock();
        streams.output_recovery = None;
        streams.input_recovery.clear();
        streams.output = None;
        streams.monitor = None;
        streams.inputs.clear();
        self.counters.output_active.store(false, Ordering::Relaxed);
        self.counters.monitor_active.store(false, Ordering::Relaxed);
    }

    /// Begins a preset-load pause (§4.6): every subsequent output sample
    /// is silence and the sample clock stops advancing until
    /// [`Engine::end_preset_load`]. Safe to call while streams are
    /// running; the halt flag is consulted at the very top of each block.
    pub fn begin_preset_load(&self) {
        self.state.lock().pipeline.halt_flag().store(true, Ordering::Release);
    }

    /// Ends a preset-load pause: clears every capture ring (so resumed
    /// processing never plays back stale pre-pause audio), resets the
    /// sample clock and master meters, and lifts the halt flag — in that
    /// order, so the first unpaused block starts from a clean slate
    /// (spec.md §8's P9).
    pub fn end_preset_load(&self) {
        let mut guard = self.state.lock();
        guard.capture.clear_all();
        guard.pipeline.reset_sample_clock();
        guard.pipeline.reset_meters();
        guard.pipeline.halt_flag().store(false, Ordering::Release);
    }

    /// A read-only snapshot of every engine-wide and per-channel
    /// diagnostic counter, matching the shape named in spec.md §6.
    pub fn diagnostics(&self) -> Diagnostics {
        self.drain_disposal();
        let guard = self.state.lock();
        let channels = guard.capture.diagnostics();
        let profiler = guard.pipeline.profiler();
        let profile_budget_ticks = profiler.budget_ticks();
        let profile_overruns = profiler.overruns();
        let profile_max_ticks = profiler.max_ticks();
        drop(guard);
        Diagnostics {
            output_active: self.counters.output_active.load(Ordering::Relaxed),
            monitor_active: self.counters.monitor_active.load(Ordering::Relaxed),
            is_recovering: self.counters.is_recovering(),
            last_output_callback_monotonic: self.counters.last_output_callback_monotonic.load(Ordering::Relaxed),
            output_callback_count: self.counters.output_callback_count.load(Ordering::Relaxed),
            last_output_frames: self.counters.last_output_frames.load(Ordering::Relaxed) as usize,
            monitor_buffered: self.counters.monitor_buffered.load(Ordering::Relaxed) as usize,
            monitor_capacity: self.counters.monitor_capacity.load(Ordering::Relaxed) as usize,
            output_underflow_samples: self.counters.output_underflow_samples.load(Ordering::Relaxed),
            output_contention: self.counters.output_contention.load(Ordering::Relaxed),
            cycle_rejected: self.counters.cycle_rejected.load(Ordering::Relaxed),
            parameter_queue_overflow: self.counters.parameter_queue_overflow.load(Ordering::Relaxed),
            profile_budget_ticks,
            profile_overruns,
            profile_max_ticks,
            channels,
        }
    }

    /// Master output loudness, momentary and short-term LUFS for each
    /// side: `((left_momentary, right_momentary), (left_short_term,
    /// right_short_term))`.
    pub fn master_lufs(&self) -> ((f32, f32), (f32, f32)) {
        self.state.lock().pipeline.master_lufs()
    }

    // ---- parameter changes --------------------------------------------

    /// Enqueues a parameter change for the audio thread to apply at the
    /// top of its next block. Returns `false` (and counts a
    /// `parameter_queue_overflow`) if the queue is full.
    pub fn enqueue_parameter_change(&self, change: ParameterChange) -> bool {
        let sent = self.parameter_tx.try_send(change);
        if !sent {
            self.counters.inc_parameter_queue_overflow();
        }
        sent
    }

    // ---- graph mutation -------------------------------------------------

    /// Adds a new channel, pinning its slot 0 per `kind`. Returns the new
    /// channel's id.
    pub fn add_channel(&self, kind: ChannelKind) -> Result<u64> {
        self.drain_disposal();
        let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let instance_id = self.next_instance_id.fetch_add(1, Ordering::Relaxed);
        let sample_rate = self.config.sample_rate;

        self.rebuild(move |channels| {
            let channel = Channel::new(id, sample_rate);
            match &kind {
                ChannelKind::Input => {
                    channel.chain.publish(vec![Arc::new(PluginSlot::new(
                        instance_id,
                        Box::new(hotmic_builtins::Input::new()),
                        sample_rate,
                    ))]);
                }
                ChannelKind::CopyTarget { source_channel_id } => {
                    if !channels.iter().any(|c| c.id == *source_channel_id) {
                        return Err(EngineError::ChannelNotFound(*source_channel_id));
                    }
                    channel.chain.publish(vec![Arc::new(PluginSlot::new(
                        instance_id,
                        Box::new(BusInput::new(*source_channel_id)),
                        sample_rate,
                    ))]);
                }
            }
            channels.push(channel);
            Ok(())
        })?;

        tracing::info!(channel_id = id, "channel added");
        Ok(id)
    }

    /// Removes a channel and tears down its capture binding, if any.
    pub fn remove_channel(&self, channel_id: u64) -> Result<()> {
        self.drain_disposal();
        self.rebuild(move |channels| {
            let before = channels.len();
            channels.retain(|c| c.id != channel_id);
            if channels.len() == before {
                return Err(EngineError::ChannelNotFound(channel_id));
            }
            Ok(())
        })?;

        let mut guard = self.state.lock();
        guard.capture.unbind(channel_id);
        drop(guard);
        self.streams.lock().inputs.remove(&channel_id);
        tracing::info!(channel_id, "channel removed");
        Ok(())
    }

    /// Binds `channel_id` (which must already be `Input`-rooted) to a live
    /// capture device and opens its input stream immediately, independent
    /// of whether the output stream is currently running. Refuses with
    /// [`EngineError::DuplicateBinding`] if `device_id` is already bound to
    /// a different channel.
    pub fn set_input_device(
        &self,
        channel_id: u64,
        device_id: String,
        mode: ChannelMode,
        native_channels: u16,
        sample_rate: u32,
    ) -> Result<()> {
        {
            let snapshot = self.routing.load();
            if snapshot.channel(channel_id).is_none() {
                return Err(EngineError::ChannelNotFound(channel_id));
            }
        }

        let mut writer = {
            let mut guard = self.state.lock();
            guard.capture.bind(channel_id, device_id.clone(), mode, native_channels, sample_rate, self.config.input_ring_capacity)?
        };

        let stream_config =
            BackendStreamConfig { sample_rate, buffer_size: self.config.block_size as u32, channels: native_channels, device_name: Some(device_id.clone()) };
        let input_callback = Box::new(move |data: &[f32]| writer.on_data(data));
        let error_callback: ErrorCallback = Box::new(move |message: &str| {
            if is_device_invalidated(message) {
                tracing::warn!(device_id = %device_id, "input device invalidated");
            } else {
                tracing::warn!(message, "input stream error");
            }
        });
        let handle = self.backend.build_input_stream(&stream_config, input_callback, error_callback)?;
        self.streams.lock().inputs.insert(channel_id, handle);
        Ok(())
    }

    /// Inserts `plugin` at `slot_index` in `channel_id`'s chain (clamped
    /// to the chain's current length, i.e. `slot_index == len` appends).
    /// If `plugin.initialize` rejects the session's sample rate/block
    /// size, the slot is still inserted but starts bypassed (spec.md §7's
    /// `ConfigurationRejected`). Returns the new plugin's instance id.
    pub fn insert_plugin(&self, channel_id: u64, slot_index: usize, mut plugin: Box<dyn Plugin>) -> Result<u64> {
        self.drain_disposal();
        let instance_id = self.next_instance_id.fetch_add(1, Ordering::Relaxed);
        let init = plugin.initialize(self.config.sample_rate, self.config.block_size);
        let start_bypassed = if let Err(reason) = &init {
            tracing::warn!(channel_id, plugin = plugin.identify(), reason, "plugin rejected configuration; inserting bypassed");
            true
        } else {
            false
        };
        let slot = Arc::new(PluginSlot::new(instance_id, plugin, self.config.sample_rate));
        if start_bypassed {
            slot.bypassed.store(true, Ordering::Relaxed);
        }

        self.rebuild(move |channels| {
            let channel = channels.iter_mut().find(|c| c.id == channel_id).ok_or(EngineError::ChannelNotFound(channel_id))?;
            let mut slots: Vec<Arc<PluginSlot>> = channel.chain.load().iter().cloned().collect();
            let index = slot_index.min(slots.len());
            slots.insert(index, Arc::clone(&slot));
            channel.chain.publish(slots);
            Ok(())
        })?;
        Ok(instance_id)
    }

    /// Removes the plugin with `instance_id` from `channel_id`'s chain.
    pub fn remove_plugin(&self, channel_id: u64, instance_id: u64) -> Result<()> {
        self.drain_disposal();
        self.rebuild(move |channels| {
            let channel = channels.iter_mut().find(|c| c.id == channel_id).ok_or(EngineError::ChannelNotFound(channel_id))?;
            let mut slots: Vec<Arc<PluginSlot>> = channel.chain.load().iter().cloned().collect();
            let before = slots.len();
            slots.retain(|s| s.instance_id != instance_id);
            if slots.len() == before {
                return Err(EngineError::PluginNotFound { channel_id, instance_id });
            }
            channel.chain.publish(slots);
            Ok(())
        })
    }

    /// Moves the plugin at `from` to `to` within `channel_id`'s chain
    /// (both are slot indices, not instance ids). Plugin identity and
    /// internal state are untouched — only the `Arc<PluginSlot>`
    /// reference moves.
    pub fn reorder_plugin(&self, channel_id: u64, from: usize, to: usize) -> Result<()> {
        self.rebuild(move |channels| {
            let channel = channels.iter_mut().find(|c| c.id == channel_id).ok_or(EngineError::ChannelNotFound(channel_id))?;
            let mut slots: Vec<Arc<PluginSlot>> = channel.chain.load().iter().cloned().collect();
            if from >= slots.len() || to >= slots.len() {
                return Err(EngineError::PluginNotFound { channel_id, instance_id: 0 });
            }
            let slot = slots.remove(from);
            slots.insert(to, slot);
            channel.chain.publish(slots);
            Ok(())
        })
    }

    /// Replaces the plugin with `instance_id` with a freshly constructed
    /// `new_plugin`, which is assigned a brand-new instance id (any
    /// in-flight [`ParameterChange`] addressed to the old id is silently
    /// discarded, per spec.md §8's P2). Returns the new instance id.
    pub fn replace_plugin(&self, channel_id: u64, instance_id: u64, mut new_plugin: Box<dyn Plugin>) -> Result<u64> {
        self.drain_disposal();
        let new_instance_id = self.next_instance_id.fetch_add(1, Ordering::Relaxed);
        let init = new_plugin.initialize(self.config.sample_rate, self.config.block_size);
        let start_bypassed = if let Err(reason) = &init {
            tracing::warn!(channel_id, plugin = new_plugin.identify(), reason, "plugin rejected configuration; inserting bypassed");
            true
        } else {
            false
        };
        let replacement = Arc::new(PluginSlot::new(new_instance_id, new_plugin, self.config.sample_rate));
        if start_bypassed {
            replacement.bypassed.store(true, Ordering::Relaxed);
        }

        self.rebuild(move |channels| {
            let channel = channels.iter_mut().find(|c| c.id == channel_id).ok_or(EngineError::ChannelNotFound(channel_id))?;
            let mut slots: Vec<Arc<PluginSlot>> = channel.chain.load().iter().cloned().collect();
            let Some(position) = slots.iter().position(|s| s.instance_id == instance_id) else {
                return Err(EngineError::PluginNotFound { channel_id, instance_id });
            };
            slots[position] = Arc::clone(&replacement);
            channel.chain.publish(slots);
            Ok(())
        })?;
        Ok(new_instance_id)
    }
}

/// Walks every channel's chain looking for a [`hotmic_core::plugin::RoutingDependencyProvider`]
/// capability (`BusInput`, `Merge`), building the `ChannelEdge` list the
/// routing scheduler needs. Dangling sources (a declared dependency on a
/// channel id no longer present) are silently dropped rather than treated
/// as a cycle or an error — removing a source channel out from under a
/// dependent is a caller error the engine doesn't try to prevent.
fn gather_edges(channels: &[Channel]) -> Vec<ChannelEdge> {
    let ids: std::collections::HashSet<u64> = channels.iter().map(|c| c.id).collect();
    channels
        .iter()
        .filter_map(|channel| {
            let slots = channel.chain.load();
            let mut sources: Vec<u64> = Vec::new();
            for slot in slots.iter() {
                if let Some(dep) = slot.plugin.borrow().as_routing_dependency() {
                    for &source in dep.source_channels() {
                        if ids.contains(&source) && !sources.contains(&source) {
                            sources.push(source);
                        }
                    }
                }
            }
            if sources.is_empty() { None } else { Some(ChannelEdge { target: channel.id, sources }) }
        })
        .collect()
}

/// Counts non-bypassed `OutputSend` plugins across every channel, for the
/// mutation-time exclusivity check (spec.md §3, ratified in `SPEC_FULL.md`
/// §9's open question 1).
fn count_active_output_sends(channels: &[Channel]) -> usize {
    channels
        .iter()
        .map(|channel| {
            channel
                .chain
                .load()
                .iter()
                .filter(|slot| !slot.bypassed.load(Ordering::Relaxed) && slot.plugin.borrow().as_output_send().is_some())
                .count()
        })
        .sum()
}

/// Applies one drained [`ParameterChange`] to the channel/plugin it
/// addresses in `snapshot`, discarding it silently if the target no
/// longer exists (spec.md §8's P2).
fn apply_parameter_change(snapshot: &RoutingSnapshot, change: ParameterChange) {
    let Some(channel) = snapshot.channel(change.channel_id) else { return };
    match change.kind {
        ParameterChangeKind::InputGainDb => {
            channel.input_gain.borrow_mut().set_target(db_to_linear(change.value));
        }
        ParameterChangeKind::OutputGainDb => {
            channel.output_gain.borrow_mut().set_target(db_to_linear(change.value));
        }
        ParameterChangeKind::Mute => {
            let muted = change.value != 0.0;
            channel.muted.store(muted, Ordering::Relaxed);
            channel.mute_gain.borrow_mut().set_target(if muted { 0.0 } else { 1.0 });
        }
        ParameterChangeKind::Solo => {
            channel.soloed.store(change.value != 0.0, Ordering::Relaxed);
        }
        ParameterChangeKind::PluginBypass => {
            if let Some(slot) = find_slot(channel, change.plugin_instance_id) {
                let bypass = change.value != 0.0;
                slot.bypassed.store(bypass, Ordering::Relaxed);
                slot.bypass_fade.borrow_mut().set_target(if bypass { 0.0 } else { 1.0 });
            }
        }
        ParameterChangeKind::PluginParameter => {
            if let Some(slot) = find_slot(channel, change.plugin_instance_id) {
                slot.plugin.borrow_mut().set_parameter(change.param_index, change.value);
            }
        }
        ParameterChangeKind::PluginCommand => {
            if let Some(slot) = find_slot(channel, change.plugin_instance_id) {
                let mut plugin = slot.plugin.borrow_mut();
                if let Some(handler) = plugin.as_command_handler() {
                    handler.handle_command(change.command);
                }
            }
        }
    }
}

fn find_slot(channel: &Channel, instance_id: u64) -> Option<Arc<PluginSlot>> {
    channel.chain.load().iter().find(|s| s.instance_id == instance_id).cloned()
}

/// Rebuilds and opens the output stream against `device_id` (or the
/// system default if `None`), reusing the same callback wiring
/// [`Engine::start`] installs. Used by device recovery once a lost output
/// device reappears or a fallback default is chosen.
fn rebuild_output_stream(
    backend: &Arc<dyn AudioBackend>,
    config: &EngineConfig,
    device_id: Option<String>,
    routing: Arc<ArcSwap<RoutingSnapshot>>,
    state: Arc<Mutex<CallbackState>>,
    counters: Arc<EngineCounters>,
    start_instant: Instant,
) -> Result<StreamHandle> {
    let stream_config =
        BackendStreamConfig { sample_rate: config.sample_rate as u32, buffer_size: config.block_size as u32, channels: 2, device_name: device_id };

    let output_callback = Box::new(move |interleaved: &mut [f32]| {
        let snapshot = routing.load();
        let mut guard = state.lock();
        let CallbackState { pipeline, capture, parameter_rx } = &mut *guard;
        parameter_rx.drain(|change| apply_parameter_change(&snapshot, change));
        counters.mark_output_callback(start_instant.elapsed().as_micros() as u64, interleaved.len() / 2);
        pipeline.process(&snapshot, capture, &counters, interleaved);
    });

    let error_callback: ErrorCallback = Box::new(move |message: &str| {
        if is_device_invalidated(message) {
            tracing::warn!("output device invalidated again during recovery");
        } else {
            tracing::warn!(message, "output stream error during recovery");
        }
    });

    Ok(backend.build_output_stream(&stream_config, output_callback, error_callback)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotmic_builtins::{CopyPlugin, Input, OutputSend};
    use hotmic_core::routing::OutputBusMode;
    use hotmic_io::{AudioDevice, ErrorCallback, InputCallback, OutputCallback};
    use std::sync::Mutex as StdMutex;

    struct NullBackend {
        devices: Vec<AudioDevice>,
    }

    impl AudioBackend for NullBackend {
        fn name(&self) -> &str {
            "null"
        }
        fn list_devices(&self) -> hotmic_io::Result<Vec<AudioDevice>> {
            Ok(self.devices.clone())
        }
        fn default_output_device(&self) -> hotmic_io::Result<Option<AudioDevice>> {
            Ok(self.devices.iter().find(|d| d.is_output).cloned())
        }
        fn default_input_device(&self) -> hotmic_io::Result<Option<AudioDevice>> {
            Ok(self.devices.iter().find(|d| d.is_input).cloned())
        }
        fn build_output_stream(
            &self,
            _config: &BackendStreamConfig,
            _callback: OutputCallback,
            _error_callback: ErrorCallback,
        ) -> hotmic_io::Result<StreamHandle> {
            Ok(StreamHandle::new(()))
        }
        fn build_input_stream(
            &self,
            _config: &BackendStreamConfig,
            _callback: InputCallback,
            _error_callback: ErrorCallback,
        ) -> hotmic_io::Result<StreamHandle> {
            Ok(StreamHandle::new(()))
        }
    }

    fn test_engine() -> Engine {
        let config = EngineConfig { sample_rate: 48000.0, block_size: 64, ..EngineConfig::default() };
        Engine::new(config, Arc::new(NullBackend { devices: Vec::new() }))
    }

    #[test]
    fn test_add_channel_pins_input_slot() {
        let engine = test_engine();
        let id = engine.add_channel(ChannelKind::Input).unwrap();
        let snapshot = engine.routing.load();
        let channel = snapshot.channel(id).unwrap();
        assert_eq!(channel.chain.load().len(), 1);
    }

    #[test]
    fn test_copy_target_requires_existing_source() {
        let engine = test_engine();
        let result = engine.add_channel(ChannelKind::CopyTarget { source_channel_id: 999 });
        assert!(matches!(result, Err(EngineError::ChannelNotFound(999))));
    }

    #[test]
    fn test_copy_target_pins_bus_input() {
        let engine = test_engine();
        let source = engine.add_channel(ChannelKind::Input).unwrap();
        let target = engine.add_channel(ChannelKind::CopyTarget { source_channel_id: source }).unwrap();
        let snapshot = engine.routing.load();
        let channel = snapshot.channel(target).unwrap();
        let slots = channel.chain.load();
        assert!(slots[0].plugin.borrow().as_routing_dependency().is_some());
    }

    #[test]
    fn test_remove_channel_then_mutation_sees_it_gone() {
        let engine = test_engine();
        let id = engine.add_channel(ChannelKind::Input).unwrap();
        engine.remove_channel(id).unwrap();
        assert!(engine.routing.load().channel(id).is_none());
    }

    #[test]
    fn test_held_snapshot_reference_is_unaffected_by_later_mutation() {
        // spec.md §8's P1: a block that has already loaded a snapshot never
        // observes a later mutation's slots, because `ArcSwap::load` hands
        // out an `Arc` to the old snapshot that `rebuild`'s `store` doesn't
        // touch.
        let engine = test_engine();
        let first = engine.add_channel(ChannelKind::Input).unwrap();
        let in_flight = engine.routing.load_full();
        assert_eq!(in_flight.channels.len(), 1);

        let _second = engine.add_channel(ChannelKind::Input).unwrap();
        assert_eq!(in_flight.channels.len(), 1, "a snapshot already in hand must not grow new channels");
        assert_eq!(engine.routing.load().channels.len(), 2, "a freshly loaded snapshot sees the mutation");
        assert!(in_flight.channel(first).is_some());
    }

    #[test]
    fn test_remove_unknown_channel_is_refused() {
        let engine = test_engine();
        assert!(matches!(engine.remove_channel(42), Err(EngineError::ChannelNotFound(42))));
    }

    #[test]
    fn test_insert_plugin_then_remove_round_trips() {
        let engine = test_engine();
        let channel_id = engine.add_channel(ChannelKind::Input).unwrap();
        let instance_id = engine.insert_plugin(channel_id, 1, Box::new(OutputSend::new(OutputBusMode::Both))).unwrap();
        assert_eq!(engine.routing.load().channel(channel_id).unwrap().chain.load().len(), 2);
        engine.remove_plugin(channel_id, instance_id).unwrap();
        assert_eq!(engine.routing.load().channel(channel_id).unwrap().chain.load().len(), 1);
    }

    #[test]
    fn test_second_output_send_is_refused() {
        let engine = test_engine();
        let a = engine.add_channel(ChannelKind::Input).unwrap();
        let b = engine.add_channel(ChannelKind::Input).unwrap();
        engine.insert_plugin(a, 1, Box::new(OutputSend::new(OutputBusMode::Both))).unwrap();
        let result = engine.insert_plugin(b, 1, Box::new(OutputSend::new(OutputBusMode::Both)));
        assert!(matches!(result, Err(EngineError::DuplicateOutputSend)));
        // the first channel's OutputSend is untouched by the refused mutation.
        assert_eq!(engine.routing.load().channel(a).unwrap().chain.load().len(), 2);
    }

    #[test]
    fn test_reorder_preserves_instance_ids() {
        let engine = test_engine();
        let channel_id = engine.add_channel(ChannelKind::Input).unwrap();
        let copy_id = engine.insert_plugin(channel_id, 1, Box::new(CopyPlugin::new())).unwrap();
        engine.reorder_plugin(channel_id, 0, 1).unwrap();
        let snapshot = engine.routing.load();
        let slots = snapshot.channel(channel_id).unwrap().chain.load();
        assert_eq!(slots[1].instance_id, copy_id);
    }

    #[test]
    fn test_replace_plugin_assigns_fresh_instance_id() {
        let engine = test_engine();
        let channel_id = engine.add_channel(ChannelKind::Input).unwrap();
        let original = engine.insert_plugin(channel_id, 1, Box::new(CopyPlugin::new())).unwrap();
        let replaced = engine.replace_plugin(channel_id, original, Box::new(CopyPlugin::new())).unwrap();
        assert_ne!(original, replaced);
        let snapshot = engine.routing.load();
        let slots = snapshot.channel(channel_id).unwrap().chain.load();
        assert!(slots.iter().any(|s| s.instance_id == replaced));
        assert!(!slots.iter().any(|s| s.instance_id == original));
    }

    #[test]
    fn test_cycle_is_refused_and_counted() {
        let engine = test_engine();
        let a = engine.add_channel(ChannelKind::Input).unwrap();
        let b = engine.add_channel(ChannelKind::CopyTarget { source_channel_id: a }).unwrap();
        // b already depends on a; making a depend on b would close a cycle.
        let before = engine.diagnostics().cycle_rejected;
        let result = engine.insert_plugin(
            a,
            1,
            Box::new(hotmic_builtins::Merge::new(&[b], hotmic_core::routing::MergeSumStrategy::Sum, hotmic_core::routing::MergePolarity::None, 64)),
        );
        assert!(matches!(result, Err(EngineError::CycleDetected)));
        assert_eq!(engine.diagnostics().cycle_rejected, before + 1);
        // previous snapshot (just a and b, no merge) remains active.
        assert_eq!(engine.routing.load().channel(a).unwrap().chain.load().len(), 1);
    }

    #[test]
    fn test_begin_end_preset_load_resets_sample_clock() {
        let engine = test_engine();
        engine.begin_preset_load();
        assert!(engine.state.lock().pipeline.halt_flag().load(Ordering::Acquire));
        engine.end_preset_load();
        assert!(!engine.state.lock().pipeline.halt_flag().load(Ordering::Acquire));
        assert_eq!(engine.state.lock().pipeline.sample_clock(), 0);
    }

    #[test]
    fn test_enqueue_parameter_change_counts_overflow_when_full() {
        let config = EngineConfig { parameter_queue_capacity: 1, ..EngineConfig::default() };
        let engine = Engine::new(config, Arc::new(NullBackend { devices: Vec::new() }));
        let change = ParameterChange {
            channel_id: 1,
            kind: ParameterChangeKind::InputGainDb,
            plugin_instance_id: 0,
            param_index: 0,
            value: -3.0,
            command: 0,
        };
        assert!(engine.enqueue_parameter_change(change));
        assert!(!engine.enqueue_parameter_change(change));
        assert_eq!(engine.diagnostics().parameter_queue_overflow, 1);
    }

    #[test]
    fn test_diagnostics_starts_idle() {
        let engine = test_engine();
        let diagnostics = engine.diagnostics();
        assert!(!diagnostics.output_active);
        assert_eq!(diagnostics.output_callback_count, 0);
    }

    static _KEEP_ALIVE: StdMutex<()> = StdMutex::new(());
}

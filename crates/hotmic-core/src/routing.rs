//! Channels, copy/output buses, the routing scheduler, and the routing
//! snapshot the audio thread executes once per block.
//!
//! The topological sort is Kahn's algorithm, generalized from the
//! teacher's node-level graph scheduler to operate over channel ids and
//! the dependency edges `Copy`/`Merge` plugins declare via
//! [`crate::plugin::RoutingDependencyProvider`], rather than over
//! arbitrary audio-processing DAG nodes — HotMic's per-channel chains are
//! linear, so only the *cross-channel* routing needs a DAG at all.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use atomic_refcell::AtomicRefCell;

use crate::analysis::SignalKind;
use crate::chain::PluginChain;
use crate::meter::Meter;
use crate::param::LinearSmoothedParam;

/// Which side(s) of the stereo output an `OutputSend` plugin targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputBusMode {
    /// Left channel only.
    Left,
    /// Right channel only.
    Right,
    /// Both channels.
    Both,
}

/// A declared cross-channel dependency: `target` reads from `sources`
/// (a `Copy` target reads its one source; a `Merge` reads N).
#[derive(Debug, Clone)]
pub struct ChannelEdge {
    /// The channel that depends on `sources`.
    pub target: u64,
    /// The channels `target` must be processed after.
    pub sources: Vec<u64>,
}

/// Computes a processing order over `channel_ids` respecting `edges`.
///
/// On success, returns a topological order. On a cycle, returns the
/// channel ids in their natural (input) order instead — the caller is
/// expected to treat this as a fallback and surface a `CycleDetected`
/// error/counter rather than silently trusting the order.
pub fn topological_order(channel_ids: &[u64], edges: &[ChannelEdge]) -> Result<Vec<u64>, Vec<u64>> {
    let mut indegree: HashMap<u64, usize> = channel_ids.iter().map(|&id| (id, 0)).collect();
    let mut dependents: HashMap<u64, Vec<u64>> = HashMap::new();

    for edge in edges {
        for &source in &edge.sources {
            *indegree.entry(edge.target).or_insert(0) += 1;
            dependents.entry(source).or_default().push(edge.target);
        }
    }

    let mut queue: std::collections::VecDeque<u64> = channel_ids
        .iter()
        .copied()
        .filter(|id| indegree.get(id).copied().unwrap_or(0) == 0)
        .collect();

    let mut order = Vec::with_capacity(channel_ids.len());
    while let Some(id) = queue.pop_front() {
        order.push(id);
        if let Some(deps) = dependents.get(&id) {
            for &dep in deps {
                if let Some(d) = indegree.get_mut(&dep) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(dep);
                    }
                }
            }
        }
    }

    if order.len() == channel_ids.len() {
        Ok(order)
    } else {
        Err(channel_ids.to_vec())
    }
}

/// Sum strategy for a `Merge` plugin accumulating N source channels into
/// its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeSumStrategy {
    /// Plain sum of sources plus the target's own signal.
    Sum,
    /// Sum divided by `source_count + 1` (sources plus target).
    Average,
    /// Sum scaled by `1/sqrt(source_count)` to preserve perceived loudness.
    EqualPower,
}

/// Polarity inversion applied during a `Merge`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolarity {
    /// No inversion.
    None,
    /// Invert every source before summing.
    InvertSources,
    /// Invert the target's own signal before summing.
    InvertTarget,
}

/// Per-source-channel audio and analysis-signal capture, written by a
/// `Copy` plugin and read by the downstream channel's `BusInput`.
#[derive(Debug, Clone)]
pub struct CopyBus {
    /// Captured mono audio for this block.
    pub audio: Vec<f32>,
    /// Captured analysis signal values available at capture time, keyed
    /// by kind.
    pub signals: Vec<(SignalKind, f32)>,
    /// Cumulative latency, in samples, of the source channel up to and
    /// including the `Copy` slot.
    pub latency_samples: u32,
    /// Sample clock at the time of capture.
    pub sample_clock: u64,
    /// Whether a `Copy` plugin has written this bus during the current
    /// block. Distinguishes "not captured yet this block" from a
    /// legitimately-zero `sample_clock`, which an unpublished bus at
    /// engine start would otherwise be indistinguishable from.
    pub published: bool,
}

impl CopyBus {
    /// Creates an empty copy bus sized for `block_size` samples. The
    /// signal vector is pre-reserved to the full [`SignalKind::ALL`]
    /// count so a `Copy` plugin publishing every block never triggers a
    /// reallocation on the audio thread.
    pub fn new(block_size: usize) -> Self {
        Self {
            audio: vec![0.0; block_size],
            signals: Vec::with_capacity(SignalKind::ALL.len()),
            latency_samples: 0,
            sample_clock: 0,
            published: false,
        }
    }

    /// Looks up the most recently captured value for `kind`, if present.
    pub fn signal(&self, kind: SignalKind) -> Option<f32> {
        self.signals.iter().find(|(k, _)| *k == kind).map(|(_, v)| *v)
    }

    /// Records a fresh capture: audio, signals, and bookkeeping for this
    /// block. Called by the routing accessor when a `Copy` plugin runs.
    pub fn record(&mut self, audio: &[f32], signals: &[(SignalKind, f32)], latency_samples: u32, sample_clock: u64) {
        let n = self.audio.len().min(audio.len());
        self.audio[..n].copy_from_slice(&audio[..n]);
        self.signals.clear();
        self.signals.extend_from_slice(signals);
        self.latency_samples = latency_samples;
        self.sample_clock = sample_clock;
        self.published = true;
    }

    /// Clears captured audio and signals for the next block.
    pub fn clear(&mut self) {
        self.audio.iter_mut().for_each(|s| *s = 0.0);
        self.signals.clear();
        self.published = false;
    }
}

/// The process-wide output bus. Exactly one [`crate::plugin::OutputSendPlugin`]
/// may write successfully per block; every subsequent write attempt in the
/// same block is a no-op that increments `contention`.
#[derive(Debug, Clone)]
pub struct OutputBus {
    /// Interleaved-free left channel samples for this block.
    pub left: Vec<f32>,
    /// Right channel samples for this block.
    pub right: Vec<f32>,
    /// Number of valid samples currently held.
    pub length: usize,
    /// Whether a writer has already claimed this block.
    claimed: bool,
    /// Count of write attempts after the first successful one this block —
    /// a transient detector for double-writers during snapshot
    /// transitions, backstopped by the mutation-time uniqueness check.
    pub contention: u64,
}

impl OutputBus {
    /// Creates an empty output bus sized for `block_size` samples.
    pub fn new(block_size: usize) -> Self {
        Self { left: vec![0.0; block_size], right: vec![0.0; block_size], length: 0, claimed: false, contention: 0 }
    }

    /// Resets the bus at the start of a new block.
    pub fn begin_block(&mut self) {
        self.left.iter_mut().for_each(|s| *s = 0.0);
        self.right.iter_mut().for_each(|s| *s = 0.0);
        self.length = 0;
        self.claimed = false;
    }

    /// Attempts to write `mono` to the bus per `mode`. Returns `true` if
    /// this call claimed the bus, `false` (with `contention` incremented)
    /// if another writer already claimed it this block.
    pub fn try_write(&mut self, mono: &[f32], mode: OutputBusMode) -> bool {
        if self.claimed {
            self.contention += 1;
            return false;
        }
        self.claimed = true;
        self.length = mono.len();
        match mode {
            OutputBusMode::Left => self.left[..mono.len()].copy_from_slice(mono),
            OutputBusMode::Right => self.right[..mono.len()].copy_from_slice(mono),
            OutputBusMode::Both => {
                self.left[..mono.len()].copy_from_slice(mono);
                self.right[..mono.len()].copy_from_slice(mono);
            }
        }
        true
    }

    /// Whether a writer has claimed this block.
    pub fn has_data(&self) -> bool {
        self.claimed
    }
}

/// A single mono processing lane: an ordered plugin chain plus the
/// channel-level state that surrounds it (input/output gain, mute, solo,
/// and their meters).
///
/// The runtime fields (meters, gain/mute smoothers, mute/solo flags) use
/// [`AtomicRefCell`]/[`AtomicBool`] for the same reason [`CopyBus`] and
/// [`OutputBus`] do: once a [`RoutingSnapshot`] is published, the audio
/// thread only ever reaches a `Channel` through a shared reference behind
/// an `Arc` that a UI/mutation thread may hold at the same time, but the
/// audio thread is still the sole mutator of this per-block state.
pub struct Channel {
    /// Stable identifier, unique among live channels.
    pub id: u64,
    /// The channel's ordered plugin chain. Slot 0 is always the
    /// input-stage plugin (`Input` or `BusInput`).
    pub chain: PluginChain,
    /// Meter on the channel's raw input, before the chain runs.
    pub input_meter: AtomicRefCell<Meter>,
    /// Meter on the channel's final output, after the chain runs.
    pub output_meter: AtomicRefCell<Meter>,
    /// Input gain, in linear amplitude, 5ms-ramped.
    pub input_gain: AtomicRefCell<LinearSmoothedParam>,
    /// Output gain, in linear amplitude, 5ms-ramped.
    pub output_gain: AtomicRefCell<LinearSmoothedParam>,
    /// Mute gain: ramps to 0.0 when muted, 1.0 when not.
    pub mute_gain: AtomicRefCell<LinearSmoothedParam>,
    /// Whether this channel is explicitly muted.
    pub muted: AtomicBool,
    /// Whether this channel is soloed. If any channel in the snapshot is
    /// soloed, every non-soloed channel behaves as if muted.
    pub soloed: AtomicBool,
}

impl Channel {
    /// Creates a new channel with unity gain and no mute/solo.
    pub fn new(id: u64, sample_rate: f32) -> Self {
        let unity = || {
            let mut p = LinearSmoothedParam::with_config(1.0, sample_rate, 5.0);
            p.snap_to_target();
            p
        };
        Self {
            id,
            chain: PluginChain::new(),
            input_meter: AtomicRefCell::new(Meter::new(sample_rate)),
            output_meter: AtomicRefCell::new(Meter::new(sample_rate)),
            input_gain: AtomicRefCell::new(unity()),
            output_gain: AtomicRefCell::new(unity()),
            mute_gain: AtomicRefCell::new(unity()),
            muted: AtomicBool::new(false),
            soloed: AtomicBool::new(false),
        }
    }

    /// Whether this channel should be silent this block, given whether
    /// any channel in the snapshot is currently soloed.
    pub fn is_effectively_muted(&self, any_soloed: bool) -> bool {
        self.muted.load(Ordering::Relaxed) || (any_soloed && !self.soloed.load(Ordering::Relaxed))
    }

    /// Builds a new `Channel` carrying forward this one's live state:
    /// the same published plugin chain (see [`PluginChain::share`]), and
    /// a copy of the current meter/gain/mute/solo values. Needs only a
    /// shared reference to `self` — a graph mutation that rebuilds the
    /// routing snapshot around an otherwise-untouched channel never has
    /// to fight the audio thread for exclusive ownership of the old one.
    pub fn share(&self) -> Self {
        Self {
            id: self.id,
            chain: self.chain.share(),
            input_meter: AtomicRefCell::new(self.input_meter.borrow().clone()),
            output_meter: AtomicRefCell::new(self.output_meter.borrow().clone()),
            input_gain: AtomicRefCell::new(self.input_gain.borrow().clone()),
            output_gain: AtomicRefCell::new(self.output_gain.borrow().clone()),
            mute_gain: AtomicRefCell::new(self.mute_gain.borrow().clone()),
            muted: AtomicBool::new(self.muted.load(Ordering::Relaxed)),
            soloed: AtomicBool::new(self.soloed.load(Ordering::Relaxed)),
        }
    }
}

/// The immutable, atomically-published record the audio thread executes
/// once per block: every channel, their processing order, and the
/// preallocated scratch space needed to run them without allocating.
pub struct RoutingSnapshot {
    /// Every live channel, in no particular order (see `topological_order`
    /// for execution order).
    pub channels: Vec<Channel>,
    /// Channel ids in the order they must be processed this block.
    pub topological_order: Vec<u64>,
    /// Sample rate this snapshot was built for.
    pub sample_rate: f32,
    /// Block size this snapshot was built for.
    pub block_size: usize,
    /// Maps a channel id to the input-source handle (capture device
    /// binding) it reads from, for `Input`-rooted channels.
    pub input_source_map: HashMap<u64, u64>,
    /// Per-channel scratch buffers, preallocated to `block_size` and
    /// indexed by position in `channels`. Reused every block — never
    /// resized on the audio thread. An [`AtomicRefCell`] for the same
    /// reason `copy_buses` is: a published snapshot is reached through a
    /// shared reference that may be held by more than one thread at once.
    pub scratch: Vec<AtomicRefCell<Vec<f32>>>,
    /// Per-channel copy bus, keyed by the channel id that owns the `Copy`
    /// slot writing into it. An [`AtomicRefCell`] because a
    /// [`crate::plugin::RoutingAccessor`] only ever holds a shared
    /// reference to the snapshot; the audio thread is the only one that
    /// ever actually borrows mutably, so the runtime borrow check never
    /// contends.
    pub copy_buses: HashMap<u64, AtomicRefCell<CopyBus>>,
    /// Each channel's fully-processed output for the current block,
    /// keyed by channel id and preallocated to `block_size`. Populated by
    /// the output pipeline immediately after a channel finishes
    /// processing, read by downstream `Merge` plugins via
    /// [`crate::plugin::RoutingAccessor::read_channel_output_into`].
    pub published_outputs: HashMap<u64, AtomicRefCell<Vec<f32>>>,
    /// The process-wide stereo output bus for the current block.
    pub output_bus: AtomicRefCell<OutputBus>,
    /// For each channel id, the prefix of `topological_order` up to and
    /// including that channel — the candidate list an
    /// [`crate::plugin::RoutingAccessor`] scans in reverse to resolve the
    /// nearest upstream analysis-signal producer. Precomputed once here so
    /// the audio callback never allocates a `Vec` to rebuild it per block.
    pub upstream_candidates: HashMap<u64, Vec<u64>>,
}

impl RoutingSnapshot {
    /// Builds a snapshot for `channels`, computing topological order from
    /// `edges` and preallocating scratch/copy buses. On a cycle, the
    /// fallback natural order is used and `cycle_detected` is set `true`
    /// in the returned tuple's second element.
    pub fn build(channels: Vec<Channel>, edges: &[ChannelEdge], sample_rate: f32, block_size: usize) -> (Self, bool) {
        let ids: Vec<u64> = channels.iter().map(|c| c.id).collect();
        let (order, cycle_detected) = match topological_order(&ids, edges) {
            Ok(order) => (order, false),
            Err(natural) => (natural, true),
        };

        let scratch = channels.iter().map(|_| AtomicRefCell::new(vec![0.0; block_size])).collect();
        let copy_buses = channels.iter().map(|c| (c.id, AtomicRefCell::new(CopyBus::new(block_size)))).collect();
        let published_outputs =
            channels.iter().map(|c| (c.id, AtomicRefCell::new(vec![0.0; block_size]))).collect();
        let upstream_candidates = order
            .iter()
            .enumerate()
            .map(|(index, &channel_id)| (channel_id, order[..=index].to_vec()))
            .collect();

        (
            Self {
                channels,
                topological_order: order,
                sample_rate,
                block_size,
                input_source_map: HashMap::new(),
                scratch,
                copy_buses,
                published_outputs,
                output_bus: AtomicRefCell::new(OutputBus::new(block_size)),
                upstream_candidates,
            },
            cycle_detected,
        )
    }

    /// The prefix of the topological order up to and including
    /// `channel_id`, precomputed at snapshot build time. Falls back to a
    /// single-element slice (just `channel_id` itself) if the id is
    /// somehow absent from the order, which cannot happen for a channel
    /// drawn from this same snapshot.
    pub fn upstream_candidates(&self, channel_id: u64) -> &[u64] {
        self.upstream_candidates.get(&channel_id).map_or(&[], Vec::as_slice)
    }

    /// Resets every per-block cross-channel surface (copy buses,
    /// published outputs, the output bus) at the start of a new block.
    /// Channel-local state (meters, smoothers, plugin state) is untouched
    /// — only the state other channels observe through
    /// [`crate::plugin::RoutingAccessor`] needs clearing.
    pub fn begin_block(&self) {
        for bus in self.copy_buses.values() {
            bus.borrow_mut().clear();
        }
        for out in self.published_outputs.values() {
            out.borrow_mut().iter_mut().for_each(|s| *s = 0.0);
        }
        self.output_bus.borrow_mut().begin_block();
    }

    /// Whether any channel in this snapshot is currently soloed.
    pub fn any_soloed(&self) -> bool {
        self.channels.iter().any(|c| c.soloed.load(Ordering::Relaxed))
    }

    /// Finds a channel by id.
    pub fn channel(&self, id: u64) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }

    /// Finds a channel by id, mutably.
    pub fn channel_mut(&mut self, id: u64) -> Option<&mut Channel> {
        self.channels.iter_mut().find(|c| c.id == id)
    }

    /// Copies `buffer` into `channel_id`'s published-output slot for this
    /// block. Called by the output pipeline once a channel's chain,
    /// gain, and mute stages have all run.
    pub fn publish_channel_output(&self, channel_id: u64, buffer: &[f32]) {
        if let Some(out) = self.published_outputs.get(&channel_id) {
            let mut out = out.borrow_mut();
            let n = out.len().min(buffer.len());
            out[..n].copy_from_slice(&buffer[..n]);
        }
    }
}

//! Read-only diagnostics the UI polls, backed by atomics the audio thread
//! (and capture threads) update without locking.
//!
//! Grounded on `sonido_plugin::shared::SonidoShared`'s pattern of packing
//! every cross-thread-observable value into an atomic field behind an
//! `Arc`, read with `Relaxed` for counters and `Acquire` for latched status
//! flags.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Per-channel atomic counters, one instance per live capture.
#[derive(Debug, Default)]
pub struct ChannelCounters {
    pub(crate) device_active: AtomicBool,
    pub(crate) callback_count: AtomicU64,
    pub(crate) last_frames: AtomicU64,
    pub(crate) dropped_samples: AtomicU64,
    pub(crate) underflow_samples: AtomicU64,
}

impl ChannelCounters {
    /// Creates a fresh, zeroed counter set.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// A point-in-time, read-only view of one channel's capture diagnostics.
#[derive(Debug, Clone)]
pub struct ChannelDiagnostics {
    /// The channel this snapshot describes.
    pub channel_id: u64,
    /// Bound device id, if this channel has a live capture.
    pub device_id: Option<String>,
    /// Whether the capture is currently active.
    pub is_active: bool,
    /// Number of capture callbacks received.
    pub callback_count: u64,
    /// Frame count delivered by the most recent capture callback.
    pub last_frames: usize,
    /// Samples currently buffered in this channel's input ring.
    pub buffered: usize,
    /// Total capacity of this channel's input ring.
    pub capacity: usize,
    /// Native channel count of the bound device.
    pub native_channels: u16,
    /// Sample rate of the bound device.
    pub sample_rate: u32,
    /// Cumulative samples dropped on ring overflow.
    pub dropped_samples: u64,
    /// Cumulative samples discarded by the back-pressure trim policy.
    pub underflow_samples: u64,
}

/// Engine-wide atomic counters, shared between the audio thread, capture
/// threads, the recovery task, and whichever UI thread calls
/// [`crate::facade::Engine::diagnostics`].
#[derive(Debug, Default)]
pub struct EngineCounters {
    pub(crate) output_active: AtomicBool,
    pub(crate) monitor_active: AtomicBool,
    pub(crate) is_recovering: AtomicBool,
    pub(crate) last_output_callback_monotonic: AtomicU64,
    pub(crate) output_callback_count: AtomicU64,
    pub(crate) last_output_frames: AtomicU64,
    pub(crate) monitor_buffered: AtomicU64,
    pub(crate) monitor_capacity: AtomicU64,
    pub(crate) output_underflow_samples: AtomicU64,
    pub(crate) output_contention: AtomicU64,
    pub(crate) cycle_rejected: AtomicU64,
    pub(crate) parameter_queue_overflow: AtomicU64,
}

impl EngineCounters {
    /// Creates a fresh, zeroed counter set.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn mark_output_callback(&self, monotonic_ticks: u64, frames: usize) {
        self.output_active.store(true, Ordering::Relaxed);
        self.last_output_callback_monotonic.store(monotonic_ticks, Ordering::Relaxed);
        self.output_callback_count.fetch_add(1, Ordering::Relaxed);
        self.last_output_frames.store(frames as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_output_underflow(&self, samples: u64) {
        self.output_underflow_samples.fetch_add(samples, Ordering::Relaxed);
    }

    pub(crate) fn add_output_contention(&self, count: u64) {
        self.output_contention.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn inc_cycle_rejected(&self) {
        self.cycle_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_parameter_queue_overflow(&self) {
        self.parameter_queue_overflow.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_recovering(&self, value: bool) {
        self.is_recovering.store(value, Ordering::Release);
    }

    pub(crate) fn is_recovering(&self) -> bool {
        self.is_recovering.load(Ordering::Acquire)
    }
}

/// Read-only snapshot of the whole engine's diagnostics, matching the shape
/// named in spec.md §6.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    /// Whether the output stream is currently running.
    pub output_active: bool,
    /// Whether the monitor (mirror) output is currently running.
    pub monitor_active: bool,
    /// Whether device recovery is currently in progress.
    pub is_recovering: bool,
    /// Monotonic tick of the most recent output callback.
    pub last_output_callback_monotonic: u64,
    /// Number of output callbacks received since start.
    pub output_callback_count: u64,
    /// Frame count of the most recent output callback.
    pub last_output_frames: usize,
    /// Samples currently buffered in the monitor ring.
    pub monitor_buffered: usize,
    /// Total capacity of the monitor ring.
    pub monitor_capacity: usize,
    /// Cumulative samples silenced due to output-bus underflow.
    pub output_underflow_samples: u64,
    /// Cumulative rejected `OutputSend` write attempts.
    pub output_contention: u64,
    /// Cumulative mutations refused for introducing a routing cycle.
    pub cycle_rejected: u64,
    /// Cumulative parameter changes dropped on a full queue.
    pub parameter_queue_overflow: u64,
    /// Configured per-block tick budget, in nanoseconds (§4.6 profiling).
    pub profile_budget_ticks: u64,
    /// Cumulative blocks whose processing exceeded `profile_budget_ticks`.
    pub profile_overruns: u64,
    /// Largest per-block tick count observed since start, in nanoseconds.
    pub profile_max_ticks: u64,
    /// Per-channel diagnostics, in channel-id order.
    pub channels: Vec<ChannelDiagnostics>,
}

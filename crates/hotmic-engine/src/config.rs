//! Session configuration shapes (spec §0.3 — ambient, not in spec.md body).
//!
//! Plugin graphs and their parameter state are intentionally *not*
//! serializable here (graph/preset persistence is out of scope, spec.md
//! §1); only the shape a host needs to restore device bindings across a
//! restart is given `serde` derives, gated behind the `serde` feature so
//! a host that never persists anything doesn't pull the dependency in.
//! Mirrors `sonido_config::Preset`'s plain-struct-plus-derive style,
//! without that crate's file I/O or validation machinery — this is a
//! data shape, not a preset system.

/// Tuning parameters for [`crate::facade::Engine::new`]. Not persisted —
/// chosen once at process startup by the host.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Output sample rate, in Hz.
    pub sample_rate: f32,
    /// Block size the pipeline processes internally, in samples. The
    /// actual callback buffer may be larger; the pipeline chunks it.
    pub block_size: usize,
    /// How much history, in samples, each analysis signal producer's
    /// ring retains.
    pub analysis_lookback_samples: usize,
    /// Capacity of the UI-to-audio parameter change queue.
    pub parameter_queue_capacity: usize,
    /// Capacity of each channel's capture input ring, in samples.
    pub input_ring_capacity: usize,
    /// Capacity of the optional monitor mirror ring, in samples. Zero
    /// disables the monitor entirely.
    pub monitor_ring_capacity: usize,
    /// Attempts a graph mutation makes to acquire the serializing
    /// mutation lock before giving up with
    /// [`crate::error::EngineError::MutationContended`].
    pub mutation_lock_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            block_size: 256,
            analysis_lookback_samples: 48000,
            parameter_queue_capacity: 256,
            input_ring_capacity: 8192,
            monitor_ring_capacity: 0,
            mutation_lock_attempts: 64,
        }
    }
}

/// How a stereo-native capture device folds down to a channel's mono
/// chain. Mirrors [`crate::capture::ChannelMode`] with `serde` derives
/// kept out of the real-time `hotmic-core`/`hotmic-engine` hot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChannelModeConfig {
    /// Device's left channel.
    Left,
    /// Device's right channel.
    Right,
    /// Average of left and right.
    Sum,
}

impl From<ChannelModeConfig> for crate::capture::ChannelMode {
    fn from(value: ChannelModeConfig) -> Self {
        match value {
            ChannelModeConfig::Left => crate::capture::ChannelMode::Left,
            ChannelModeConfig::Right => crate::capture::ChannelMode::Right,
            ChannelModeConfig::Sum => crate::capture::ChannelMode::Sum,
        }
    }
}

/// One channel's persisted device binding. Plugin chain contents are
/// deliberately absent — restoring a chain is a host/preset-layer concern
/// outside this crate's scope.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelBindingConfig {
    /// The channel id this binding applies to.
    pub channel_id: u64,
    /// Input device id, if this channel is a live-capture channel.
    pub device_id: Option<String>,
    /// Down-mix mode for the bound device, if any.
    pub channel_mode: Option<ChannelModeConfig>,
    /// Native channel count of the bound device, if any.
    pub native_channels: Option<u16>,
}

/// A session's persistable shape: sample rate, block size, and every
/// channel's device binding. Restoring a session from this reconstructs
/// the capture bindings; the caller is responsible for rebuilding plugin
/// chains separately.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// Output sample rate, in Hz.
    pub sample_rate: u32,
    /// Block size, in samples.
    pub block_size: usize,
    /// Output device id, if bound to a specific device rather than the
    /// system default.
    pub output_device_id: Option<String>,
    /// Every channel's device binding.
    pub channels: Vec<ChannelBindingConfig>,
}

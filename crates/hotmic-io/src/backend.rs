//! Pluggable audio backend abstraction.
//!
//! The trait uses boxed closures for callbacks rather than generic
//! parameters, making [`AudioBackend`] object-safe and enabling runtime
//! backend selection. Stream handles are returned as [`StreamHandle`], a
//! type-erased wrapper that automatically stops playback/capture on drop.

use crate::{AudioDevice, Result};

/// Configuration for building an audio stream.
#[derive(Debug, Clone)]
pub struct BackendStreamConfig {
    /// Requested sample rate, in Hz.
    pub sample_rate: u32,
    /// Preferred buffer size, in frames.
    pub buffer_size: u32,
    /// Number of channels. 2 for the stereo output device; 1 or 2 for an
    /// input device, matching its native channel count.
    pub channels: u16,
    /// Optional device name filter (uses the system default if `None`).
    pub device_name: Option<String>,
}

impl Default for BackendStreamConfig {
    fn default() -> Self {
        Self { sample_rate: 48000, buffer_size: 256, channels: 2, device_name: None }
    }
}

/// Type-erased audio stream handle. Dropping it stops the stream.
pub struct StreamHandle {
    _inner: Box<dyn Send>,
}

impl StreamHandle {
    /// Wraps a backend-specific stream object, keeping it alive until this
    /// handle is dropped.
    pub fn new<T: Send + 'static>(stream: T) -> Self {
        Self { _inner: Box::new(stream) }
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle").finish_non_exhaustive()
    }
}

/// Called on the audio thread with a buffer to fill with interleaved
/// stereo output. Must not allocate, lock, or perform I/O.
pub type OutputCallback = Box<dyn FnMut(&mut [f32]) + Send>;

/// Called on the audio thread with a buffer of captured interleaved
/// samples, at the device's native channel count.
pub type InputCallback = Box<dyn FnMut(&[f32]) + Send>;

/// Called when the backend reports a stream error, including the
/// platform-specific "device invalidated" condition that triggers device
/// recovery.
pub type ErrorCallback = Box<dyn FnMut(&str) + Send>;

/// Pluggable audio backend trait, object-safe so the engine can select a
/// backend at runtime. `Sync` in addition to `Send` so `Arc<dyn
/// AudioBackend>` can be shared between the facade and a spawned
/// [`crate::is_device_invalidated`]-triggered recovery thread.
pub trait AudioBackend: Send + Sync {
    /// Human-readable backend name, e.g. `"cpal"`.
    fn name(&self) -> &str;

    /// Lists every available audio device.
    fn list_devices(&self) -> Result<Vec<AudioDevice>>;

    /// The system default output device, if any.
    fn default_output_device(&self) -> Result<Option<AudioDevice>>;

    /// The system default input device, if any.
    fn default_input_device(&self) -> Result<Option<AudioDevice>>;

    /// Builds an output-only stream. `callback` is invoked per buffer on
    /// the audio thread; `error_callback` is invoked on stream errors,
    /// including device invalidation.
    fn build_output_stream(
        &self,
        config: &BackendStreamConfig,
        callback: OutputCallback,
        error_callback: ErrorCallback,
    ) -> Result<StreamHandle>;

    /// Builds an input-only (capture) stream.
    fn build_input_stream(
        &self,
        config: &BackendStreamConfig,
        callback: InputCallback,
        error_callback: ErrorCallback,
    ) -> Result<StreamHandle>;

    /// The sample rate the backend will actually use for `config`. Some
    /// backends cannot honor an arbitrary requested rate; the default
    /// implementation assumes the request is always honored.
    fn actual_sample_rate(&self, config: &BackendStreamConfig) -> u32 {
        config.sample_rate
    }
}

//! Audio device I/O for the hotmic engine.
//!
//! Provides [`AudioBackend`], a pluggable trait decoupling the engine's
//! output pipeline and input capture manager from any specific platform
//! audio API, plus [`CpalBackend`], the default implementation wrapping
//! [cpal]. The engine talks only to `dyn AudioBackend` — a host embedding
//! hotmic as a plugin can supply its own backend that hands over
//! host-provided buffers directly, with no device enumeration at all.

mod backend;
mod cpal_backend;
mod device;

pub use backend::{
    AudioBackend, BackendStreamConfig, ErrorCallback, InputCallback, OutputCallback, StreamHandle,
};
pub use cpal_backend::{CpalBackend, is_device_invalidated};
pub use device::{AudioDevice, default_device, list_devices};

/// Errors surfaced by the audio I/O layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Stream construction or runtime error from the backend.
    #[error("audio stream error: {0}")]
    Stream(String),

    /// No audio device available on the system.
    #[error("no audio device available")]
    NoDevice,

    /// The requested audio device was not found.
    #[error("device not found: {0}")]
    DeviceNotFound(String),
}

/// Convenience result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

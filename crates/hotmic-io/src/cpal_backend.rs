//! cpal-based [`AudioBackend`] implementation.
//!
//! Wraps [cpal](https://crates.io/crates/cpal) for cross-platform audio
//! I/O: ALSA on Linux, CoreAudio on macOS, WASAPI on Windows.

use cpal::Host;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::backend::{AudioBackend, BackendStreamConfig, ErrorCallback, InputCallback, OutputCallback, StreamHandle};
use crate::device::device_name;
use crate::{AudioDevice, Error, Result};

/// cpal-backed audio backend. Holds the platform's default [`Host`].
pub struct CpalBackend {
    host: Host,
}

impl CpalBackend {
    /// Creates a backend using the platform's default audio host.
    pub fn new() -> Self {
        let host = cpal::default_host();
        tracing::info!(host = host.id().name(), "cpal backend initialized");
        Self { host }
    }

    fn find_output_device(&self, name: Option<&str>) -> Result<cpal::Device> {
        match name {
            Some(search) => {
                let search_lower = search.to_lowercase();
                let devices = self.host.output_devices().map_err(|e| Error::Stream(e.to_string()))?;
                for device in devices {
                    if device_name(&device).to_lowercase().contains(&search_lower) {
                        return Ok(device);
                    }
                }
                Err(Error::DeviceNotFound(format!("no output device matching '{search}'")))
            }
            None => self.host.default_output_device().ok_or(Error::NoDevice),
        }
    }

    fn find_input_device(&self, name: Option<&str>) -> Result<cpal::Device> {
        match name {
            Some(search) => {
                let search_lower = search.to_lowercase();
                let devices = self.host.input_devices().map_err(|e| Error::Stream(e.to_string()))?;
                for device in devices {
                    if device_name(&device).to_lowercase().contains(&search_lower) {
                        return Ok(device);
                    }
                }
                Err(Error::DeviceNotFound(format!("no input device matching '{search}'")))
            }
            None => self.host.default_input_device().ok_or(Error::NoDevice),
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Substrings cpal/platform backends use in stream error messages to
/// report that the underlying device disappeared (unplugged, format
/// change, endpoint invalidated). Matched case-insensitively since
/// wording varies across ALSA/CoreAudio/WASAPI.
const DEVICE_INVALIDATED_MARKERS: &[&str] = &["device", "disconnect", "invalidat", "unavailable"];

/// Best-effort classification of a cpal stream error as a "device
/// invalidated" condition, per the engine's device recovery contract.
pub fn is_device_invalidated(message: &str) -> bool {
    let lower = message.to_lowercase();
    DEVICE_INVALIDATED_MARKERS.iter().any(|marker| lower.contains(marker))
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn list_devices(&self) -> Result<Vec<AudioDevice>> {
        crate::device::list_devices()
    }

    fn default_output_device(&self) -> Result<Option<AudioDevice>> {
        let (_, output) = crate::device::default_device()?;
        Ok(output)
    }

    fn default_input_device(&self) -> Result<Option<AudioDevice>> {
        let (input, _) = crate::device::default_device()?;
        Ok(input)
    }

    fn build_output_stream(
        &self,
        config: &BackendStreamConfig,
        mut callback: OutputCallback,
        mut error_callback: ErrorCallback,
    ) -> Result<StreamHandle> {
        let device = self.find_output_device(config.device_name.as_deref())?;
        let stream_config = cpal::StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(config.buffer_size),
        };

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| callback(data),
                move |err| error_callback(&err.to_string()),
                None,
            )
            .map_err(|e| Error::Stream(e.to_string()))?;

        stream.play().map_err(|e| Error::Stream(e.to_string()))?;
        tracing::info!(channels = config.channels, sample_rate = config.sample_rate, "output stream started");

        Ok(StreamHandle::new(stream))
    }

    fn build_input_stream(
        &self,
        config: &BackendStreamConfig,
        mut callback: InputCallback,
        mut error_callback: ErrorCallback,
    ) -> Result<StreamHandle> {
        let device = self.find_input_device(config.device_name.as_deref())?;
        let stream_config = cpal::StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(config.buffer_size),
        };

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| callback(data),
                move |err| error_callback(&err.to_string()),
                None,
            )
            .map_err(|e| Error::Stream(e.to_string()))?;

        stream.play().map_err(|e| Error::Stream(e.to_string()))?;
        tracing::info!(channels = config.channels, sample_rate = config.sample_rate, "input stream started");

        Ok(StreamHandle::new(stream))
    }
}

//! Device enumeration helpers shared by [`crate::cpal_backend::CpalBackend`].

use cpal::traits::{DeviceTrait, HostTrait};

use crate::Result;

/// A discovered audio device.
#[derive(Debug, Clone)]
pub struct AudioDevice {
    /// The device's platform-reported name.
    pub name: String,
    /// Whether this device supports input (capture).
    pub is_input: bool,
    /// Whether this device supports output (playback).
    pub is_output: bool,
    /// The device's default sample rate, in Hz.
    pub default_sample_rate: u32,
}

/// Reads a cpal device's name, falling back to a placeholder if the
/// platform API fails to report one.
pub(crate) fn device_name(device: &cpal::Device) -> String {
    device.name().unwrap_or_else(|_| "<unknown device>".to_string())
}

/// Lists every input and output device the default host can see.
pub fn list_devices() -> Result<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    if let Ok(inputs) = host.input_devices() {
        for device in inputs {
            let name = device_name(&device);
            let sample_rate = device.default_input_config().map(|c| c.sample_rate().0).unwrap_or(48000);
            let is_output = device.default_output_config().is_ok();
            devices.push(AudioDevice { name, is_input: true, is_output, default_sample_rate: sample_rate });
        }
    }

    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            let name = device_name(&device);
            if devices.iter().any(|d| d.name == name) {
                continue;
            }
            let sample_rate = device.default_output_config().map(|c| c.sample_rate().0).unwrap_or(48000);
            devices.push(AudioDevice { name, is_input: false, is_output: true, default_sample_rate: sample_rate });
        }
    }

    Ok(devices)
}

/// Returns the system default input/output devices, if any.
pub fn default_device() -> Result<(Option<AudioDevice>, Option<AudioDevice>)> {
    let host = cpal::default_host();

    let input = host.default_input_device().map(|d| AudioDevice {
        name: device_name(&d),
        is_input: true,
        is_output: false,
        default_sample_rate: d.default_input_config().map(|c| c.sample_rate().0).unwrap_or(48000),
    });

    let output = host.default_output_device().map(|d| AudioDevice {
        name: device_name(&d),
        is_input: false,
        is_output: true,
        default_sample_rate: d.default_output_config().map(|c| c.sample_rate().0).unwrap_or(48000),
    });

    Ok((input, output))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_devices_does_not_panic() {
        let result = list_devices();
        assert!(result.is_ok());
    }

    #[test]
    fn test_default_device_does_not_panic() {
        let result = default_device();
        assert!(result.is_ok());
    }
}

//! Device recovery (spec §4.8).
//!
//! When the output device or a bound capture device is lost mid-session,
//! the facade spawns one background retry loop per lost device rather than
//! tearing the whole engine down. The loop is single-flight — a second
//! invalidation on the same device while one is already recovering is a
//! no-op — and backs off to the system default device if the original
//! never comes back.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use hotmic_io::AudioBackend;

use crate::diagnostics::EngineCounters;

/// Retry cadence for a lost device, per spec §4.8.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Result of one recovery attempt.
#[derive(Debug, Clone)]
pub enum RecoveryOutcome {
    /// The original device is visible again.
    Recovered,
    /// The original device never returned; recovery fell back to the
    /// named default device.
    FellBackToDefault(String),
    /// Neither the original device nor a default device is currently
    /// available. The loop keeps retrying.
    Unavailable,
}

/// A running recovery loop for one lost device. Dropping this handle stops
/// the loop and joins its thread.
pub struct RecoveryHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl RecoveryHandle {
    /// Spawns a background thread that retries every [`RETRY_INTERVAL`]
    /// until `on_outcome` returns `false` (the facade considers this
    /// device settled, recovered or permanently fallen back) or the
    /// handle is dropped. Marks `counters` as recovering for the duration.
    pub fn spawn(
        counters: Arc<EngineCounters>,
        backend: Arc<dyn AudioBackend>,
        device_id: String,
        is_output: bool,
        mut on_outcome: impl FnMut(RecoveryOutcome) -> bool + Send + 'static,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_loop = Arc::clone(&stop);
        counters.set_recovering(true);
        let join = std::thread::spawn(move || {
            while !stop_loop.load(Ordering::Acquire) {
                std::thread::sleep(RETRY_INTERVAL);
                if stop_loop.load(Ordering::Acquire) {
                    break;
                }
                let outcome = attempt(backend.as_ref(), &device_id, is_output);
                if !on_outcome(outcome) {
                    break;
                }
            }
            counters.set_recovering(false);
        });
        Self { stop, join: Some(join) }
    }
}

impl Drop for RecoveryHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// One recovery attempt: re-enumerates devices, checks whether `device_id`
/// is present again, and falls back to the system default if not.
fn attempt(backend: &dyn AudioBackend, device_id: &str, is_output: bool) -> RecoveryOutcome {
    let devices = match backend.list_devices() {
        Ok(devices) => devices,
        Err(err) => {
            tracing::warn!(%err, "device recovery: enumeration failed");
            return RecoveryOutcome::Unavailable;
        }
    };

    let present = devices.iter().any(|d| {
        d.name == device_id && if is_output { d.is_output } else { d.is_input }
    });
    if present {
        return RecoveryOutcome::Recovered;
    }

    let default = if is_output { backend.default_output_device() } else { backend.default_input_device() };
    match default {
        Ok(Some(device)) => RecoveryOutcome::FellBackToDefault(device.name),
        Ok(None) => RecoveryOutcome::Unavailable,
        Err(err) => {
            tracing::warn!(%err, "device recovery: default device lookup failed");
            RecoveryOutcome::Unavailable
        }
    }
}

/// Re-exported for callers that only need the classification, not a whole
/// recovery loop (e.g. an error callback deciding whether to escalate).
pub use hotmic_io::is_device_invalidated;

#[cfg(test)]
mod tests {
    use super::*;
    use hotmic_io::{AudioDevice, BackendStreamConfig, Error, InputCallback, OutputCallback, Result, StreamHandle};
    use std::sync::Mutex;

    struct FakeBackend {
        devices: Mutex<Vec<AudioDevice>>,
    }

    impl AudioBackend for FakeBackend {
        fn name(&self) -> &str {
            "fake"
        }
        fn list_devices(&self) -> Result<Vec<AudioDevice>> {
            Ok(self.devices.lock().unwrap().clone())
        }
        fn default_output_device(&self) -> Result<Option<AudioDevice>> {
            Ok(self.devices.lock().unwrap().iter().find(|d| d.is_output).cloned())
        }
        fn default_input_device(&self) -> Result<Option<AudioDevice>> {
            Ok(self.devices.lock().unwrap().iter().find(|d| d.is_input).cloned())
        }
        fn build_output_stream(&self, _: &BackendStreamConfig, _: OutputCallback, _: hotmic_io::ErrorCallback) -> Result<StreamHandle> {
            Err(Error::NoDevice)
        }
        fn build_input_stream(&self, _: &BackendStreamConfig, _: InputCallback, _: hotmic_io::ErrorCallback) -> Result<StreamHandle> {
            Err(Error::NoDevice)
        }
    }

    #[test]
    fn test_attempt_recovered_when_device_present() {
        let backend = FakeBackend {
            devices: Mutex::new(vec![AudioDevice { name: "mic".into(), is_input: true, is_output: false, default_sample_rate: 48000 }]),
        };
        assert!(matches!(attempt(&backend, "mic", false), RecoveryOutcome::Recovered));
    }

    #[test]
    fn test_attempt_falls_back_to_default_when_missing() {
        let backend = FakeBackend {
            devices: Mutex::new(vec![AudioDevice { name: "default-mic".into(), is_input: true, is_output: false, default_sample_rate: 48000 }]),
        };
        match attempt(&backend, "missing-mic", false) {
            RecoveryOutcome::FellBackToDefault(name) => assert_eq!(name, "default-mic"),
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[test]
    fn test_attempt_unavailable_when_nothing_present() {
        let backend = FakeBackend { devices: Mutex::new(vec![]) };
        assert!(matches!(attempt(&backend, "mic", true), RecoveryOutcome::Unavailable));
    }

    #[test]
    fn test_is_device_invalidated_reexport() {
        assert!(is_device_invalidated("device disconnected"));
        assert!(!is_device_invalidated("buffer underrun"));
    }
}

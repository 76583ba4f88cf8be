//! Peak/RMS level metering and K-weighted loudness metering.
//!
//! Both meters update once per audio block rather than once per sample: the
//! per-sample one-pole coefficient `c` derived the same way as
//! [`crate::envelope::EnvelopeFollower`] is corrected for the block length
//! `N` as `1 - (1 - c)^N`, so a block of silence after a loud block still
//! relaxes the envelope by the same amount a sample-accurate follower would
//! produce over that many samples.

use libm::{expf, powf, sqrtf};

use crate::biquad::{Biquad, highpass_coefficients, highshelf_coefficients};

/// Per-sample one-pole coefficient for a given time constant.
fn one_pole_coeff(time_ms: f32, sample_rate: f32) -> f32 {
    expf(-1.0 / (time_ms.max(0.001) * sample_rate / 1000.0))
}

/// Block-rate-corrected coefficient: `1 - (1 - c)^n`.
fn block_coeff(c: f32, n: u32) -> f32 {
    1.0 - powf(1.0 - c, n as f32)
}

/// Seconds the clip latch stays asserted after the triggering sample.
const CLIP_LATCH_SECONDS: f32 = 0.5;

/// Combined peak and RMS level meter with a clip latch.
///
/// Attack/release times default to the values named in the loudness
/// metering component: peak tracks fast (≈1ms attack / ≈100ms release),
/// RMS tracks slower (≈50ms attack / ≈150ms release) to approximate
/// perceived loudness rather than instantaneous level.
#[derive(Debug, Clone)]
pub struct Meter {
    sample_rate: f32,
    peak: f32,
    rms_squared: f32,
    peak_attack_ms: f32,
    peak_release_ms: f32,
    rms_attack_ms: f32,
    rms_release_ms: f32,
    clip_latched: bool,
    clip_hold_remaining: u32,
}

impl Meter {
    /// Creates a meter with the default attack/release time constants.
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            peak: 0.0,
            rms_squared: 0.0,
            peak_attack_ms: 1.0,
            peak_release_ms: 100.0,
            rms_attack_ms: 50.0,
            rms_release_ms: 150.0,
            clip_latched: false,
            clip_hold_remaining: 0,
        }
    }

    /// Updates the meter with one block of mono samples.
    ///
    /// This is the normal call site: once per channel per block, from the
    /// audio thread, after the channel's plugin chain has produced its
    /// output (or in place of processing, for muted channels where only
    /// metering continues).
    pub fn process_block(&mut self, block: &[f32]) {
        if block.is_empty() {
            return;
        }

        let n = block.len() as u32;
        let mut block_peak = 0.0_f32;
        let mut block_sum_sq = 0.0_f32;
        let mut clipped = false;

        for &s in block {
            if !s.is_finite() || s.abs() > 1.0 {
                clipped = true;
            }
            let a = if s.is_finite() { s.abs() } else { 1.0 };
            block_peak = block_peak.max(a);
            block_sum_sq += a * a;
        }
        let block_mean_sq = block_sum_sq / n as f32;

        let peak_coeff = if block_peak > self.peak {
            block_coeff(one_pole_coeff(self.peak_attack_ms, self.sample_rate), n)
        } else {
            block_coeff(one_pole_coeff(self.peak_release_ms, self.sample_rate), n)
        };
        self.peak += peak_coeff * (block_peak - self.peak);
        self.peak = self.peak.max(0.0);

        let rms_coeff = if block_mean_sq > self.rms_squared {
            block_coeff(one_pole_coeff(self.rms_attack_ms, self.sample_rate), n)
        } else {
            block_coeff(one_pole_coeff(self.rms_release_ms, self.sample_rate), n)
        };
        self.rms_squared += rms_coeff * (block_mean_sq - self.rms_squared);
        self.rms_squared = self.rms_squared.max(0.0);

        if clipped {
            self.clip_latched = true;
            self.clip_hold_remaining = (CLIP_LATCH_SECONDS * self.sample_rate) as u32;
        } else if self.clip_hold_remaining > n {
            self.clip_hold_remaining -= n;
        } else {
            self.clip_hold_remaining = 0;
            self.clip_latched = false;
        }
    }

    /// Current peak level (linear, always ≥ 0).
    pub fn peak(&self) -> f32 {
        self.peak
    }

    /// Current RMS level (linear, always ≥ 0).
    pub fn rms(&self) -> f32 {
        sqrtf(self.rms_squared)
    }

    /// Whether the clip latch is currently asserted.
    pub fn is_clipped(&self) -> bool {
        self.clip_latched
    }

    /// Resets the meter to silence and clears the clip latch.
    pub fn reset(&mut self) {
        self.peak = 0.0;
        self.rms_squared = 0.0;
        self.clip_latched = false;
        self.clip_hold_remaining = 0;
    }
}

#[cfg(feature = "std")]
use std::vec::Vec;
#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

/// A fixed-capacity running sum of squares over a sliding window of
/// samples, used by [`LufsMeter`] for the momentary (400ms) and
/// short-term (3s) windows.
#[derive(Debug, Clone)]
struct SlidingSumOfSquares {
    history: Vec<f32>,
    write_pos: usize,
    filled: usize,
    sum: f32,
}

impl SlidingSumOfSquares {
    fn new(window_samples: usize) -> Self {
        Self {
            history: vec![0.0; window_samples.max(1)],
            write_pos: 0,
            filled: 0,
            sum: 0.0,
        }
    }

    fn push(&mut self, squared: f32) {
        let capacity = self.history.len();
        let outgoing = self.history[self.write_pos];
        self.sum += squared - outgoing;
        self.history[self.write_pos] = squared;
        self.write_pos = (self.write_pos + 1) % capacity;
        if self.filled < capacity {
            self.filled += 1;
        }
    }

    fn mean_square(&self) -> f32 {
        if self.filled == 0 {
            0.0
        } else {
            (self.sum / self.filled as f32).max(0.0)
        }
    }

    fn reset(&mut self) {
        self.history.iter_mut().for_each(|x| *x = 0.0);
        self.write_pos = 0;
        self.filled = 0;
        self.sum = 0.0;
    }
}

const LUFS_OFFSET_DB: f32 = -0.691;
const LUFS_FLOOR: f32 = -70.0;

/// ITU-R BS.1770 K-weighted loudness meter.
///
/// Applies a 60Hz high-pass (Q=0.5) followed by a 4kHz, +4dB high-shelf
/// (Q≈0.707), then tracks momentary (400ms) and short-term (3s) mean
/// square over sliding windows. Values below the measurable floor read as
/// [`LUFS_FLOOR`].
#[derive(Debug, Clone)]
pub struct LufsMeter {
    highpass: Biquad,
    shelf: Biquad,
    momentary: SlidingSumOfSquares,
    short_term: SlidingSumOfSquares,
}

impl LufsMeter {
    /// Creates a K-weighted loudness meter for the given sample rate.
    pub fn new(sample_rate: f32) -> Self {
        let mut highpass = Biquad::new();
        let (b0, b1, b2, a0, a1, a2) = highpass_coefficients(60.0, 0.5, sample_rate);
        highpass.set_coefficients(b0, b1, b2, a0, a1, a2);

        let mut shelf = Biquad::new();
        let (b0, b1, b2, a0, a1, a2) = highshelf_coefficients(4000.0, 0.707, 4.0, sample_rate);
        shelf.set_coefficients(b0, b1, b2, a0, a1, a2);

        let momentary_samples = (0.400 * sample_rate) as usize;
        let short_term_samples = (3.0 * sample_rate) as usize;

        Self {
            highpass,
            shelf,
            momentary: SlidingSumOfSquares::new(momentary_samples),
            short_term: SlidingSumOfSquares::new(short_term_samples),
        }
    }

    /// Processes one sample, updating both windows.
    pub fn process(&mut self, sample: f32) {
        let weighted = self.shelf.process(self.highpass.process(sample));
        let squared = weighted * weighted;
        self.momentary.push(squared);
        self.short_term.push(squared);
    }

    /// Processes a block of samples.
    pub fn process_block(&mut self, block: &[f32]) {
        for &s in block {
            self.process(s);
        }
    }

    fn loudness_from(mean_square: f32) -> f32 {
        if mean_square <= 0.0 {
            return LUFS_FLOOR;
        }
        let db = LUFS_OFFSET_DB + 10.0 * libm::log10f(mean_square);
        db.max(LUFS_FLOOR)
    }

    /// Momentary loudness (400ms window), in LUFS.
    pub fn momentary_lufs(&self) -> f32 {
        Self::loudness_from(self.momentary.mean_square())
    }

    /// Short-term loudness (3s window), in LUFS.
    pub fn short_term_lufs(&self) -> f32 {
        Self::loudness_from(self.short_term.mean_square())
    }

    /// Resets both windows and filter state.
    pub fn reset(&mut self) {
        self.highpass.reset();
        self.shelf.reset();
        self.momentary.reset();
        self.short_term.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meter_non_negative_on_silence() {
        let mut m = Meter::new(48000.0);
        m.process_block(&[0.0; 512]);
        assert!(m.peak() >= 0.0);
        assert!(m.rms() >= 0.0);
    }

    #[test]
    fn test_meter_tracks_full_scale_tone() {
        let mut m = Meter::new(48000.0);
        let block = vec![1.0; 512];
        for _ in 0..200 {
            m.process_block(&block);
        }
        assert!(m.peak() > 0.9);
        assert!(m.rms() > 0.9);
    }

    #[test]
    fn test_clip_latch_triggers_on_overscale_sample() {
        let mut m = Meter::new(48000.0);
        let mut block = vec![0.0; 256];
        block[10] = 1.5;
        m.process_block(&block);
        assert!(m.is_clipped());
    }

    #[test]
    fn test_clip_latch_triggers_on_non_finite_sample() {
        let mut m = Meter::new(48000.0);
        let mut block = vec![0.0; 256];
        block[0] = f32::NAN;
        m.process_block(&block);
        assert!(m.is_clipped());
    }

    #[test]
    fn test_clip_latch_holds_for_at_least_half_second() {
        let sample_rate = 48000.0;
        let mut m = Meter::new(sample_rate);
        let mut first_block = vec![0.0; 256];
        first_block[0] = 2.0;
        m.process_block(&first_block);
        assert!(m.is_clipped());

        let silent = vec![0.0; 256];
        let blocks_in_half_second = ((0.5 * sample_rate) / 256.0).floor() as usize;
        for _ in 0..blocks_in_half_second.saturating_sub(1) {
            m.process_block(&silent);
        }
        assert!(m.is_clipped(), "clip latch should still hold just under 0.5s later");
    }

    #[test]
    fn test_reset_clears_meter() {
        let mut m = Meter::new(48000.0);
        m.process_block(&vec![1.0; 512]);
        m.reset();
        assert_eq!(m.peak(), 0.0);
        assert_eq!(m.rms(), 0.0);
        assert!(!m.is_clipped());
    }

    #[test]
    fn test_lufs_silence_is_floor() {
        let mut meter = LufsMeter::new(48000.0);
        meter.process_block(&vec![0.0; 19200]);
        assert_eq!(meter.momentary_lufs(), LUFS_FLOOR);
    }

    #[test]
    fn test_lufs_full_scale_tone_above_floor() {
        let sample_rate = 48000.0;
        let mut meter = LufsMeter::new(sample_rate);
        let freq = 1000.0;
        let samples: Vec<f32> = (0..(sample_rate as usize))
            .map(|n| libm::sinf(2.0 * core::f32::consts::PI * freq * n as f32 / sample_rate))
            .collect();
        meter.process_block(&samples);
        assert!(meter.momentary_lufs() > LUFS_FLOOR);
        assert!(meter.short_term_lufs() > LUFS_FLOOR);
    }
}

//! Biquad Filter Implementation (IIR 2nd Order)
//!
//! Coefficient design for every equaliser band type plus the per-channel
//! recursive section that runs them on the audio thread.
//!
//! # Design Notes
//! - Coefficients are designed in `f64` and normalised so that `a0 == 1`
//! - Second-order types follow the RBJ cookbook; first-order types use the
//!   prewarped bilinear transform
//! - Gain is a linear amplitude factor (`A = sqrt(gain)` in cookbook terms)
//! - Processing is allocation free and safe for the audio thread

use crate::dsp::band::FilterType;
use crate::params::{GAIN_MAX, GAIN_MIN, QUALITY_MAX, QUALITY_MIN};
use rustfft::num_complex::Complex64;
use std::f64::consts::PI;

// Keeps the cutoff strictly below Nyquist so sin(w0) never collapses to zero.
const NYQUIST_GUARD: f64 = 0.499;
const MIN_DESIGN_HZ: f64 = 1.0;

/// Normalised biquad coefficients (`a0` folded into the others).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoefficients {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Default for BiquadCoefficients {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl BiquadCoefficients {
    pub const IDENTITY: BiquadCoefficients = BiquadCoefficients {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    fn normalised(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> Self {
        let inv_a0 = 1.0 / a0;
        Self {
            b0: b0 * inv_a0,
            b1: b1 * inv_a0,
            b2: b2 * inv_a0,
            a1: a1 * inv_a0,
            a2: a2 * inv_a0,
        }
    }

    /// Design the coefficients for one band.
    ///
    /// Returns `None` when the sample rate is not known yet; callers keep the
    /// coefficients they already have in that case. Every other input is
    /// clamped into its valid range first, so the result is always a stable filter.
    pub fn design(
        filter_type: FilterType,
        frequency: f32,
        quality: f32,
        gain: f32,
        sample_rate: f64,
    ) -> Option<Self> {
        if !(sample_rate > 0.0) || !sample_rate.is_finite() {
            return None;
        }

        let nyquist_limit = (sample_rate * NYQUIST_GUARD).max(MIN_DESIGN_HZ);
        let freq = sanitize(frequency as f64, 1000.0).clamp(MIN_DESIGN_HZ, nyquist_limit);
        let q = sanitize(quality as f64, 1.0).clamp(QUALITY_MIN as f64, QUALITY_MAX as f64);
        let gain = sanitize(gain as f64, 1.0).clamp(GAIN_MIN as f64, GAIN_MAX as f64);

        let coefficients = match filter_type {
            FilterType::NoFilter => Self::IDENTITY,
            FilterType::LowPass => Self::low_pass(freq, q, sample_rate),
            FilterType::HighPass => Self::high_pass(freq, q, sample_rate),
            FilterType::BandPass => Self::band_pass(freq, q, sample_rate),
            FilterType::AllPass => Self::all_pass(freq, q, sample_rate),
            FilterType::Notch => Self::notch(freq, q, sample_rate),
            FilterType::Peak => Self::peak(freq, q, gain, sample_rate),
            FilterType::LowShelf => Self::low_shelf(freq, q, gain, sample_rate),
            FilterType::HighShelf => Self::high_shelf(freq, q, gain, sample_rate),
            FilterType::LowPass1st => Self::first_order_low_pass(freq, sample_rate),
            FilterType::HighPass1st => Self::first_order_high_pass(freq, sample_rate),
            FilterType::AllPass1st => Self::first_order_all_pass(freq, sample_rate),
        };
        Some(coefficients)
    }

    // ---------------------------------------------------------------------
    // Filter design helpers (RBJ-style)
    // ---------------------------------------------------------------------

    fn low_pass(freq: f64, q: f64, sr: f64) -> Self {
        let (cw0, alpha) = omega(freq, q, sr);
        Self::normalised(
            (1.0 - cw0) * 0.5,
            1.0 - cw0,
            (1.0 - cw0) * 0.5,
            1.0 + alpha,
            -2.0 * cw0,
            1.0 - alpha,
        )
    }

    fn high_pass(freq: f64, q: f64, sr: f64) -> Self {
        let (cw0, alpha) = omega(freq, q, sr);
        Self::normalised(
            (1.0 + cw0) * 0.5,
            -(1.0 + cw0),
            (1.0 + cw0) * 0.5,
            1.0 + alpha,
            -2.0 * cw0,
            1.0 - alpha,
        )
    }

    /// Constant 0 dB peak gain.
    fn band_pass(freq: f64, q: f64, sr: f64) -> Self {
        let (cw0, alpha) = omega(freq, q, sr);
        Self::normalised(alpha, 0.0, -alpha, 1.0 + alpha, -2.0 * cw0, 1.0 - alpha)
    }

    fn all_pass(freq: f64, q: f64, sr: f64) -> Self {
        let (cw0, alpha) = omega(freq, q, sr);
        Self::normalised(
            1.0 - alpha,
            -2.0 * cw0,
            1.0 + alpha,
            1.0 + alpha,
            -2.0 * cw0,
            1.0 - alpha,
        )
    }

    fn notch(freq: f64, q: f64, sr: f64) -> Self {
        let (cw0, alpha) = omega(freq, q, sr);
        Self::normalised(1.0, -2.0 * cw0, 1.0, 1.0 + alpha, -2.0 * cw0, 1.0 - alpha)
    }

    fn peak(freq: f64, q: f64, gain: f64, sr: f64) -> Self {
        let a = gain.sqrt();
        let (cw0, alpha) = omega(freq, q, sr);
        Self::normalised(
            1.0 + alpha * a,
            -2.0 * cw0,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * cw0,
            1.0 - alpha / a,
        )
    }

    fn low_shelf(freq: f64, q: f64, gain: f64, sr: f64) -> Self {
        let a = gain.sqrt();
        let (cw0, alpha) = omega(freq, q, sr);
        let beta = 2.0 * a.sqrt() * alpha;

        Self::normalised(
            a * ((a + 1.0) - (a - 1.0) * cw0 + beta),
            2.0 * a * ((a - 1.0) - (a + 1.0) * cw0),
            a * ((a + 1.0) - (a - 1.0) * cw0 - beta),
            (a + 1.0) + (a - 1.0) * cw0 + beta,
            -2.0 * ((a - 1.0) + (a + 1.0) * cw0),
            (a + 1.0) + (a - 1.0) * cw0 - beta,
        )
    }

    fn high_shelf(freq: f64, q: f64, gain: f64, sr: f64) -> Self {
        let a = gain.sqrt();
        let (cw0, alpha) = omega(freq, q, sr);
        let beta = 2.0 * a.sqrt() * alpha;

        Self::normalised(
            a * ((a + 1.0) + (a - 1.0) * cw0 + beta),
            -2.0 * a * ((a - 1.0) + (a + 1.0) * cw0),
            a * ((a + 1.0) + (a - 1.0) * cw0 - beta),
            (a + 1.0) - (a - 1.0) * cw0 + beta,
            2.0 * ((a - 1.0) - (a + 1.0) * cw0),
            (a + 1.0) - (a - 1.0) * cw0 - beta,
        )
    }

    fn first_order_low_pass(freq: f64, sr: f64) -> Self {
        let k = (PI * freq / sr).tan();
        Self::normalised(k, k, 0.0, k + 1.0, k - 1.0, 0.0)
    }

    fn first_order_high_pass(freq: f64, sr: f64) -> Self {
        let k = (PI * freq / sr).tan();
        Self::normalised(1.0, -1.0, 0.0, k + 1.0, k - 1.0, 0.0)
    }

    fn first_order_all_pass(freq: f64, sr: f64) -> Self {
        let k = (PI * freq / sr).tan();
        Self::normalised(k - 1.0, k + 1.0, 0.0, k + 1.0, k - 1.0, 0.0)
    }

    // ---------------------------------------------------------------------
    // Frequency response
    // ---------------------------------------------------------------------

    /// Linear magnitude |H(e^jw)| at `freq` Hz.
    pub fn magnitude_at(&self, freq: f64, sample_rate: f64) -> f64 {
        let w = 2.0 * PI * freq / sample_rate;
        let z1 = Complex64::from_polar(1.0, -w);
        let z2 = z1 * z1;
        let num = self.b0 + z1 * self.b1 + z2 * self.b2;
        let den = 1.0 + z1 * self.a1 + z2 * self.a2;
        (num / den).norm()
    }

    /// Fill `out` with one magnitude per entry of `frequencies`.
    pub fn magnitudes_into(&self, frequencies: &[f64], sample_rate: f64, out: &mut [f64]) {
        for (mag, &freq) in out.iter_mut().zip(frequencies) {
            *mag = self.magnitude_at(freq, sample_rate);
        }
    }

    /// True when both poles sit strictly inside the unit circle.
    pub fn is_stable(&self) -> bool {
        self.a2.abs() < 1.0 && self.a1.abs() < 1.0 + self.a2
    }
}

#[inline]
fn omega(freq: f64, q: f64, sr: f64) -> (f64, f64) {
    let w0 = 2.0 * PI * freq / sr;
    (w0.cos(), w0.sin() / (2.0 * q))
}

#[inline]
fn sanitize(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// One biquad section for one channel (transposed direct form II).
#[derive(Debug, Clone, Copy)]
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: f32,
    z2: f32,
}

impl Default for Biquad {
    fn default() -> Self {
        Self::new()
    }
}

impl Biquad {
    pub fn new() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    /// Swap in new coefficients. Delay state is kept.
    #[inline]
    pub fn set_coefficients(&mut self, c: &BiquadCoefficients) {
        self.b0 = c.b0 as f32;
        self.b1 = c.b1 as f32;
        self.b2 = c.b2 as f32;
        self.a1 = c.a1 as f32;
        self.a2 = c.a2 as f32;
    }

    /// Process a single sample
    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let out = input * self.b0 + self.z1;

        // Anti-denormal: tiny DC offset
        self.z1 = input * self.b1 + self.z2 - self.a1 * out + 1e-25;
        self.z2 = input * self.b2 - self.a2 * out + 1e-25;

        out
    }

    #[inline]
    pub fn process_block(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            *s = self.process(*s);
        }
    }

    /// Explicitly clear filter delay state.
    ///
    /// This is NOT called by coefficient updates.
    #[inline]
    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f64 = 48000.0;

    fn design(t: FilterType, f: f32, q: f32, g: f32) -> BiquadCoefficients {
        BiquadCoefficients::design(t, f, q, g, SR).unwrap()
    }

    #[test]
    fn test_no_sample_rate_skips_design() {
        assert!(BiquadCoefficients::design(FilterType::Peak, 1000.0, 1.0, 2.0, 0.0).is_none());
        assert!(BiquadCoefficients::design(FilterType::Peak, 1000.0, 1.0, 2.0, -1.0).is_none());
    }

    #[test]
    fn test_no_filter_is_identity() {
        let c = design(FilterType::NoFilter, 1000.0, 1.0, 4.0);
        assert_eq!(c, BiquadCoefficients::IDENTITY);
        assert!((c.magnitude_at(123.0, SR) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_low_pass_response() {
        let c = design(FilterType::LowPass, 1000.0, 0.707, 1.0);
        assert!((c.magnitude_at(10.0, SR) - 1.0).abs() < 1e-3);
        // -3 dB at cutoff for Butterworth Q
        assert!((c.magnitude_at(1000.0, SR) - 0.707).abs() < 0.01);
        assert!(c.magnitude_at(10000.0, SR) < 0.02);
    }

    #[test]
    fn test_high_pass_response() {
        let c = design(FilterType::HighPass, 1000.0, 0.707, 1.0);
        assert!(c.magnitude_at(20.0, SR) < 0.01);
        assert!((c.magnitude_at(15000.0, SR) - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_peak_gain_at_centre() {
        let c = design(FilterType::Peak, 2000.0, 1.0, 4.0);
        assert!((c.magnitude_at(2000.0, SR) - 4.0).abs() < 1e-6);
        assert!((c.magnitude_at(20.0, SR) - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_shelves_reach_plateau() {
        let low = design(FilterType::LowShelf, 200.0, 0.707, 2.0);
        assert!((low.magnitude_at(10.0, SR) - 2.0).abs() < 0.02);
        assert!((low.magnitude_at(15000.0, SR) - 1.0).abs() < 0.02);

        let high = design(FilterType::HighShelf, 5000.0, 0.707, 0.5);
        assert!((high.magnitude_at(20.0, SR) - 1.0).abs() < 0.02);
        assert!((high.magnitude_at(20000.0, SR) - 0.5).abs() < 0.05);
    }

    #[test]
    fn test_notch_and_band_pass() {
        let notch = design(FilterType::Notch, 1000.0, 2.0, 1.0);
        assert!(notch.magnitude_at(1000.0, SR) < 1e-6);

        let bp = design(FilterType::BandPass, 1000.0, 2.0, 1.0);
        assert!((bp.magnitude_at(1000.0, SR) - 1.0).abs() < 1e-6);
        assert!(bp.magnitude_at(20.0, SR) < 0.05);
    }

    #[test]
    fn test_all_pass_types_are_flat() {
        for t in [FilterType::AllPass, FilterType::AllPass1st] {
            let c = design(t, 800.0, 3.0, 1.0);
            for f in [20.0, 800.0, 5000.0, 19000.0] {
                assert!((c.magnitude_at(f, SR) - 1.0).abs() < 1e-9, "{:?} at {}", t, f);
            }
        }
    }

    #[test]
    fn test_first_order_corner_is_minus_3db() {
        let lp = design(FilterType::LowPass1st, 1000.0, 1.0, 1.0);
        let hp = design(FilterType::HighPass1st, 1000.0, 1.0, 1.0);
        let half_power = std::f64::consts::FRAC_1_SQRT_2;
        assert!((lp.magnitude_at(1000.0, SR) - half_power).abs() < 1e-6);
        assert!((hp.magnitude_at(1000.0, SR) - half_power).abs() < 1e-6);
    }

    #[test]
    fn test_all_types_stable_at_range_extremes() {
        for t in FilterType::ALL {
            for &f in &[0.0f32, 20.0, 20000.0, 40000.0] {
                for &q in &[0.0f32, 0.1, 10.0, 100.0] {
                    for &g in &[0.0f32, GAIN_MIN, GAIN_MAX, 1000.0] {
                        let c = BiquadCoefficients::design(t, f, q, g, 44100.0).unwrap();
                        assert!(c.is_stable(), "{:?} f={} q={} g={}", t, f, q, g);
                    }
                }
            }
        }
    }

    #[test]
    fn test_non_finite_inputs_are_sanitised() {
        let c = BiquadCoefficients::design(FilterType::Peak, f32::NAN, f32::INFINITY, f32::NAN, SR)
            .unwrap();
        assert!(c.is_stable());
        assert!(c.b0.is_finite() && c.a1.is_finite());
    }

    #[test]
    fn test_biquad_matches_designed_dc_gain() {
        let c = design(FilterType::LowShelf, 300.0, 0.707, 2.0);
        let mut bq = Biquad::new();
        bq.set_coefficients(&c);
        let mut out = 0.0;
        for _ in 0..48000 {
            out = bq.process(1.0);
        }
        assert!((out - 2.0).abs() < 0.01);

        bq.reset();
        let first = bq.process(0.0);
        assert!(first.abs() < 1e-20);
    }
}

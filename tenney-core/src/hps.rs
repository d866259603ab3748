//! Harmonic-product-spectrum estimator.
//!
//! Coarse frequency-domain fallback: multiplies the magnitude spectrum with
//! copies of itself decimated by 2 and 3 so that only a bin whose harmonics
//! are also present survives. Resolution is one 2048-point bin, so callers use
//! the result as a hint rather than a final answer.

use crate::fft::{RealFft, RustFft, SpectralFrame};

/// Transform size used by the estimator.
pub const HPS_FFT_SIZE: usize = 2048;

/// Reusable HPS estimator owning its transform and spectrum buffers.
pub struct HpsEstimator<F: RealFft = RustFft> {
    fft: Option<F>,
    frame: SpectralFrame,
}

impl<F: RealFft> HpsEstimator<F> {
    /// Plans the 2048-point transform.
    pub fn new() -> Self {
        Self {
            fft: F::plan(HPS_FFT_SIZE),
            frame: SpectralFrame::new(HPS_FFT_SIZE),
        }
    }

    /// Estimates the fundamental of the newest 2048 samples of `signal`.
    ///
    /// Returns `None` for fewer than 2048 samples, an empty search range, or a
    /// non-finite peak.
    pub fn estimate(
        &mut self,
        signal: &[f32],
        sample_rate: u32,
        min_hz: f64,
        max_hz: f64,
    ) -> Option<f64> {
        if signal.len() < HPS_FFT_SIZE || sample_rate == 0 {
            return None;
        }
        let fft = self.fft.as_mut()?;
        self.frame.compute(fft, signal, sample_rate, (min_hz, max_hz));
        hps_peak(&self.frame.magnitudes, self.frame.hz_per_bin(), min_hz, max_hz)
    }
}

impl<F: RealFft> Default for HpsEstimator<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot HPS estimate; plans a transform per call.
pub fn estimate_hps(signal: &[f32], sample_rate: u32, min_hz: f64, max_hz: f64) -> Option<f64> {
    HpsEstimator::<RustFft>::new().estimate(signal, sample_rate, min_hz, max_hz)
}

/// Finds the HPS peak of a magnitude spectrum inside `[min_hz, max_hz]`.
///
/// The product uses factors 2 and 3; the peak is refined by parabolic
/// interpolation of the HPS curve.
pub fn hps_peak(magnitudes: &[f32], hz_per_bin: f64, min_hz: f64, max_hz: f64) -> Option<f64> {
    let len = magnitudes.len();
    if len < 8 || !(hz_per_bin > 0.0) || !(min_hz > 0.0) || !(max_hz > min_hz) {
        return None;
    }

    let product = |k: usize| -> f64 {
        [k, 2 * k, 3 * k]
            .iter()
            .map(|&i| magnitudes.get(i).map_or(0.0, |&m| m as f64))
            .product()
    };

    let min_bin = ((min_hz / hz_per_bin).floor() as usize).max(1);
    let max_bin = ((max_hz / hz_per_bin).ceil() as usize).min((len - 1) / 3);
    if min_bin >= max_bin {
        return None;
    }

    let peak = (min_bin..=max_bin).max_by(|&a, &b| product(a).total_cmp(&product(b)))?;
    let peak_value = product(peak);
    if !peak_value.is_finite() || peak_value <= 0.0 {
        return None;
    }

    let (y1, y2, y3) = (product(peak - 1), peak_value, product(peak + 1));
    let curvature = y1 - 2.0 * y2 + y3;
    let offset = if curvature.abs() > 1e-12 * y2 {
        (0.5 * (y1 - y3) / curvature).clamp(-1.0, 1.0)
    } else {
        0.0
    };

    let frequency = (peak as f64 + offset) * hz_per_bin;
    frequency.is_finite().then_some(frequency)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fft::FailingFft;
    use std::f64::consts::PI;

    fn harmonic_tone(f0: f64, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                (1..=5)
                    .map(|h| (2.0 * PI * f0 * h as f64 * t).sin() / h as f64)
                    .sum::<f64>() as f32
                    * 0.3
            })
            .collect()
    }

    #[test]
    fn test_finds_fundamental_within_a_bin() {
        let sample_rate = 48000;
        let bin_width = sample_rate as f64 / HPS_FFT_SIZE as f64;
        for f0 in [110.0, 196.0, 330.0] {
            let signal = harmonic_tone(f0, sample_rate, 4096);
            let estimate = estimate_hps(&signal, sample_rate, 55.0, 1760.0)
                .unwrap_or_else(|| panic!("no estimate for {f0}"));
            assert!((estimate - f0).abs() < bin_width, "{f0} -> {estimate}");
        }
    }

    #[test]
    fn test_degenerate_input() {
        assert!(estimate_hps(&[0.1; 100], 48000, 55.0, 1760.0).is_none());
        assert!(estimate_hps(&[0.0; 4096], 48000, 55.0, 1760.0).is_none());
        assert!(hps_peak(&[1.0; 512], 23.4, 1000.0, 100.0).is_none());
        assert!(hps_peak(&[1.0; 4], 23.4, 50.0, 1000.0).is_none());
    }

    #[test]
    fn test_unplannable_transform_gives_no_estimate() {
        let signal = harmonic_tone(220.0, 48000, 4096);
        let mut estimator = HpsEstimator::<FailingFft>::new();
        assert!(estimator.estimate(&signal, 48000, 55.0, 1760.0).is_none());
        assert!(estimator.estimate(&signal, 48000, 55.0, 1760.0).is_none());
    }

    #[test]
    fn test_reusable_estimator_matches_one_shot() {
        let signal = harmonic_tone(220.0, 44100, 2048);
        let mut estimator = HpsEstimator::<RustFft>::new();
        let first = estimator.estimate(&signal, 44100, 55.0, 1760.0);
        let second = estimator.estimate(&signal, 44100, 55.0, 1760.0);
        assert_eq!(first, second);
        assert_eq!(first, estimate_hps(&signal, 44100, 55.0, 1760.0));
    }
}

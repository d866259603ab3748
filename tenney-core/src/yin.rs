//! # YIN Pitch Detection
//!
//! Time-domain fundamental-frequency estimation with the YIN difference
//! function (de Cheveigné & Kawahara, 2002). This is the first-choice
//! estimator of the pipeline.
//!
//! ## Steps
//! 1. DC removal
//! 2. Hann-weighted difference function `d(τ)` over the lag range implied by
//!    the search band
//! 3. Cumulative mean normalized difference (CMND)
//! 4. First neighbour-minimum under the threshold, else the global minimum
//! 5. Parabolic interpolation of the CMND around the chosen lag
//!
//! The Hann window weights each squared difference `(x[i] - x[i + τ])²` by
//! the position `i`, instead of multiplying the samples before differencing.
//! Both samples of a term then carry the same weight, so a steady tone has a
//! dip of zero at its period and the window edges are still tapered.

use serde::{Deserialize, Serialize};

/// Fewest samples YIN will analyze.
pub const MIN_YIN_SAMPLES: usize = 2048;

/// Search band and dip threshold for [`estimate_yin`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YinConfig {
    /// Lowest detectable frequency in Hz.
    pub min_hz: f64,
    /// Highest detectable frequency in Hz.
    pub max_hz: f64,
    /// CMND value a dip must fall below to be taken as the period.
    pub threshold: f64,
}

impl Default for YinConfig {
    fn default() -> Self {
        Self {
            min_hz: 55.0,
            max_hz: 1760.0,
            threshold: 0.15,
        }
    }
}

impl YinConfig {
    /// Returns a copy with an invalid band or threshold replaced by defaults.
    pub fn sanitized(&self) -> Self {
        let defaults = Self::default();
        let band_ok = self.min_hz.is_finite()
            && self.max_hz.is_finite()
            && self.min_hz > 0.0
            && self.max_hz > self.min_hz;
        let (min_hz, max_hz) = if band_ok {
            (self.min_hz, self.max_hz)
        } else {
            (defaults.min_hz, defaults.max_hz)
        };
        let threshold = if self.threshold.is_finite() && self.threshold > 0.0 {
            self.threshold
        } else {
            defaults.threshold
        };
        Self {
            min_hz,
            max_hz,
            threshold,
        }
    }
}

/// A YIN detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YinEstimate {
    /// Detected fundamental in Hz.
    pub frequency: f64,
    /// CMND value at the chosen lag; 0 for a perfectly periodic signal.
    pub aperiodicity: f64,
}

impl YinEstimate {
    /// `1 - aperiodicity`, clamped to `[0, 1]`.
    pub fn clarity(&self) -> f64 {
        (1.0 - self.aperiodicity).clamp(0.0, 1.0)
    }
}

/// Detects the fundamental of `signal` and returns it in Hz.
///
/// Convenience wrapper around [`estimate_yin`].
pub fn detect_pitch_yin(signal: &[f32], sample_rate: u32, config: &YinConfig) -> Option<f64> {
    estimate_yin(signal, sample_rate, config).map(|estimate| estimate.frequency)
}

/// Runs YIN on one frame.
///
/// # Returns
/// * `Some(estimate)` - frequency inside the search band
/// * `None` - too few samples, no valid lag range, silence, a lag of one
///   sample or less, or a result outside the band
pub fn estimate_yin(signal: &[f32], sample_rate: u32, config: &YinConfig) -> Option<YinEstimate> {
    if signal.len() < MIN_YIN_SAMPLES || sample_rate == 0 {
        return None;
    }
    let config = config.sanitized();
    let sr = sample_rate as f64;
    let n = signal.len();

    let max_tau = ((sr / config.min_hz).ceil() as usize).min(n / 2);
    let min_tau = ((sr / config.max_hz).floor() as usize).max(2);
    if min_tau + 2 >= max_tau {
        return None;
    }
    let window_len = n - max_tau;

    // --- DC removal, in f64 so long sums stay exact enough ---
    let mean = signal.iter().map(|&s| s as f64).sum::<f64>() / n as f64;
    let x: Vec<f64> = signal.iter().map(|&s| s as f64 - mean).collect();
    let energy: f64 = x.iter().map(|v| v * v).sum();
    if !energy.is_finite() || energy < 1e-12 {
        return None;
    }

    // Weights per difference term, not per sample.
    let weights: Vec<f64> = (0..window_len)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / window_len as f64).cos()))
        .collect();

    // --- Difference function and cumulative mean normalized difference ---
    let mut cmnd = vec![1.0f64; max_tau + 1];
    let mut running_sum = 0.0;
    for tau in 1..=max_tau {
        let diff: f64 = x[..window_len]
            .iter()
            .zip(&x[tau..tau + window_len])
            .zip(&weights)
            .map(|((a, b), w)| {
                let delta = a - b;
                w * delta * delta
            })
            .sum();
        running_sum += diff;
        cmnd[tau] = if running_sum > 1e-12 {
            diff * tau as f64 / running_sum
        } else {
            1.0
        };
    }

    // --- First dip under the threshold that is a local minimum ---
    let first_dip = (min_tau..max_tau).find(|&tau| {
        let v = cmnd[tau];
        v < config.threshold && v <= cmnd[tau - 1] && v <= cmnd[tau + 1]
    });
    let tau = first_dip.or_else(|| {
        (min_tau..=max_tau).min_by(|&a, &b| cmnd[a].total_cmp(&cmnd[b]))
    })?;

    // --- Parabolic interpolation, clamped to one lag either side ---
    let refined_tau = if tau < max_tau {
        let (y1, y2, y3) = (cmnd[tau - 1], cmnd[tau], cmnd[tau + 1]);
        let denominator = y1 - 2.0 * y2 + y3;
        if denominator.abs() > 1e-12 {
            tau as f64 + (0.5 * (y1 - y3) / denominator).clamp(-1.0, 1.0)
        } else {
            tau as f64
        }
    } else {
        tau as f64
    };
    if refined_tau <= 1.0 {
        return None;
    }

    let frequency = sr / refined_tau;
    if frequency.is_finite() && (config.min_hz..=config.max_hz).contains(&frequency) {
        Some(YinEstimate {
            frequency,
            aperiodicity: cmnd[tau].max(0.0),
        })
    } else {
        None
    }
}

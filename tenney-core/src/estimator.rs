//! Per-frame pitch estimation.
//!
//! YIN runs first; its result is the FFT analyzer's hint. When YIN finds
//! nothing, the caller's hint (usually the last smoothed pitch) is used, then a
//! harmonic-product-spectrum estimate. The two detectors' answers are fused into
//! one [`PitchEstimate`].

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::analyzer::{AnalyzerConfig, EstimateSource, FftAnalyzer, Partial};
use crate::hps::HpsEstimator;
use crate::tuning::cents_between;
use crate::yin::{YinConfig, estimate_yin};

/// Fusion thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Frames with a lower RMS are treated as silence.
    pub silence_rms: f64,
    /// YIN and the analyzer agree when within this many cents.
    pub agreement_cents: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            silence_rms: 1e-4,
            agreement_cents: 50.0,
        }
    }
}

/// Detector whose frequency was reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PitchSource {
    Yin,
    Consensus,
    Hps,
}

impl From<EstimateSource> for PitchSource {
    fn from(source: EstimateSource) -> Self {
        match source {
            EstimateSource::Consensus => PitchSource::Consensus,
            EstimateSource::Hps => PitchSource::Hps,
        }
    }
}

/// One frame's pitch reading.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PitchEstimate {
    pub f0: Option<f64>,
    /// In `[0, 1]`; zero without an `f0`.
    pub confidence: f64,
    pub partials: Vec<Partial>,
    pub source: Option<PitchSource>,
}

/// YIN, HPS and the multi-harmonic analyzer behind one call.
pub struct PitchEstimator {
    config: EstimatorConfig,
    yin: YinConfig,
    analyzer: FftAnalyzer,
    hps: HpsEstimator,
}

impl PitchEstimator {
    pub fn new(config: EstimatorConfig, yin: YinConfig, analyzer: AnalyzerConfig) -> Self {
        Self {
            config,
            yin: yin.sanitized(),
            analyzer: FftAnalyzer::new(analyzer),
            hps: HpsEstimator::new(),
        }
    }

    pub fn analyzer(&self) -> &FftAnalyzer {
        &self.analyzer
    }

    /// Clears the analyzer's phase memory.
    pub fn reset(&self) {
        self.analyzer.reset();
    }

    /// Estimates the pitch of one mono frame.
    ///
    /// `hint` is a prior pitch used when YIN fails; `hop_samples` is the
    /// distance to the previous frame for phase refinement.
    pub fn estimate(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
        hint: Option<f64>,
        hop_samples: Option<usize>,
    ) -> PitchEstimate {
        if samples.is_empty() || sample_rate == 0 || rms(samples) < self.config.silence_rms {
            return PitchEstimate::default();
        }

        let yin = estimate_yin(samples, sample_rate, &self.yin);
        let analyzer_hint = match yin {
            Some(estimate) => Some(estimate.frequency),
            None => hint.or_else(|| {
                let band = self.analyzer.config();
                self.hps.estimate(samples, sample_rate, band.min_hz, band.max_hz)
            }),
        };
        let analysis = self
            .analyzer
            .analyze(samples, sample_rate, analyzer_hint, hop_samples);

        let (spectral_f0, spectral_confidence, spectral_source, partials) = match analysis {
            Some(a) => (a.f0, a.confidence, a.source, a.partials),
            None => (None, 0.0, None, Vec::new()),
        };

        let (f0, confidence, source) = match (yin, spectral_f0) {
            (Some(y), Some(f))
                if cents_between(f, y.frequency).abs() <= self.config.agreement_cents =>
            {
                (Some(f), spectral_confidence, spectral_source.map(PitchSource::from))
            }
            (Some(y), Some(_)) => (
                Some(y.frequency),
                spectral_confidence.min(y.clarity()) * 0.5,
                Some(PitchSource::Yin),
            ),
            (Some(y), None) => (Some(y.frequency), y.clarity() * 0.5, Some(PitchSource::Yin)),
            (None, Some(f)) => (
                Some(f),
                spectral_confidence,
                spectral_source.map(PitchSource::from),
            ),
            (None, None) => (None, 0.0, None),
        };
        trace!(?f0, confidence, ?source, "pitch estimate");

        PitchEstimate {
            f0,
            confidence: confidence.clamp(0.0, 1.0),
            partials,
            source,
        }
    }
}

fn rms(samples: &[f32]) -> f64 {
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const SR: u32 = 48000;

    fn estimator() -> PitchEstimator {
        PitchEstimator::new(
            EstimatorConfig::default(),
            YinConfig::default(),
            AnalyzerConfig::default(),
        )
    }

    fn tone(f0: f64, harmonics: usize, amplitude: f64, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f64 / SR as f64;
                (1..=harmonics)
                    .map(|h| amplitude / h as f64 * (2.0 * PI * f0 * h as f64 * t).sin())
                    .sum::<f64>() as f32
            })
            .collect()
    }

    #[test]
    fn test_agreeing_detectors_report_spectral_value() {
        let mut estimator = estimator();
        let estimate = estimator.estimate(&tone(220.0, 4, 0.4, 4096), SR, None, None);
        let f0 = estimate.f0.unwrap();
        assert!((f0 - 220.0).abs() / 220.0 < 0.002, "got {f0}");
        assert_eq!(estimate.source, Some(PitchSource::Consensus));
        assert!(estimate.confidence > 0.5);
        assert!(!estimate.partials.is_empty());
    }

    #[test]
    fn test_silence_gives_nothing() {
        let mut estimator = estimator();
        let quiet = tone(220.0, 1, 1e-5, 4096);
        assert_eq!(estimator.estimate(&quiet, SR, None, None), PitchEstimate::default());
        assert_eq!(estimator.estimate(&[], SR, None, None), PitchEstimate::default());
    }

    #[test]
    fn test_short_frame_falls_back_to_spectrum() {
        // Below YIN's minimum length; the analyzer still answers.
        let mut estimator = PitchEstimator::new(
            EstimatorConfig::default(),
            YinConfig::default(),
            AnalyzerConfig {
                min_fft_size: 1024,
                ..AnalyzerConfig::default()
            },
        );
        let estimate = estimator.estimate(&tone(440.0, 3, 0.4, 1024), SR, Some(440.0), None);
        assert_eq!(estimator.analyzer().fft_size(), 1024);
        let f0 = estimate.f0.unwrap();
        assert!(matches!(estimate.source, Some(PitchSource::Consensus | PitchSource::Hps)));
        assert!((f0 - 440.0).abs() / 440.0 < 0.01, "got {f0}");
    }
}

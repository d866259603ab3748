//! Session configuration.
//!
//! Every field has a default, so a partial JSON document (or none at all)
//! deserializes into a usable configuration. Out-of-range values are clamped
//! by [`TunerConfig::sanitized`] rather than rejected.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::analyzer::AnalyzerConfig;
use crate::estimator::EstimatorConfig;
use crate::pipeline::CaptureConfig;
use crate::ratio::PrimeLimit;
use crate::resolver::ResolverConfig;
use crate::smoothing::{PllConfig, SmootherKind};
use crate::solver::SolverConfig;
use crate::strictness::{Strictness, StrictnessProfile};
use crate::tuning::{DEFAULT_A4_HZ, is_valid_frequency};
use crate::yin::YinConfig;

/// Everything a [`TunerSession`](crate::session::TunerSession) needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Reference pitch the ratios are measured against, in Hz.
    pub root_hz: f64,
    pub prime_limit: PrimeLimit,
    pub strictness: Strictness,
    /// Replaces the preset's values when present.
    pub custom_profile: Option<StrictnessProfile>,
    pub smoother: SmootherKind,
    pub pll: PllConfig,
    pub yin: YinConfig,
    pub analyzer: AnalyzerConfig,
    pub estimator: EstimatorConfig,
    /// Estimates below this confidence are not fed forward.
    pub min_confidence: f64,
    /// A jump larger than this resets the smoother, in cents.
    pub reset_jump_cents: f64,
    pub resolver: ResolverConfig,
    pub solver: SolverConfig,
    pub capture: CaptureConfig,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            root_hz: DEFAULT_A4_HZ,
            prime_limit: PrimeLimit::default(),
            strictness: Strictness::default(),
            custom_profile: None,
            smoother: SmootherKind::default(),
            pll: PllConfig::default(),
            yin: YinConfig::default(),
            analyzer: AnalyzerConfig::default(),
            estimator: EstimatorConfig::default(),
            min_confidence: 0.2,
            reset_jump_cents: 100.0,
            resolver: ResolverConfig::default(),
            solver: SolverConfig::default(),
            capture: CaptureConfig::default(),
        }
    }
}

impl TunerConfig {
    /// Hysteresis, dwell and filter gains in effect.
    pub fn profile(&self) -> StrictnessProfile {
        self.custom_profile.unwrap_or_else(|| self.strictness.profile())
    }

    /// Returns a copy with invalid values replaced, logging each one.
    pub fn sanitized(&self) -> Self {
        let defaults = Self::default();
        let mut config = self.clone();

        if !is_valid_frequency(config.root_hz) {
            warn!(root_hz = config.root_hz, "invalid root frequency, using default");
            config.root_hz = defaults.root_hz;
        }
        if !(0.0..=1.0).contains(&config.min_confidence) {
            warn!(min_confidence = config.min_confidence, "min_confidence clamped");
            config.min_confidence = if config.min_confidence.is_nan() {
                defaults.min_confidence
            } else {
                config.min_confidence.clamp(0.0, 1.0)
            };
        }
        if !(config.reset_jump_cents.is_finite() && config.reset_jump_cents > 0.0) {
            warn!(reset_jump_cents = config.reset_jump_cents, "invalid reset jump, using default");
            config.reset_jump_cents = defaults.reset_jump_cents;
        }
        if let Some(profile) = config.custom_profile {
            if !profile.is_valid() {
                warn!(?profile, "invalid custom strictness profile, using preset");
                config.custom_profile = None;
            }
        }

        let yin = config.yin.sanitized();
        if yin != config.yin {
            warn!(?yin, "YIN configuration clamped");
            config.yin = yin;
        }
        config.analyzer = config.analyzer.sanitized();
        config.capture = config.capture.sanitized();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_uses_defaults() {
        let json = r#"{ "root_hz": 261.63, "prime_limit": 7, "strictness": "strict" }"#;
        let config: TunerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.root_hz, 261.63);
        assert_eq!(config.prime_limit, PrimeLimit::Seven);
        assert_eq!(config.profile(), Strictness::Strict.profile());
        assert_eq!(config.analyzer, AnalyzerConfig::default());
    }

    #[test]
    fn test_sanitize_repairs_invalid_values() {
        let config = TunerConfig {
            root_hz: -1.0,
            min_confidence: 3.0,
            reset_jump_cents: f64::NAN,
            custom_profile: Some(StrictnessProfile {
                hysteresis_cents: f64::INFINITY,
                ..StrictnessProfile::default()
            }),
            ..TunerConfig::default()
        }
        .sanitized();
        assert_eq!(config.root_hz, DEFAULT_A4_HZ);
        assert_eq!(config.min_confidence, 1.0);
        assert_eq!(config.reset_jump_cents, 100.0);
        assert_eq!(config.custom_profile, None);
    }

    #[test]
    fn test_custom_profile_overrides_preset() {
        let custom = StrictnessProfile {
            hysteresis_cents: 12.0,
            ..StrictnessProfile::default()
        };
        let config = TunerConfig {
            custom_profile: Some(custom),
            ..TunerConfig::default()
        };
        assert_eq!(config.profile().hysteresis_cents, 12.0);
    }
}

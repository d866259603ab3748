//! # Frequency Smoothing
//!
//! Turns the noisy per-frame `f0` into a stable trajectory. Two strategies sit
//! behind the [`Smoother`] trait:
//! - [`Kalman1D`], the default, a scalar Kalman filter whose gains come from
//!   the active [`StrictnessProfile`]
//! - [`DigitalPll`], a PI controller on the frequency error
//!
//! Exactly one smoother runs per session; [`SmootherKind`] picks which.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::strictness::StrictnessProfile;

/// Confidence floor used when scaling measurement trust.
const MIN_CONFIDENCE: f64 = 0.05;

/// Common interface of the frequency smoothers.
pub trait Smoother: Send {
    /// Feeds one measurement and returns the smoothed frequency in Hz.
    ///
    /// `confidence` in `[0, 1]` scales how much the measurement is trusted;
    /// `dt` is the time since the previous update in seconds.
    fn update(&mut self, measurement: f64, confidence: f64, dt: f64) -> f64;

    /// Current smoothed value, `None` before the first update.
    fn value(&self) -> Option<f64>;

    /// Forgets all state; the next update starts from scratch.
    fn reset(&mut self);

    /// Applies new strictness gains without resetting state.
    fn configure(&mut self, profile: &StrictnessProfile);
}

/// Scalar Kalman filter over frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct Kalman1D {
    q: f64,
    r: f64,
    x: Option<f64>,
    p: f64,
}

impl Kalman1D {
    /// Creates a filter with process noise `q` and measurement noise `r`.
    ///
    /// Non-positive or non-finite gains fall back to the performance preset.
    pub fn new(q: f64, r: f64) -> Self {
        let mut filter = Self {
            q: 0.0,
            r: 0.0,
            x: None,
            p: 0.0,
        };
        filter.set_gains(q, r);
        filter
    }

    /// Retunes the filter; the estimate and its variance are kept.
    pub fn set_gains(&mut self, q: f64, r: f64) {
        let defaults = StrictnessProfile::default();
        self.q = if q.is_finite() && q > 0.0 { q } else { defaults.kalman_q };
        self.r = if r.is_finite() && r > 0.0 { r } else { defaults.kalman_r };
    }

    /// Process noise.
    pub fn q(&self) -> f64 {
        self.q
    }

    /// Measurement noise.
    pub fn r(&self) -> f64 {
        self.r
    }

    /// Estimate variance.
    pub fn variance(&self) -> f64 {
        self.p
    }

    /// Time update: `p += q`.
    pub fn predict(&mut self) {
        if self.x.is_some() {
            self.p += self.q;
        }
    }

    /// Measurement update with the filter's own `r`.
    pub fn correct(&mut self, z: f64) -> f64 {
        self.correct_with_noise(z, self.r)
    }

    fn correct_with_noise(&mut self, z: f64, r: f64) -> f64 {
        match self.x {
            None => {
                self.x = Some(z);
                self.p = r;
                z
            }
            Some(x) => {
                let k = self.p / (self.p + r);
                let next = x + k * (z - x);
                self.p *= 1.0 - k;
                self.x = Some(next);
                next
            }
        }
    }
}

impl Default for Kalman1D {
    fn default() -> Self {
        let profile = StrictnessProfile::default();
        Self::new(profile.kalman_q, profile.kalman_r)
    }
}

impl Smoother for Kalman1D {
    /// Predict then correct; measurement noise grows as confidence drops.
    fn update(&mut self, measurement: f64, confidence: f64, _dt: f64) -> f64 {
        if !measurement.is_finite() {
            return self.x.unwrap_or(0.0);
        }
        let trust = confidence.clamp(MIN_CONFIDENCE, 1.0);
        self.predict();
        self.correct_with_noise(measurement, self.r / trust)
    }

    fn value(&self) -> Option<f64> {
        self.x
    }

    fn reset(&mut self) {
        self.x = None;
        self.p = 0.0;
    }

    fn configure(&mut self, profile: &StrictnessProfile) {
        self.set_gains(profile.kalman_q, profile.kalman_r);
    }
}

/// Gains of the [`DigitalPll`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PllConfig {
    /// Proportional gain.
    pub kp: f64,
    /// Integral gain, per second.
    pub ki: f64,
    /// Largest error, in Hz, acted on per update.
    pub max_step_hz: f64,
}

impl Default for PllConfig {
    fn default() -> Self {
        Self {
            kp: 0.35,
            ki: 2.0,
            max_step_hz: 25.0,
        }
    }
}

/// PI-controller smoother.
#[derive(Debug, Clone, PartialEq)]
pub struct DigitalPll {
    config: PllConfig,
    freq: Option<f64>,
    integrator: f64,
}

impl DigitalPll {
    pub fn new(config: PllConfig) -> Self {
        Self {
            config,
            freq: None,
            integrator: 0.0,
        }
    }

    pub fn config(&self) -> &PllConfig {
        &self.config
    }
}

impl Default for DigitalPll {
    fn default() -> Self {
        Self::new(PllConfig::default())
    }
}

impl Smoother for DigitalPll {
    fn update(&mut self, measurement: f64, confidence: f64, dt: f64) -> f64 {
        let Some(freq) = self.freq else {
            if measurement.is_finite() && measurement > 0.0 {
                self.freq = Some(measurement);
                return measurement;
            }
            return 0.0;
        };
        if !measurement.is_finite() {
            return freq;
        }

        let max_step = self.config.max_step_hz.abs();
        let step = (measurement - freq).clamp(-max_step, max_step) * confidence.clamp(0.0, 1.0);
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        self.integrator += self.config.ki * step * dt;
        let next = (freq + self.config.kp * step + self.integrator).max(0.0);
        self.freq = Some(next);
        next
    }

    fn value(&self) -> Option<f64> {
        self.freq
    }

    fn reset(&mut self) {
        self.freq = None;
        self.integrator = 0.0;
    }

    /// The PLL keeps its own gains; strictness does not retune it.
    fn configure(&mut self, _profile: &StrictnessProfile) {}
}

/// Which smoother a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmootherKind {
    #[default]
    Kalman,
    Pll,
}

impl SmootherKind {
    /// Builds the smoother, tuned from `profile` (Kalman) or `pll` (PLL).
    pub fn build(self, profile: &StrictnessProfile, pll: PllConfig) -> Box<dyn Smoother> {
        match self {
            SmootherKind::Kalman => Box::new(Kalman1D::new(profile.kalman_q, profile.kalman_r)),
            SmootherKind::Pll => Box::new(DigitalPll::new(pll)),
        }
    }
}

impl FromStr for SmootherKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kalman" => Ok(SmootherKind::Kalman),
            "pll" => Ok(SmootherKind::Pll),
            other => Err(format!("unknown smoother '{other}' (expected kalman or pll)")),
        }
    }
}

impl fmt::Display for SmootherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SmootherKind::Kalman => "kalman",
            SmootherKind::Pll => "pll",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strictness::Strictness;

    #[test]
    fn test_kalman_first_measurement_initializes() {
        let mut filter = Kalman1D::new(2.0, 6.0);
        assert_eq!(filter.value(), None);
        assert_eq!(filter.update(440.0, 1.0, 0.02), 440.0);
        assert_eq!(filter.variance(), 6.0);
    }

    #[test]
    fn test_kalman_matches_textbook_step() {
        let mut filter = Kalman1D::new(2.0, 6.0);
        filter.correct(440.0);
        filter.predict();
        let out = filter.correct(450.0);
        // p = 6 + 2 = 8, k = 8 / 14
        let k = 8.0 / 14.0;
        assert!((out - (440.0 + k * 10.0)).abs() < 1e-12);
        assert!((filter.variance() - (1.0 - k) * 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_kalman_converges_on_constant_input() {
        let mut filter = Kalman1D::default();
        filter.update(400.0, 1.0, 0.02);
        let mut out = 0.0;
        for _ in 0..200 {
            out = filter.update(440.0, 1.0, 0.02);
        }
        assert!((out - 440.0).abs() < 0.01);
    }

    #[test]
    fn test_kalman_low_confidence_moves_less() {
        let mut trusting = Kalman1D::default();
        let mut doubtful = Kalman1D::default();
        trusting.update(440.0, 1.0, 0.02);
        doubtful.update(440.0, 1.0, 0.02);
        let a = trusting.update(450.0, 1.0, 0.02);
        let b = doubtful.update(450.0, 0.2, 0.02);
        assert!(b < a);
        assert!(b > 440.0);
    }

    #[test]
    fn test_kalman_configure_keeps_state() {
        let mut filter = Kalman1D::default();
        filter.update(330.0, 1.0, 0.02);
        filter.configure(&Strictness::Strict.profile());
        assert_eq!(filter.value(), Some(330.0));
        assert_eq!((filter.q(), filter.r()), (1.0, 4.0));
        filter.reset();
        assert_eq!(filter.value(), None);
    }

    #[test]
    fn test_kalman_rejects_bad_gains() {
        let filter = Kalman1D::new(f64::NAN, -1.0);
        assert_eq!((filter.q(), filter.r()), (2.0, 6.0));
    }

    #[test]
    fn test_pll_step_is_clamped_and_scaled() {
        let mut pll = DigitalPll::new(PllConfig {
            kp: 0.5,
            ki: 0.0,
            max_step_hz: 10.0,
        });
        assert_eq!(pll.update(200.0, 1.0, 0.01), 200.0);
        // Error of 100 Hz is clamped to 10, halved by confidence, then kp.
        let out = pll.update(300.0, 0.5, 0.01);
        assert!((out - 202.5).abs() < 1e-12);
    }

    #[test]
    fn test_pll_tracks_and_never_goes_negative() {
        let mut pll = DigitalPll::default();
        pll.update(100.0, 1.0, 0.02);
        let mut out = 0.0;
        for _ in 0..400 {
            out = pll.update(110.0, 1.0, 0.02);
        }
        assert!((out - 110.0).abs() < 0.5, "got {out}");

        let mut falling = DigitalPll::new(PllConfig {
            kp: 5.0,
            ki: 0.0,
            max_step_hz: 100.0,
        });
        falling.update(10.0, 1.0, 0.02);
        assert_eq!(falling.update(1.0, 1.0, 0.02), 0.0);
    }

    #[test]
    fn test_kind_builds_matching_smoother() {
        let profile = StrictnessProfile::default();
        let mut smoother = SmootherKind::Pll.build(&profile, PllConfig::default());
        assert_eq!(smoother.update(220.0, 1.0, 0.02), 220.0);
        assert_eq!("PLL".parse::<SmootherKind>(), Ok(SmootherKind::Pll));
        assert!("median".parse::<SmootherKind>().is_err());
    }
}

//! Strictness presets: how eagerly the tuner re-targets and how hard it
//! smooths.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// User-facing strictness selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// Wide hysteresis, quick dwell, light smoothing.
    Loose,
    /// Balanced for live playing.
    #[default]
    Performance,
    /// Narrow hysteresis, long dwell, heavy smoothing.
    Strict,
}

impl Strictness {
    /// Every preset, loosest first.
    pub const ALL: [Strictness; 3] = [
        Strictness::Loose,
        Strictness::Performance,
        Strictness::Strict,
    ];

    /// The parameter set behind this preset.
    pub fn profile(self) -> StrictnessProfile {
        match self {
            Strictness::Loose => StrictnessProfile {
                hysteresis_cents: 8.0,
                min_dwell_ms: 140.0,
                kalman_q: 3.5,
                kalman_r: 8.0,
            },
            Strictness::Performance => StrictnessProfile {
                hysteresis_cents: 5.0,
                min_dwell_ms: 180.0,
                kalman_q: 2.0,
                kalman_r: 6.0,
            },
            Strictness::Strict => StrictnessProfile {
                hysteresis_cents: 3.0,
                min_dwell_ms: 240.0,
                kalman_q: 1.0,
                kalman_r: 4.0,
            },
        }
    }
}

impl FromStr for Strictness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "loose" => Ok(Strictness::Loose),
            "performance" => Ok(Strictness::Performance),
            "strict" => Ok(Strictness::Strict),
            other => Err(format!(
                "unknown strictness '{other}' (expected loose, performance or strict)"
            )),
        }
    }
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strictness::Loose => "loose",
            Strictness::Performance => "performance",
            Strictness::Strict => "strict",
        };
        f.write_str(name)
    }
}

/// Hysteresis, dwell and Kalman gains injected into the smoother and the
/// resolver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrictnessProfile {
    /// Band around the current target inside which the resolver never switches.
    pub hysteresis_cents: f64,
    /// Minimum time between two target switches.
    pub min_dwell_ms: f64,
    /// Kalman process noise.
    pub kalman_q: f64,
    /// Kalman measurement noise.
    pub kalman_r: f64,
}

impl StrictnessProfile {
    /// True when hysteresis and dwell are finite and non-negative.
    ///
    /// Kalman gains are not checked here; the filter replaces bad ones itself.
    pub fn is_valid(&self) -> bool {
        self.hysteresis_cents.is_finite()
            && self.hysteresis_cents >= 0.0
            && self.min_dwell_ms.is_finite()
            && self.min_dwell_ms >= 0.0
    }

    /// Dwell time as a [`Duration`]; negative or non-finite values become zero.
    pub fn min_dwell(&self) -> Duration {
        if self.min_dwell_ms.is_finite() && self.min_dwell_ms > 0.0 {
            Duration::from_micros((self.min_dwell_ms * 1000.0).round() as u64)
        } else {
            Duration::ZERO
        }
    }
}

impl Default for StrictnessProfile {
    fn default() -> Self {
        Strictness::default().profile()
    }
}

//! # Ratio Resolver
//!
//! Hysteresis and dwell-time state machine around the approximator. The
//! resolver holds one "current" target ratio and only moves away from it
//! when the live pitch leaves the hysteresis band *and* the previous switch
//! is at least the minimum dwell time old. This keeps the displayed target
//! from flickering between neighbouring ratios of similar fit.
//!
//! State changes only in [`RatioResolver::resolve`] and the explicit
//! reset/reconfigure calls; the resolver is not shared between threads.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

use crate::approximator::{ApproximationOptions, RatioApproximator};
use crate::ratio::{PrimeLimit, Ratio};
use crate::strictness::StrictnessProfile;
use crate::tuning::{cents_between, is_valid_frequency};

/// Budgets used by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Denominator cap for both approximations.
    pub max_denominator: u64,
    /// Error budget for the target ratio, in cents.
    pub target_cents: f64,
    /// Error budget for alternatives, in cents.
    pub alternative_cents: f64,
    /// Largest offset applied to numerator and denominator when looking for
    /// alternatives.
    pub perturbation: u64,
    /// Alternatives reported per call.
    pub max_alternatives: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_denominator: 64,
            target_cents: 60.0,
            alternative_cents: 120.0,
            perturbation: 2,
            max_alternatives: 2,
        }
    }
}

/// The resolver's persistent state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolverState {
    /// Target the display is locked to.
    pub current: Ratio,
    /// Live pitch against `current`, in cents.
    pub current_cents_error: f64,
    /// Time of the last switch; `None` until the first resolve.
    pub last_switch: Option<Duration>,
}

impl Default for ResolverState {
    fn default() -> Self {
        Self {
            current: Ratio::UNISON,
            current_cents_error: 0.0,
            last_switch: None,
        }
    }
}

/// A secondary ratio near the live pitch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alternative {
    pub ratio: Ratio,
    /// Live pitch against this ratio, in cents.
    pub cents_error: f64,
}

/// Output of one [`RatioResolver::resolve`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// State after the call.
    pub state: ResolverState,
    /// Best fit for this frame alone, before hysteresis.
    pub best: Option<Ratio>,
    /// Up to `max_alternatives` other nearby ratios, closest first.
    pub alternatives: Vec<Alternative>,
    /// True when this call changed (or first set) the target.
    pub switched: bool,
}

impl Resolution {
    /// Target ratio after the call.
    pub fn current(&self) -> Ratio {
        self.state.current
    }

    /// Live pitch against the target, in cents.
    pub fn cents_error(&self) -> f64 {
        self.state.current_cents_error
    }
}

/// Stateful ratio resolver for one root.
#[derive(Debug, Clone)]
pub struct RatioResolver {
    root_hz: f64,
    limit: PrimeLimit,
    config: ResolverConfig,
    profile: StrictnessProfile,
    target: RatioApproximator,
    wide: RatioApproximator,
    state: ResolverState,
    /// Set until the first switch away from `1/1`; while set, dwell and
    /// hysteresis do not apply.
    initial: bool,
}

impl RatioResolver {
    pub fn new(
        root_hz: f64,
        limit: PrimeLimit,
        config: ResolverConfig,
        profile: StrictnessProfile,
    ) -> Self {
        let (target, wide) = approximators(limit, &config);
        Self {
            root_hz,
            limit,
            config,
            profile,
            target,
            wide,
            state: ResolverState::default(),
            initial: true,
        }
    }

    pub fn root_hz(&self) -> f64 {
        self.root_hz
    }

    pub fn prime_limit(&self) -> PrimeLimit {
        self.limit
    }

    pub fn profile(&self) -> &StrictnessProfile {
        &self.profile
    }

    pub fn state(&self) -> &ResolverState {
        &self.state
    }

    /// Applies new hysteresis and dwell settings; the current target stays.
    pub fn configure(&mut self, profile: StrictnessProfile) {
        self.profile = profile;
    }

    /// Switches prime limit and starts over from `1/1`.
    pub fn set_prime_limit(&mut self, limit: PrimeLimit) {
        self.limit = limit;
        (self.target, self.wide) = approximators(limit, &self.config);
        self.state = ResolverState::default();
        self.initial = true;
    }

    /// Starts over from `1/1` against a new root.
    pub fn reset(&mut self, root_hz: f64) {
        debug!(root_hz, "resolver reset");
        self.root_hz = root_hz;
        self.state = ResolverState::default();
        self.initial = true;
    }

    /// Resolves a live frequency at monotonic time `now`.
    ///
    /// Invalid frequency or root leaves the state untouched and reports no
    /// alternatives.
    pub fn resolve(&mut self, frequency_hz: f64, now: Duration) -> Resolution {
        if !is_valid_frequency(frequency_hz) || !is_valid_frequency(self.root_hz) {
            return Resolution {
                state: self.state,
                best: None,
                alternatives: Vec::new(),
                switched: false,
            };
        }

        let x = frequency_hz / self.root_hz;
        let best = self.target.approximate(x);
        let current = self.state.current;

        let switched = match self.state.last_switch {
            None => true,
            Some(_) if best == current => false,
            Some(_) if self.initial => true,
            Some(last) => {
                let drift = cents_between(x, current.value()).abs();
                drift > self.profile.hysteresis_cents
                    && now.saturating_sub(last) >= self.profile.min_dwell()
            }
        };

        if switched {
            if best != current {
                debug!(from = %current, to = %best, frequency_hz, "resolver switch");
            }
            self.state.current = best;
            self.state.last_switch = Some(now);
            self.initial &= best.is_unison();
        }
        self.state.current_cents_error = cents_between(x, self.state.current.value());

        Resolution {
            state: self.state,
            best: Some(best),
            alternatives: self.alternatives(x),
            switched,
        }
    }

    /// Nearby 13-limit ratios other than the target, closest first.
    fn alternatives(&self, x: f64) -> Vec<Alternative> {
        let anchor = self.wide.approximate(x);
        let span = self.config.perturbation as i64;
        let (num, den) = (anchor.numerator() as i64, anchor.denominator() as i64);

        let mut seen = HashSet::new();
        let mut found: Vec<Alternative> = Vec::new();
        for dn in -span..=span {
            for dd in -span..=span {
                let (n, d) = (num + dn, den + dd);
                if n <= 0 || d <= 0 {
                    continue;
                }
                let ratio = Ratio::new(n as u64, d as u64);
                if ratio == self.state.current || ratio.monzo().is_none() || !seen.insert(ratio) {
                    continue;
                }
                let cents_error = cents_between(x, ratio.value());
                if cents_error.abs() <= self.config.alternative_cents {
                    found.push(Alternative { ratio, cents_error });
                }
            }
        }

        found.sort_by(|a, b| {
            a.cents_error
                .abs()
                .total_cmp(&b.cents_error.abs())
                .then_with(|| a.ratio.tenney_height().total_cmp(&b.ratio.tenney_height()))
        });
        found.truncate(self.config.max_alternatives);
        found
    }
}

fn approximators(
    limit: PrimeLimit,
    config: &ResolverConfig,
) -> (RatioApproximator, RatioApproximator) {
    let options = |max_cents_error| ApproximationOptions {
        prime_limit: limit,
        max_denominator: config.max_denominator,
        max_cents_error,
    };
    (
        RatioApproximator::new(options(config.target_cents)),
        RatioApproximator::new(options(config.alternative_cents)),
    )
}

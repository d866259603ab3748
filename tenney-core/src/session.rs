//! # Tuner Session
//!
//! One logical tuning session: pitch estimation, smoothing, ratio resolution
//! and neighbour lookup for a single root. [`TunerSession::process`] returns
//! its [`AnalysisResult`] directly; delivering results elsewhere is the
//! caller's business (see [`crate::pipeline`]).
//!
//! A session is not shared between threads without external serialization.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::TunerConfig;
use crate::estimator::{PitchEstimate, PitchEstimator};
use crate::ratio::PrimeLimit;
use crate::resolver::RatioResolver;
use crate::smoothing::{Smoother, SmootherKind};
use crate::solver::RatioSolver;
use crate::strictness::{Strictness, StrictnessProfile};
use crate::tuning::{DEFAULT_A4_HZ, cents_between, find_nearest_note, is_valid_frequency};
use crate::{AnalysisResult, SampleFrame};

pub struct TunerSession {
    config: TunerConfig,
    profile: StrictnessProfile,
    estimator: PitchEstimator,
    smoother: Box<dyn Smoother>,
    resolver: RatioResolver,
    solver: Arc<RatioSolver>,
    /// Start sample and rate of the previous frame, for the analyzer's hop.
    last_frame: Option<(u64, u32)>,
    last_timestamp: Option<Duration>,
}

impl TunerSession {
    /// Builds a session from `config` (sanitized first) sharing `solver`.
    pub fn new(config: TunerConfig, solver: Arc<RatioSolver>) -> Self {
        let config = config.sanitized();
        let profile = config.profile();
        let estimator = PitchEstimator::new(config.estimator, config.yin, config.analyzer);
        let smoother = config.smoother.build(&profile, config.pll);
        let resolver =
            RatioResolver::new(config.root_hz, config.prime_limit, config.resolver, profile);
        Self {
            config,
            profile,
            estimator,
            smoother,
            resolver,
            solver,
            last_frame: None,
            last_timestamp: None,
        }
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    pub fn profile(&self) -> &StrictnessProfile {
        &self.profile
    }

    pub fn resolver(&self) -> &RatioResolver {
        &self.resolver
    }

    pub fn solver(&self) -> &Arc<RatioSolver> {
        &self.solver
    }

    /// Current smoothed frequency, if any.
    pub fn frequency(&self) -> Option<f64> {
        self.smoother.value()
    }

    /// Analyzes one frame observed at monotonic time `timestamp`.
    pub fn process(&mut self, frame: &SampleFrame, timestamp: Duration) -> AnalysisResult {
        let hop = self.hop_since_last(frame);
        let dt = self
            .last_timestamp
            .map_or(0.0, |previous| timestamp.saturating_sub(previous).as_secs_f64());
        self.last_timestamp = Some(timestamp);

        let hint = self.smoother.value();
        let PitchEstimate {
            f0,
            confidence,
            partials,
            source,
        } = self
            .estimator
            .estimate(&frame.samples, frame.sample_rate, hint, hop);

        let mut result = AnalysisResult {
            timestamp,
            rms: frame.rms(),
            peak: frame.peak(),
            raw_f0: f0,
            frequency: None,
            confidence,
            partials,
            source,
            resolution: None,
            neighbors: None,
            note: None,
        };
        let Some(f0) = f0.filter(|_| confidence >= self.config.min_confidence) else {
            return result;
        };

        if let Some(previous) = self.smoother.value() {
            if cents_between(f0, previous).abs() > self.config.reset_jump_cents {
                debug!(from = previous, to = f0, "pitch jump, smoother reset");
                self.smoother.reset();
            }
        }
        let frequency = self.smoother.update(f0, confidence, dt);

        result.frequency = Some(frequency);
        result.resolution = Some(self.resolver.resolve(frequency, timestamp));
        result.neighbors = self
            .solver
            .nearest_with_neighbors(frequency, self.config.root_hz, self.config.prime_limit);
        result.note = find_nearest_note(frequency, DEFAULT_A4_HZ);
        result
    }

    /// Moves to a new root; the smoother and resolver start over.
    pub fn set_root(&mut self, root_hz: f64) {
        if !is_valid_frequency(root_hz) {
            warn!(root_hz, "ignoring invalid root frequency");
            return;
        }
        self.config.root_hz = root_hz;
        self.smoother.reset();
        self.resolver.reset(root_hz);
    }

    /// Switches to a strictness preset without disturbing state.
    pub fn set_strictness(&mut self, strictness: Strictness) {
        self.config.strictness = strictness;
        self.config.custom_profile = None;
        self.apply_profile(strictness.profile());
    }

    /// Switches to a custom profile without disturbing state.
    ///
    /// A profile with non-finite or negative hysteresis or dwell is ignored.
    pub fn set_profile(&mut self, profile: StrictnessProfile) {
        if !profile.is_valid() {
            warn!(?profile, "ignoring invalid strictness profile");
            return;
        }
        self.config.custom_profile = Some(profile);
        self.apply_profile(profile);
    }

    /// Changes the prime limit; the resolver starts over from `1/1`.
    pub fn set_prime_limit(&mut self, limit: PrimeLimit) {
        self.config.prime_limit = limit;
        self.resolver.set_prime_limit(limit);
    }

    /// Replaces the smoother with a fresh one of `kind`.
    pub fn set_smoother(&mut self, kind: SmootherKind) {
        self.config.smoother = kind;
        self.smoother = kind.build(&self.profile, self.config.pll);
    }

    /// Forgets all per-stream state: smoother, resolver, phase memory, clock.
    pub fn reset(&mut self) {
        self.smoother.reset();
        self.resolver.reset(self.config.root_hz);
        self.estimator.reset();
        self.last_frame = None;
        self.last_timestamp = None;
    }

    fn apply_profile(&mut self, profile: StrictnessProfile) {
        self.profile = profile;
        self.smoother.configure(&profile);
        self.resolver.configure(profile);
    }

    fn hop_since_last(&mut self, frame: &SampleFrame) -> Option<usize> {
        let hop = match self.last_frame {
            Some((start, rate)) if rate == frame.sample_rate && frame.start_sample > start => {
                usize::try_from(frame.start_sample - start).ok()
            }
            _ => None,
        };
        self.last_frame = Some((frame.start_sample, frame.sample_rate));
        hop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratio::Ratio;
    use std::f64::consts::PI;

    const SR: u32 = 48000;
    const LEN: usize = 4096;

    fn frame(f0: f64, start: u64) -> SampleFrame {
        let samples = (0..LEN)
            .map(|i| {
                let t = (start + i as u64) as f64 / SR as f64;
                (1..=4)
                    .map(|h| 0.4 / h as f64 * (2.0 * PI * f0 * h as f64 * t).sin())
                    .sum::<f64>() as f32
            })
            .collect();
        SampleFrame::new(samples, SR, start)
    }

    fn session() -> TunerSession {
        TunerSession::new(TunerConfig::default(), Arc::new(RatioSolver::default()))
    }

    #[test]
    fn test_tone_resolves_against_root() {
        let mut session = session();
        let mut result = None;
        for i in 0..4 {
            let frame = frame(220.0, i * 1024);
            result = Some(session.process(&frame, frame.end_time()));
        }
        let result = result.unwrap();
        let frequency = result.frequency.unwrap();
        assert!((frequency - 220.0).abs() / 220.0 < 0.005, "got {frequency}");
        assert_eq!(result.resolution.unwrap().current(), Ratio::new(1, 2));
        assert_eq!(result.neighbors.unwrap().nearest.ratio, Ratio::new(1, 2));
        assert_eq!(result.note.unwrap().name, "A3");
    }

    #[test]
    fn test_silence_is_gated() {
        let mut session = session();
        let silent = SampleFrame::new(vec![0.0; LEN], SR, 0);
        let result = session.process(&silent, silent.end_time());
        assert_eq!(result.frequency, None);
        assert!(result.resolution.is_none());
        assert_eq!(session.frequency(), None);
    }

    #[test]
    fn test_large_jump_resets_smoother() {
        let mut session = session();
        let first = frame(220.0, 0);
        session.process(&first, first.end_time());
        let second = frame(330.0, 1024);
        let result = session.process(&second, second.end_time());
        let frequency = result.frequency.unwrap();
        assert!((frequency - 330.0).abs() / 330.0 < 0.01, "got {frequency}");
    }

    #[test]
    fn test_hop_follows_start_sample() {
        let mut session = session();
        assert_eq!(session.hop_since_last(&frame(220.0, 0)), None);
        assert_eq!(session.hop_since_last(&frame(220.0, 2048)), Some(2048));
        // Going backwards breaks continuity.
        assert_eq!(session.hop_since_last(&frame(220.0, 1024)), None);
    }

    #[test]
    fn test_root_change_restarts_resolution() {
        let mut session = session();
        let tone = frame(220.0, 0);
        session.process(&tone, tone.end_time());
        session.set_root(110.0);
        assert_eq!(session.frequency(), None);
        assert_eq!(session.resolver().state().last_switch, None);
        session.set_root(f64::NAN);
        assert_eq!(session.config().root_hz, 110.0);
    }

    #[test]
    fn test_strictness_change_keeps_target() {
        let mut session = session();
        let tone = frame(220.0, 0);
        session.process(&tone, tone.end_time());
        let target = session.resolver().state().current;
        session.set_strictness(Strictness::Strict);
        assert_eq!(session.profile(), &Strictness::Strict.profile());
        assert_eq!(session.resolver().state().current, target);
    }

    #[test]
    fn test_invalid_profile_is_ignored() {
        let mut session = session();
        let tone = frame(660.0, 0);
        session.process(&tone, tone.end_time());
        session.set_profile(StrictnessProfile {
            hysteresis_cents: f64::NAN,
            ..StrictnessProfile::default()
        });
        assert_eq!(session.profile(), &Strictness::Performance.profile());
        assert_eq!(session.config().custom_profile, None);
        assert_eq!(session.resolver().profile(), &Strictness::Performance.profile());

        // Switching still works after the rejected profile.
        let tone = frame(550.0, 1024);
        let result = session.process(&tone, Duration::from_secs(1));
        assert!(result.resolution.unwrap().switched);
        assert_ne!(session.resolver().state().current, Ratio::new(3, 2));
    }

    #[test]
    fn test_runtime_reconfiguration() {
        let mut session = session();
        let custom = StrictnessProfile {
            hysteresis_cents: 15.0,
            ..StrictnessProfile::default()
        };
        session.set_profile(custom);
        assert_eq!(session.profile(), &custom);
        assert_eq!(session.config().profile(), custom);

        session.set_smoother(SmootherKind::Pll);
        assert_eq!(session.config().smoother, SmootherKind::Pll);
        assert_eq!(session.frequency(), None);
        let tone = frame(220.0, 0);
        let result = session.process(&tone, tone.end_time());
        let frequency = result.frequency.unwrap();
        assert!((frequency - 220.0).abs() / 220.0 < 0.005, "got {frequency}");

        session.set_prime_limit(PrimeLimit::Three);
        assert_eq!(session.resolver().prime_limit(), PrimeLimit::Three);
        session.reset();
        assert_eq!(session.frequency(), None);
    }
}

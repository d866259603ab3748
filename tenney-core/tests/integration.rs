//! Integration tests for tenney-core.
//!
//! Resolver scenarios run against millisecond timestamps; pipeline tests push
//! synthesized tones through the capture ring and the analysis scheduler.

use std::f64::consts::PI;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Receiver;
use tenney_core::pipeline::{
    AnalysisPipeline, CaptureConfig, CaptureWriter, Schedule, capture_channel,
};
use tenney_core::ratio::{PrimeLimit, Ratio};
use tenney_core::resolver::{RatioResolver, ResolverConfig};
use tenney_core::solver::RatioSolver;
use tenney_core::strictness::Strictness;
use tenney_core::{AnalysisResult, TunerConfig, TunerSession};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const SR: u32 = 48000;

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn resolver(limit: PrimeLimit) -> RatioResolver {
    RatioResolver::new(440.0, limit, ResolverConfig::default(), Strictness::Performance.profile())
}

/// A tone with three decaying harmonics, starting at stream position `start`.
fn tone(f0: f64, start: usize, len: usize) -> Vec<f32> {
    (start..start + len)
        .map(|i| {
            let t = i as f64 / SR as f64;
            (1..=3)
                .map(|h| 0.3 / h as f64 * (2.0 * PI * f0 * h as f64 * t).sin())
                .sum::<f64>() as f32
        })
        .collect()
}

fn pipeline(capture: CaptureConfig) -> (CaptureWriter, AnalysisPipeline, Receiver<AnalysisResult>) {
    let (writer, frames) = capture_channel(&capture, SR);
    let session = TunerSession::new(
        TunerConfig {
            capture,
            ..TunerConfig::default()
        },
        Arc::new(RatioSolver::default()),
    );
    let (pipeline, results) = AnalysisPipeline::new(session, frames, 64);
    (writer, pipeline, results)
}

// ===========================================================================
// 1. Resolver
// ===========================================================================

#[test]
fn test_performance_scenario_five_limit() {
    let mut resolver = resolver(PrimeLimit::Five);

    let first = resolver.resolve(440.0, ms(0));
    assert_eq!(first.current(), Ratio::UNISON);
    assert!(first.switched);

    let fifth = resolver.resolve(660.0, ms(50));
    assert_eq!(fifth.current(), Ratio::new(3, 2));
    assert!(fifth.switched);
    assert!(fifth.cents_error().abs() < 1e-9);

    let sharp = resolver.resolve(661.5, ms(100));
    assert_eq!(sharp.current(), Ratio::new(3, 2));
    assert!(!sharp.switched);
    assert!((sharp.cents_error() - 3.93).abs() < 0.01);

    let early = resolver.resolve(700.0, ms(150));
    assert_eq!(early.current(), Ratio::new(3, 2));
    assert!(!early.switched);
    assert_eq!(early.best, Some(Ratio::new(8, 5)));

    let late = resolver.resolve(700.0, ms(260));
    assert_eq!(late.current(), Ratio::new(8, 5));
    assert!(late.switched);
    assert_eq!(resolver.state().last_switch, Some(ms(260)));
}

#[test]
fn test_performance_scenario_thirteen_limit() {
    let mut resolver = resolver(PrimeLimit::Thirteen);
    resolver.resolve(440.0, ms(0));
    resolver.resolve(660.0, ms(50));
    assert!(!resolver.resolve(661.5, ms(100)).switched);
    assert!(!resolver.resolve(700.0, ms(150)).switched);

    let late = resolver.resolve(700.0, ms(260));
    assert!(late.switched);
    assert_eq!(late.current(), Ratio::new(35, 22));
    assert!(late.cents_error().abs() < 1e-9);
}

#[test]
fn test_oscillation_inside_band_never_switches() {
    let mut resolver = resolver(PrimeLimit::Eleven);
    resolver.resolve(660.0, ms(0));
    assert_eq!(resolver.state().current, Ratio::new(3, 2));

    let band = Strictness::Performance.profile().hysteresis_cents;
    for step in 1..=500u64 {
        let offset = band * 0.98 * (step as f64 * 0.7).sin();
        let frequency = 660.0 * 2f64.powf(offset / 1200.0);
        let resolution = resolver.resolve(frequency, ms(step * 1000));
        assert_eq!(resolution.current(), Ratio::new(3, 2), "step {step}");
        assert!(!resolution.switched);
    }
}

#[test]
fn test_dwell_holds_until_elapsed() {
    let mut resolver = resolver(PrimeLimit::Five);
    resolver.resolve(660.0, ms(1000));
    let dwell = Strictness::Performance.profile().min_dwell_ms as u64;

    let mut switched_at = None;
    for t in (1010..=1400).step_by(10) {
        let resolution = resolver.resolve(550.0, ms(t));
        if resolution.switched {
            switched_at = Some(t);
            assert_eq!(resolution.current(), Ratio::new(5, 4));
            break;
        }
        assert_eq!(resolution.current(), Ratio::new(3, 2));
    }
    assert_eq!(switched_at, Some(1000 + dwell));
}

#[test]
fn test_invalid_frequency_leaves_state() {
    let mut resolver = resolver(PrimeLimit::Seven);
    resolver.resolve(660.0, ms(0));
    let before = *resolver.state();
    for frequency in [f64::NAN, f64::INFINITY, 0.0, -440.0] {
        let resolution = resolver.resolve(frequency, ms(500));
        assert_eq!(resolution.state, before);
        assert!(resolution.alternatives.is_empty());
    }
}

// ===========================================================================
// 2. Solver
// ===========================================================================

#[test]
fn test_five_limit_unit_ratios() {
    let solver = RatioSolver::default();
    let table = solver.unit_ratios(PrimeLimit::Five);
    for (p, q) in [(6, 5), (5, 4), (4, 3), (3, 2), (8, 5), (5, 3)] {
        assert!(table.iter().any(|u| u.ratio == Ratio::new(p, q)), "missing {p}/{q}");
    }
    for unit in table.iter() {
        let monzo = unit.ratio.monzo().unwrap();
        assert!(monzo.prime_limit() <= 5, "{} escapes the 5-limit", unit.ratio);
    }
}

// ===========================================================================
// 3. Pipeline
// ===========================================================================

#[test]
fn test_try_analyze_schedules_single_flight() {
    let (mut writer, pipeline, results) = pipeline(CaptureConfig::default());

    assert_eq!(pipeline.try_analyze(), Schedule::Idle);

    writer.push(&tone(330.0, 0, 4096));
    // Holding the session makes every other attempt drop out.
    let busy = pipeline.with_session(|_| pipeline.try_analyze());
    assert_eq!(busy, Schedule::Busy);
    assert_eq!(pipeline.skipped_requests(), 1);

    assert_eq!(pipeline.try_analyze(), Schedule::Analyzed);
    let result = results.try_recv().unwrap();
    let frequency = result.frequency.unwrap();
    assert!((frequency - 330.0).abs() / 330.0 < 0.005, "got {frequency}");
    assert_eq!(result.timestamp, Duration::from_secs_f64(4096.0 / SR as f64));
    assert_eq!(result.ratio(), Some(Ratio::new(3, 4)));
}

#[test]
fn test_capture_thread_feeds_analysis() {
    let capture = CaptureConfig {
        frame_len: 4096,
        hop: 2048,
        queue_depth: 4,
    };
    let (mut writer, pipeline, results) = pipeline(capture);
    let signal = tone(495.0, 0, SR as usize);
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        scope.spawn(|| {
            for block in signal.chunks(512) {
                writer.push(block);
            }
            done.store(true, Ordering::Release);
        });
        loop {
            let finished = done.load(Ordering::Acquire);
            if pipeline.try_analyze() == Schedule::Idle {
                if finished {
                    break;
                }
                pipeline.wait_for_frame(Duration::from_millis(5));
            }
        }
    });

    let analyzed: Vec<_> = results.try_iter().collect();
    assert!(!analyzed.is_empty());
    let last = analyzed.last().unwrap();
    assert_eq!(last.ratio(), Some(Ratio::new(9, 8)));
    assert!(analyzed.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    assert!(pipeline.frames().meter().peak() > 0.0);
}

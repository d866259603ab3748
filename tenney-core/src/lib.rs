// tenney-core/src/lib.rs

//! The headless core of the just-intonation tuner.
//! This crate turns mono sample frames into a smoothed pitch and a stable
//! just-intonation target relative to a root. It never touches audio
//! hardware and contains no UI code.

use std::time::Duration;

pub mod analyzer;
pub mod approximator;
pub mod config;
pub mod estimator;
pub mod fft;
pub mod hps;
pub mod pipeline;
pub mod ratio;
pub mod resolver;
pub mod session;
pub mod smoothing;
pub mod solver;
pub mod strictness;
pub mod tuning;
pub mod yin;

pub use analyzer::Partial;
pub use config::TunerConfig;
pub use estimator::PitchSource;
pub use pipeline::{
    AnalysisPipeline, CaptureConfig, CaptureWriter, FrameReceiver, Schedule, capture_channel,
};
pub use ratio::{PrimeLimit, Ratio};
pub use resolver::Resolution;
pub use session::TunerSession;
pub use solver::{Neighborhood, RatioSolver};
pub use strictness::{Strictness, StrictnessProfile};
pub use tuning::NoteReading;

/// A block of mono samples taken from a continuous stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Stream position of `samples[0]`.
    pub start_sample: u64,
}

impl SampleFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, start_sample: u64) -> Self {
        Self {
            samples,
            sample_rate,
            start_sample,
        }
    }

    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum / self.samples.len() as f32).sqrt()
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0, |peak, s| peak.max(s.abs()))
    }

    /// Stream position one past the last sample.
    pub fn end_sample(&self) -> u64 {
        self.start_sample + self.samples.len() as u64
    }

    /// Stream time at the end of the frame, from the sample clock.
    pub fn end_time(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.end_sample() as f64 / self.sample_rate as f64)
    }
}

/// Represents the result of a single analysis frame.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    /// Monotonic time of the frame.
    pub timestamp: Duration,
    pub rms: f32,
    pub peak: f32,
    /// The unsmoothed estimate, even when gated out.
    pub raw_f0: Option<f64>,
    /// The smoothed frequency in Hz; `None` when the frame was gated.
    pub frequency: Option<f64>,
    /// The confidence of the estimate (0.0 to 1.0).
    pub confidence: f64,
    /// Harmonics that supported the estimate.
    pub partials: Vec<Partial>,
    pub source: Option<PitchSource>,
    /// Target ratio, cents error and alternatives.
    pub resolution: Option<Resolution>,
    /// Solver candidates around the smoothed frequency.
    pub neighbors: Option<Neighborhood>,
    /// Nearest equal-tempered note, for reference.
    pub note: Option<NoteReading>,
}

impl AnalysisResult {
    /// Target ratio after this frame, if one was resolved.
    pub fn ratio(&self) -> Option<Ratio> {
        self.resolution.as_ref().map(Resolution::current)
    }

    /// Signed cents of the smoothed pitch against the target.
    pub fn cents_error(&self) -> Option<f64> {
        self.resolution.as_ref().map(Resolution::cents_error)
    }
}

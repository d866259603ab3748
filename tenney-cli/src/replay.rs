//! WAV replay through the same capture path as live input.

use anyhow::{Context, Result, bail};
use hound::{SampleFormat, WavReader};
use std::path::Path;
use std::sync::Arc;
use tenney_core::pipeline::{AnalysisPipeline, Schedule, capture_channel};
use tenney_core::{AnalysisResult, RatioSolver, TunerConfig, TunerSession};

/// Reads a WAV file as mono f32, averaging channels.
pub fn read_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let reader = WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    if spec.channels == 0 {
        bail!("{} declares no channels", path.display());
    }

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .context("decoding float samples")?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .context("decoding integer samples")?
        }
    };

    let channels = usize::from(spec.channels);
    let mono = if channels > 1 {
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        samples
    };
    Ok((mono, spec.sample_rate))
}

/// Pushes `samples` through a capture ring hop by hop, analyzing every frame.
///
/// Offline replay never drops frames: each push completes at most one frame
/// and it is analyzed before the next push.
pub fn replay(
    samples: &[f32],
    sample_rate: u32,
    config: TunerConfig,
    solver: Arc<RatioSolver>,
    mut on_result: impl FnMut(&AnalysisResult),
) -> usize {
    let capture = config.capture.sanitized();
    let (mut writer, frames) = capture_channel(&capture, sample_rate);
    let session = TunerSession::new(config, solver);
    let (pipeline, results) = AnalysisPipeline::new(session, frames, 1);

    let mut analyzed = 0;
    for block in samples.chunks(capture.hop) {
        writer.push(block);
        while pipeline.try_analyze() == Schedule::Analyzed {
            for result in results.try_iter() {
                on_result(&result);
                analyzed += 1;
            }
        }
    }
    analyzed
}

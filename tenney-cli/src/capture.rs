//! # Audio Capture
//!
//! Opens the default input device with cpal and feeds its samples into a
//! [`CaptureWriter`]. The stream callback downmixes to mono through a
//! preallocated block and never allocates.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, SupportedStreamConfigRange};
use tenney_core::pipeline::{CaptureConfig, CaptureWriter, FrameReceiver, capture_channel};
use tracing::{error, info};

/// Frames (one sample per channel) downmixed per step inside the callback.
const MONO_BLOCK: usize = 512;

/// A running input stream and the analysis end of its frames.
pub struct Capture {
    /// Dropping the stream stops capture.
    pub stream: cpal::Stream,
    pub frames: FrameReceiver,
    pub sample_rate: u32,
}

/// Starts capture from the default input device, as close to
/// `preferred_rate` as the device allows.
pub fn start_capture(config: &CaptureConfig, preferred_rate: u32) -> Result<Capture> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("no input device available"))?;
    info!(device = %device.name().unwrap_or_else(|_| "unknown".into()), "using input device");

    let ranges = device
        .supported_input_configs()
        .context("querying input configurations")?
        .collect::<Vec<_>>();
    let range = find_supported_config(ranges, preferred_rate)
        .ok_or_else(|| anyhow!("no f32 input format available"))?;
    let rate = preferred_rate.clamp(range.min_sample_rate().0, range.max_sample_rate().0);
    let stream_config: cpal::StreamConfig = range.with_sample_rate(SampleRate(rate)).into();
    let channels = usize::from(stream_config.channels.max(1));
    info!(sample_rate = rate, channels, "input stream configured");

    let (writer, frames) = capture_channel(config, rate);
    let mut downmix = Downmix::new(writer, channels);
    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| downmix.push(data),
            |err| error!(%err, "input stream error"),
            None,
        )
        .context("building input stream")?;
    stream.play().context("starting input stream")?;

    Ok(Capture {
        stream,
        frames,
        sample_rate: rate,
    })
}

/// Interleaved-to-mono adapter in front of a [`CaptureWriter`].
struct Downmix {
    writer: CaptureWriter,
    channels: usize,
    block: Vec<f32>,
}

impl Downmix {
    fn new(writer: CaptureWriter, channels: usize) -> Self {
        Self {
            writer,
            channels,
            block: Vec::with_capacity(MONO_BLOCK),
        }
    }

    fn push(&mut self, interleaved: &[f32]) {
        if self.channels == 1 {
            self.writer.push(interleaved);
            return;
        }
        let scale = 1.0 / self.channels as f32;
        for chunk in interleaved.chunks(self.channels * MONO_BLOCK) {
            self.block.clear();
            self.block
                .extend(chunk.chunks(self.channels).map(|frame| frame.iter().sum::<f32>() * scale));
            self.writer.push(&self.block);
        }
    }
}

/// Picks an f32 configuration whose rate range is closest to `target_rate`,
/// preferring fewer channels.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .min_by_key(|c| {
            let (min, max) = (c.min_sample_rate().0, c.max_sample_rate().0);
            let distance = if target_rate < min {
                min - target_rate
            } else {
                target_rate.saturating_sub(max)
            };
            (distance, c.channels())
        })
}

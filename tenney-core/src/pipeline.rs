//! # Capture / Analysis Decoupling
//!
//! The capture side ([`CaptureWriter`]) runs inside the audio callback. It
//! copies samples into a history ring, updates a [`LevelMeter`] and, every
//! `hop` samples, hands a full frame to the analysis side. It never
//! allocates, locks or blocks: frame buffers come from a pre-filled pool and
//! every send is a `try_send`. A frame that finds no buffer or a full queue is
//! dropped and counted.
//!
//! The analysis side ([`AnalysisPipeline`]) keeps at most one analysis in
//! flight. [`AnalysisPipeline::try_analyze`] takes the session with a
//! `try_lock`; if another thread holds it the request is dropped instead of
//! queued. Each successful call analyzes only the newest frame and recycles
//! the rest.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::session::TunerSession;
use crate::yin::MIN_YIN_SAMPLES;
use crate::{AnalysisResult, SampleFrame};

/// Longest frame the capture ring will hold.
const MAX_FRAME_LEN: usize = 1 << 16;

/// Framing of the captured stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Samples per analysis frame.
    pub frame_len: usize,
    /// Samples between the starts of consecutive frames.
    pub hop: usize,
    /// Frames that may wait for analysis before new ones are dropped.
    pub queue_depth: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_len: 4096,
            hop: 1024,
            queue_depth: 4,
        }
    }
}

impl CaptureConfig {
    pub fn sanitized(&self) -> Self {
        let frame_len = self.frame_len.clamp(MIN_YIN_SAMPLES, MAX_FRAME_LEN);
        Self {
            frame_len,
            hop: self.hop.clamp(1, frame_len),
            queue_depth: self.queue_depth.max(1),
        }
    }
}

/// Peak and RMS of the latest capture block, readable from any thread.
#[derive(Debug, Default)]
pub struct LevelMeter {
    peak: AtomicU32,
    rms: AtomicU32,
}

impl LevelMeter {
    pub fn store(&self, peak: f32, rms: f32) {
        self.peak.store(peak.to_bits(), Ordering::Release);
        self.rms.store(rms.to_bits(), Ordering::Release);
    }

    pub fn peak(&self) -> f32 {
        f32::from_bits(self.peak.load(Ordering::Acquire))
    }

    pub fn rms(&self) -> f32 {
        f32::from_bits(self.rms.load(Ordering::Acquire))
    }
}

#[derive(Debug, Default)]
struct CaptureShared {
    meter: LevelMeter,
    dropped: AtomicU64,
}

/// Audio-thread end of the capture channel.
pub struct CaptureWriter {
    ring: Vec<f32>,
    write_pos: usize,
    filled: usize,
    since_emit: usize,
    total_samples: u64,
    hop: usize,
    sample_rate: u32,
    frames: Sender<SampleFrame>,
    pool: Receiver<Vec<f32>>,
    recycle: Sender<Vec<f32>>,
    wake: Sender<()>,
    shared: Arc<CaptureShared>,
}

impl CaptureWriter {
    /// Appends a block of mono samples, emitting frames as they complete.
    pub fn push(&mut self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        let mut peak = 0.0f32;
        let mut sum_squares = 0.0f32;
        for &sample in samples {
            peak = peak.max(sample.abs());
            sum_squares += sample * sample;

            self.ring[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % self.ring.len();
            self.filled = (self.filled + 1).min(self.ring.len());
            self.since_emit += 1;
            self.total_samples += 1;

            if self.filled == self.ring.len() && self.since_emit >= self.hop {
                self.since_emit = 0;
                self.emit();
            }
        }
        self.shared
            .meter
            .store(peak, (sum_squares / samples.len() as f32).sqrt());
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples pushed since creation.
    pub fn samples_written(&self) -> u64 {
        self.total_samples
    }

    fn emit(&mut self) {
        let Ok(mut buffer) = self.pool.try_recv() else {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        buffer.clear();
        // The ring is full, so the oldest sample sits at the write position.
        let (newer, older) = self.ring.split_at(self.write_pos);
        buffer.extend_from_slice(older);
        buffer.extend_from_slice(newer);

        let frame = SampleFrame {
            samples: buffer,
            sample_rate: self.sample_rate,
            start_sample: self.total_samples - self.ring.len() as u64,
        };
        match self.frames.try_send(frame) {
            Ok(()) => {
                let _ = self.wake.try_send(());
            }
            Err(TrySendError::Full(frame) | TrySendError::Disconnected(frame)) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                let _ = self.recycle.try_send(frame.samples);
            }
        }
    }
}

/// Analysis-thread end of the capture channel.
pub struct FrameReceiver {
    frames: Receiver<SampleFrame>,
    recycle: Sender<Vec<f32>>,
    wake: Receiver<()>,
    shared: Arc<CaptureShared>,
}

impl FrameReceiver {
    /// Newest pending frame; older pending frames are recycled unread.
    pub fn try_latest(&self) -> Option<SampleFrame> {
        let mut latest = None;
        while let Ok(frame) = self.frames.try_recv() {
            if let Some(stale) = latest.replace(frame) {
                self.recycle(stale);
            }
        }
        latest
    }

    /// Blocks until the writer signals a new frame or `timeout` passes.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.wake.recv_timeout(timeout).is_ok()
    }

    /// Returns a frame's buffer to the writer's pool.
    pub fn recycle(&self, frame: SampleFrame) {
        let _ = self.recycle.try_send(frame.samples);
    }

    pub fn meter(&self) -> &LevelMeter {
        &self.shared.meter
    }

    /// Frames the writer could not deliver.
    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

/// Creates a connected writer/receiver pair.
///
/// All frame buffers are allocated here, sized to `frame_len`.
pub fn capture_channel(config: &CaptureConfig, sample_rate: u32) -> (CaptureWriter, FrameReceiver) {
    let config = config.sanitized();
    // Queued frames, plus one being analyzed and one being filled.
    let pool_size = config.queue_depth + 2;
    let (frames_tx, frames_rx) = bounded(config.queue_depth);
    let (pool_tx, pool_rx) = bounded(pool_size);
    let (wake_tx, wake_rx) = bounded(1);
    for _ in 0..pool_size {
        let _ = pool_tx.try_send(Vec::with_capacity(config.frame_len));
    }
    let shared = Arc::new(CaptureShared::default());

    let writer = CaptureWriter {
        ring: vec![0.0; config.frame_len],
        write_pos: 0,
        filled: 0,
        since_emit: 0,
        total_samples: 0,
        hop: config.hop,
        sample_rate,
        frames: frames_tx,
        pool: pool_rx,
        recycle: pool_tx.clone(),
        wake: wake_tx,
        shared: Arc::clone(&shared),
    };
    let receiver = FrameReceiver {
        frames: frames_rx,
        recycle: pool_tx,
        wake: wake_rx,
        shared,
    };
    (writer, receiver)
}

/// Outcome of one scheduling attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// A frame was analyzed and its result sent.
    Analyzed,
    /// No frame was waiting.
    Idle,
    /// Another analysis was in flight; the request was dropped.
    Busy,
}

/// Single-flight analysis driver around a [`TunerSession`].
pub struct AnalysisPipeline {
    session: Mutex<TunerSession>,
    frames: FrameReceiver,
    results: Sender<AnalysisResult>,
    skipped: AtomicU64,
}

impl AnalysisPipeline {
    /// Wires a session to a frame receiver; results arrive on the returned
    /// channel, which holds at most `result_capacity` unread results.
    pub fn new(
        session: TunerSession,
        frames: FrameReceiver,
        result_capacity: usize,
    ) -> (Self, Receiver<AnalysisResult>) {
        let (results_tx, results_rx) = bounded(result_capacity.max(1));
        let pipeline = Self {
            session: Mutex::new(session),
            frames,
            results: results_tx,
            skipped: AtomicU64::new(0),
        };
        (pipeline, results_rx)
    }

    /// Analyzes the newest pending frame unless an analysis is in flight.
    pub fn try_analyze(&self) -> Schedule {
        let Some(mut session) = self.session.try_lock() else {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            debug!("analysis in flight, request dropped");
            return Schedule::Busy;
        };
        let Some(frame) = self.frames.try_latest() else {
            return Schedule::Idle;
        };
        let result = session.process(&frame, frame.end_time());
        drop(session);
        self.frames.recycle(frame);

        if self.results.try_send(result).is_err() {
            trace!("result queue full, result discarded");
        }
        Schedule::Analyzed
    }

    /// Blocks until a frame may be ready or `timeout` passes.
    pub fn wait_for_frame(&self, timeout: Duration) -> bool {
        self.frames.wait(timeout)
    }

    /// Runs `f` with exclusive access to the session, waiting for any
    /// analysis in flight.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut TunerSession) -> R) -> R {
        f(&mut self.session.lock())
    }

    pub fn frames(&self) -> &FrameReceiver {
        &self.frames
    }

    /// Requests dropped because an analysis was already running.
    pub fn skipped_requests(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(frame_len: usize, hop: usize, queue_depth: usize) -> CaptureConfig {
        CaptureConfig {
            frame_len,
            hop,
            queue_depth,
        }
    }

    #[test]
    fn test_frames_overlap_by_hop() {
        let (mut writer, receiver) = capture_channel(&config(2048, 512, 8), 48000);
        let ramp: Vec<f32> = (0..3072).map(|i| i as f32).collect();
        writer.push(&ramp);

        // Frames complete at 2048, 2560 and 3072 samples.
        let mut starts = Vec::new();
        while let Ok(frame) = receiver.frames.try_recv() {
            assert_eq!(frame.samples.len(), 2048);
            assert_eq!(frame.samples[0], frame.start_sample as f32);
            assert_eq!(frame.samples[2047], (frame.start_sample + 2047) as f32);
            starts.push(frame.start_sample);
            receiver.recycle(frame);
        }
        assert_eq!(starts, vec![0, 512, 1024]);
        assert_eq!(writer.samples_written(), 3072);
    }

    #[test]
    fn test_try_latest_skips_stale_frames() {
        let (mut writer, receiver) = capture_channel(&config(2048, 256, 4), 48000);
        writer.push(&vec![0.1; 2048 + 3 * 256]);
        let latest = receiver.try_latest().unwrap();
        assert_eq!(latest.start_sample, 3 * 256);
        assert!(receiver.try_latest().is_none());
        receiver.recycle(latest);
    }

    #[test]
    fn test_full_queue_drops_and_counts() {
        let (mut writer, receiver) = capture_channel(&config(2048, 256, 2), 48000);
        // Five frames against a queue of two.
        writer.push(&vec![0.1; 2048 + 4 * 256]);
        assert_eq!(receiver.dropped_frames(), 3);
        // Dropped buffers went back to the pool, so capture continues.
        if let Some(frame) = receiver.try_latest() {
            receiver.recycle(frame);
        }
        writer.push(&[0.1; 256]);
        assert!(receiver.try_latest().is_some());
    }

    #[test]
    fn test_meter_tracks_last_block() {
        let (mut writer, receiver) = capture_channel(&CaptureConfig::default(), 48000);
        writer.push(&[0.5, -0.5, 0.5, -0.5]);
        assert_eq!(receiver.meter().peak(), 0.5);
        assert!((receiver.meter().rms() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_config_sanitization() {
        let config = config(10, 0, 0).sanitized();
        assert_eq!(config.frame_len, MIN_YIN_SAMPLES);
        assert_eq!(config.hop, 1);
        assert_eq!(config.queue_depth, 1);
    }
}

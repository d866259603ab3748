//! # Spectral Front-End
//!
//! Windowing, DC removal and the forward transform shared by every
//! frequency-domain estimator in the crate.
//!
//! ## Features
//! - A minimal [`RealFft`] seam (`forward_real`) so the math downstream never
//!   depends on a particular FFT library
//! - [`RustFft`], the RustFFT-backed implementation
//! - [`SpectralFrame`], a pre-sized spectrum (complex bins, magnitude, power,
//!   noise floor) that is recomputed in place for every analysis frame

use rustfft::{Fft, FftPlanner, num_complex::Complex};
use std::sync::Arc;

/// Smallest transform the front-end will plan.
pub const MIN_FFT_SIZE: usize = 64;

/// Removes the DC offset from a signal by making its average value zero.
///
/// # Arguments
/// * `signal` - Audio signal to process (modified in-place)
pub fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-9 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Returns the coefficients of a periodic Hann window of length `len`.
///
/// The periodic form (`N` rather than `N - 1` in the denominator) keeps the
/// window's DFT exactly three bins wide, which the complex-domain peak
/// interpolation in the analyzer relies on.
pub fn hann_window(len: usize) -> Vec<f32> {
    let mut coefficients = vec![1.0; len];
    apply_hann_window(&mut coefficients);
    coefficients
}

/// Applies a periodic Hann window to the buffer in place.
pub fn apply_hann_window(buffer: &mut [f32]) {
    let n = buffer.len();
    if n == 0 {
        return;
    }
    for (i, sample) in buffer.iter_mut().enumerate() {
        let multiplier =
            0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / n as f64).cos());
        *sample *= multiplier as f32;
    }
}

/// Forward real-input transform.
///
/// Implementations are planned once per size and reused; `forward_real` must
/// not allocate.
pub trait RealFft: Send + Sized {
    /// Plans a transform of `size` points. Returns `None` when the size cannot
    /// be planned (zero, too small or not a power of two).
    fn plan(size: usize) -> Option<Self>;

    /// Number of input samples per transform.
    fn size(&self) -> usize;

    /// Transforms `input` into the positive-frequency half of the spectrum.
    ///
    /// `input` shorter than [`size`](Self::size) is zero-padded; `spectrum`
    /// receives at most `size / 2 + 1` bins (DC to Nyquist).
    fn forward_real(&mut self, input: &[f32], spectrum: &mut [Complex<f32>]);
}

/// RustFFT-backed [`RealFft`] with pre-allocated work buffers.
pub struct RustFft {
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl RealFft for RustFft {
    fn plan(size: usize) -> Option<Self> {
        if size < MIN_FFT_SIZE || !size.is_power_of_two() {
            return None;
        }
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let scratch_len = fft.get_inplace_scratch_len();
        Some(Self {
            fft,
            buffer: vec![Complex::new(0.0, 0.0); size],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
        })
    }

    fn size(&self) -> usize {
        self.buffer.len()
    }

    fn forward_real(&mut self, input: &[f32], spectrum: &mut [Complex<f32>]) {
        let padded = input.iter().copied().chain(std::iter::repeat(0.0));
        for (slot, sample) in self.buffer.iter_mut().zip(padded) {
            *slot = Complex::new(sample, 0.0);
        }

        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let bins = spectrum.len().min(self.buffer.len() / 2 + 1);
        spectrum[..bins].copy_from_slice(&self.buffer[..bins]);
    }
}

/// Transform that can never be planned, for exercising degraded paths.
#[cfg(test)]
pub(crate) struct FailingFft;

#[cfg(test)]
impl RealFft for FailingFft {
    fn plan(_size: usize) -> Option<Self> {
        None
    }

    fn size(&self) -> usize {
        0
    }

    fn forward_real(&mut self, _input: &[f32], _spectrum: &mut [Complex<f32>]) {}
}

/// A spectrum derived from one frame of samples.
///
/// All buffers are sized when the frame is created; [`compute`](Self::compute)
/// overwrites them without allocating.
#[derive(Debug, Clone)]
pub struct SpectralFrame {
    fft_size: usize,
    sample_rate: u32,
    window: Vec<f32>,
    windowed: Vec<f32>,
    noise_scratch: Vec<f32>,
    /// Complex bins, DC to Nyquist inclusive (`fft_size / 2 + 1`).
    pub bins: Vec<Complex<f32>>,
    /// Magnitude per bin below Nyquist (`fft_size / 2`).
    pub magnitudes: Vec<f32>,
    /// Magnitude squared per bin below Nyquist.
    pub power: Vec<f64>,
    /// Median magnitude inside the configured noise band.
    pub noise_floor: f64,
}

impl SpectralFrame {
    /// Allocates a frame for transforms of `fft_size` points.
    pub fn new(fft_size: usize) -> Self {
        let half = fft_size / 2;
        Self {
            fft_size,
            sample_rate: 0,
            window: hann_window(fft_size),
            windowed: vec![0.0; fft_size],
            noise_scratch: Vec::with_capacity(half),
            bins: vec![Complex::new(0.0, 0.0); half + 1],
            magnitudes: vec![0.0; half],
            power: vec![0.0; half],
            noise_floor: 0.0,
        }
    }

    /// Transform size this frame was built for.
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Sample rate of the last computed frame.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Width of one bin in Hz.
    pub fn hz_per_bin(&self) -> f64 {
        self.sample_rate as f64 / self.fft_size as f64
    }

    /// Converts a (fractional) bin index to Hz.
    pub fn bin_to_hz(&self, bin: f64) -> f64 {
        bin * self.hz_per_bin()
    }

    /// Converts a frequency in Hz to a fractional bin index.
    pub fn hz_to_bin(&self, hz: f64) -> f64 {
        hz / self.hz_per_bin()
    }

    /// Windows the newest `fft_size` samples of `samples`, transforms them and
    /// refreshes magnitude, power and noise floor.
    ///
    /// `noise_band` is the `(low, high)` range in Hz whose median magnitude
    /// becomes the noise floor.
    pub fn compute<F: RealFft>(
        &mut self,
        fft: &mut F,
        samples: &[f32],
        sample_rate: u32,
        noise_band: (f64, f64),
    ) {
        self.sample_rate = sample_rate;

        let start = samples.len().saturating_sub(self.fft_size);
        let source = &samples[start..];
        let used = source.len();
        self.windowed[..used].copy_from_slice(source);
        self.windowed[used..].fill(0.0);
        remove_dc_offset(&mut self.windowed[..used]);
        for (sample, w) in self.windowed.iter_mut().zip(&self.window) {
            *sample *= *w;
        }

        fft.forward_real(&self.windowed, &mut self.bins);

        for ((bin, magnitude), power) in self
            .bins
            .iter()
            .zip(self.magnitudes.iter_mut())
            .zip(self.power.iter_mut())
        {
            let p = bin.norm_sqr() as f64;
            *power = p;
            *magnitude = p.sqrt() as f32;
        }

        self.noise_floor = self.median_magnitude(noise_band);
    }

    fn median_magnitude(&mut self, (low_hz, high_hz): (f64, f64)) -> f64 {
        let half = self.magnitudes.len();
        if half == 0 || self.sample_rate == 0 {
            return 0.0;
        }
        let lo = (self.hz_to_bin(low_hz).floor().max(1.0) as usize).min(half - 1);
        let hi = (self.hz_to_bin(high_hz).ceil() as usize).clamp(lo + 1, half);

        self.noise_scratch.clear();
        self.noise_scratch.extend_from_slice(&self.magnitudes[lo..hi]);
        let mid = self.noise_scratch.len() / 2;
        let (_, median, _) = self
            .noise_scratch
            .select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
        *median as f64
    }
}

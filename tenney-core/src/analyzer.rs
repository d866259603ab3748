//! # Multi-Harmonic FFT Analyzer
//!
//! Frequency-domain pitch estimation with sub-bin precision.
//!
//! Per frame:
//! 1. Hann window + forward transform into a pre-sized [`SpectralFrame`]
//! 2. Peak search, local to the `f0` hint when one is supplied
//! 3. Sub-bin peak interpolation (complex Jacobsen estimator, magnitude
//!    parabola as fallback)
//! 4. Coarse `f0` from a harmonic-sum score over the peak's subharmonics, with
//!    subharmonic promotion so a near-pure tone is not reported an octave low
//! 5. SNR-weighted multi-harmonic consensus, optionally refined by
//!    phase-vocoder instantaneous frequency when the previous frame used the
//!    same bins and transform size
//! 6. Confidence from spectral peakiness, harmonic-sum peakiness and
//!    harmonicity of the partials
//!
//! The transform size adapts to the current pitch so every window spans
//! roughly the same number of cycles. Resizing has a margin of hysteresis so a
//! pitch near a power-of-two boundary keeps one size and its phase memory.

use parking_lot::Mutex;
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::{debug, trace, warn};

use crate::fft::{MIN_FFT_SIZE, RealFft, RustFft, SpectralFrame};
use crate::tuning::{cents_between, is_valid_frequency};

/// Upper bound on the harmonics the analyzer tracks.
pub const MAX_HARMONICS: usize = 16;

/// Floor applied to powers and denominators.
const EPSILON: f64 = 1e-12;

/// Subharmonic divisors tried when scoring fundamental candidates.
const MAX_SUBHARMONIC_DIVISOR: usize = 6;

/// Multiples considered by subharmonic promotion.
const MAX_PROMOTION_MULTIPLE: usize = 4;

/// Score multiplier for a candidate whose fundamental is under the SNR floor.
const WEAK_FUNDAMENTAL_PENALTY: f64 = 0.5;

/// Largest transform the analyzer will plan.
const FFT_SIZE_CEILING: usize = 1 << 16;

/// How far, as a fraction, the wanted window may stray outside the current
/// size's range `(size / 2, size]` before the transform is resized.
const RESIZE_MARGIN: f64 = 0.15;

/// Tuning of the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Lowest fundamental searched, in Hz.
    pub min_hz: f64,
    /// Highest fundamental searched, in Hz.
    pub max_hz: f64,
    /// Transform size used before any pitch is known.
    pub fft_size: usize,
    /// Smallest adaptive transform size.
    pub min_fft_size: usize,
    /// Largest adaptive transform size.
    pub max_fft_size: usize,
    /// Cycles of the fundamental one window should span.
    pub target_cycles: f64,
    /// Harmonics needed for a consensus estimate.
    pub min_harmonics: usize,
    /// Harmonics examined per frame.
    pub max_harmonics: usize,
    /// SNR a harmonic needs to take part in the consensus.
    pub min_snr_db: f64,
    /// Enables phase-vocoder refinement of harmonic frequencies.
    pub phase_refinement: bool,
    /// Largest accepted gap between the phase and magnitude estimates.
    pub max_phase_jump_cents: f64,
    /// `(low, high)` band in Hz whose median magnitude is the noise floor.
    pub noise_band_hz: (f64, f64),
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_hz: 55.0,
            max_hz: 1760.0,
            fft_size: 4096,
            min_fft_size: 2048,
            max_fft_size: 16384,
            target_cycles: 12.0,
            min_harmonics: 2,
            max_harmonics: 8,
            min_snr_db: 10.0,
            phase_refinement: true,
            max_phase_jump_cents: 35.0,
            noise_band_hz: (60.0, 4000.0),
        }
    }
}

impl AnalyzerConfig {
    /// Clamps every field into its valid range.
    ///
    /// Sizes become powers of two inside `[64, 65536]` with
    /// `min_fft_size <= fft_size <= max_fft_size`; an empty band or noise band
    /// falls back to the default.
    pub fn sanitized(&self) -> Self {
        let defaults = Self::default();
        let pow2 = |size: usize| size.clamp(MIN_FFT_SIZE, FFT_SIZE_CEILING).next_power_of_two();

        let min_fft_size = pow2(self.min_fft_size);
        let max_fft_size = pow2(self.max_fft_size).max(min_fft_size);
        let fft_size = pow2(self.fft_size).clamp(min_fft_size, max_fft_size);

        let band_ok =
            is_valid_frequency(self.min_hz) && self.max_hz.is_finite() && self.max_hz > self.min_hz;
        let (min_hz, max_hz) = if band_ok {
            (self.min_hz, self.max_hz)
        } else {
            (defaults.min_hz, defaults.max_hz)
        };

        let (noise_lo, noise_hi) = self.noise_band_hz;
        let noise_ok =
            noise_lo.is_finite() && noise_hi.is_finite() && noise_lo >= 0.0 && noise_hi > noise_lo;
        let noise_band_hz = if noise_ok {
            self.noise_band_hz
        } else {
            defaults.noise_band_hz
        };

        let max_harmonics = self.max_harmonics.clamp(1, MAX_HARMONICS);
        Self {
            min_hz,
            max_hz,
            fft_size,
            min_fft_size,
            max_fft_size,
            target_cycles: if self.target_cycles.is_finite() && self.target_cycles >= 1.0 {
                self.target_cycles
            } else {
                defaults.target_cycles
            },
            min_harmonics: self.min_harmonics.clamp(1, max_harmonics),
            max_harmonics,
            min_snr_db: if self.min_snr_db.is_finite() {
                self.min_snr_db
            } else {
                defaults.min_snr_db
            },
            phase_refinement: self.phase_refinement,
            max_phase_jump_cents: if self.max_phase_jump_cents.is_finite()
                && self.max_phase_jump_cents > 0.0
            {
                self.max_phase_jump_cents
            } else {
                defaults.max_phase_jump_cents
            },
            noise_band_hz,
        }
    }
}

/// One measured harmonic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Partial {
    /// Harmonic number, 1 for the fundamental.
    pub harmonic: usize,
    /// Measured frequency in Hz.
    pub frequency: f64,
    /// Spectral magnitude at the harmonic's bin.
    pub magnitude: f64,
    /// Power relative to the noise floor, in dB.
    pub snr_db: f64,
}

/// Which stage produced the analyzer's `f0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimateSource {
    /// SNR-weighted multi-harmonic consensus.
    Consensus,
    /// Coarse harmonic-sum estimate.
    Hps,
}

/// Phase-vocoder bookkeeping for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhaseDiagnostics {
    /// Harmonics with phase continuity from the previous frame.
    pub attempted: usize,
    /// Harmonics whose frequency came from the phase estimate.
    pub applied: usize,
    /// Harmonics whose phase estimate jumped too far and was discarded.
    pub rejected: usize,
}

/// Result of [`FftAnalyzer::analyze`].
#[derive(Debug, Clone, PartialEq)]
pub struct FftAnalysis {
    /// Fundamental: consensus, else coarse harmonic-sum, else `None`.
    pub f0: Option<f64>,
    /// Stage that produced `f0`.
    pub source: Option<EstimateSource>,
    /// Bin of the strongest peak in the search range.
    pub peak_bin: usize,
    /// Interpolated frequency of that peak in Hz.
    pub peak_hz: f64,
    /// Confidence in `[0, 1]`; zero when `f0` is `None`.
    pub confidence: f64,
    /// Harmonics found as spectral peaks, whether or not they cleared the SNR
    /// floor.
    pub partials: Vec<Partial>,
    /// Transform size used for this frame.
    pub fft_size: usize,
    /// Median magnitude in the noise band.
    pub noise_floor: f64,
    /// Phase refinement diagnostics.
    pub phase: PhaseDiagnostics,
}

/// Stateful multi-harmonic analyzer.
///
/// Phase memory and transform buffers live behind one mutex that is held for
/// the whole of [`analyze`](Self::analyze); concurrent callers are serialized.
pub struct FftAnalyzer<F: RealFft = RustFft> {
    config: AnalyzerConfig,
    state: Mutex<AnalyzerState<F>>,
}

struct AnalyzerState<F> {
    fft: Option<F>,
    frame: SpectralFrame,
    last_f0: Option<f64>,
    phase: PhaseMemory,
}

/// Bin and phase per harmonic from the previous frame.
#[derive(Debug, Clone, Copy)]
struct PhaseMemory {
    fft_size: usize,
    sample_rate: u32,
    bins: [Option<(usize, f64)>; MAX_HARMONICS + 1],
}

impl PhaseMemory {
    fn empty() -> Self {
        Self {
            fft_size: 0,
            sample_rate: 0,
            bins: [None; MAX_HARMONICS + 1],
        }
    }

    fn previous_phase(
        &self,
        harmonic: usize,
        bin: usize,
        fft_size: usize,
        sample_rate: u32,
    ) -> Option<f64> {
        if self.fft_size != fft_size || self.sample_rate != sample_rate {
            return None;
        }
        match self.bins[harmonic] {
            Some((previous_bin, phase)) if previous_bin == bin => Some(phase),
            _ => None,
        }
    }
}

impl<F: RealFft> FftAnalyzer<F> {
    /// Creates an analyzer; the configuration is sanitized first.
    ///
    /// If the transform cannot be planned the analyzer stays in a degraded
    /// state where every call returns `None`.
    pub fn new(config: AnalyzerConfig) -> Self {
        let sanitized = config.sanitized();
        if sanitized != config {
            warn!(?config, ?sanitized, "analyzer configuration clamped");
        }
        let fft = F::plan(sanitized.fft_size);
        if fft.is_none() {
            warn!(size = sanitized.fft_size, "FFT plan failed; analyzer degraded");
        }
        Self {
            config: sanitized,
            state: Mutex::new(AnalyzerState {
                fft,
                frame: SpectralFrame::new(sanitized.fft_size),
                last_f0: None,
                phase: PhaseMemory::empty(),
            }),
        }
    }

    /// The sanitized configuration in use.
    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Current transform size.
    pub fn fft_size(&self) -> usize {
        self.state.lock().frame.fft_size()
    }

    /// Forgets phase memory and the last pitch.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.last_f0 = None;
        state.phase = PhaseMemory::empty();
    }

    /// Analyzes one frame.
    ///
    /// # Arguments
    /// * `samples` - mono frame; the newest `fft_size` samples are used
    /// * `sample_rate` - in Hz
    /// * `f0_hint` - prior estimate that localizes the peak search
    /// * `hop_samples` - samples between this frame's start and the previous
    ///   one's, enabling phase refinement
    ///
    /// # Returns
    /// `None` for empty input, a zero sample rate, silence or a degraded
    /// analyzer; otherwise the analysis, whose `f0` may still be `None`.
    pub fn analyze(
        &self,
        samples: &[f32],
        sample_rate: u32,
        f0_hint: Option<f64>,
        hop_samples: Option<usize>,
    ) -> Option<FftAnalysis> {
        let mut state = self.state.lock();
        state.analyze(&self.config, samples, sample_rate, f0_hint, hop_samples)
    }
}

impl<F: RealFft> AnalyzerState<F> {
    fn analyze(
        &mut self,
        config: &AnalyzerConfig,
        samples: &[f32],
        sample_rate: u32,
        f0_hint: Option<f64>,
        hop_samples: Option<usize>,
    ) -> Option<FftAnalysis> {
        if samples.is_empty() || sample_rate == 0 {
            return None;
        }
        let f0_hint = f0_hint.filter(|&hz| is_valid_frequency(hz));

        let current = self.frame.fft_size();
        let guess = f0_hint.or(self.last_f0);
        let desired = desired_fft_size(config, samples.len(), sample_rate, guess, current);
        if desired != current || self.fft.is_none() {
            self.resize(desired);
        }
        let Some(fft) = self.fft.as_mut() else {
            return None;
        };

        self.frame.compute(fft, samples, sample_rate, config.noise_band_hz);
        let frame = &self.frame;
        let half = frame.power.len();
        let hz_per_bin = frame.hz_per_bin();
        let noise_power = (frame.noise_floor * frame.noise_floor).max(EPSILON);

        // --- Peak search ---
        let band_lo = ((config.min_hz / hz_per_bin).floor() as usize).max(2);
        let band_hi = ((config.max_hz / hz_per_bin).ceil() as usize).min(half.saturating_sub(3));
        if band_lo >= band_hi {
            self.phase = PhaseMemory::empty();
            return None;
        }
        let (search_lo, search_hi) = match f0_hint {
            Some(hint) => {
                let center = hint / hz_per_bin;
                let radius = (center * 0.06).max(6.0);
                let lo = ((center - radius).floor().max(0.0) as usize).max(band_lo);
                let hi = ((center + radius).ceil() as usize).min(band_hi);
                if lo < hi { (lo, hi) } else { (band_lo, band_hi) }
            }
            None => (band_lo, band_hi),
        };
        let peak_bin = argmax(&frame.power, search_lo, search_hi);
        if frame.power[peak_bin] <= EPSILON {
            self.phase = PhaseMemory::empty();
            self.last_f0 = None;
            return None;
        }
        let peak_position = sub_bin_position(frame, peak_bin);
        let peak_hz = peak_position * hz_per_bin;

        // --- Coarse f0 from subharmonic candidates ---
        let spectrum = Spectrum {
            power: &frame.power,
            noise_power,
        };
        let (divisor, coarse_score) = (1..=MAX_SUBHARMONIC_DIVISOR)
            .map(|d| (d, peak_position / d as f64))
            .take_while(|&(_, base)| base >= 1.5 && base * hz_per_bin >= config.min_hz * 0.97)
            .map(|(d, base)| (d, spectrum.harmonic_score(base, config)))
            .fold((1, f64::NEG_INFINITY), |best, (d, score)| {
                if score > best.1 * (1.0 + 1e-9) + 1e-12 { (d, score) } else { best }
            });
        let base_bin = spectrum.promote_subharmonic(peak_position / divisor as f64, config);
        let coarse_hz = base_bin * hz_per_bin;
        let coarse_f0 = (config.min_hz * 0.97..=config.max_hz * 1.03)
            .contains(&coarse_hz)
            .then_some(coarse_hz);
        trace!(peak_hz, divisor, coarse_hz, coarse_score, "coarse fundamental");

        // --- Multi-harmonic consensus ---
        let fft_size = frame.fft_size();
        let hop = hop_samples.filter(|&h| h > 0 && config.phase_refinement);
        let mut phase_diag = PhaseDiagnostics::default();
        let mut next_phase = PhaseMemory {
            fft_size,
            sample_rate,
            bins: [None; MAX_HARMONICS + 1],
        };
        let mut partials = Vec::with_capacity(config.max_harmonics);
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        let mut accepted = 0usize;

        for harmonic in 1..=config.max_harmonics {
            let expected = base_bin * harmonic as f64;
            if expected + 3.0 >= half as f64 {
                break;
            }
            let radius = ((expected * 0.02).round() as usize).clamp(1, 3);
            let Some(bin) = spectrum.local_peak(expected, radius) else {
                continue;
            };
            let power = frame.power[bin];
            let snr_db = spectrum.snr_db(bin);
            let magnitude_hz = sub_bin_position(frame, bin) * hz_per_bin;
            let phase_now = phase_of(frame.bins[bin]);
            next_phase.bins[harmonic] = Some((bin, phase_now));

            let mut frequency = magnitude_hz;
            if let Some(hop) = hop {
                let previous = self.phase.previous_phase(harmonic, bin, fft_size, sample_rate);
                if let Some(previous) = previous {
                    phase_diag.attempted += 1;
                    let vocoder_hz = hz_per_bin
                        * instantaneous_frequency(bin, phase_now, previous, hop, fft_size);
                    let jump = cents_between(vocoder_hz, magnitude_hz).abs();
                    if is_valid_frequency(vocoder_hz) && jump <= config.max_phase_jump_cents {
                        phase_diag.applied += 1;
                        frequency = vocoder_hz;
                    } else {
                        phase_diag.rejected += 1;
                    }
                }
            }

            if snr_db >= config.min_snr_db {
                let weight = ((snr_db - 6.0) / 18.0).max(0.0) / harmonic as f64;
                if weight > 0.0 {
                    weighted_sum += weight * frequency / harmonic as f64;
                    weight_total += weight;
                    accepted += 1;
                }
            }
            partials.push(Partial {
                harmonic,
                frequency,
                magnitude: power.sqrt(),
                snr_db,
            });
        }
        self.phase = next_phase;

        let consensus = (accepted >= config.min_harmonics && weight_total > EPSILON)
            .then(|| weighted_sum / weight_total)
            .filter(|&f| {
                is_valid_frequency(f) && (config.min_hz * 0.97..=config.max_hz * 1.03).contains(&f)
            });

        let (f0, source) = match (consensus, coarse_f0) {
            (Some(f), _) => (Some(f), Some(EstimateSource::Consensus)),
            (None, Some(f)) => (Some(f), Some(EstimateSource::Hps)),
            (None, None) => (None, None),
        };

        // --- Confidence ---
        let confidence = match f0 {
            Some(f0) => {
                let spectral = peakiness(&frame.magnitudes, peak_bin);
                let harmonic_sum = spectrum.score_peakiness(base_bin, coarse_score, config);
                let harmonicity = harmonicity(&partials, f0, config.min_snr_db);
                (0.3 * spectral + 0.3 * harmonic_sum + 0.4 * harmonicity).clamp(0.0, 1.0)
            }
            None => 0.0,
        };

        self.last_f0 = f0;
        if phase_diag.attempted > 0 {
            trace!(?phase_diag, "phase refinement");
        }

        Some(FftAnalysis {
            f0,
            source,
            peak_bin,
            peak_hz,
            confidence,
            partials,
            fft_size,
            noise_floor: frame.noise_floor,
            phase: phase_diag,
        })
    }

    fn resize(&mut self, size: usize) {
        debug!(from = self.frame.fft_size(), to = size, "resizing analysis FFT");
        self.fft = F::plan(size);
        if self.fft.is_none() {
            warn!(size, "FFT plan failed; analyzer degraded");
        }
        self.frame = SpectralFrame::new(size);
        self.phase = PhaseMemory::empty();
    }
}

/// Transform size giving about `target_cycles` periods of the pitch guess.
///
/// `current` is kept while the wanted sample count stays within
/// [`RESIZE_MARGIN`] of its range.
fn desired_fft_size(
    config: &AnalyzerConfig,
    frame_len: usize,
    sample_rate: u32,
    guess: Option<f64>,
    current: usize,
) -> usize {
    // Never ask for more samples than the frame provides.
    let frame_cap = if frame_len >= config.min_fft_size {
        1usize << (usize::BITS - 1 - frame_len.leading_zeros())
    } else {
        config.min_fft_size
    };
    let fit = |size: usize| {
        size.clamp(config.min_fft_size, config.max_fft_size)
            .min(frame_cap.max(config.min_fft_size))
    };

    let needed = guess
        .map(|f0| config.target_cycles * sample_rate as f64 / f0)
        .filter(|samples| samples.is_finite() && *samples > 0.0);
    let Some(needed) = needed else {
        return fit(config.fft_size);
    };

    let lower = current as f64 * 0.5 * (1.0 - RESIZE_MARGIN);
    let upper = current as f64 * (1.0 + RESIZE_MARGIN);
    if fit(current) == current && needed > lower && needed <= upper {
        return current;
    }
    fit((needed.ceil() as usize).min(FFT_SIZE_CEILING).next_power_of_two())
}

/// Power spectrum plus its noise floor, with the harmonic lookups built on it.
struct Spectrum<'a> {
    power: &'a [f64],
    noise_power: f64,
}

impl Spectrum<'_> {
    /// Strongest bin within `radius` of a fractional position, or `None` when
    /// that bin is only the flank of a peak further away.
    fn local_peak(&self, position: f64, radius: usize) -> Option<usize> {
        let last = self.power.len() - 2;
        let center = (position.round().max(1.0) as usize).min(last);
        let lo = center.saturating_sub(radius).max(1);
        let hi = (center + radius).min(last);
        let bin = argmax(self.power, lo, hi);
        let power = self.power[bin];
        (power >= self.power[bin - 1] && power >= self.power[bin + 1]).then_some(bin)
    }

    fn snr_db(&self, bin: usize) -> f64 {
        10.0 * (self.power[bin].max(EPSILON) / self.noise_power).log10()
    }

    /// SNR of the peak nearest `position`; minus infinity when there is none.
    fn snr_db_at(&self, position: f64) -> f64 {
        self.local_peak(position, 1)
            .map_or(f64::NEG_INFINITY, |bin| self.snr_db(bin))
    }

    fn in_range(&self, position: f64) -> bool {
        position >= 1.0 && position + 2.0 < self.power.len() as f64
    }

    /// Weighted log-harmonic sum for a candidate fundamental bin.
    fn harmonic_score(&self, base: f64, config: &AnalyzerConfig) -> f64 {
        let mut score = 0.0;
        for harmonic in 1..=config.max_harmonics {
            let position = base * harmonic as f64;
            if !self.in_range(position) {
                break;
            }
            if let Some(bin) = self.local_peak(position, 1) {
                let snr = self.power[bin] / self.noise_power;
                score += (1.0 + snr).ln() / (harmonic as f64).sqrt();
            }
        }
        if self.snr_db_at(base) < config.min_snr_db {
            score *= WEAK_FUNDAMENTAL_PENALTY;
        }
        score
    }

    /// Moves a weak fundamental up to an integer multiple that is strong and
    /// accounts for every other strong harmonic.
    fn promote_subharmonic(&self, base: f64, config: &AnalyzerConfig) -> f64 {
        if !self.in_range(base) || self.snr_db_at(base) >= config.min_snr_db {
            return base;
        }
        for multiple in 2..=MAX_PROMOTION_MULTIPLE {
            let candidate = base * multiple as f64;
            if !self.in_range(candidate) {
                break;
            }
            if self.snr_db_at(candidate) < config.min_snr_db {
                continue;
            }
            let unexplained = (2..=config.max_harmonics)
                .filter(|h| h % multiple != 0)
                .map(|h| base * h as f64)
                .take_while(|&p| self.in_range(p))
                .any(|p| self.snr_db_at(p) >= config.min_snr_db);
            if !unexplained {
                debug!(base, candidate, multiple, "promoting weak subharmonic");
                return candidate;
            }
        }
        base
    }

    /// How far the chosen harmonic-sum score stands above nearby mistuned
    /// candidates, in `[0, 1]`.
    fn score_peakiness(&self, base: f64, best: f64, config: &AnalyzerConfig) -> f64 {
        let best = if best.is_finite() && best > 0.0 {
            best
        } else {
            self.harmonic_score(base, config)
        };
        if best <= EPSILON {
            return 0.0;
        }
        let neighbours: Vec<f64> = [-5.0, -3.0, 3.0, 5.0]
            .iter()
            .map(|offset| base + offset)
            .filter(|&p| self.in_range(p))
            .map(|p| self.harmonic_score(p, config))
            .collect();
        if neighbours.is_empty() {
            return 0.0;
        }
        let mean = neighbours.iter().sum::<f64>() / neighbours.len() as f64;
        (1.0 - mean / best).clamp(0.0, 1.0)
    }
}

fn argmax(values: &[f64], lo: usize, hi: usize) -> usize {
    (lo..=hi)
        .max_by(|&a, &b| values[a].total_cmp(&values[b]))
        .unwrap_or(lo)
}

fn phase_of(bin: Complex<f32>) -> f64 {
    (bin.im as f64).atan2(bin.re as f64)
}

fn to_f64(c: Complex<f32>) -> Complex<f64> {
    Complex::new(c.re as f64, c.im as f64)
}

/// Fractional bin of the peak at `bin`.
///
/// Jacobsen's complex estimator scaled for the Hann window; when its
/// denominator vanishes the magnitude parabola (Quinn-style) is used instead.
fn sub_bin_position(frame: &SpectralFrame, bin: usize) -> f64 {
    let jacobsen = (bin >= 1 && bin + 1 < frame.bins.len())
        .then(|| {
            let (left, center, right) = (
                to_f64(frame.bins[bin - 1]),
                to_f64(frame.bins[bin]),
                to_f64(frame.bins[bin + 1]),
            );
            let denominator = center * 2.0 - left - right;
            (denominator.norm_sqr() > EPSILON).then(|| 2.0 * ((left - right) / denominator).re)
        })
        .flatten()
        .filter(|delta| delta.is_finite());

    let delta = jacobsen.unwrap_or_else(|| parabolic_offset(&frame.magnitudes, bin));
    bin as f64 + delta.clamp(-1.0, 1.0)
}

fn parabolic_offset(magnitudes: &[f32], bin: usize) -> f64 {
    if bin == 0 || bin + 1 >= magnitudes.len() {
        return 0.0;
    }
    let (y1, y2, y3) = (
        magnitudes[bin - 1] as f64,
        magnitudes[bin] as f64,
        magnitudes[bin + 1] as f64,
    );
    let denominator = y1 - 2.0 * y2 + y3;
    if denominator.abs() < EPSILON {
        0.0
    } else {
        0.5 * (y1 - y3) / denominator
    }
}

/// Phase-vocoder frequency (in bins) of `bin` given the phase one hop ago.
fn instantaneous_frequency(
    bin: usize,
    phase: f64,
    previous: f64,
    hop: usize,
    fft_size: usize,
) -> f64 {
    let advance_cycles = ((bin as u64 * hop as u64) % fft_size as u64) as f64 / fft_size as f64;
    let expected = 2.0 * PI * advance_cycles;
    let deviation = wrap_phase(phase - previous - expected);
    bin as f64 + deviation * fft_size as f64 / (2.0 * PI * hop as f64)
}

fn wrap_phase(phase: f64) -> f64 {
    (phase + PI).rem_euclid(2.0 * PI) - PI
}

/// Peak magnitude against its neighbourhood outside the Hann main lobe.
fn peakiness(magnitudes: &[f32], bin: usize) -> f64 {
    const GUARD: usize = 2;
    const SPAN: usize = 8;
    let peak = magnitudes[bin] as f64;
    if peak <= 0.0 {
        return 0.0;
    }
    let lo = bin.saturating_sub(SPAN);
    let hi = (bin + SPAN).min(magnitudes.len() - 1);
    let (sum, count) = (lo..=hi)
        .filter(|&i| i.abs_diff(bin) > GUARD)
        .fold((0.0, 0usize), |(sum, count), i| (sum + magnitudes[i] as f64, count + 1));
    if count == 0 {
        return 0.0;
    }
    (1.0 - sum / count as f64 / peak).clamp(0.0, 1.0)
}

/// SNR-weighted closeness of the strong partials to exact multiples of `f0`.
fn harmonicity(partials: &[Partial], f0: f64, min_snr_db: f64) -> f64 {
    let (score, weight) = partials
        .iter()
        .filter(|p| p.snr_db >= min_snr_db)
        .fold((0.0, 0.0), |(score, weight), p| {
            let w = ((p.snr_db - 6.0) / 18.0).max(0.0) / p.harmonic as f64;
            let deviation = cents_between(p.frequency, f0 * p.harmonic as f64).abs();
            let closeness = (1.0 - deviation / 25.0).max(0.0);
            (score + w * closeness, weight + w)
        });
    if weight > EPSILON { score / weight } else { 0.0 }
}

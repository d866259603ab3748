//! # Ratio Solver
//!
//! Enumerates every unit-octave ratio `1 <= p/q < 2` whose terms are smooth
//! over a prime limit, caches the table per limit, and answers "what is
//! nearby" for a live frequency. Unlike the resolver it holds no hysteresis
//! state, so lookups never affect the displayed target.
//!
//! The solver is an ordinary value: construct one per application and share
//! it (e.g. behind an `Arc`). The cache lives inside the instance, populated
//! lazily under a single mutex.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::ratio::{PrimeLimit, Ratio, gcd, is_smooth};
use crate::tuning::{cents_between, is_valid_frequency};

/// Size of the unit-ratio tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Largest reduced denominator enumerated.
    pub max_denominator: u64,
    /// Ratios kept per limit, simplest first.
    pub max_count: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_denominator: 64,
            max_count: 256,
        }
    }
}

/// A cached ratio inside the octave `[1, 2)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitRatio {
    pub ratio: Ratio,
    pub value: f64,
    /// Simplicity rank, `numerator + denominator`.
    pub complexity: u64,
}

/// A unit ratio placed in the octave nearest the live frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// `unit · 2^octave`, reduced.
    pub ratio: Ratio,
    pub unit: UnitRatio,
    pub octave: i32,
    /// Live frequency against this candidate, in cents.
    pub cents_error: f64,
    /// Candidate pitch in Hz for the root it was computed against.
    pub frequency_hz: f64,
    pub complexity: u64,
}

/// Best candidate plus its closest neighbours by pitch.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighborhood {
    pub nearest: Candidate,
    /// Up to two candidates below `nearest`, closest first.
    pub below: Vec<Candidate>,
    /// Up to two candidates above `nearest`, closest first.
    pub above: Vec<Candidate>,
}

const NEIGHBOURS_PER_SIDE: usize = 2;

/// Candidate generator with a per-limit cache.
#[derive(Debug, Default)]
pub struct RatioSolver {
    config: SolverConfig,
    cache: Mutex<HashMap<PrimeLimit, Arc<[UnitRatio]>>>,
}

impl RatioSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            config: SolverConfig {
                max_denominator: config.max_denominator.max(1),
                max_count: config.max_count.max(1),
            },
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// The unit ratios for `limit`, simplest first.
    ///
    /// The first call per limit builds the table; later calls share it.
    pub fn unit_ratios(&self, limit: PrimeLimit) -> Arc<[UnitRatio]> {
        let mut cache = self.cache.lock();
        cache
            .entry(limit)
            .or_insert_with(|| {
                let table = enumerate_unit_ratios(limit, &self.config);
                debug!(%limit, count = table.len(), "built unit-ratio table");
                table.into()
            })
            .clone()
    }

    /// Every unit ratio placed in its closest octave to `frequency_hz`,
    /// ranked by absolute cents error, then complexity.
    ///
    /// Empty for an invalid frequency or root.
    pub fn candidates(&self, frequency_hz: f64, root_hz: f64, limit: PrimeLimit) -> Vec<Candidate> {
        if !is_valid_frequency(frequency_hz) || !is_valid_frequency(root_hz) {
            return Vec::new();
        }
        let x = frequency_hz / root_hz;
        let mut candidates: Vec<Candidate> = self
            .unit_ratios(limit)
            .iter()
            .filter_map(|unit| place(unit, x, root_hz))
            .collect();
        candidates.sort_by(|a, b| {
            a.cents_error
                .abs()
                .total_cmp(&b.cents_error.abs())
                .then(a.complexity.cmp(&b.complexity))
        });
        candidates
    }

    /// Nearest candidate plus up to two neighbours on each side by pitch.
    pub fn nearest_with_neighbors(
        &self,
        frequency_hz: f64,
        root_hz: f64,
        limit: PrimeLimit,
    ) -> Option<Neighborhood> {
        let mut candidates = self.candidates(frequency_hz, root_hz, limit);
        let nearest = *candidates.first()?;
        candidates.sort_by(|a, b| a.frequency_hz.total_cmp(&b.frequency_hz));

        let below = candidates
            .iter()
            .rev()
            .filter(|c| c.frequency_hz < nearest.frequency_hz)
            .take(NEIGHBOURS_PER_SIDE)
            .copied()
            .collect();
        let above = candidates
            .iter()
            .filter(|c| c.frequency_hz > nearest.frequency_hz)
            .take(NEIGHBOURS_PER_SIDE)
            .copied()
            .collect();
        Some(Neighborhood { nearest, below, above })
    }
}

fn enumerate_unit_ratios(limit: PrimeLimit, config: &SolverConfig) -> Vec<UnitRatio> {
    let primes = limit.primes();
    let mut table: Vec<UnitRatio> = (1..=config.max_denominator)
        .filter(|&q| is_smooth(q, primes))
        .flat_map(|q| (q..2 * q).map(move |p| (p, q)))
        .filter(|&(p, q)| gcd(p, q) == 1 && is_smooth(p, primes))
        .map(|(p, q)| {
            let ratio = Ratio::new(p, q);
            UnitRatio {
                ratio,
                value: ratio.value(),
                complexity: p + q,
            }
        })
        .collect();
    table.sort_by(|a, b| a.complexity.cmp(&b.complexity).then(a.value.total_cmp(&b.value)));
    table.truncate(config.max_count);
    table
}

/// Puts `unit` in the octave closest to `x`.
fn place(unit: &UnitRatio, x: f64, root_hz: f64) -> Option<Candidate> {
    let octave = (x / unit.value).log2().round();
    if !octave.is_finite() || octave.abs() > 60.0 {
        return None;
    }
    let octave = octave as i32;
    let ratio = unit.ratio.times_octaves(octave)?;
    let value = unit.value * 2f64.powi(octave);
    Some(Candidate {
        ratio,
        unit: *unit,
        octave,
        cents_error: cents_between(x, value),
        frequency_hz: root_hz * value,
        complexity: unit.complexity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_limit_table() {
        let solver = RatioSolver::default();
        let table = solver.unit_ratios(PrimeLimit::Five);
        let ratios: Vec<Ratio> = table.iter().map(|u| u.ratio).collect();
        for (p, q) in [(6, 5), (5, 4), (4, 3), (3, 2), (8, 5), (5, 3)] {
            assert!(ratios.contains(&Ratio::new(p, q)), "missing {p}/{q}");
        }
        assert!(!ratios.contains(&Ratio::new(7, 4)));
        assert!(table.iter().all(|u| u.ratio.is_within(PrimeLimit::Five)));
        assert!(table.iter().all(|u| (1.0..2.0).contains(&u.value)));
        assert_eq!(ratios[0], Ratio::UNISON);
        assert_eq!(ratios[1], Ratio::new(3, 2));
    }

    #[test]
    fn test_table_is_cached_and_capped() {
        let solver = RatioSolver::new(SolverConfig {
            max_denominator: 64,
            max_count: 20,
        });
        let first = solver.unit_ratios(PrimeLimit::Thirteen);
        let second = solver.unit_ratios(PrimeLimit::Thirteen);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 20);
        assert!(first.windows(2).all(|w| w[0].complexity <= w[1].complexity));
    }

    #[test]
    fn test_candidates_pick_octave() {
        let solver = RatioSolver::default();
        let candidates = solver.candidates(1320.0, 440.0, PrimeLimit::Five);
        let best = candidates[0];
        assert_eq!(best.unit.ratio, Ratio::new(3, 2));
        assert_eq!(best.octave, 1);
        assert_eq!(best.ratio, Ratio::new(3, 1));
        assert!(best.cents_error.abs() < 1e-9);
        assert!((best.frequency_hz - 1320.0).abs() < 1e-9);
        assert!(candidates.iter().all(|c| c.cents_error.abs() <= 600.0 + 1e-9));
    }

    #[test]
    fn test_neighbors_bracket_nearest() {
        let solver = RatioSolver::default();
        let hood = solver.nearest_with_neighbors(550.0, 440.0, PrimeLimit::Five).unwrap();
        assert_eq!(hood.nearest.ratio, Ratio::new(5, 4));
        assert_eq!(hood.below.len(), 2);
        assert_eq!(hood.above.len(), 2);
        assert!(hood.below.iter().all(|c| c.frequency_hz < 550.0));
        assert!(hood.above.iter().all(|c| c.frequency_hz > 550.0));
        assert!(hood.below[0].frequency_hz > hood.below[1].frequency_hz);
        assert!(hood.above[0].frequency_hz < hood.above[1].frequency_hz);
    }

    #[test]
    fn test_invalid_input_yields_nothing() {
        let solver = RatioSolver::default();
        assert!(solver.candidates(f64::NAN, 440.0, PrimeLimit::Seven).is_empty());
        assert!(solver.nearest_with_neighbors(440.0, 0.0, PrimeLimit::Seven).is_none());
    }
}

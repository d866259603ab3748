//! # Rational Approximation
//!
//! Finds the best small ratio for a real interval under a prime limit.
//!
//! Candidates come from the continued-fraction expansion of `x`: every
//! convergent with denominator up to the cap, plus the semiconvergents
//! (intermediate mediants) between consecutive convergents. Candidates with a
//! prime factor outside the limit are discarded; among the rest the smallest
//! cents error wins, ties going to the lower Tenney height.
//!
//! When nothing lands inside the error budget, a small integer neighbourhood
//! around the last convergent is probed. The final fallback is the closest
//! admissible candidate, then the closest convergent, then `1/1`, so the
//! approximator always answers.

use serde::{Deserialize, Serialize};

use crate::ratio::{PrimeLimit, Ratio};
use crate::tuning::cents_between;

/// Half-width, in denominators, of the fallback neighbourhood probe.
const PROBE_SPAN: u64 = 16;

/// Largest partial quotient followed by the expansion.
const MAX_PARTIAL_QUOTIENT: f64 = 1e18;

/// Fractional part below which the expansion is considered exact.
const EXACT_REMAINDER: f64 = 1e-12;

/// Tolerance, in cents, under which two errors count as tied.
const TIE_CENTS: f64 = 1e-9;

/// Upper bound on expansion terms; far beyond what f64 precision supports.
const MAX_TERMS: usize = 64;

/// Limits applied to an approximation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApproximationOptions {
    /// Largest prime allowed in numerator or denominator.
    pub prime_limit: PrimeLimit,
    /// Largest reduced denominator considered.
    pub max_denominator: u64,
    /// Error budget in cents.
    pub max_cents_error: f64,
}

impl Default for ApproximationOptions {
    fn default() -> Self {
        Self {
            prime_limit: PrimeLimit::default(),
            max_denominator: 64,
            max_cents_error: 60.0,
        }
    }
}

impl ApproximationOptions {
    fn sanitized(self) -> Self {
        let defaults = Self::default();
        Self {
            prime_limit: self.prime_limit,
            max_denominator: self.max_denominator.max(1),
            max_cents_error: if self.max_cents_error.is_finite() && self.max_cents_error >= 0.0 {
                self.max_cents_error
            } else {
                defaults.max_cents_error
            },
        }
    }
}

/// A chosen ratio and how well it fits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Approximation {
    pub ratio: Ratio,
    /// Signed error of `x` against `ratio`; positive means `x` is sharp.
    pub cents_error: f64,
    /// True when the ratio respects both the prime limit and the budget.
    pub within_budget: bool,
}

/// Continued-fraction approximator with fixed options.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RatioApproximator {
    options: ApproximationOptions,
}

impl RatioApproximator {
    pub fn new(options: ApproximationOptions) -> Self {
        Self {
            options: options.sanitized(),
        }
    }

    pub fn options(&self) -> &ApproximationOptions {
        &self.options
    }

    /// Best ratio for `x`; `1/1` for non-finite or non-positive input.
    pub fn approximate(&self, x: f64) -> Ratio {
        self.approximate_detailed(x).ratio
    }

    /// Like [`approximate`](Self::approximate) but also reports the error.
    pub fn approximate_detailed(&self, x: f64) -> Approximation {
        if !x.is_finite() || x <= 0.0 {
            return Approximation {
                ratio: Ratio::UNISON,
                cents_error: 0.0,
                within_budget: false,
            };
        }
        let options = &self.options;
        let mut selection = Selection::new(x, options);
        let last_denominator = expand(x, options.max_denominator, |ratio, convergent| {
            selection.offer(ratio, convergent)
        });

        if selection.in_budget.is_none() {
            probe_neighbourhood(x, last_denominator, options.max_denominator, |ratio| {
                selection.offer(ratio, false)
            });
        }
        selection.finish()
    }
}

/// Convergents of `x` with denominator at most `max_denominator`, in order.
pub fn convergents(x: f64, max_denominator: u64) -> Vec<Ratio> {
    let mut out = Vec::new();
    if x.is_finite() && x > 0.0 {
        expand(x, max_denominator, |ratio, convergent| {
            if convergent {
                out.push(ratio);
            }
        });
    }
    out
}

/// Walks the continued fraction of `x`, visiting semiconvergents and
/// convergents (`true` flag) in increasing denominator order.
///
/// Returns the denominator of the last convergent visited.
fn expand(x: f64, max_denominator: u64, mut visit: impl FnMut(Ratio, bool)) -> u64 {
    // (h₋₁, h₋₂) and (k₋₁, k₋₂) seed the recurrence hₙ = aₙhₙ₋₁ + hₙ₋₂.
    let (mut h1, mut h2) = (1u64, 0u64);
    let (mut k1, mut k2) = (0u64, 1u64);
    let mut value = x;
    let mut last_denominator = 1;

    for _ in 0..MAX_TERMS {
        let a_float = value.floor();
        if !(0.0..MAX_PARTIAL_QUOTIENT).contains(&a_float) {
            break;
        }
        let a = a_float as u64;

        if k1 > 0 {
            for j in 1..a {
                let Some(k) = mul_add(j, k1, k2) else { break };
                if k > max_denominator {
                    break;
                }
                let Some(h) = mul_add(j, h1, h2) else { break };
                if h > 0 {
                    visit(Ratio::new(h, k), false);
                }
            }
        }

        let (Some(h), Some(k)) = (mul_add(a, h1, h2), mul_add(a, k1, k2)) else {
            break;
        };
        if k > max_denominator {
            break;
        }
        if h > 0 {
            visit(Ratio::new(h, k), true);
            last_denominator = k;
        }
        (h2, h1) = (h1, h);
        (k2, k1) = (k1, k);

        let remainder = value - a_float;
        if remainder < EXACT_REMAINDER {
            break;
        }
        value = 1.0 / remainder;
    }
    last_denominator
}

fn mul_add(a: u64, b: u64, c: u64) -> Option<u64> {
    a.checked_mul(b)?.checked_add(c)
}

/// Offers `p/q` for every `q` within [`PROBE_SPAN`] of `center` and the three
/// numerators around `x·q`.
fn probe_neighbourhood(x: f64, center: u64, max_denominator: u64, mut visit: impl FnMut(Ratio)) {
    let lo = center.saturating_sub(PROBE_SPAN).max(1);
    let hi = center.saturating_add(PROBE_SPAN).min(max_denominator);
    for q in lo..=hi {
        let p = (x * q as f64).round();
        if !(p < MAX_PARTIAL_QUOTIENT) {
            continue;
        }
        let p = p as u64;
        for numerator in [p.saturating_sub(1), p, p + 1] {
            if numerator > 0 {
                visit(Ratio::new(numerator, q));
            }
        }
    }
}

/// Running choice over the offered candidates.
struct Selection {
    x: f64,
    limit: PrimeLimit,
    budget: f64,
    in_budget: Option<Scored>,
    closest_admissible: Option<Scored>,
    closest_convergent: Option<Scored>,
}

#[derive(Debug, Clone, Copy)]
struct Scored {
    ratio: Ratio,
    cents: f64,
}

impl Scored {
    fn beats(&self, other: &Scored) -> bool {
        let (mine, theirs) = (self.cents.abs(), other.cents.abs());
        if (mine - theirs).abs() <= TIE_CENTS {
            self.ratio.tenney_height() < other.ratio.tenney_height()
        } else {
            mine < theirs
        }
    }
}

fn keep_better(slot: &mut Option<Scored>, candidate: Scored) {
    if slot.as_ref().is_none_or(|current| candidate.beats(current)) {
        *slot = Some(candidate);
    }
}

impl Selection {
    fn new(x: f64, options: &ApproximationOptions) -> Self {
        Self {
            x,
            limit: options.prime_limit,
            budget: options.max_cents_error,
            in_budget: None,
            closest_admissible: None,
            closest_convergent: None,
        }
    }

    fn offer(&mut self, ratio: Ratio, convergent: bool) {
        let cents = cents_between(self.x, ratio.value());
        if !cents.is_finite() {
            return;
        }
        let scored = Scored { ratio, cents };
        if convergent {
            keep_better(&mut self.closest_convergent, scored);
        }
        if !ratio.is_within(self.limit) {
            return;
        }
        keep_better(&mut self.closest_admissible, scored);
        if cents.abs() <= self.budget {
            keep_better(&mut self.in_budget, scored);
        }
    }

    fn finish(self) -> Approximation {
        if let Some(best) = self.in_budget {
            return Approximation {
                ratio: best.ratio,
                cents_error: best.cents,
                within_budget: true,
            };
        }
        match self.closest_admissible.or(self.closest_convergent) {
            Some(fallback) => Approximation {
                ratio: fallback.ratio,
                cents_error: fallback.cents,
                within_budget: false,
            },
            None => Approximation {
                ratio: Ratio::UNISON,
                cents_error: cents_between(self.x, 1.0),
                within_budget: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approximator(limit: PrimeLimit) -> RatioApproximator {
        RatioApproximator::new(ApproximationOptions {
            prime_limit: limit,
            ..ApproximationOptions::default()
        })
    }

    #[test]
    fn test_simple_intervals() {
        let approx = approximator(PrimeLimit::Five);
        assert_eq!(approx.approximate(1.5), Ratio::new(3, 2));
        assert_eq!(approx.approximate(1.25), Ratio::new(5, 4));
        assert_eq!(approx.approximate(1.2), Ratio::new(6, 5));
        assert_eq!(approx.approximate(2.0), Ratio::new(2, 1));
        assert_eq!(approx.approximate(660.0 / 440.0), Ratio::new(3, 2));
    }

    #[test]
    fn test_convergents_of_golden_ratio() {
        let phi = (1.0 + 5f64.sqrt()) / 2.0;
        let expected: Vec<Ratio> = [
            (1, 1),
            (2, 1),
            (3, 2),
            (5, 3),
            (8, 5),
            (13, 8),
            (21, 13),
            (34, 21),
            (55, 34),
        ]
        .iter()
        .map(|&(p, q)| Ratio::new(p, q))
        .collect();
        assert_eq!(convergents(phi, 34), expected);
    }

    #[test]
    fn test_prime_limit_changes_answer() {
        let x = 700.0 / 440.0;
        assert_eq!(approximator(PrimeLimit::Five).approximate(x), Ratio::new(8, 5));
        // 35/22 is exact and 11-limit.
        assert_eq!(approximator(PrimeLimit::Eleven).approximate(x), Ratio::new(35, 22));

        assert_eq!(approximator(PrimeLimit::Seven).approximate(1.75), Ratio::new(7, 4));
    }

    #[test]
    fn test_probe_finds_admissible_ratio_off_the_expansion() {
        // 1.75 = [1; 1, 3]; no 5-limit candidate of the expansion is within
        // 60 cents, but 16/9 (27 cents) is reachable by the probe.
        let result = approximator(PrimeLimit::Five).approximate_detailed(1.75);
        assert_eq!(result.ratio, Ratio::new(16, 9));
        assert!(result.within_budget);
        assert!((result.cents_error + 27.26).abs() < 0.01);
    }

    #[test]
    fn test_fallback_when_nothing_fits() {
        let approx = approximator(PrimeLimit::Three);
        let result = approx.approximate_detailed(1e-9);
        assert!(!result.within_budget);
        assert_eq!(result.ratio, Ratio::new(1, 64));
    }

    #[test]
    fn test_degenerate_input_is_unison() {
        let approx = RatioApproximator::default();
        for x in [0.0, -1.5, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert_eq!(approx.approximate(x), Ratio::UNISON);
        }
    }

    #[test]
    fn test_denominator_cap() {
        let approx = RatioApproximator::new(ApproximationOptions {
            prime_limit: PrimeLimit::Thirteen,
            max_denominator: 8,
            max_cents_error: 60.0,
        });
        let ratio = approx.approximate(std::f64::consts::PI);
        assert!(ratio.denominator() <= 8);
        assert_eq!(ratio, Ratio::new(22, 7));
    }

    #[test]
    fn test_extreme_values_stay_normalized() {
        let approx = RatioApproximator::default();
        for x in [1e9, 1e-9, 123456.789, 1.0 / 3.0, 1e300] {
            let ratio = approx.approximate(x);
            assert!(ratio.denominator() > 0);
            assert_eq!(crate::ratio::gcd(ratio.numerator(), ratio.denominator()), 1);
        }
    }
}

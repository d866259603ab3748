//! # Ratios, Monzos and Prime Limits
//!
//! The rational-number vocabulary of the resolver: a normalized [`Ratio`],
//! its prime-exponent vector ([`Monzo`]) over the primes up to 13, and the
//! [`PrimeLimit`] that bounds which primes a ratio may contain.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::tuning::cents_between;

/// Primes a [`Monzo`] can express, in order.
pub const PRIMES: [u64; 6] = [2, 3, 5, 7, 11, 13];

/// Natural logarithms of [`PRIMES`], the weights of the Tenney height.
static LN_PRIMES: Lazy<[f64; 6]> = Lazy::new(|| PRIMES.map(|p| (p as f64).ln()));

/// Largest prime allowed in a ratio's factorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub enum PrimeLimit {
    /// Pythagorean: 2 and 3.
    Three,
    /// Classic just intonation: 2, 3, 5.
    Five,
    /// Septimal: adds 7.
    Seven,
    /// Undecimal: adds 11.
    #[default]
    Eleven,
    /// Tridecimal: adds 13.
    Thirteen,
}

impl PrimeLimit {
    /// Every supported limit, smallest first.
    pub const ALL: [PrimeLimit; 5] = [
        PrimeLimit::Three,
        PrimeLimit::Five,
        PrimeLimit::Seven,
        PrimeLimit::Eleven,
        PrimeLimit::Thirteen,
    ];

    /// The limit's largest prime.
    pub fn value(self) -> u64 {
        match self {
            PrimeLimit::Three => 3,
            PrimeLimit::Five => 5,
            PrimeLimit::Seven => 7,
            PrimeLimit::Eleven => 11,
            PrimeLimit::Thirteen => 13,
        }
    }

    /// The primes this limit admits, ascending.
    pub fn primes(self) -> &'static [u64] {
        let count = match self {
            PrimeLimit::Three => 2,
            PrimeLimit::Five => 3,
            PrimeLimit::Seven => 4,
            PrimeLimit::Eleven => 5,
            PrimeLimit::Thirteen => 6,
        };
        &PRIMES[..count]
    }

    /// Looks up the limit whose largest prime is `value`.
    pub fn from_value(value: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|limit| limit.value() == value)
    }
}

impl TryFrom<u64> for PrimeLimit {
    type Error = String;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::from_value(value)
            .ok_or_else(|| format!("unsupported prime limit {value} (expected 3, 5, 7, 11 or 13)"))
    }
}

impl From<PrimeLimit> for u64 {
    fn from(limit: PrimeLimit) -> Self {
        limit.value()
    }
}

impl FromStr for PrimeLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u64 = s
            .trim()
            .parse()
            .map_err(|_| format!("invalid prime limit '{s}'"))?;
        Self::try_from(value)
    }
}

impl fmt::Display for PrimeLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-limit", self.value())
    }
}

/// Greatest common divisor.
pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// True when `n` has no prime factor outside `primes`.
pub fn is_smooth(mut n: u64, primes: &[u64]) -> bool {
    if n == 0 {
        return false;
    }
    for &p in primes {
        while n % p == 0 {
            n /= p;
        }
    }
    n == 1
}

/// A positive rational number in lowest terms.
///
/// Construction never fails: a zero numerator or denominator yields `1/1`.
/// This coercion is part of the type's contract, so every `Ratio` in the
/// crate satisfies `denominator > 0` and `gcd(numerator, denominator) == 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ratio {
    num: u64,
    den: u64,
}

impl Ratio {
    /// The unison, `1/1`.
    pub const UNISON: Ratio = Ratio { num: 1, den: 1 };

    /// Builds a normalized ratio, coercing invalid input to `1/1`.
    pub fn new(num: u64, den: u64) -> Self {
        if num == 0 || den == 0 {
            return Self::UNISON;
        }
        let g = gcd(num, den);
        Self {
            num: num / g,
            den: den / g,
        }
    }

    /// Reduced numerator.
    pub fn numerator(&self) -> u64 {
        self.num
    }

    /// Reduced denominator, always positive.
    pub fn denominator(&self) -> u64 {
        self.den
    }

    /// The ratio as a real number.
    pub fn value(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Size of the interval in cents.
    pub fn cents(&self) -> f64 {
        1200.0 * self.value().log2()
    }

    /// Signed distance in cents from this ratio to the real ratio `x`.
    pub fn cents_to(&self, x: f64) -> f64 {
        cents_between(x, self.value())
    }

    /// True for `1/1`.
    pub fn is_unison(&self) -> bool {
        *self == Self::UNISON
    }

    /// Tenney height, `ln(num) + ln(den)`.
    ///
    /// For a reduced ratio this equals the monzo form `Σ|eᵢ|·ln(pᵢ)`, and it is
    /// defined even when the ratio falls outside the 13-limit.
    pub fn tenney_height(&self) -> f64 {
        (self.num as f64).ln() + (self.den as f64).ln()
    }

    /// Prime-exponent vector, or `None` if a factor above 13 is present.
    pub fn monzo(&self) -> Option<Monzo> {
        Monzo::from_ratio(*self)
    }

    /// True when both terms factor entirely over the limit's primes.
    pub fn is_within(&self, limit: PrimeLimit) -> bool {
        let primes = limit.primes();
        is_smooth(self.num, primes) && is_smooth(self.den, primes)
    }

    /// Multiplies by `2^octaves`, or `None` on overflow.
    pub fn times_octaves(&self, octaves: i32) -> Option<Ratio> {
        let shift = octaves.unsigned_abs();
        let factor = 1u64.checked_shl(shift)?;
        if octaves >= 0 {
            Some(Ratio::new(self.num.checked_mul(factor)?, self.den))
        } else {
            Some(Ratio::new(self.num, self.den.checked_mul(factor)?))
        }
    }

    /// Folds the ratio into the octave `[1, 2)`.
    pub fn octave_reduced(&self) -> Ratio {
        let mut num = self.num;
        let mut den = self.den;
        while num / 2 >= den {
            if num % 2 == 0 {
                num /= 2;
            } else {
                den = match den.checked_mul(2) {
                    Some(d) => d,
                    None => break,
                };
            }
        }
        while num < den {
            if den % 2 == 0 {
                den /= 2;
            } else {
                num = match num.checked_mul(2) {
                    Some(n) => n,
                    None => break,
                };
            }
        }
        Ratio::new(num, den)
    }
}

impl Default for Ratio {
    fn default() -> Self {
        Self::UNISON
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Prime-exponent vector over `{2, 3, 5, 7, 11, 13}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Monzo {
    /// Exponent per prime, in the order of [`PRIMES`].
    pub exponents: [i32; 6],
}

impl Monzo {
    /// Factors a ratio; `None` when a prime above 13 remains.
    pub fn from_ratio(ratio: Ratio) -> Option<Self> {
        let mut exponents = [0i32; 6];
        let mut num = ratio.numerator();
        let mut den = ratio.denominator();
        for (exponent, &p) in exponents.iter_mut().zip(PRIMES.iter()) {
            while num % p == 0 {
                num /= p;
                *exponent += 1;
            }
            while den % p == 0 {
                den /= p;
                *exponent -= 1;
            }
        }
        (num == 1 && den == 1).then_some(Self { exponents })
    }

    /// `Σ|eᵢ|·ln(pᵢ)`.
    pub fn tenney_height(&self) -> f64 {
        self.exponents
            .iter()
            .zip(LN_PRIMES.iter())
            .map(|(&e, &ln_p)| e.unsigned_abs() as f64 * ln_p)
            .sum()
    }

    /// Largest prime with a non-zero exponent (1 for the unison).
    pub fn prime_limit(&self) -> u64 {
        self.exponents
            .iter()
            .zip(PRIMES.iter())
            .rev()
            .find(|(e, _)| **e != 0)
            .map_or(1, |(_, &p)| p)
    }
}

impl fmt::Display for Monzo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self
            .exponents
            .iter()
            .rposition(|&e| e != 0)
            .map_or(1, |i| i + 1);
        write!(f, "[")?;
        for (i, e) in self.exponents[..last].iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{e}")?;
        }
        write!(f, ">")
    }
}

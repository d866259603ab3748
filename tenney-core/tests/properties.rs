//! Property-based tests for ratio approximation and hysteresis.

use proptest::prelude::*;
use std::time::Duration;
use tenney_core::approximator::{ApproximationOptions, RatioApproximator};
use tenney_core::ratio::{PrimeLimit, Ratio, gcd, is_smooth};
use tenney_core::resolver::{RatioResolver, ResolverConfig};
use tenney_core::strictness::Strictness;

fn approximator(limit: PrimeLimit) -> RatioApproximator {
    RatioApproximator::new(ApproximationOptions {
        prime_limit: limit,
        ..ApproximationOptions::default()
    })
}

fn any_limit() -> impl Strategy<Value = PrimeLimit> {
    prop::sample::select(PrimeLimit::ALL.to_vec())
}

/// A prime limit with a numerator and denominator smooth over it.
fn smooth_terms() -> impl Strategy<Value = (PrimeLimit, u64, u64)> {
    any_limit().prop_flat_map(|limit| {
        let smooth = |max: u64| -> Vec<u64> {
            (1..=max).filter(|&n| is_smooth(n, limit.primes())).collect()
        };
        (Just(limit), prop::sample::select(smooth(256)), prop::sample::select(smooth(64)))
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Any finite positive input yields a reduced ratio.
    #[test]
    fn approximation_is_normalized(exponent in -9.0f64..9.0, limit in any_limit()) {
        let x = 10f64.powf(exponent);
        let ratio = approximator(limit).approximate(x);
        prop_assert!(ratio.denominator() > 0);
        prop_assert!(ratio.numerator() > 0);
        prop_assert_eq!(gcd(ratio.numerator(), ratio.denominator()), 1);
    }

    /// An exact in-limit ratio approximates to itself.
    #[test]
    fn approximation_is_idempotent((limit, p, q) in smooth_terms()) {
        let ratio = Ratio::new(p, q);
        prop_assert_eq!(approximator(limit).approximate(ratio.value()), ratio);
    }

    /// A pitch that stays inside the hysteresis band never moves the target.
    #[test]
    fn band_oscillation_keeps_target(
        offsets in prop::collection::vec(-0.99f64..0.99, 1..64),
        strictness in prop::sample::select(Strictness::ALL.to_vec()),
    ) {
        let profile = strictness.profile();
        let mut resolver =
            RatioResolver::new(440.0, PrimeLimit::Eleven, ResolverConfig::default(), profile);
        resolver.resolve(550.0, Duration::ZERO);
        let target = resolver.state().current;
        for (i, offset) in offsets.iter().enumerate() {
            let cents = offset * profile.hysteresis_cents;
            let frequency = 550.0 * 2f64.powf(cents / 1200.0);
            let now = Duration::from_secs(i as u64 + 1);
            prop_assert_eq!(resolver.resolve(frequency, now).current(), target);
        }
    }
}

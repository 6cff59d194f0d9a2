//! Retry Backoff
//!
//! Exponential delay with two passes of proportional jitter. The second pass
//! decorrelates callers that drew similar first-pass values; the result is
//! clamped back into the first-pass envelope so the bound stays predictable:
//!
//! ```text
//! exp   = clamp(base * 2^(retry-1), base, max)
//! delay ∈ [exp * (1 - jitter), exp * (1 + jitter)] ∩ [base, max]
//! ```

use std::time::Duration;

use rand::Rng;

use crate::constants::queue as consts;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// First-pass jitter as a fraction of the exponential delay
    pub jitter: f64,
    /// Second-pass jitter; `0.0` disables the refinement pass
    pub refinement: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(consts::BASE_DELAY_MS),
            max: Duration::from_millis(consts::MAX_DELAY_MS),
            jitter: consts::JITTER_FACTOR,
            refinement: consts::REFINEMENT_JITTER_FACTOR,
        }
    }
}

impl BackoffPolicy {
    fn bounds_ms(&self) -> (f64, f64) {
        let base = self.base.as_millis() as f64;
        let max = (self.max.as_millis() as f64).max(base);
        (base, max)
    }

    /// Delay before retry number `retry` (1-based) without jitter
    pub fn exponential(&self, retry: u32) -> Duration {
        let (base, max) = self.bounds_ms();
        let exponent = retry.max(1).saturating_sub(1).min(32) as i32;
        let raw = base * 2f64.powi(exponent);
        Duration::from_millis(raw.max(base).min(max).round() as u64)
    }

    /// Jittered delay drawn from the supplied RNG
    pub fn delay_with<R: Rng>(&self, retry: u32, rng: &mut R) -> Duration {
        let (base, max) = self.bounds_ms();
        let exp = self.exponential(retry).as_millis() as f64;
        let jitter = self.jitter.clamp(0.0, 1.0);

        let mut delay = exp + exp * jitter * rng.random_range(-1.0f64..=1.0);
        if self.refinement > 0.0 {
            delay += delay * self.refinement * rng.random_range(-1.0f64..=1.0);
        }

        let delay = delay
            .max(exp * (1.0 - jitter))
            .min(exp * (1.0 + jitter))
            .max(base)
            .min(max);
        Duration::from_millis(delay.round() as u64)
    }

    /// Jittered delay using the thread-local RNG
    pub fn delay(&self, retry: u32) -> Duration {
        self.delay_with(retry, &mut rand::rng())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_exponential_growth_and_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.exponential(0), Duration::from_millis(1000));
        assert_eq!(policy.exponential(1), Duration::from_millis(1000));
        assert_eq!(policy.exponential(2), Duration::from_millis(2000));
        assert_eq!(policy.exponential(3), Duration::from_millis(4000));
        assert_eq!(policy.exponential(6), Duration::from_millis(30000));
        assert_eq!(policy.exponential(u32::MAX), Duration::from_millis(30000));
    }

    #[test]
    fn test_no_jitter_is_exact() {
        let policy = BackoffPolicy {
            jitter: 0.0,
            refinement: 0.0,
            ..Default::default()
        };
        assert_eq!(policy.delay(3), Duration::from_millis(4000));
    }

    proptest! {
        #[test]
        fn prop_third_retry_within_envelope(seed in any::<u64>()) {
            let mut rng = StdRng::seed_from_u64(seed);
            let ms = BackoffPolicy::default().delay_with(3, &mut rng).as_millis();
            prop_assert!((2800..=5200).contains(&ms), "delay {}ms", ms);
        }

        #[test]
        fn prop_delay_within_base_and_max(seed in any::<u64>(), retry in 1u32..40) {
            let mut rng = StdRng::seed_from_u64(seed);
            let ms = BackoffPolicy::default().delay_with(retry, &mut rng).as_millis();
            prop_assert!((1000..=30000).contains(&ms), "retry {} delay {}ms", retry, ms);
        }
    }
}

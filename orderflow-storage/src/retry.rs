//! Bounded retry policy for transient store failures.

use rand::Rng;
use std::time::Duration;

/// Default number of persist attempts per message.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay between persist attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed,
    /// Doubling delay capped at `max_delay`, with half of it randomized.
    ExponentialJitter { max_delay: Duration },
}

/// Retry budget and spacing for one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: delay,
            backoff: Backoff::Fixed,
        }
    }

    pub fn exponential_jitter(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff: Backoff::ExponentialJitter { max_delay },
        }
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::ExponentialJitter { max_delay } => {
                let capped = self.exponential_ceiling(attempt, max_delay);
                let half = capped / 2;
                let spread = (capped - half).as_millis() as u64;
                let jitter = if spread == 0 {
                    0
                } else {
                    rand::rng().random_range(0..=spread)
                };
                half + Duration::from_millis(jitter)
            }
        }
    }

    fn exponential_ceiling(&self, attempt: u32, max_delay: Duration) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << shift)
            .unwrap_or(max_delay)
            .min(max_delay)
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Jittered delays never exceed the configured cap.
        #[test]
        fn prop_jitter_never_exceeds_cap(
            attempt in 1u32..64,
            base_ms in 1u64..10_000,
            max_ms in 1u64..60_000,
        ) {
            let max = Duration::from_millis(max_ms);
            let policy = RetryPolicy::exponential_jitter(64, Duration::from_millis(base_ms), max);
            prop_assert!(policy.delay_after(attempt) <= max);
        }
    }
}

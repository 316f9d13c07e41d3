//! Jittered exponential backoff between delivery attempts.

use std::time::Duration;

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::config::BackoffPolicy;

/// Produces retry delays for one batch.
///
/// The ceiling doubles from `base` on every call up to `cap`. Each delay is
/// drawn from the upper half of the ceiling, then raised to the previous
/// delay if jitter would make it shorter, so the sequence never decreases
/// and never exceeds `cap`.
pub struct RetryBackoff {
    policy: BackoffPolicy,
    attempt: u32,
    previous: Duration,
    rng: StdRng,
}

impl RetryBackoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self::with_rng(policy, StdRng::from_entropy())
    }

    #[cfg(test)]
    fn seeded(policy: BackoffPolicy, seed: u64) -> Self {
        Self::with_rng(policy, StdRng::seed_from_u64(seed))
    }

    fn with_rng(policy: BackoffPolicy, rng: StdRng) -> Self {
        Self {
            policy,
            attempt: 0,
            previous: Duration::ZERO,
            rng,
        }
    }

    fn ceiling(&self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        self.policy.base.saturating_mul(factor).min(self.policy.cap)
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let max_ms = self.ceiling().as_millis().min(u128::from(u64::MAX)) as u64;
        self.attempt = self.attempt.saturating_add(1);
        let sleep_ms = match max_ms {
            0 | 1 => max_ms,
            _ => self.rng.gen_range(max_ms / 2..=max_ms),
        };
        let delay = Duration::from_millis(sleep_ms)
            .max(self.previous)
            .min(self.policy.cap);
        self.previous = delay;
        delay
    }
}

//! Reconnect backoff.
//!
//! Exponential backoff capped at `max_delay`, with jitter derived from a
//! generator seeded by the attempt number: the same (class, attempt) pair
//! always produces the same decision.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::classify::ErrorClass;
use crate::config::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Decide what to do after failure number `attempt` (0-based, counted
    /// since the last successful connection or external reset).
    pub fn decide(&self, class: ErrorClass, attempt: u32) -> RetryDecision {
        if !class.is_retryable() {
            return RetryDecision::GiveUp;
        }
        if class == ErrorClass::Unknown && attempt >= self.config.max_unknown_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.delay_for(attempt))
    }

    /// Un-jittered delay for `attempt`, capped at the configured maximum.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.config
            .base_delay
            .saturating_mul(factor)
            .min(self.config.max_delay)
    }

    /// Jittered delay: somewhere in `[backoff * (1 - jitter), backoff]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        let jitter = self.config.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return backoff;
        }

        let mut rng = StdRng::seed_from_u64(u64::from(attempt));
        let shave: f64 = rng.gen_range(0.0..=jitter);
        backoff.mul_f64(1.0 - shave)
    }
}

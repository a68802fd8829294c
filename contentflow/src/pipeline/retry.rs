//! Retry policy with configurable backoff and jitter strategies.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::StageError;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^retry
    #[default]
    Exponential,
    /// delay = base * (retry + 1)
    Linear,
    /// delay = base
    Fixed,
}

/// Jitter strategy applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    #[default]
    Full,
    /// Half fixed, half random
    Equal,
}

/// Per-stage retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay between attempts in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    1000
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff: BackoffStrategy::default(),
            jitter: JitterStrategy::default(),
        }
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more attempts allowed.
    GiveUp,
    /// The error is not retryable.
    NotRetryable,
}

impl RetryPolicy {
    /// Creates the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that makes exactly one attempt.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
    }

    /// A policy that retries without waiting.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self::default()
            .with_max_attempts(max_attempts)
            .with_base_delay_ms(0)
            .with_jitter(JitterStrategy::None)
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// The number of attempts actually allowed; a stage always gets one.
    #[must_use]
    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Decides what happens after attempt number `attempt` (1-based) failed.
    #[must_use]
    pub fn decide(&self, attempt: u32, error: &StageError) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::NotRetryable;
        }
        if attempt >= self.effective_max_attempts() {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.delay_after(attempt))
    }

    /// Calculates the delay before the attempt following `attempt`.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms;
        let max = self.max_delay_ms;
        let retry = attempt.saturating_sub(1);

        let delay = match self.backoff {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(retry)),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(retry) + 1),
            BackoffStrategy::Fixed => base,
        }
        .min(max);

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient() -> StageError {
        StageError::transient("503")
    }

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay_ms, 1000);
        assert_eq!(policy.max_delay_ms, 30_000);
        assert_eq!(policy.backoff, BackoffStrategy::Exponential);
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 5, "backoff": "fixed"}"#).unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay_ms, 1000);
        assert_eq!(policy.backoff, BackoffStrategy::Fixed);
    }

    #[test]
    fn test_decide_retries_until_budget_spent() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(policy.decide(1, &transient()), RetryDecision::Retry(Duration::ZERO));
        assert_eq!(policy.decide(2, &transient()), RetryDecision::Retry(Duration::ZERO));
        assert_eq!(policy.decide(3, &transient()), RetryDecision::GiveUp);
    }

    #[test]
    fn test_fatal_errors_never_retry() {
        let policy = RetryPolicy::immediate(5);
        assert_eq!(policy.decide(1, &StageError::fatal("schema")), RetryDecision::NotRetryable);
    }

    #[test]
    fn test_zero_max_attempts_still_allows_one() {
        let policy = RetryPolicy::immediate(0);
        assert_eq!(policy.effective_max_attempts(), 1);
        assert_eq!(policy.decide(1, &transient()), RetryDecision::GiveUp);
    }

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy::new()
            .with_base_delay_ms(100)
            .with_jitter(JitterStrategy::None);

        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
    }

    #[test]
    fn test_linear_and_fixed_delays() {
        let linear = RetryPolicy::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Linear)
            .with_jitter(JitterStrategy::None);
        assert_eq!(linear.delay_after(3), Duration::from_millis(300));

        let fixed = linear.with_backoff(BackoffStrategy::Fixed);
        assert_eq!(fixed.delay_after(6), Duration::from_millis(100));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy::new()
            .with_base_delay_ms(1000)
            .with_max_delay_ms(5000)
            .with_jitter(JitterStrategy::None);
        assert_eq!(policy.delay_after(11), Duration::from_millis(5000));
    }

    #[test]
    fn test_full_jitter_bounded() {
        let policy = RetryPolicy::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Fixed)
            .with_jitter(JitterStrategy::Full);
        for _ in 0..10 {
            assert!(policy.delay_after(1) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_equal_jitter_keeps_half() {
        let policy = RetryPolicy::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Fixed)
            .with_jitter(JitterStrategy::Equal);
        for _ in 0..10 {
            let delay = policy.delay_after(1);
            assert!(delay >= Duration::from_millis(50) && delay <= Duration::from_millis(100));
        }
    }
}

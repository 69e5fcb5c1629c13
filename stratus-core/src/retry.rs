//! Retry policies with exponential backoff and a delay ceiling
//!
//! A policy is attached to each action invocation site together with a
//! timeout, never to the action itself: the same destroy action runs under
//! different policies depending on who invokes it.

use std::time::Duration;

/// How often and how patiently a failed invocation is retried
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the second attempt
    pub initial_interval: Duration,
    /// Multiplier applied to the delay after every failed attempt
    pub backoff_coefficient: f64,
    /// Ceiling for any single delay
    pub maximum_interval: Duration,
    /// Total attempts including the first one (minimum 1)
    pub maximum_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(100),
            maximum_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff policy
    pub fn backoff(
        initial_interval: Duration,
        backoff_coefficient: f64,
        maximum_interval: Duration,
        maximum_attempts: u32,
    ) -> Self {
        Self {
            initial_interval,
            backoff_coefficient,
            maximum_interval,
            maximum_attempts: maximum_attempts.max(1),
        }
    }

    /// Default intervals with an explicit attempt ceiling
    pub fn fixed_attempts(maximum_attempts: u32) -> Self {
        Self {
            maximum_attempts: maximum_attempts.max(1),
            ..Self::default()
        }
    }

    /// A single attempt, failures surface immediately
    pub fn no_retry() -> Self {
        Self::fixed_attempts(1)
    }

    /// Retries without waiting between attempts
    pub fn immediate(maximum_attempts: u32) -> Self {
        Self::backoff(Duration::ZERO, 1.0, Duration::ZERO, maximum_attempts)
    }

    /// Delay to wait after the given failed attempt (1-based)
    ///
    /// delay = initial * coefficient^(attempt - 1), capped at `maximum_interval`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let factor = self.backoff_coefficient.max(1.0).powi(exponent);
        let delay_secs = self.initial_interval.as_secs_f64() * factor;

        if !delay_secs.is_finite() || delay_secs >= self.maximum_interval.as_secs_f64() {
            self.maximum_interval
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }

    /// Whether another attempt is allowed after `attempts_made` attempts
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.maximum_attempts
    }
}

/// Timeout and retry policy for one invocation site
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOptions {
    /// Bound on a single attempt
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl StepOptions {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Self {
        Self { timeout, retry }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::backoff(
            Duration::from_secs(5),
            2.0,
            Duration::from_secs(60),
            3,
        );

        assert_eq!(policy.delay_after(1), Duration::from_secs(5));
        assert_eq!(policy.delay_after(2), Duration::from_secs(10));
        assert_eq!(policy.delay_after(3), Duration::from_secs(20));
    }

    #[test]
    fn test_delay_capped_at_maximum() {
        let policy = RetryPolicy::backoff(
            Duration::from_secs(5),
            2.0,
            Duration::from_secs(60),
            10,
        );

        // 5 * 2^4 = 80, capped at 60
        assert_eq!(policy.delay_after(5), Duration::from_secs(60));
        assert_eq!(policy.delay_after(1000), Duration::from_secs(60));
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::fixed_attempts(3);

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_at_least_one_attempt() {
        let policy = RetryPolicy::fixed_attempts(0);
        assert_eq!(policy.maximum_attempts, 1);
        assert!(!policy.should_retry(1));
    }

    #[test]
    fn test_immediate_policy_never_waits() {
        let policy = RetryPolicy::immediate(4);
        assert_eq!(policy.delay_after(3), Duration::ZERO);
        assert!(policy.should_retry(3));
    }
}

//! Retry policy for transient fetch failures

use crate::state::ErrorCategory;
use std::time::Duration;

/// Decision returned by the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    NoRetry,
    RetryAfter(Duration),
}

/// Exponential backoff: `base_delay * 2^retry`, capped at `max_delay`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Total attempts an always-transient request receives
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Decides what to do after `attempt` (1-based) failed with `category`
    pub fn decide(&self, attempt: u32, category: ErrorCategory) -> RetryDecision {
        if !category.is_retryable() || attempt >= self.max_attempts() {
            return RetryDecision::NoRetry;
        }
        RetryDecision::RetryAfter(self.delay_for(attempt - 1))
    }

    /// Backoff before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_categories_never_retry() {
        let policy = RetryPolicy::default();
        for category in [
            ErrorCategory::NotFound,
            ErrorCategory::AccessDenied,
            ErrorCategory::BadRequest,
            ErrorCategory::ParseError,
            ErrorCategory::WorkerLost,
            ErrorCategory::HandlerPanic,
        ] {
            assert_eq!(policy.decide(1, category), RetryDecision::NoRetry);
        }
    }

    #[test]
    fn test_backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(1, ErrorCategory::Timeout),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
        assert_eq!(
            policy.decide(2, ErrorCategory::Connection),
            RetryDecision::RetryAfter(Duration::from_secs(4))
        );
        assert_eq!(
            policy.decide(3, ErrorCategory::ServerError),
            RetryDecision::RetryAfter(Duration::from_secs(8))
        );
    }

    #[test]
    fn test_stops_after_max_retries() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(
            policy.decide(4, ErrorCategory::Timeout),
            RetryDecision::NoRetry
        );
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy {
            max_retries: 30,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_for(20), Duration::from_secs(10));
        assert_eq!(
            policy.decide(25, ErrorCategory::Throttled),
            RetryDecision::RetryAfter(Duration::from_secs(10))
        );
    }
}

//! Retry policy for HTTP transports
//!
//! An explicit value injected into the chat and synthesis clients instead of
//! per-call-site constants.

use std::time::Duration;

/// Retry policy: attempt count, backoff schedule, retryable status set
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = no retries)
    pub max_retries: u32,

    /// Initial backoff; doubles per retry
    pub backoff: Duration,

    /// HTTP status codes worth retrying
    pub retryable: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_millis(500),
            retryable: vec![429, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
            retryable: Vec::new(),
        }
    }

    /// Whether a response status warrants another attempt
    #[must_use]
    pub fn should_retry(&self, status: u16, attempt: u32) -> bool {
        attempt < self.max_retries && self.retryable.contains(&status)
    }

    /// Whether a transport-level failure (no status) warrants another attempt
    #[must_use]
    pub const fn should_retry_transport(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Exponential backoff delay before retry number `attempt` (0-based)
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff * 2u32.saturating_pow(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_only_listed_statuses() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(503, 0));
        assert!(policy.should_retry(429, 1));
        assert!(!policy.should_retry(503, 2));
        assert!(!policy.should_retry(400, 0));
        assert!(!policy.should_retry(200, 0));
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
    }

    #[test]
    fn none_never_retries() {
        let policy = RetryPolicy::none();
        assert!(!policy.should_retry(503, 0));
        assert!(!policy.should_retry_transport(0));
    }
}

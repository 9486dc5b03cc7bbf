//! Bounded exponential backoff shared by every upstream fetch.

use std::time::Duration;

use auditdoc_shared::SourceConfig;

/// Longest we will honor a server-supplied `Retry-After`.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Upper bound on a computed backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Computes how long to wait before the next attempt.
pub trait BackoffPolicy {
    /// Delay after `attempt` (1-based) has failed.
    fn delay_for_attempt(&self, attempt: u32) -> Duration;
}

/// Retry parameters for one upstream call.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Growth factor applied per further attempt.
    pub multiplier: f64,
    /// Independent timeout for each attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&SourceConfig> for RetryPolicy {
    fn from(config: &SourceConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.backoff_multiplier.max(1.0),
            attempt_timeout: Duration::from_secs(config.timeout_secs.max(1)),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempt` failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the next attempt, preferring a server hint when given.
    pub fn next_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(hint) => hint.min(MAX_RETRY_AFTER),
            None => self.delay_for_attempt(attempt),
        }
    }
}

impl BackoffPolicy for RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }
}

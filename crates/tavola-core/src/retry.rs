//! Retry policy shared by the orchestrator and the sweeps

use chrono::Duration as ChronoDuration;
use std::time::Duration;
use tavola_common::config::RetryConfig;

/// All retry ceilings and delays in one place
///
/// `queue_max_attempts` is compared against the lifetime attempt count stored
/// on the queue row, which starts at the number of immediate attempts already
/// spent. With the defaults a message gets 3 immediate attempts and then 2
/// sweep attempts before it is parked as `failed`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub immediate_attempts: u32,
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
    pub queue_max_attempts: i32,
    pub queue_retry_delay: Duration,
    pub fallback_priority: i32,
    pub queue_batch_size: i64,
    pub pending_batch_size: i64,
    pub stuck_after: Duration,
}

impl RetryPolicy {
    /// Delay after a failed immediate attempt (1-based): base * 2^(attempt-1)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Next eligible time for a queue row after a failed sweep attempt
    pub fn queue_retry_after(&self) -> ChronoDuration {
        ChronoDuration::from_std(self.queue_retry_delay).unwrap_or(ChronoDuration::minutes(5))
    }

    /// Age after which a `pending` log row or a queue claim is considered abandoned
    pub fn stuck_grace(&self) -> ChronoDuration {
        ChronoDuration::from_std(self.stuck_after).unwrap_or(ChronoDuration::minutes(5))
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            immediate_attempts: config.immediate_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
            queue_max_attempts: config.queue_max_attempts,
            queue_retry_delay: Duration::from_secs(config.queue_retry_delay_secs),
            fallback_priority: config.fallback_priority,
            queue_batch_size: config.queue_batch_size,
            pending_batch_size: config.pending_batch_size,
            stuck_after: Duration::from_secs(config.stuck_after_secs),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

//! Retry policy for failed remote calls.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff: attempt `n` waits `base * 2^n`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    /// Delay unit
    pub base_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// What happened to a queue item after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back to pending, due again at `at`
    Retry { delay: Duration, at: Timestamp },
    /// Retries exhausted or the failure was not retryable
    Exhausted,
}

impl FailureOutcome {
    /// Delay until the retry, if one was scheduled.
    pub fn retry_in(&self) -> Option<Duration> {
        match self {
            FailureOutcome::Retry { delay, .. } => Some(*delay),
            FailureOutcome::Exhausted => None,
        }
    }
}

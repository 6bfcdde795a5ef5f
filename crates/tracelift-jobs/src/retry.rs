use std::time::Duration;

use crate::JobError;

/// What to do with a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Fixed-delay retry budget. `max_retries` counts re-deliveries, so a job
/// gets `max_retries + 1` attempts in total.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn decide(&self, attempt: u32, error: &JobError) -> RetryDecision {
        if error.is_retryable() && attempt < self.max_attempts() {
            RetryDecision::RetryAfter(self.backoff)
        } else {
            RetryDecision::GiveUp
        }
    }
}

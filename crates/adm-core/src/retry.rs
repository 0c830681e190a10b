//! Task-level retry policy.
//!
//! A failed attempt goes back to the queue until the retry budget is
//! spent. Environment failures (filesystem, refused redirect) are exempt:
//! repeating them without operator intervention cannot succeed. Stalls
//! consume retry budget exactly like transport failures.

use crate::error::TransferError;

/// Outcome of consulting the policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-queue the task; the value is its new retry count.
    Requeue(u32),
    /// Give up; the task becomes terminally `Failed`.
    Fail,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub auto_retry: bool,
    pub max_retry_count: u32,
}

impl RetryPolicy {
    pub fn decide(&self, retries_used: u32, error: &TransferError) -> RetryDecision {
        if !self.auto_retry || error.is_environment() || retries_used >= self.max_retry_count {
            return RetryDecision::Fail;
        }
        RetryDecision::Requeue(retries_used + 1)
    }
}

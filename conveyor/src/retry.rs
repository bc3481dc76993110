//! Retry policy.
//!
//! The queue's policy is the floor: a job may be retried while
//! `attempts < max_retries`. Retries are immediate tail pushes; back-off,
//! if any, belongs to the worker or to the job itself.

use serde::{Deserialize, Serialize};

use crate::job::Job;

/// Outcome of consulting the retry policy for a failed job.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryDecision {
    /// The job goes back on its queue with `attempts + 1`.
    Retry,
    /// The job has used up its retries and must be failed.
    Terminal,
}

impl RetryDecision {
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry)
    }
}

/// Project a retry decision from attempt bookkeeping.
pub fn decide(attempts: u32, max_retries: u32) -> RetryDecision {
    if attempts < max_retries {
        RetryDecision::Retry
    } else {
        RetryDecision::Terminal
    }
}

/// Whether `job` may be retried once more.
pub fn may_retry<T>(job: &Job<T>) -> bool {
    decide(job.attempts(), job.max_retries()).is_retry()
}

/// Whether a job with these counts must go to the failure path.
///
/// Returns true when `attempts >= max_retries`.
pub fn should_fail(attempts: u32, max_retries: u32) -> bool {
    !decide(attempts, max_retries).is_retry()
}

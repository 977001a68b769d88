//! Retry and backoff policy.
//!
//! Deliberately stateless: every decision is re-derivable from
//! `(job.max_retries, attempt_number, job.schedule)` and the clock. No
//! hidden retry counters exist anywhere.

use chrono::{DateTime, Duration, Utc};

use crate::jobs::types::{Job, Schedule};

/// Delay before retrying after the given failed attempt.
///
/// Schedule: 5m, 10m, 20m, then the 60m cap for every later attempt.
pub fn backoff_delay(attempt_number: u32) -> Duration {
    match attempt_number {
        0 | 1 => Duration::minutes(5),
        2 => Duration::minutes(10),
        3 => Duration::minutes(20),
        _ => Duration::minutes(60),
    }
}

/// What to do with a job after a failed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retries remain: reschedule with backoff, job stays active.
    RetryAfterBackoff { next_run_at: DateTime<Utc> },
    /// Retries exhausted on a recurring job: resume the regular cadence.
    /// The attempt counter implicitly resets for the next natural occurrence.
    ResumeCadence { next_run_at: DateTime<Utc> },
    /// Retries exhausted on a one-time job: terminal, manual re-trigger only.
    MarkDead,
}

/// Decide the post-failure path for `job` after `attempt_number` failed.
pub fn decide(job: &Job, attempt_number: u32, now: DateTime<Utc>) -> RetryDecision {
    if attempt_number < job.max_retries {
        return RetryDecision::RetryAfterBackoff {
            next_run_at: now + backoff_delay(attempt_number),
        };
    }

    match job.schedule {
        Schedule::Recurring { cadence } => RetryDecision::ResumeCadence {
            next_run_at: cadence.next_after(now),
        },
        Schedule::OneTime => RetryDecision::MarkDead,
    }
}

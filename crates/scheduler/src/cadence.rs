//! Recurrence descriptors for recurring jobs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How often a recurring job comes due.
///
/// Interval semantics: the next occurrence is computed relative to a
/// reference instant, not anchored to wall-clock cron fields. `Daily` means
/// "24 hours after the reference", which keeps `next_run_at` fully
/// derivable from `(cadence, reference)` with no timezone policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    EveryMinutes(u32),
    Hourly,
    Daily,
    Weekly,
}

impl Cadence {
    /// The interval between occurrences.
    ///
    /// `EveryMinutes(0)` is clamped to one minute so a misconfigured cadence
    /// can never produce a hot loop.
    pub fn interval(&self) -> Duration {
        match self {
            Cadence::EveryMinutes(minutes) => Duration::minutes((*minutes).max(1) as i64),
            Cadence::Hourly => Duration::hours(1),
            Cadence::Daily => Duration::days(1),
            Cadence::Weekly => Duration::weeks(1),
        }
    }

    /// Next occurrence strictly after the given instant.
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        after + self.interval()
    }
}

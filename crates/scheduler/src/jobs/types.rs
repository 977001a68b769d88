//! Core job types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use brandops_core::{JobId, TenantId};

use crate::cadence::Cadence;

/// Default cap on consecutive failure retries.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Whether a job recurs on a cadence or fires once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    Recurring { cadence: Cadence },
    OneTime,
}

impl Schedule {
    pub fn is_recurring(&self) -> bool {
        matches!(self, Schedule::Recurring { .. })
    }

    pub fn cadence(&self) -> Option<Cadence> {
        match self {
            Schedule::Recurring { cadence } => Some(*cadence),
            Schedule::OneTime => None,
        }
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Eligible for dispatch once `next_run_at` is reached
    Active,
    /// Suspended by a user; never selected as due
    Paused,
    /// One-time job that completed successfully; retained for audit
    Archived,
    /// One-time job that exhausted its retries; requires manual re-trigger
    Dead,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Archived | JobStatus::Dead)
    }
}

/// Where a job came from. Provenance only; never affects scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Scheduled,
    Manual,
    Api,
}

/// A persisted unit of recurring or one-shot work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,
    /// Owning tenant; `None` for platform-wide jobs
    pub tenant_id: Option<TenantId>,
    /// Handler selector
    pub job_type: String,
    /// Recurring cadence or one-shot
    pub schedule: Schedule,
    /// Opaque payload passed through to the handler
    pub parameters: serde_json::Value,
    /// Lifecycle status
    pub status: JobStatus,
    /// Provenance of the job
    pub trigger_source: TriggerSource,
    /// When the job next becomes due
    pub next_run_at: DateTime<Utc>,
    /// Cap on consecutive failure retries
    pub max_retries: u32,
    /// Most recent failure message; cleared on success
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a recurring job, due immediately.
    pub fn recurring(
        tenant_id: Option<TenantId>,
        job_type: impl Into<String>,
        cadence: Cadence,
        parameters: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            tenant_id,
            job_type: job_type.into(),
            schedule: Schedule::Recurring { cadence },
            parameters,
            status: JobStatus::Active,
            trigger_source: TriggerSource::Scheduled,
            next_run_at: now,
            max_retries: DEFAULT_MAX_RETRIES,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a one-time job, due immediately.
    pub fn one_time(
        tenant_id: Option<TenantId>,
        job_type: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            tenant_id,
            job_type: job_type.into(),
            schedule: Schedule::OneTime,
            parameters,
            status: JobStatus::Active,
            trigger_source: TriggerSource::Manual,
            next_run_at: now,
            max_retries: DEFAULT_MAX_RETRIES,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_trigger_source(mut self, source: TriggerSource) -> Self {
        self.trigger_source = source;
        self
    }

    pub fn with_next_run_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_run_at = at;
        self
    }

    pub fn cadence(&self) -> Option<Cadence> {
        self.schedule.cadence()
    }

    /// Whether the scheduler should dispatch this job now.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Active && self.next_run_at <= now
    }

    /// Record a successful run: clear the error, archive one-time jobs,
    /// advance recurring jobs to the next cadence occurrence.
    pub fn mark_succeeded(&mut self, now: DateTime<Utc>) {
        self.last_error = None;
        self.updated_at = now;
        match self.schedule {
            Schedule::OneTime => self.status = JobStatus::Archived,
            Schedule::Recurring { cadence } => self.next_run_at = cadence.next_after(now),
        }
    }

    /// Record a failure and move `next_run_at`. Used both for backoff
    /// retries and for the cadence fallback after exhaustion; the job stays
    /// `Active` either way.
    pub fn reschedule(
        &mut self,
        error: impl Into<String>,
        next_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        self.last_error = Some(error.into());
        self.next_run_at = next_run_at;
        self.updated_at = now;
    }

    /// Terminal failure for one-time jobs: never auto-retried again.
    pub fn mark_dead(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = JobStatus::Dead;
        self.last_error = Some(error.into());
        self.updated_at = now;
    }

    pub fn pause(&mut self, now: DateTime<Utc>) {
        if self.status == JobStatus::Active {
            self.status = JobStatus::Paused;
            self.updated_at = now;
        }
    }

    /// Resume a paused job. Recurring jobs pick up at the next cadence
    /// occurrence rather than firing a burst of missed runs.
    pub fn resume(&mut self, now: DateTime<Utc>) {
        if self.status == JobStatus::Paused {
            self.status = JobStatus::Active;
            if let Schedule::Recurring { cadence } = self.schedule {
                self.next_run_at = cadence.next_after(now);
            }
            self.updated_at = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn new_jobs_are_active_and_due_immediately() {
        let job = Job::one_time(Some(TenantId::new()), "scrape_competitor", serde_json::json!({}));
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.max_retries, DEFAULT_MAX_RETRIES);
        assert!(job.is_due(Utc::now()));
    }

    #[test]
    fn paused_jobs_are_never_due() {
        let mut job = Job::recurring(None, "classify_content", Cadence::Hourly, serde_json::json!({}));
        job.pause(Utc::now());
        assert!(!job.is_due(Utc::now() + Duration::days(365)));
    }

    #[test]
    fn success_archives_one_time_jobs() {
        let mut job = Job::one_time(None, "sync_ads", serde_json::json!({}));
        job.last_error = Some("previous failure".to_string());
        job.mark_succeeded(Utc::now());
        assert_eq!(job.status, JobStatus::Archived);
        assert!(job.last_error.is_none());
        assert!(job.status.is_terminal());
    }

    #[test]
    fn success_advances_recurring_jobs_by_cadence() {
        let mut job = Job::recurring(None, "sync_ads", Cadence::Daily, serde_json::json!({}));
        let now = Utc::now();
        job.mark_succeeded(now);
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.next_run_at, now + Duration::days(1));
    }

    #[test]
    fn reschedule_keeps_job_active_and_stores_error() {
        let mut job = Job::recurring(None, "sync_ads", Cadence::Daily, serde_json::json!({}));
        let now = Utc::now();
        job.reschedule("rate limited", now + Duration::minutes(5), now);
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.last_error.as_deref(), Some("rate limited"));
        assert!(!job.is_due(now));
    }

    #[test]
    fn dead_jobs_are_terminal() {
        let mut job = Job::one_time(None, "sync_ads", serde_json::json!({}));
        job.mark_dead("exhausted", Utc::now());
        assert_eq!(job.status, JobStatus::Dead);
        assert!(!job.is_due(Utc::now() + Duration::days(1)));
    }

    #[test]
    fn resume_recomputes_next_occurrence_for_recurring() {
        let mut job = Job::recurring(None, "sync_ads", Cadence::Hourly, serde_json::json!({}));
        let now = Utc::now();
        job.pause(now);
        job.resume(now);
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.next_run_at, now + Duration::hours(1));
    }
}

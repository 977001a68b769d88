//! Job creation interface consumed by UI/API collaborators.

use chrono::Utc;
use tracing::info;

use brandops_core::{JobId, TenantId};

use crate::cadence::Cadence;
use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobStatus, Schedule, TriggerSource};

/// Thin service over a [`JobStore`] exposing the write surface external
/// callers are allowed to touch. The scheduler owns every other mutation.
pub struct JobQueue<S: JobStore> {
    store: S,
}

impl<S: JobStore> JobQueue<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Idempotent upsert of a recurring job keyed by `(tenant_id, job_type)`.
    ///
    /// An existing job keeps its identity and schedule position; cadence and
    /// parameters are updated in place. A dead or archived recurring job is
    /// revived: "ensure" means that after this call the job exists and runs.
    pub fn ensure_recurring_job(
        &self,
        tenant_id: Option<TenantId>,
        job_type: &str,
        cadence: Cadence,
        parameters: serde_json::Value,
    ) -> Result<Job, JobStoreError> {
        let now = Utc::now();

        if let Some(mut job) = self.store.find_recurring(tenant_id, job_type)? {
            job.schedule = Schedule::Recurring { cadence };
            job.parameters = parameters;
            if job.status.is_terminal() {
                job.status = JobStatus::Active;
                job.last_error = None;
                job.next_run_at = cadence.next_after(now);
            }
            job.updated_at = now;
            self.store.update(&job)?;
            info!(job_id = %job.id, job_type, "recurring job updated");
            return Ok(job);
        }

        let job = Job::recurring(tenant_id, job_type, cadence, parameters);
        self.store.insert(job.clone())?;
        info!(job_id = %job.id, job_type, "recurring job created");
        Ok(job)
    }

    /// Insert a new one-time job due immediately. Never deduplicated.
    pub fn queue_one_time_job(
        &self,
        tenant_id: Option<TenantId>,
        job_type: &str,
        parameters: serde_json::Value,
    ) -> Result<Job, JobStoreError> {
        let job = Job::one_time(tenant_id, job_type, parameters)
            .with_trigger_source(TriggerSource::Api);
        self.store.insert(job.clone())?;
        info!(job_id = %job.id, job_type, "one-time job queued");
        Ok(job)
    }

    pub fn pause_job(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        let mut job = self
            .store
            .get(job_id)?
            .ok_or(JobStoreError::NotFound(job_id))?;
        job.pause(Utc::now());
        self.store.update(&job)?;
        Ok(job)
    }

    pub fn resume_job(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        let mut job = self
            .store
            .get(job_id)?
            .ok_or(JobStoreError::NotFound(job_id))?;
        job.resume(Utc::now());
        self.store.update(&job)?;
        Ok(job)
    }
}

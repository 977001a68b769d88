//! Job persistence.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use brandops_core::{JobId, TenantId};

use super::types::{Job, Schedule};

/// Job store abstraction.
///
/// Rows are keyed by `job.id`; writes are whole-row upserts, so a UI
/// creating a job while the worker ticks is safe given the backing store's
/// native upsert atomicity.
pub trait JobStore: Send + Sync {
    /// Insert a new job.
    fn insert(&self, job: Job) -> Result<JobId, JobStoreError>;

    /// Overwrite an existing job.
    fn update(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Get a job by ID.
    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Find the recurring job for `(tenant_id, job_type)`.
    ///
    /// IS-NULL semantics: `tenant_id = None` matches only platform-wide
    /// jobs, never "any tenant".
    fn find_recurring(
        &self,
        tenant_id: Option<TenantId>,
        job_type: &str,
    ) -> Result<Option<Job>, JobStoreError>;

    /// All jobs with `status = Active` and `next_run_at <= now`, ordered by
    /// `next_run_at`.
    fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Job>, JobStoreError>;

    /// All jobs owned by the given tenant scope.
    fn list_for_tenant(&self, tenant_id: Option<TenantId>) -> Result<Vec<Job>, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory job store for tests/dev. Durable implementations slot in
/// behind the same trait.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        if !jobs.contains_key(&job.id) {
            return Err(JobStoreError::NotFound(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let jobs = self.jobs.read().unwrap();
        Ok(jobs.get(&job_id).cloned())
    }

    fn find_recurring(
        &self,
        tenant_id: Option<TenantId>,
        job_type: &str,
    ) -> Result<Option<Job>, JobStoreError> {
        let jobs = self.jobs.read().unwrap();
        Ok(jobs
            .values()
            .find(|j| {
                j.schedule.is_recurring() && j.tenant_id == tenant_id && j.job_type == job_type
            })
            .cloned())
    }

    fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.jobs.read().unwrap();
        let mut due: Vec<_> = jobs.values().filter(|j| j.is_due(now)).cloned().collect();
        due.sort_by_key(|j| (j.next_run_at, j.id));
        Ok(due)
    }

    fn list_for_tenant(&self, tenant_id: Option<TenantId>) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.jobs.read().unwrap();
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| j.tenant_id == tenant_id)
            .cloned()
            .collect();
        result.sort_by_key(|j| j.created_at);
        Ok(result)
    }
}

impl JobStore for Arc<InMemoryJobStore> {
    fn insert(&self, job: Job) -> Result<JobId, JobStoreError> {
        (**self).insert(job)
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        (**self).update(job)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).get(job_id)
    }

    fn find_recurring(
        &self,
        tenant_id: Option<TenantId>,
        job_type: &str,
    ) -> Result<Option<Job>, JobStoreError> {
        (**self).find_recurring(tenant_id, job_type)
    }

    fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Job>, JobStoreError> {
        (**self).list_due(now)
    }

    fn list_for_tenant(&self, tenant_id: Option<TenantId>) -> Result<Vec<Job>, JobStoreError> {
        (**self).list_for_tenant(tenant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadence::Cadence;
    use crate::jobs::types::JobStatus;
    use chrono::Duration;

    #[test]
    fn insert_and_get() {
        let store = InMemoryJobStore::new();
        let job = Job::one_time(None, "sync_ads", serde_json::json!({}));
        let id = store.insert(job).unwrap();
        assert!(store.get(id).unwrap().is_some());
    }

    #[test]
    fn insert_rejects_duplicate_ids() {
        let store = InMemoryJobStore::new();
        let job = Job::one_time(None, "sync_ads", serde_json::json!({}));
        store.insert(job.clone()).unwrap();
        assert!(matches!(
            store.insert(job),
            Err(JobStoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn update_requires_existing_job() {
        let store = InMemoryJobStore::new();
        let job = Job::one_time(None, "sync_ads", serde_json::json!({}));
        assert!(matches!(
            store.update(&job),
            Err(JobStoreError::NotFound(_))
        ));
    }

    #[test]
    fn find_recurring_uses_is_null_tenant_semantics() {
        let store = InMemoryJobStore::new();
        let tenant = TenantId::new();
        store
            .insert(Job::recurring(
                Some(tenant),
                "sync_ads",
                Cadence::Daily,
                serde_json::json!({}),
            ))
            .unwrap();
        store
            .insert(Job::recurring(
                None,
                "sync_ads",
                Cadence::Daily,
                serde_json::json!({}),
            ))
            .unwrap();

        let tenant_scoped = store.find_recurring(Some(tenant), "sync_ads").unwrap().unwrap();
        assert_eq!(tenant_scoped.tenant_id, Some(tenant));

        let platform = store.find_recurring(None, "sync_ads").unwrap().unwrap();
        assert_eq!(platform.tenant_id, None);

        assert!(store
            .find_recurring(Some(TenantId::new()), "sync_ads")
            .unwrap()
            .is_none());
    }

    #[test]
    fn find_recurring_ignores_one_time_jobs() {
        let store = InMemoryJobStore::new();
        store
            .insert(Job::one_time(None, "sync_ads", serde_json::json!({})))
            .unwrap();
        assert!(store.find_recurring(None, "sync_ads").unwrap().is_none());
    }

    #[test]
    fn list_due_excludes_future_paused_and_terminal_jobs() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();

        let due = Job::one_time(None, "due", serde_json::json!({}));
        let due_id = store.insert(due).unwrap();

        let future = Job::one_time(None, "future", serde_json::json!({}))
            .with_next_run_at(now + Duration::hours(1));
        store.insert(future).unwrap();

        let mut paused = Job::one_time(None, "paused", serde_json::json!({}));
        paused.pause(now);
        store.insert(paused).unwrap();

        let mut dead = Job::one_time(None, "dead", serde_json::json!({}));
        dead.mark_dead("gone", now);
        store.insert(dead).unwrap();

        let listed = store.list_due(now).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, due_id);
        assert_eq!(listed[0].status, JobStatus::Active);
    }

    #[test]
    fn list_for_tenant_is_scoped() {
        let store = InMemoryJobStore::new();
        let tenant = TenantId::new();
        store
            .insert(Job::one_time(Some(tenant), "a", serde_json::json!({})))
            .unwrap();
        store
            .insert(Job::one_time(None, "b", serde_json::json!({})))
            .unwrap();

        assert_eq!(store.list_for_tenant(Some(tenant)).unwrap().len(), 1);
        assert_eq!(store.list_for_tenant(None).unwrap().len(), 1);
    }
}

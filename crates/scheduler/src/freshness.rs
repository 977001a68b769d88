//! Per-dataset freshness ledger.
//!
//! Each `(tenant, dataset_key)` pair has exactly one continuously
//! overwritten record. The core invariant of the whole subsystem:
//! freshness is only ever computed from `last_success_at`, never from
//! `last_attempt_at`, so a failing recurring job cannot make stale data
//! appear current.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use brandops_core::{RunId, TenantId};

/// Identifier of a produced dataset (e.g. `"ads"`, `"competitor_pages"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetKey(String);

impl DatasetKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DatasetKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Status of the most recent attempt to produce a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessStatus {
    /// No attempt has ever been recorded
    NeverRun,
    Running,
    Success,
    Failed,
}

/// Ledger row for one `(tenant, dataset_key)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessRecord {
    pub tenant_id: Option<TenantId>,
    pub dataset_key: DatasetKey,
    /// Set only by a successful attempt; never touched on failure
    pub last_success_at: Option<DateTime<Utc>>,
    /// Set on every attempt, success or failure
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub status: FreshnessStatus,
    pub error_message: Option<String>,
    pub records_affected: Option<u64>,
    /// Free-form diagnostic payload attached via `annotate`
    pub metadata: serde_json::Value,
    /// Run that last touched this record
    pub updated_by_run: Option<RunId>,
}

impl FreshnessRecord {
    fn never_run(tenant_id: Option<TenantId>, dataset_key: DatasetKey) -> Self {
        Self {
            tenant_id,
            dataset_key,
            last_success_at: None,
            last_attempt_at: None,
            status: FreshnessStatus::NeverRun,
            error_message: None,
            records_affected: None,
            metadata: serde_json::Value::Null,
            updated_by_run: None,
        }
    }
}

/// Freshness store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FreshnessStoreError {
    #[error("storage error: {0}")]
    Storage(String),
}

/// Persistence for the freshness ledger. All writes are upserts keyed by
/// `(tenant_id, dataset_key)`.
pub trait FreshnessStore: Send + Sync {
    /// Mark an attempt as started: `status = Running`, `last_attempt_at = now`.
    fn record_start(
        &self,
        tenant_id: Option<TenantId>,
        dataset_key: &DatasetKey,
        run_id: RunId,
    ) -> Result<(), FreshnessStoreError>;

    /// Mark a successful attempt: sets `last_success_at`, clears the error.
    fn record_success(
        &self,
        tenant_id: Option<TenantId>,
        dataset_key: &DatasetKey,
        records_affected: Option<u64>,
        run_id: RunId,
    ) -> Result<(), FreshnessStoreError>;

    /// Mark a failed attempt. Must not modify `last_success_at`.
    fn record_failure(
        &self,
        tenant_id: Option<TenantId>,
        dataset_key: &DatasetKey,
        error: &str,
        run_id: RunId,
    ) -> Result<(), FreshnessStoreError>;

    /// Attach diagnostic metadata to a record.
    fn set_metadata(
        &self,
        tenant_id: Option<TenantId>,
        dataset_key: &DatasetKey,
        metadata: serde_json::Value,
    ) -> Result<(), FreshnessStoreError>;

    fn get(
        &self,
        tenant_id: Option<TenantId>,
        dataset_key: &DatasetKey,
    ) -> Result<Option<FreshnessRecord>, FreshnessStoreError>;

    fn list_for_tenant(
        &self,
        tenant_id: Option<TenantId>,
    ) -> Result<Vec<FreshnessRecord>, FreshnessStoreError>;
}

type Key = (Option<TenantId>, DatasetKey);

/// In-memory freshness store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryFreshnessStore {
    records: RwLock<HashMap<Key, FreshnessRecord>>,
}

impl InMemoryFreshnessStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn upsert<F>(&self, tenant_id: Option<TenantId>, dataset_key: &DatasetKey, apply: F)
    where
        F: FnOnce(&mut FreshnessRecord),
    {
        let mut records = self.records.write().unwrap();
        let record = records
            .entry((tenant_id, dataset_key.clone()))
            .or_insert_with(|| FreshnessRecord::never_run(tenant_id, dataset_key.clone()));
        apply(record);
    }
}

impl FreshnessStore for InMemoryFreshnessStore {
    fn record_start(
        &self,
        tenant_id: Option<TenantId>,
        dataset_key: &DatasetKey,
        run_id: RunId,
    ) -> Result<(), FreshnessStoreError> {
        let now = Utc::now();
        self.upsert(tenant_id, dataset_key, |record| {
            record.status = FreshnessStatus::Running;
            record.last_attempt_at = Some(now);
            record.updated_by_run = Some(run_id);
        });
        Ok(())
    }

    fn record_success(
        &self,
        tenant_id: Option<TenantId>,
        dataset_key: &DatasetKey,
        records_affected: Option<u64>,
        run_id: RunId,
    ) -> Result<(), FreshnessStoreError> {
        let now = Utc::now();
        self.upsert(tenant_id, dataset_key, |record| {
            record.status = FreshnessStatus::Success;
            record.last_success_at = Some(now);
            record.last_attempt_at = Some(now);
            record.error_message = None;
            record.records_affected = records_affected;
            record.updated_by_run = Some(run_id);
        });
        Ok(())
    }

    fn record_failure(
        &self,
        tenant_id: Option<TenantId>,
        dataset_key: &DatasetKey,
        error: &str,
        run_id: RunId,
    ) -> Result<(), FreshnessStoreError> {
        let now = Utc::now();
        let error = error.to_string();
        self.upsert(tenant_id, dataset_key, |record| {
            record.status = FreshnessStatus::Failed;
            record.last_attempt_at = Some(now);
            record.error_message = Some(error);
            record.records_affected = None;
            record.updated_by_run = Some(run_id);
        });
        Ok(())
    }

    fn set_metadata(
        &self,
        tenant_id: Option<TenantId>,
        dataset_key: &DatasetKey,
        metadata: serde_json::Value,
    ) -> Result<(), FreshnessStoreError> {
        self.upsert(tenant_id, dataset_key, |record| {
            record.metadata = metadata;
        });
        Ok(())
    }

    fn get(
        &self,
        tenant_id: Option<TenantId>,
        dataset_key: &DatasetKey,
    ) -> Result<Option<FreshnessRecord>, FreshnessStoreError> {
        let records = self.records.read().unwrap();
        Ok(records.get(&(tenant_id, dataset_key.clone())).cloned())
    }

    fn list_for_tenant(
        &self,
        tenant_id: Option<TenantId>,
    ) -> Result<Vec<FreshnessRecord>, FreshnessStoreError> {
        let records = self.records.read().unwrap();
        let mut result: Vec<_> = records
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.dataset_key.as_str().cmp(b.dataset_key.as_str()));
        Ok(result)
    }
}

/// Fire-and-forget facade handed to job handlers.
///
/// Record calls swallow and log store errors: a freshness write failure
/// degrades observability, never the handler's own outcome. The query
/// surface propagates errors normally.
#[derive(Clone)]
pub struct FreshnessTracker {
    store: Arc<dyn FreshnessStore>,
}

impl FreshnessTracker {
    pub fn new(store: Arc<dyn FreshnessStore>) -> Self {
        Self { store }
    }

    pub fn record_start(&self, tenant_id: Option<TenantId>, dataset_key: &DatasetKey, run_id: RunId) {
        if let Err(e) = self.store.record_start(tenant_id, dataset_key, run_id) {
            warn!(dataset = %dataset_key, error = %e, "freshness record_start failed");
        }
    }

    pub fn record_success(
        &self,
        tenant_id: Option<TenantId>,
        dataset_key: &DatasetKey,
        records_affected: Option<u64>,
        run_id: RunId,
    ) {
        if let Err(e) = self
            .store
            .record_success(tenant_id, dataset_key, records_affected, run_id)
        {
            warn!(dataset = %dataset_key, error = %e, "freshness record_success failed");
        }
    }

    pub fn record_failure(
        &self,
        tenant_id: Option<TenantId>,
        dataset_key: &DatasetKey,
        error: &str,
        run_id: RunId,
    ) {
        if let Err(e) = self.store.record_failure(tenant_id, dataset_key, error, run_id) {
            warn!(dataset = %dataset_key, error = %e, "freshness record_failure failed");
        }
    }

    pub fn annotate(
        &self,
        tenant_id: Option<TenantId>,
        dataset_key: &DatasetKey,
        metadata: serde_json::Value,
    ) {
        if let Err(e) = self.store.set_metadata(tenant_id, dataset_key, metadata) {
            warn!(dataset = %dataset_key, error = %e, "freshness annotate failed");
        }
    }

    pub fn get_freshness(
        &self,
        tenant_id: Option<TenantId>,
        dataset_key: &DatasetKey,
    ) -> Result<Option<FreshnessRecord>, FreshnessStoreError> {
        self.store.get(tenant_id, dataset_key)
    }

    pub fn get_all_freshness(
        &self,
        tenant_id: Option<TenantId>,
    ) -> Result<Vec<FreshnessRecord>, FreshnessStoreError> {
        self.store.list_for_tenant(tenant_id)
    }

    /// The only sanctioned way to answer "is this data fresh".
    ///
    /// True iff a record exists, it has ever succeeded, and that success is
    /// within `max_age`. A record whose most recent attempt failed can still
    /// be fresh off an earlier success, but a dataset that has never
    /// succeeded is never fresh.
    pub fn check_is_fresh(
        &self,
        tenant_id: Option<TenantId>,
        dataset_key: &DatasetKey,
        max_age: Duration,
    ) -> Result<bool, FreshnessStoreError> {
        let now = Utc::now();
        let fresh = match self.store.get(tenant_id, dataset_key)? {
            Some(record) if record.status != FreshnessStatus::NeverRun => record
                .last_success_at
                .is_some_and(|at| now - at <= max_age),
            _ => false,
        };
        Ok(fresh)
    }
}

impl std::fmt::Debug for FreshnessTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreshnessTracker").finish_non_exhaustive()
    }
}

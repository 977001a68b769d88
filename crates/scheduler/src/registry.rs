//! Handler contract and dispatch registry.
//!
//! Business operations (syncing ads, scraping pages, classifying content)
//! live outside this crate; they plug in through [`JobHandler`] and are
//! selected by the job's `job_type` string.

use std::collections::HashMap;
use std::sync::Arc;

use brandops_core::{RunId, TenantId};

/// Everything a handler receives for one execution.
#[derive(Debug, Clone, Copy)]
pub struct HandlerContext<'a> {
    /// Owning tenant; `None` for platform-wide jobs
    pub tenant_id: Option<TenantId>,
    /// The job's opaque parameters; each handler deserializes its own
    /// expected shape
    pub parameters: &'a serde_json::Value,
    /// The run this execution is recorded under
    pub run_id: RunId,
}

/// Outcome of a handler execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Success { records_affected: Option<u64> },
    Failure { error: String },
}

impl HandlerOutcome {
    pub fn success() -> Self {
        Self::Success {
            records_affected: None,
        }
    }

    pub fn success_with(records_affected: u64) -> Self {
        Self::Success {
            records_affected: Some(records_affected),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// A business operation dispatched by job type.
///
/// Handlers perform their own freshness-ledger updates internally (via an
/// injected [`crate::FreshnessTracker`]); the scheduler only sees the
/// outcome.
pub trait JobHandler: Send + Sync {
    fn execute(&self, ctx: HandlerContext<'_>) -> HandlerOutcome;
}

impl<F> JobHandler for F
where
    F: for<'a> Fn(HandlerContext<'a>) -> HandlerOutcome + Send + Sync,
{
    fn execute(&self, ctx: HandlerContext<'_>) -> HandlerOutcome {
        self(ctx)
    }
}

/// Exact-match registry from `job_type` string to handler.
///
/// Lookup is deliberately exact: an unregistered job type is a deployment
/// defect and must fail loudly at dispatch, not be absorbed by a fuzzy
/// fallback.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a job type. Re-registering replaces the
    /// previous handler.
    pub fn register<H>(&mut self, job_type: impl Into<String>, handler: H)
    where
        H: JobHandler + 'static,
    {
        self.handlers.insert(job_type.into(), Arc::new(handler));
    }

    pub fn register_arc(&mut self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type.into(), handler);
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    pub fn job_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_handlers() {
        let mut registry = HandlerRegistry::new();
        registry.register("sync_ads", |_ctx: HandlerContext<'_>| {
            HandlerOutcome::success_with(7)
        });

        let handler = registry.get("sync_ads").unwrap();
        let params = serde_json::json!({});
        let outcome = handler.execute(HandlerContext {
            tenant_id: None,
            parameters: &params,
            run_id: RunId::new(),
        });
        assert_eq!(outcome, HandlerOutcome::success_with(7));
    }

    #[test]
    fn lookup_is_exact_match_only() {
        let mut registry = HandlerRegistry::new();
        registry.register("sync_ads", |_ctx: HandlerContext<'_>| HandlerOutcome::success());

        assert!(registry.contains("sync_ads"));
        assert!(registry.get("sync").is_none());
        assert!(registry.get("sync_ads_v2").is_none());
        assert_eq!(registry.job_types().collect::<Vec<_>>(), vec!["sync_ads"]);
    }

    #[test]
    fn re_registration_replaces_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register("x", |_ctx: HandlerContext<'_>| HandlerOutcome::failure("old"));
        registry.register("x", |_ctx: HandlerContext<'_>| HandlerOutcome::success());

        let params = serde_json::json!({});
        let outcome = registry.get("x").unwrap().execute(HandlerContext {
            tenant_id: None,
            parameters: &params,
            run_id: RunId::new(),
        });
        assert!(outcome.is_success());
    }
}

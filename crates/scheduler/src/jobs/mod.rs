//! Job definitions: data model, persistence, and the creation interface.

pub mod queue;
pub mod store;
pub mod types;

pub use queue::JobQueue;
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use types::{Job, JobStatus, Schedule, TriggerSource};

//! Job repository abstraction
//!
//! Callers depend only on [`JobRepository`]. Two implementations ship:
//!
//! - [`InMemoryJobRepository`](super::memory::InMemoryJobRepository): process-local
//!   table for single-instance deployments and tests
//! - [`KvJobRepository`](super::kv::KvJobRepository): jobs kept in a shared
//!   key-value service so any stateless invocation can resume or read them

use std::sync::Arc;

use async_trait::async_trait;

use super::types::{ChunkResult, Claim, Job};
use crate::error::{ProcessingError, ProcessingResult};

/// Error type for job store backends
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("store returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("revision conflict on {key} after {attempts} attempts")]
    Conflict { key: String, attempts: u32 },
}

/// Result type for store backends
pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for ProcessingError {
    fn from(err: StoreError) -> Self {
        ProcessingError::storage(err.to_string())
    }
}

/// Shared reference to a job repository
pub type SharedJobRepository = Arc<dyn JobRepository>;

/// Storage contract for chunked jobs
///
/// `get` and `append_chunk_result` treat unknown and expired ids alike:
/// both fail with [`ProcessingError::NotFound`] and never recreate the job.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Persist a freshly created job.
    async fn create(&self, job: Job) -> ProcessingResult<()>;

    /// Current state of a job.
    async fn get(&self, job_id: &str) -> ProcessingResult<Job>;

    /// Append a chunk outcome and increment the counter atomically.
    /// Returns the job as it stands after the append.
    async fn append_chunk_result(&self, job_id: &str, result: ChunkResult)
        -> ProcessingResult<Job>;

    /// Lease the next pending chunk for `lease_for`, atomically with
    /// respect to other claimers of the same job.
    async fn claim_next_chunk(
        &self,
        job_id: &str,
        lease_for: chrono::Duration,
    ) -> ProcessingResult<Claim>;

    /// Drop expired jobs, returning how many were removed.
    async fn purge_expired(&self) -> ProcessingResult<usize>;

    /// Backend name used in logs
    fn backend(&self) -> &'static str;
}

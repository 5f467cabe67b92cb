//! Process-local job table
//!
//! The map lock is held only to look up or insert entries; each job carries
//! its own mutex so chunk completions for one job serialize without
//! contending with other jobs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::repository::JobRepository;
use super::types::{ChunkResult, Claim, Job};
use crate::error::{ProcessingError, ProcessingResult};

struct JobEntry {
    expires_at: DateTime<Utc>,
    job: Arc<Mutex<Job>>,
}

/// In-memory [`JobRepository`]
#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: RwLock<HashMap<String, JobEntry>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs, including expired ones not yet purged
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    async fn live_entry(&self, job_id: &str) -> ProcessingResult<Arc<Mutex<Job>>> {
        let jobs = self.jobs.read().await;
        match jobs.get(job_id) {
            Some(entry) if Utc::now() < entry.expires_at => Ok(Arc::clone(&entry.job)),
            _ => Err(ProcessingError::not_found(job_id)),
        }
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, job: Job) -> ProcessingResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(ProcessingError::storage(format!(
                "job {} already exists",
                job.id
            )));
        }
        jobs.insert(
            job.id.clone(),
            JobEntry {
                expires_at: job.expires_at,
                job: Arc::new(Mutex::new(job)),
            },
        );
        Ok(())
    }

    async fn get(&self, job_id: &str) -> ProcessingResult<Job> {
        let entry = self.live_entry(job_id).await?;
        let job = entry.lock().await;
        Ok(job.clone())
    }

    async fn append_chunk_result(
        &self,
        job_id: &str,
        result: ChunkResult,
    ) -> ProcessingResult<Job> {
        let entry = self.live_entry(job_id).await?;
        let mut job = entry.lock().await;
        job.record_chunk(result)?;
        Ok(job.clone())
    }

    async fn claim_next_chunk(
        &self,
        job_id: &str,
        lease_for: chrono::Duration,
    ) -> ProcessingResult<Claim> {
        let entry = self.live_entry(job_id).await?;
        let mut job = entry.lock().await;
        Ok(job.claim_next(Utc::now(), lease_for))
    }

    async fn purge_expired(&self) -> ProcessingResult<usize> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, entry| now < entry.expires_at);
        let removed = before - jobs.len();
        if removed > 0 {
            debug!(removed, remaining = jobs.len(), "Purged expired jobs");
        }
        Ok(removed)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

//! Shared key-value store backend
//!
//! Keeps job state outside process memory so any invocation of a stateless
//! host can read a job or append to it. The store speaks a small JSON
//! protocol with optimistic revisions:
//!
//! ```text
//! GET  {base}/kv/{namespace}/{job_id}
//!      200 {"revision": 4, "value": <Job>}   |  404
//! PUT  {base}/kv/{namespace}/{job_id}
//!      {"expected_revision": 4 | null, "ttl_secs": 3600, "value": <Job>}
//!      200 {"revision": 5}                  |  409 (revision moved)
//! ```
//!
//! `expected_revision: null` means "create only if absent". Entries expire
//! server-side after `ttl_secs`, so purging is the store's job.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::repository::{JobRepository, StoreError, StoreResult};
use super::types::{ChunkResult, Claim, Job};
use crate::error::{ProcessingError, ProcessingResult};

/// Connection settings for the shared store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvStoreConfig {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Compare-and-swap attempts before an append gives up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_namespace() -> String {
    "transcript-jobs".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_request_timeout_ms() -> u64 {
    3000
}

impl KvStoreConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            namespace: default_namespace(),
            max_attempts: default_max_attempts(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

#[derive(Debug, Deserialize)]
struct Versioned {
    revision: u64,
    value: Job,
}

#[derive(Debug, Serialize)]
struct WriteRequest<'a> {
    expected_revision: Option<u64>,
    ttl_secs: u64,
    value: &'a Job,
}

enum WriteOutcome {
    Written,
    Conflict,
}

/// [`JobRepository`] backed by a shared key-value service
pub struct KvJobRepository {
    client: reqwest::Client,
    config: KvStoreConfig,
}

impl KvJobRepository {
    pub fn new(config: KvStoreConfig) -> ProcessingResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| ProcessingError::storage(format!("failed to build KV client: {e}")))?;
        Ok(Self { client, config })
    }

    fn url(&self, job_id: &str) -> String {
        format!(
            "{}/kv/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.namespace,
            job_id
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read(&self, job_id: &str) -> StoreResult<Option<Versioned>> {
        let response = self
            .authorize(self.client.get(self.url(job_id)))
            .send()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?;
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| StoreError::Deserialization(e.to_string()))
    }

    async fn write(&self, job: &Job, expected_revision: Option<u64>) -> StoreResult<WriteOutcome> {
        let ttl_secs = (job.expires_at - Utc::now()).num_seconds().max(1) as u64;
        let body = serde_json::to_vec(&WriteRequest {
            expected_revision,
            ttl_secs,
            value: job,
        })
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let response = self
            .authorize(self.client.put(self.url(&job.id)))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::CONFLICT
            || status == reqwest::StatusCode::PRECONDITION_FAILED
        {
            return Ok(WriteOutcome::Conflict);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(WriteOutcome::Written)
    }

    async fn live(&self, job_id: &str) -> ProcessingResult<Versioned> {
        match self.read(job_id).await? {
            Some(versioned) if !versioned.value.is_expired(Utc::now()) => Ok(versioned),
            _ => Err(ProcessingError::not_found(job_id)),
        }
    }
}

#[async_trait]
impl JobRepository for KvJobRepository {
    async fn create(&self, job: Job) -> ProcessingResult<()> {
        match self.write(&job, None).await? {
            WriteOutcome::Written => Ok(()),
            WriteOutcome::Conflict => Err(ProcessingError::storage(format!(
                "job {} already exists",
                job.id
            ))),
        }
    }

    async fn get(&self, job_id: &str) -> ProcessingResult<Job> {
        Ok(self.live(job_id).await?.value)
    }

    async fn append_chunk_result(
        &self,
        job_id: &str,
        result: ChunkResult,
    ) -> ProcessingResult<Job> {
        let attempts = self.config.max_attempts.max(1);
        for attempt in 1..=attempts {
            let Versioned {
                revision,
                value: mut job,
            } = self.live(job_id).await?;
            job.record_chunk(result.clone())?;

            match self.write(&job, Some(revision)).await? {
                WriteOutcome::Written => return Ok(job),
                WriteOutcome::Conflict => {
                    debug!(job_id, revision, attempt, "KV revision conflict, retrying append");
                    tokio::task::yield_now().await;
                }
            }
        }

        warn!(job_id, attempts, "KV append gave up after repeated conflicts");
        Err(StoreError::Conflict {
            key: job_id.to_string(),
            attempts,
        }
        .into())
    }

    async fn claim_next_chunk(
        &self,
        job_id: &str,
        lease_for: chrono::Duration,
    ) -> ProcessingResult<Claim> {
        let attempts = self.config.max_attempts.max(1);
        for attempt in 1..=attempts {
            let Versioned {
                revision,
                value: mut job,
            } = self.live(job_id).await?;
            let claim = job.claim_next(Utc::now(), lease_for);
            if !matches!(claim, Claim::Chunk { .. }) {
                return Ok(claim);
            }

            match self.write(&job, Some(revision)).await? {
                WriteOutcome::Written => return Ok(claim),
                WriteOutcome::Conflict => {
                    debug!(job_id, revision, attempt, "KV revision conflict, retrying claim");
                    tokio::task::yield_now().await;
                }
            }
        }

        warn!(job_id, attempts, "KV claim gave up after repeated conflicts");
        Err(StoreError::Conflict {
            key: job_id.to_string(),
            attempts,
        }
        .into())
    }

    async fn purge_expired(&self) -> ProcessingResult<usize> {
        Ok(0)
    }

    fn backend(&self) -> &'static str {
        "kv"
    }
}

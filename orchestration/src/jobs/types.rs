//! Job records and the wire shapes built from them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisRecord;
use crate::chunking::FileChunk;
use crate::error::{ProcessingError, ProcessingResult};

/// Lifecycle state of a chunked job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Outcome of one chunk attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResult {
    pub chunk_index: usize,
    /// True when the chunk produced records
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<AnalysisRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl ChunkResult {
    pub fn succeeded(chunk_index: usize, records: Vec<AnalysisRecord>) -> Self {
        Self {
            chunk_index,
            completed: true,
            records,
            error: None,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(chunk_index: usize, error: impl Into<String>) -> Self {
        Self {
            chunk_index,
            completed: false,
            records: Vec::new(),
            error: Some(error.into()),
            finished_at: Utc::now(),
        }
    }
}

/// Progress counters reported to pollers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub percentage: u8,
}

impl Progress {
    pub fn new(completed: usize, total: usize) -> Self {
        let percentage = if total == 0 {
            100
        } else {
            ((completed.min(total) as f64 / total as f64) * 100.0).round() as u8
        };
        Self {
            completed,
            total,
            percentage,
        }
    }

    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }
}

/// A worker's exclusive hold on the next pending chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLease {
    pub chunk_index: usize,
    pub expires_at: DateTime<Utc>,
}

/// Answer to "which chunk should I run next?"
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The caller now holds the lease on `chunk`
    Chunk { prompt: String, chunk: FileChunk },
    /// Another worker holds an unexpired lease
    Busy { chunk_index: usize },
    /// No chunk is left to run
    Exhausted,
}

/// Server-tracked state of a multi-chunk request
///
/// Mutated only through [`Job::claim_next`] and [`Job::record_chunk`], which
/// keep the counters and result list consistent: `completed_chunks ==
/// results.len()` and the job is `Completed` exactly when every chunk has
/// been attempted. The prompt and unattempted chunks travel with the record,
/// so any invocation that can read the job can continue it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub results: Vec<ChunkResult>,
    #[serde(default)]
    pub prompt: String,
    /// Chunks not yet attempted, in execution order
    #[serde(default)]
    pub pending: Vec<FileChunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<ChunkLease>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Job {
    /// New job in `Processing` with a fresh id.
    pub fn new(total_chunks: usize, ttl: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            id: format!("job_{}", uuid::Uuid::new_v4().simple()),
            status: JobStatus::Processing,
            total_chunks,
            completed_chunks: 0,
            results: Vec::with_capacity(total_chunks),
            prompt: String::new(),
            pending: Vec::new(),
            lease: None,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
        }
    }

    /// New job carrying its prompt and every chunk as pending work.
    /// Attachments are stored base64-encoded.
    pub fn with_chunks(
        prompt: impl Into<String>,
        chunks: Vec<FileChunk>,
        ttl: chrono::Duration,
    ) -> Self {
        let mut job = Self::new(chunks.len().max(1), ttl);
        job.prompt = prompt.into();
        job.pending = chunks
            .into_iter()
            .map(|chunk| FileChunk {
                index: chunk.index,
                items: chunk.items.into_iter().map(|f| f.into_base64()).collect(),
            })
            .collect();
        job
    }

    /// Lease the next pending chunk until `now + lease_for`.
    ///
    /// An expired lease is taken over, so a chunk abandoned by a worker that
    /// went away is run again by the next caller.
    pub fn claim_next(&mut self, now: DateTime<Utc>, lease_for: chrono::Duration) -> Claim {
        if self.is_done() {
            return Claim::Exhausted;
        }
        if let Some(lease) = self.lease {
            if now < lease.expires_at {
                return Claim::Busy {
                    chunk_index: lease.chunk_index,
                };
            }
        }
        let Some(chunk) = self.pending.first().cloned() else {
            return Claim::Exhausted;
        };
        self.lease = Some(ChunkLease {
            chunk_index: chunk.index,
            expires_at: now + lease_for,
        });
        self.updated_at = now.max(self.updated_at);
        Claim::Chunk {
            prompt: self.prompt.clone(),
            chunk,
        }
    }

    /// Append a chunk outcome and advance the counter as one step.
    pub fn record_chunk(&mut self, result: ChunkResult) -> ProcessingResult<()> {
        if self.status == JobStatus::Completed || self.completed_chunks >= self.total_chunks {
            return Err(ProcessingError::JobCompleted {
                job_id: self.id.clone(),
            });
        }
        if result.chunk_index >= self.total_chunks {
            return Err(ProcessingError::invalid_input(format!(
                "chunk {} out of range for job {} ({} chunks)",
                result.chunk_index, self.id, self.total_chunks
            )));
        }
        if self
            .results
            .iter()
            .any(|r| r.chunk_index == result.chunk_index)
        {
            return Err(ProcessingError::invalid_input(format!(
                "chunk {} already recorded for job {}",
                result.chunk_index, self.id
            )));
        }

        self.updated_at = result.finished_at.max(self.updated_at);
        self.pending.retain(|chunk| chunk.index != result.chunk_index);
        if self.lease.is_some_and(|lease| lease.chunk_index == result.chunk_index) {
            self.lease = None;
        }
        self.results.push(result);
        self.completed_chunks += 1;
        if self.completed_chunks == self.total_chunks {
            self.status = JobStatus::Completed;
        }
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.status == JobStatus::Completed
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn progress(&self) -> Progress {
        Progress::new(self.completed_chunks, self.total_chunks)
    }

    /// Successful records of every chunk, in completion order.
    pub fn records(&self) -> Vec<AnalysisRecord> {
        self.results
            .iter()
            .filter(|r| r.completed)
            .flat_map(|r| r.records.iter().cloned())
            .collect()
    }

    pub fn errors(&self) -> Vec<ChunkError> {
        self.results
            .iter()
            .filter_map(|r| {
                r.error.as_ref().map(|error| ChunkError {
                    chunk_index: r.chunk_index,
                    error: error.clone(),
                })
            })
            .collect()
    }

    /// Read-only status view.
    pub fn snapshot(&self, now: DateTime<Utc>) -> JobSnapshot {
        let end = if self.is_done() { self.updated_at } else { now };
        let processing_time_ms = (end - self.created_at).num_milliseconds().max(0) as u64;

        JobSnapshot {
            success: true,
            job_id: self.id.clone(),
            status: self.status,
            progress: self.progress(),
            completed: self.is_done(),
            results: self.records(),
            errors: self.errors(),
            created_at: self.created_at,
            processing_time_ms,
        }
    }
}

/// One failed chunk as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkError {
    pub chunk_index: usize,
    pub error: String,
}

/// Response to a job status query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub success: bool,
    pub job_id: String,
    pub status: JobStatus,
    pub progress: Progress,
    pub completed: bool,
    pub results: Vec<AnalysisRecord>,
    pub errors: Vec<ChunkError>,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "processingTime")]
    pub processing_time_ms: u64,
}

/// Response to a job creation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCreated {
    pub success: bool,
    pub job_id: String,
    pub completed: bool,
    /// More chunks remain; the caller should poll
    pub partial: bool,
    pub progress: Progress,
    pub data: Vec<AnalysisRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ChunkError>,
}

impl JobCreated {
    pub fn from_job(job: &Job) -> Self {
        Self {
            success: true,
            job_id: job.id.clone(),
            completed: job.is_done(),
            partial: !job.is_done(),
            progress: job.progress(),
            data: job.records(),
            errors: job.errors(),
        }
    }
}

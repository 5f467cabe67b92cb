//! Chunk Executor: runs chunked jobs against a repository
//!
//! ```text
//! submit(prompt, files)
//!   ├─ plan_chunks(files, chunk_size)
//!   ├─ create_job(prompt, chunks)          status=processing, 0/n, n pending
//!   ├─ run_next_chunk                      claim chunk 0, raced against chunk_timeout
//!   ├─ schedule_remaining_chunks           spawned, claims the rest 100ms apart
//!   └─ JobCreated { partial: n > 1, data: chunk 0 records }
//!
//! resume(job_id)                           any process sharing the repository
//!   └─ run_next_chunk                      claim the next pending chunk, or report
//! ```
//!
//! A chunk that times out or fails is recorded with its error text and the
//! job moves on. Every attempt counts toward `completed_chunks`. Claims hold
//! a lease of twice the chunk timeout, so a chunk abandoned by a dead
//! process becomes claimable again once its lease runs out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::repository::SharedJobRepository;
use super::types::{ChunkResult, Claim, Job, JobCreated, JobSnapshot};
use crate::analysis::{AnalysisRequest, RemoteAnalyzer};
use crate::chunking::{plan_chunks, FileChunk};
use crate::config::ChunkingConfig;
use crate::error::{ProcessingError, ProcessingResult};
use crate::payload::FileAttachment;
use crate::polling::JobStatusSource;
use crate::resilience::race_processing;

const BUSY_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Outcome of one claim-and-run step
#[derive(Debug, Clone)]
pub enum ChunkStep {
    /// A chunk ran; the job as recorded afterwards
    Ran(Job),
    /// Another worker holds the lease on the next chunk
    Busy { chunk_index: usize },
    /// Nothing left to claim
    Exhausted,
}

/// Executes chunked jobs and answers status queries
pub struct ChunkExecutor {
    repository: SharedJobRepository,
    analyzer: Arc<dyn RemoteAnalyzer>,
    config: ChunkingConfig,
}

impl ChunkExecutor {
    pub fn new(
        repository: SharedJobRepository,
        analyzer: Arc<dyn RemoteAnalyzer>,
        config: ChunkingConfig,
    ) -> Self {
        Self {
            repository,
            analyzer,
            config,
        }
    }

    /// Create a shared reference to this executor
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    pub fn repository(&self) -> &SharedJobRepository {
        &self.repository
    }

    /// Allocate a job holding `prompt` and every chunk as pending work.
    pub async fn create_job(&self, prompt: &str, chunks: Vec<FileChunk>) -> ProcessingResult<Job> {
        let ttl = chrono::Duration::from_std(self.config.job_ttl)
            .map_err(|e| ProcessingError::invalid_input(format!("job ttl out of range: {e}")))?;
        let job = Job::with_chunks(prompt, chunks, ttl);
        self.repository.create(job.clone()).await?;
        debug!(
            job_id = %job.id,
            total_chunks = job.total_chunks,
            backend = self.repository.backend(),
            "Created chunked job"
        );
        Ok(job)
    }

    fn lease_duration(&self) -> ProcessingResult<chrono::Duration> {
        chrono::Duration::from_std(self.config.chunk_timeout * 2)
            .map_err(|e| ProcessingError::invalid_input(format!("chunk lease out of range: {e}")))
    }

    /// Claim the next pending chunk of `job_id` and run it.
    pub async fn run_next_chunk(&self, job_id: &str) -> ProcessingResult<ChunkStep> {
        let claim = self
            .repository
            .claim_next_chunk(job_id, self.lease_duration()?)
            .await?;
        match claim {
            Claim::Chunk { prompt, chunk } => {
                let job = self
                    .execute_chunk_synchronously(job_id, &prompt, &chunk, self.config.chunk_timeout)
                    .await?;
                Ok(ChunkStep::Ran(job))
            }
            Claim::Busy { chunk_index } => Ok(ChunkStep::Busy { chunk_index }),
            Claim::Exhausted => Ok(ChunkStep::Exhausted),
        }
    }

    /// Run one chunk within `budget` and record the outcome.
    ///
    /// Analysis failures are recorded on the job, not returned. Only
    /// repository errors (unknown job, storage) surface as `Err`.
    pub async fn execute_chunk_synchronously(
        &self,
        job_id: &str,
        prompt: &str,
        chunk: &FileChunk,
        budget: Duration,
    ) -> ProcessingResult<Job> {
        let request = AnalysisRequest::new(prompt, &chunk.items);
        let operation = format!("chunk {}", chunk.index);
        let outcome = race_processing(
            &operation,
            async {
                let response = self.analyzer.analyze(&request).await?;
                response.records()
            },
            budget,
        )
        .await;

        let result = match outcome {
            Ok(records) => {
                debug!(job_id, chunk = chunk.index, records = records.len(), "Chunk completed");
                ChunkResult::succeeded(chunk.index, records)
            }
            Err(err) => {
                warn!(
                    job_id,
                    chunk = chunk.index,
                    error_class = %err.class(),
                    error = %err,
                    "Chunk failed"
                );
                ChunkResult::failed(chunk.index, err.to_string())
            }
        };

        self.repository.append_chunk_result(job_id, result).await
    }

    /// Claim and run the remaining chunks in a background task, in order.
    pub fn schedule_remaining_chunks(self: &Arc<Self>, job_id: String) -> JoinHandle<()> {
        let executor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ran = 0usize;
            loop {
                tokio::time::sleep(executor.config.inter_chunk_delay).await;

                match executor.run_next_chunk(&job_id).await {
                    Ok(ChunkStep::Ran(job)) => {
                        ran += 1;
                        if job.is_done() {
                            info!(
                                job_id = %job.id,
                                completed = job.completed_chunks,
                                total = job.total_chunks,
                                errors = job.errors().len(),
                                "Chunked job completed"
                            );
                            break;
                        }
                    }
                    Ok(ChunkStep::Busy { chunk_index }) => {
                        debug!(job_id = %job_id, chunk = chunk_index, "Chunk leased elsewhere, waiting");
                        tokio::time::sleep(BUSY_RETRY_DELAY).await;
                    }
                    Ok(ChunkStep::Exhausted) => break,
                    Err(err) => {
                        warn!(job_id = %job_id, error = %err, "Abandoning background chunks");
                        return;
                    }
                }
            }
            debug!(job_id = %job_id, ran, "Background chunks finished");
        })
    }

    /// Run the next pending chunk if one is free, then report status.
    ///
    /// Lets any process that shares the repository carry a job forward after
    /// the process that submitted it has gone away.
    pub async fn resume(&self, job_id: &str) -> ProcessingResult<JobSnapshot> {
        match self.run_next_chunk(job_id).await? {
            ChunkStep::Ran(job) => {
                debug!(
                    job_id,
                    completed = job.completed_chunks,
                    total = job.total_chunks,
                    "Resumed chunk"
                );
                Ok(job.snapshot(Utc::now()))
            }
            ChunkStep::Busy { .. } | ChunkStep::Exhausted => self.get_status(job_id).await,
        }
    }

    /// Status snapshot; the only failure is an unknown or expired id.
    pub async fn get_status(&self, job_id: &str) -> ProcessingResult<JobSnapshot> {
        let job = self.repository.get(job_id).await?;
        Ok(job.snapshot(Utc::now()))
    }

    /// Split, create, run the first chunk and hand the rest to the background.
    pub async fn submit(
        self: &Arc<Self>,
        prompt: &str,
        files: &[FileAttachment],
        chunk_size: Option<usize>,
    ) -> ProcessingResult<JobCreated> {
        if prompt.trim().is_empty() {
            return Err(ProcessingError::invalid_input("missing required field: prompt"));
        }

        let chunk_size = chunk_size.unwrap_or(self.config.chunk_size);
        let job = self.create_job(prompt, plan_chunks(files, chunk_size)).await?;

        let job = match self.run_next_chunk(&job.id).await? {
            ChunkStep::Ran(job) => job,
            ChunkStep::Busy { .. } | ChunkStep::Exhausted => self.repository.get(&job.id).await?,
        };

        let created = JobCreated::from_job(&job);
        info!(
            job_id = %job.id,
            files = files.len(),
            chunks = job.total_chunks,
            partial = created.partial,
            "Submitted chunked job"
        );

        if !job.is_done() {
            self.schedule_remaining_chunks(job.id.clone());
        }
        Ok(created)
    }

    pub async fn purge_expired(&self) -> ProcessingResult<usize> {
        self.repository.purge_expired().await
    }
}

#[async_trait]
impl JobStatusSource for ChunkExecutor {
    async fn job_status(&self, job_id: &str) -> ProcessingResult<JobSnapshot> {
        self.get_status(job_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisResponse;
    use crate::jobs::memory::InMemoryJobRepository;
    use crate::jobs::types::JobStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Echoes each file name as a record; files named `slow*` hang, `bad*` fail.
    struct EchoAnalyzer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RemoteAnalyzer for EchoAnalyzer {
        async fn analyze(&self, request: &AnalysisRequest) -> ProcessingResult<AnalysisResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.files.iter().any(|f| f.name.starts_with("slow")) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if request.files.iter().any(|f| f.name.starts_with("bad")) {
                return Err(ProcessingError::from_status(500, "model exploded"));
            }
            let names: Vec<&str> = request.files.iter().map(|f| f.name.as_str()).collect();
            Ok(AnalysisResponse::new(format!(
                "```json\n{}\n```",
                serde_json::to_string(&names).unwrap()
            )))
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    fn executor(chunk_size: usize) -> (Arc<ChunkExecutor>, Arc<EchoAnalyzer>) {
        executor_on(Arc::new(InMemoryJobRepository::new()), chunk_size)
    }

    fn executor_on(
        repository: SharedJobRepository,
        chunk_size: usize,
    ) -> (Arc<ChunkExecutor>, Arc<EchoAnalyzer>) {
        let analyzer = Arc::new(EchoAnalyzer {
            calls: AtomicUsize::new(0),
        });
        let executor = ChunkExecutor::new(
            repository,
            analyzer.clone(),
            ChunkingConfig {
                chunk_size,
                ..ChunkingConfig::default()
            },
        )
        .shared();
        (executor, analyzer)
    }

    fn files(names: &[&str]) -> Vec<FileAttachment> {
        names
            .iter()
            .map(|n| FileAttachment::from_bytes(*n, "application/pdf", vec![1u8; 16]))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_chunk_completes_synchronously() {
        let (executor, _) = executor(5);
        let created = executor
            .submit("analyze", &files(&["a.pdf", "b.pdf"]), None)
            .await
            .unwrap();

        assert!(created.completed);
        assert!(!created.partial);
        assert_eq!(created.data, vec![serde_json::json!("a.pdf"), serde_json::json!("b.pdf")]);

        let status = executor.get_status(&created.job_id).await.unwrap();
        assert_eq!(status.status, JobStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_chunks_run_in_background() {
        let (executor, analyzer) = executor(2);
        let created = executor
            .submit("analyze", &files(&["a", "b", "c", "d", "e"]), None)
            .await
            .unwrap();

        assert!(created.partial);
        assert_eq!(created.progress.completed, 1);
        assert_eq!(created.progress.total, 3);
        assert_eq!(created.data.len(), 2);

        tokio::time::sleep(Duration::from_secs(1)).await;

        let status = executor.get_status(&created.job_id).await.unwrap();
        assert!(status.completed);
        assert_eq!(status.results.len(), 5);
        assert!(status.errors.is_empty());
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_and_slow_chunks_do_not_block_siblings() {
        let (executor, _) = executor(1);
        let created = executor
            .submit("analyze", &files(&["slow.pdf", "bad.pdf", "ok.pdf"]), None)
            .await
            .unwrap();

        // First chunk hit the 8s budget but still counted
        assert_eq!(created.progress.completed, 1);
        assert!(created.data.is_empty());
        assert_eq!(created.errors.len(), 1);
        assert!(created.errors[0].error.contains("timed out"));

        tokio::time::sleep(Duration::from_secs(1)).await;

        let status = executor.get_status(&created.job_id).await.unwrap();
        assert!(status.completed);
        assert_eq!(status.progress.completed, 3);
        assert_eq!(status.results, vec![serde_json::json!("ok.pdf")]);
        let failed: Vec<usize> = status.errors.iter().map(|e| e.chunk_index).collect();
        assert_eq!(failed, vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_only_request_uses_one_empty_chunk() {
        let (executor, analyzer) = executor(5);
        let created = executor.submit("summarize", &[], None).await.unwrap();
        assert!(created.completed);
        assert_eq!(created.progress.total, 1);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_prompt_rejected() {
        let (executor, _) = executor(5);
        let err = executor.submit("  ", &files(&["a"]), None).await.unwrap_err();
        assert!(matches!(err, ProcessingError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_unknown_job_status_is_not_found() {
        let (executor, _) = executor(5);
        let err = executor.get_status("job_never_issued").await.unwrap_err();
        assert!(matches!(err, ProcessingError::NotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_monotone_while_running() {
        let (executor, _) = executor(1);
        let names: Vec<String> = (0..6).map(|i| format!("f{i}.pdf")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let created = executor.submit("analyze", &files(&refs), None).await.unwrap();

        let mut last = created.progress.percentage;
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let status = executor.get_status(&created.job_id).await.unwrap();
            assert!(status.progress.percentage >= last);
            assert!(status.progress.completed <= status.progress.total);
            last = status.progress.percentage;
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn test_job_finishes_from_a_later_process() {
        let repository: SharedJobRepository = Arc::new(InMemoryJobRepository::new());

        let first = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let job_id = first.block_on(async {
            let (executor, _) = executor_on(Arc::clone(&repository), 1);
            let created = executor
                .submit("analyze", &files(&["a.pdf", "b.pdf", "c.pdf"]), None)
                .await
                .unwrap();
            assert!(created.partial);
            created.job_id
        });
        // Background chunks die with the runtime
        drop(first);

        let second = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        second.block_on(async {
            let (executor, analyzer) = executor_on(Arc::clone(&repository), 1);
            let mut status = executor.get_status(&job_id).await.unwrap();
            assert_eq!(status.progress.completed, 1);

            for _ in 0..5 {
                if status.completed {
                    break;
                }
                status = executor.resume(&job_id).await.unwrap();
            }
            assert!(status.completed);
            assert_eq!(
                status.results,
                vec![
                    serde_json::json!("a.pdf"),
                    serde_json::json!("b.pdf"),
                    serde_json::json!("c.pdf")
                ]
            );
            assert_eq!(analyzer.calls.load(Ordering::SeqCst), 2);

            let after = executor.resume(&job_id).await.unwrap();
            assert_eq!(after.progress.completed, 3);
            assert_eq!(analyzer.calls.load(Ordering::SeqCst), 2);
        });
    }

    #[tokio::test]
    async fn test_resume_waits_for_leased_chunk() {
        let (executor, analyzer) = executor(1);
        let job = executor
            .create_job("analyze", plan_chunks(&files(&["a.pdf", "b.pdf"]), 1))
            .await
            .unwrap();
        let held = executor
            .repository()
            .claim_next_chunk(&job.id, chrono::Duration::minutes(5))
            .await
            .unwrap();
        assert!(matches!(held, Claim::Chunk { .. }));

        let step = executor.run_next_chunk(&job.id).await.unwrap();
        assert!(matches!(step, ChunkStep::Busy { chunk_index: 0 }));
        let status = executor.resume(&job.id).await.unwrap();
        assert_eq!(status.progress.completed, 0);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
    }
}

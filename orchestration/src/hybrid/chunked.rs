//! Chunked strategy: submit a job, return the first chunk, poll the rest

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::types::{
    ProcessingCapability, ProcessingObserver, ProcessingOutcome, ProcessingRequest,
    ProcessingType, ProgressEvent,
};
use crate::error::{ProcessingError, ProcessingResult};
use crate::jobs::{ChunkExecutor, JobSnapshot};
use crate::polling::{PollObserver, PollOptions, PollReport, PollStrategy, PollingEngine};
use crate::strategy::Strategy;

pub struct ChunkedProcessor {
    executor: Arc<ChunkExecutor>,
    polling: Arc<PollingEngine>,
}

impl ChunkedProcessor {
    pub fn new(executor: Arc<ChunkExecutor>, polling: Arc<PollingEngine>) -> Self {
        Self { executor, polling }
    }

    pub fn executor(&self) -> &Arc<ChunkExecutor> {
        &self.executor
    }

    pub fn polling(&self) -> &Arc<PollingEngine> {
        &self.polling
    }
}

/// Forwards polling events to the request's observer
struct ObserverBridge {
    job_id: String,
    observer: Arc<dyn ProcessingObserver>,
}

impl PollObserver for ObserverBridge {
    fn on_progress(&self, snapshot: &JobSnapshot, _poll_count: u32) {
        self.observer.on_progress(&ProgressEvent::JobProgress {
            job_id: self.job_id.clone(),
            progress: snapshot.progress,
            results: snapshot.results.len(),
        });
    }

    fn on_complete(&self, snapshot: JobSnapshot, _report: PollReport) {
        self.observer.on_progress(&ProgressEvent::JobFinished(snapshot));
    }

    fn on_error(&self, error: ProcessingError, _report: PollReport) {
        self.observer.on_progress(&ProgressEvent::JobFailed {
            job_id: self.job_id.clone(),
            error: error.to_string(),
        });
    }
}

#[async_trait]
impl ProcessingCapability for ChunkedProcessor {
    fn strategy(&self) -> Strategy {
        Strategy::Chunked
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn process(&self, request: &ProcessingRequest) -> ProcessingResult<ProcessingOutcome> {
        let created = self
            .executor
            .submit(&request.prompt, &request.files, request.options.chunk_size)
            .await?;

        if created.completed {
            debug!(job_id = %created.job_id, "Chunked job finished in the submitting call");
            let mut outcome = ProcessingOutcome::complete(
                Strategy::Chunked,
                ProcessingType::ChunkedImmediate,
                created.data,
            );
            outcome.job_id = Some(created.job_id);
            outcome.progress = Some(created.progress);
            outcome.errors = created.errors;
            return Ok(outcome);
        }

        let poll_strategy = PollStrategy::for_chunk_count(created.progress.total);
        request.emit(ProgressEvent::JobSubmitted {
            job_id: created.job_id.clone(),
            progress: created.progress,
        });

        let bridge: Option<Arc<dyn PollObserver>> =
            request.options.observer.as_ref().map(|observer| {
                Arc::new(ObserverBridge {
                    job_id: created.job_id.clone(),
                    observer: Arc::clone(observer),
                }) as Arc<dyn PollObserver>
            });

        if request.options.await_completion {
            let snapshot = self
                .polling
                .wait_for_completion(&created.job_id, poll_strategy, bridge)
                .await?;
            let mut outcome = ProcessingOutcome::complete(
                Strategy::Chunked,
                ProcessingType::ChunkedPolling,
                snapshot.results,
            );
            outcome.job_id = Some(snapshot.job_id);
            outcome.progress = Some(snapshot.progress);
            outcome.errors = snapshot.errors;
            return Ok(outcome);
        }

        // Without an observer the caller polls job status on its own
        if let Some(observer) = bridge {
            self.polling
                .start_polling(&created.job_id, PollOptions::new(poll_strategy, observer));
        }
        info!(
            job_id = %created.job_id,
            poll_strategy = %poll_strategy,
            completed = created.progress.completed,
            total = created.progress.total,
            "Returning partial results, polling the remainder"
        );

        Ok(ProcessingOutcome {
            success: true,
            results: created.data,
            processing_type: ProcessingType::ChunkedPolling,
            strategy: Strategy::Chunked,
            job_id: Some(created.job_id),
            progress: Some(created.progress),
            partial: true,
            errors: created.errors,
            processing_time: std::time::Duration::ZERO,
        })
    }
}

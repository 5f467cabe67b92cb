//! Request, outcome and observer types shared by the processors

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisRecord;
use crate::error::{ProcessingError, ProcessingResult};
use crate::jobs::{ChunkError, JobSnapshot, Progress};
use crate::payload::FileAttachment;
use crate::resilience::millis;
use crate::strategy::{PreferredMethod, Strategy};

/// Per-request options
#[derive(Clone, Default)]
pub struct RequestOptions {
    /// Overrides the processor-wide preference for this request
    pub preferred: Option<PreferredMethod>,
    /// Overrides the configured direct-call budget
    pub timeout: Option<Duration>,
    /// Overrides the configured files-per-chunk
    pub chunk_size: Option<usize>,
    /// Drive chunked jobs to completion before returning, so a polling
    /// failure can still escalate
    pub await_completion: bool,
    /// Subjects used to fetch historical patterns for the prompt
    pub subjects: Vec<String>,
    pub programme_context: Option<String>,
    pub observer: Option<Arc<dyn ProcessingObserver>>,
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("preferred", &self.preferred)
            .field("timeout", &self.timeout)
            .field("chunk_size", &self.chunk_size)
            .field("await_completion", &self.await_completion)
            .field("subjects", &self.subjects)
            .field("programme_context", &self.programme_context)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

/// A prompt, its attachments and how to process them
#[derive(Debug, Clone)]
pub struct ProcessingRequest {
    pub prompt: String,
    pub files: Vec<FileAttachment>,
    pub options: RequestOptions,
}

impl ProcessingRequest {
    pub fn new(prompt: impl Into<String>, files: Vec<FileAttachment>) -> Self {
        Self {
            prompt: prompt.into(),
            files,
            options: RequestOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub(crate) fn emit(&self, event: ProgressEvent) {
        if let Some(observer) = &self.options.observer {
            observer.on_progress(&event);
        }
    }
}

/// How a result was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingType {
    Direct,
    /// Every chunk finished inside the submitting call
    ChunkedImmediate,
    /// Chunks remain (or were awaited) through polling
    ChunkedPolling,
    FallbackSingle,
    FallbackChunked,
    /// Succeeded only after escalating away from the first strategy
    FallbackRecovery,
}

impl fmt::Display for ProcessingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Direct => "direct",
            Self::ChunkedImmediate => "chunked_immediate",
            Self::ChunkedPolling => "chunked_polling",
            Self::FallbackSingle => "fallback_single",
            Self::FallbackChunked => "fallback_chunked",
            Self::FallbackRecovery => "fallback_recovery",
        };
        f.write_str(s)
    }
}

/// Result of one processed request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingOutcome {
    pub success: bool,
    pub results: Vec<AnalysisRecord>,
    pub processing_type: ProcessingType,
    /// Strategy that actually produced the results
    pub strategy: Strategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    /// More results will arrive through polling
    pub partial: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ChunkError>,
    #[serde(rename = "processing_time_ms", with = "millis")]
    pub processing_time: Duration,
}

impl ProcessingOutcome {
    pub fn complete(
        strategy: Strategy,
        processing_type: ProcessingType,
        results: Vec<AnalysisRecord>,
    ) -> Self {
        Self {
            success: true,
            results,
            processing_type,
            strategy,
            job_id: None,
            progress: None,
            partial: false,
            errors: Vec::new(),
            processing_time: Duration::ZERO,
        }
    }
}

/// Intermediate events delivered to a [`ProcessingObserver`]
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    StrategySelected {
        strategy: Strategy,
        rationale: String,
    },
    /// A job was submitted and some chunks remain
    JobSubmitted {
        job_id: String,
        progress: Progress,
    },
    JobProgress {
        job_id: String,
        progress: Progress,
        results: usize,
    },
    /// A background job finished after the request already returned
    JobFinished(JobSnapshot),
    /// Background polling failed after the request already returned
    JobFailed {
        job_id: String,
        error: String,
    },
    /// Client-side chunk finished
    FallbackChunk {
        index: usize,
        total: usize,
    },
    CoolingDown {
        delay: Duration,
    },
    Escalating {
        from: Strategy,
        to: Strategy,
        reason: String,
    },
}

/// Caller-supplied callbacks for one request
pub trait ProcessingObserver: Send + Sync {
    fn on_progress(&self, _event: &ProgressEvent) {}

    /// Fired once on terminal success with the strategy actually used
    fn on_complete(&self, _outcome: &ProcessingOutcome, _strategy: Strategy) {}

    /// Fired once on terminal failure
    fn on_error(&self, _error: &ProcessingError) {}

    /// Fired each time the orchestrator escalates
    fn on_fallback(&self, _error: &ProcessingError, _target: Strategy) {}
}

/// One execution path the orchestrator can dispatch to
#[async_trait]
pub trait ProcessingCapability: Send + Sync {
    fn strategy(&self) -> Strategy;

    fn is_ready(&self) -> bool;

    async fn process(&self, request: &ProcessingRequest) -> ProcessingResult<ProcessingOutcome>;
}

//! Fallback strategy: client-side analysis with the caller's own key
//!
//! Not bound by the host's execution ceiling, so it takes whatever is too big
//! or too slow for the server paths. Small requests go out as one call;
//! larger ones in chunks of three with a pause between calls. A failed chunk
//! becomes an error record and the rest continue.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

use super::types::{
    ProcessingCapability, ProcessingOutcome, ProcessingRequest, ProcessingType, ProgressEvent,
};
use crate::analysis::{AnalysisRecord, AnalysisRequest, RemoteAnalyzer};
use crate::chunking::plan_chunks;
use crate::config::FallbackConfig;
use crate::error::{ProcessingError, ProcessingResult};
use crate::jobs::ChunkError;
use crate::payload::{FileAttachment, PayloadAnalysis};
use crate::resilience::race_processing;
use crate::strategy::Strategy;

/// Placeholder a failed fallback chunk leaves among the results.
pub(crate) fn error_record(error: &ProcessingError, files: &[FileAttachment]) -> AnalysisRecord {
    let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
    json!({ "error": error.to_string(), "files": names })
}

pub(crate) fn is_error_record(record: &AnalysisRecord) -> bool {
    record
        .as_object()
        .is_some_and(|fields| fields.contains_key("error") && fields.contains_key("files"))
}

pub struct FallbackProcessor {
    analyzer: RwLock<Option<Arc<dyn RemoteAnalyzer>>>,
    config: FallbackConfig,
}

impl FallbackProcessor {
    /// A processor with no analyzer installed; not ready until [`initialize`](Self::initialize).
    pub fn new(config: FallbackConfig) -> Self {
        Self {
            analyzer: RwLock::new(None),
            config,
        }
    }

    /// Probe the analyzer's credentials, then install it.
    pub async fn initialize(&self, analyzer: Arc<dyn RemoteAnalyzer>) -> ProcessingResult<()> {
        analyzer.health_check().await?;
        info!(analyzer = analyzer.name(), "Fallback analyzer installed");
        self.install(analyzer);
        Ok(())
    }

    /// Install without probing.
    pub fn install(&self, analyzer: Arc<dyn RemoteAnalyzer>) {
        let mut slot = self
            .analyzer
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(analyzer);
    }

    pub fn uninstall(&self) {
        let mut slot = self
            .analyzer
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = None;
    }

    fn current(&self) -> Option<Arc<dyn RemoteAnalyzer>> {
        self.analyzer
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn check_file_sizes(&self, files: &[FileAttachment]) -> ProcessingResult<()> {
        for file in files {
            let size = file.byte_len().unwrap_or(0);
            if size > self.config.max_file_size {
                return Err(ProcessingError::PayloadTooLarge {
                    message: format!(
                        "{} is {:.1}MB, limit is {:.1}MB",
                        file.name,
                        size as f64 / (1024.0 * 1024.0),
                        self.config.max_file_size as f64 / (1024.0 * 1024.0)
                    ),
                });
            }
        }
        Ok(())
    }

    async fn call(
        &self,
        analyzer: &dyn RemoteAnalyzer,
        prompt: &str,
        files: &[FileAttachment],
        operation: &str,
    ) -> ProcessingResult<Vec<serde_json::Value>> {
        let request = AnalysisRequest::new(prompt, files);
        race_processing(
            operation,
            async {
                let response = analyzer.analyze(&request).await?;
                response.records()
            },
            self.config.timeout,
        )
        .await
    }
}

#[async_trait]
impl ProcessingCapability for FallbackProcessor {
    fn strategy(&self) -> Strategy {
        Strategy::Fallback
    }

    fn is_ready(&self) -> bool {
        self.current().is_some()
    }

    async fn process(&self, request: &ProcessingRequest) -> ProcessingResult<ProcessingOutcome> {
        let analyzer = self
            .current()
            .ok_or_else(|| ProcessingError::unavailable("fallback"))?;
        self.check_file_sizes(&request.files)?;

        let analysis = PayloadAnalysis::analyze(&request.files, &request.prompt)?;
        if analysis.file_count <= self.config.single_call_max_files
            && analysis.estimated_payload_size <= self.config.single_call_max_payload
        {
            debug!(files = analysis.file_count, "Fallback single call");
            let records = self
                .call(analyzer.as_ref(), &request.prompt, &request.files, "fallback analysis")
                .await?;
            return Ok(ProcessingOutcome::complete(
                Strategy::Fallback,
                ProcessingType::FallbackSingle,
                records,
            ));
        }

        let chunks = plan_chunks(&request.files, self.config.chunk_size);
        let total = chunks.len();
        let mut results = Vec::new();
        let mut errors = Vec::new();
        let mut first_error = None;

        for chunk in &chunks {
            if chunk.index > 0 {
                tokio::time::sleep(self.config.inter_chunk_delay).await;
            }

            let operation = format!("fallback chunk {}", chunk.index);
            match self
                .call(analyzer.as_ref(), &request.prompt, &chunk.items, &operation)
                .await
            {
                Ok(records) => results.extend(records),
                Err(err) => {
                    warn!(chunk = chunk.index, error = %err, "Fallback chunk failed");
                    results.push(error_record(&err, &chunk.items));
                    errors.push(ChunkError {
                        chunk_index: chunk.index,
                        error: err.to_string(),
                    });
                    first_error.get_or_insert(err);
                }
            }
            request.emit(ProgressEvent::FallbackChunk {
                index: chunk.index,
                total,
            });
        }

        // Nothing usable came back; let the orchestrator see the cause
        if errors.len() == total {
            if let Some(err) = first_error {
                return Err(err);
            }
        }

        let mut outcome =
            ProcessingOutcome::complete(Strategy::Fallback, ProcessingType::FallbackChunked, results);
        outcome.errors = errors;
        Ok(outcome)
    }
}

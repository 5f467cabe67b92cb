//! Assembles the orchestrator from [`AnalyzerConfig`]

use std::sync::Arc;

use anyhow::{Context, Result};
use orchestration::config::OrchestrationConfig;
use orchestration::hybrid::{ChunkedProcessor, DirectProcessor, FallbackProcessor, HybridProcessor};
use orchestration::jobs::{ChunkExecutor, InMemoryJobRepository, KvJobRepository, SharedJobRepository};
use orchestration::learning::LearningAdvisor;
use orchestration::polling::PollingEngine;
use tracing::{info, warn};

use crate::config::AnalyzerConfig;
use crate::gemini::GeminiClient;
use crate::learning_client::HttpLearningStore;

/// Everything a command needs
pub struct Orchestrator {
    pub processor: HybridProcessor,
    /// Absent without a server key
    pub executor: Option<Arc<ChunkExecutor>>,
    pub polling: Option<Arc<PollingEngine>>,
}

pub fn job_repository(config: &AnalyzerConfig) -> Result<SharedJobRepository> {
    Ok(match &config.job_store {
        Some(store) => Arc::new(
            KvJobRepository::new(store.clone()).context("Failed to build job store client")?,
        ),
        None => Arc::new(InMemoryJobRepository::new()),
    })
}

/// Build the processor. The fallback key is probed before it is installed;
/// a rejected key leaves the fallback path unavailable.
pub async fn build(config: &AnalyzerConfig, settings: &OrchestrationConfig) -> Result<Orchestrator> {
    let mut processor = HybridProcessor::new(settings);
    let mut executor = None;
    let mut polling = None;

    if let Some(server) = &config.server {
        let analyzer = Arc::new(GeminiClient::new(server).context("Failed to build Gemini client")?);
        let repository = job_repository(config)?;
        info!(backend = repository.backend(), model = %server.model, "Server-side paths enabled");

        let chunk_executor =
            ChunkExecutor::new(repository, analyzer.clone(), settings.chunking.clone()).shared();
        let engine = PollingEngine::new(chunk_executor.clone(), settings.polling.clone()).shared();
        processor = processor
            .with_direct(Arc::new(DirectProcessor::new(analyzer, settings.direct_timeout)))
            .with_chunked(Arc::new(ChunkedProcessor::new(chunk_executor.clone(), engine.clone())));
        executor = Some(chunk_executor);
        polling = Some(engine);
    }

    let fallback = Arc::new(FallbackProcessor::new(settings.fallback.clone()));
    if let Some(endpoint) = &config.fallback {
        let client = Arc::new(GeminiClient::new(endpoint).context("Failed to build fallback client")?);
        if let Err(e) = fallback.initialize(client).await {
            warn!(error = %e, "Fallback key rejected, client-side path disabled");
        }
    }
    processor = processor.with_fallback(fallback);

    if let Some(url) = &config.learning_url {
        let store = HttpLearningStore::new(url.as_str()).context("Failed to build learning client")?;
        processor = processor.with_learning(Arc::new(LearningAdvisor::new(
            Arc::new(store),
            settings.learning.clone(),
        )));
    }

    Ok(Orchestrator {
        processor,
        executor,
        polling,
    })
}

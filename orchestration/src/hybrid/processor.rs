//! Hybrid processor: the escalation state machine
//!
//! ```text
//! Start ─► Select ─► Execute ─┬─ Ok ──────────────────────────► Done
//!                      ▲      └─ Err ─► Classify ─► decide ─┬─► Done(original error)
//!                      └────────── cooldown? ◄──── target ◄─┘
//! ```
//!
//! The processor owns no execution logic of its own. Strategies are
//! injected as [`ProcessingCapability`] objects and dispatched by
//! [`Strategy`]; a missing or unready capability is an `Unavailable` error.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::escalation::{Availability, EscalationPolicy};
use super::fallback::is_error_record;
use super::statistics::{ProcessingStatistics, StatisticsSnapshot};
use super::types::{
    ProcessingCapability, ProcessingOutcome, ProcessingRequest, ProcessingType, ProgressEvent,
};
use crate::config::OrchestrationConfig;
use crate::error::{ProcessingError, ProcessingResult};
use crate::learning::LearningAdvisor;
use crate::payload::{FileAttachment, PayloadAnalysis};
use crate::resilience::ExponentialBackoff;
use crate::strategy::{
    PreferredMethod, Strategy, StrategyAlternative, StrategyDecision, StrategySelector,
};

/// Processor-wide preferences, adjustable at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorPreferences {
    pub preferred_method: PreferredMethod,
    pub max_retries: u32,
    pub enable_fallback: bool,
}

/// Partial preference update; `None` leaves a field unchanged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferencesUpdate {
    pub preferred_method: Option<PreferredMethod>,
    pub max_retries: Option<u32>,
    pub enable_fallback: Option<bool>,
}

/// Which strategies are wired and ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityStatus {
    pub direct: bool,
    pub chunked: bool,
    pub fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorStatus {
    pub available: CapabilityStatus,
    pub preferences: ProcessorPreferences,
    pub statistics: StatisticsSnapshot,
}

/// Dry-run answer to "how would this request be processed?"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub analysis: PayloadAnalysis,
    pub recommendation: StrategyDecision,
    pub alternatives: Vec<StrategyAlternative>,
}

pub struct HybridProcessor {
    selector: StrategySelector,
    direct: Option<Arc<dyn ProcessingCapability>>,
    chunked: Option<Arc<dyn ProcessingCapability>>,
    fallback: Option<Arc<dyn ProcessingCapability>>,
    preferences: RwLock<ProcessorPreferences>,
    rate_limit: ExponentialBackoff,
    statistics: ProcessingStatistics,
    learning: Option<Arc<LearningAdvisor>>,
}

impl HybridProcessor {
    /// A processor with no capabilities wired; add them with the `with_*` builders.
    pub fn new(config: &OrchestrationConfig) -> Self {
        Self {
            selector: StrategySelector::new(config.thresholds),
            direct: None,
            chunked: None,
            fallback: None,
            preferences: RwLock::new(ProcessorPreferences {
                preferred_method: PreferredMethod::Auto,
                max_retries: config.max_retries,
                enable_fallback: true,
            }),
            rate_limit: config.rate_limit,
            statistics: ProcessingStatistics::new(),
            learning: None,
        }
    }

    pub fn with_direct(mut self, capability: Arc<dyn ProcessingCapability>) -> Self {
        self.direct = Some(capability);
        self
    }

    pub fn with_chunked(mut self, capability: Arc<dyn ProcessingCapability>) -> Self {
        self.chunked = Some(capability);
        self
    }

    pub fn with_fallback(mut self, capability: Arc<dyn ProcessingCapability>) -> Self {
        self.fallback = Some(capability);
        self
    }

    pub fn with_learning(mut self, advisor: Arc<LearningAdvisor>) -> Self {
        self.learning = Some(advisor);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn capability(&self, strategy: Strategy) -> Option<&Arc<dyn ProcessingCapability>> {
        match strategy {
            Strategy::Direct => self.direct.as_ref(),
            Strategy::Chunked => self.chunked.as_ref(),
            Strategy::Fallback => self.fallback.as_ref(),
        }
    }

    fn is_ready(&self, strategy: Strategy, preferences: &ProcessorPreferences) -> bool {
        if strategy == Strategy::Fallback && !preferences.enable_fallback {
            return false;
        }
        self.capability(strategy).is_some_and(|c| c.is_ready())
    }

    fn availability(&self, preferences: &ProcessorPreferences) -> Availability {
        Availability {
            fallback_ready: self.is_ready(Strategy::Fallback, preferences),
            chunked_ready: self.is_ready(Strategy::Chunked, preferences),
        }
    }

    async fn execute(
        &self,
        strategy: Strategy,
        request: &ProcessingRequest,
        preferences: &ProcessorPreferences,
    ) -> ProcessingResult<ProcessingOutcome> {
        match self.capability(strategy) {
            Some(capability) if self.is_ready(strategy, preferences) => {
                capability.process(request).await
            }
            _ => Err(ProcessingError::unavailable(strategy.to_string())),
        }
    }

    /// Process one request end to end.
    ///
    /// On terminal failure the error of the first attempt is returned, not
    /// the error of the last escalation.
    pub async fn process(
        &self,
        mut request: ProcessingRequest,
    ) -> ProcessingResult<ProcessingOutcome> {
        let started = Instant::now();
        self.statistics.record_request();
        let preferences = *self.preferences.read().await;

        if let Some(learning) = &self.learning {
            request.prompt = learning
                .enrich_prompt(&request.prompt, &request.options.subjects)
                .await;
        }

        let analysis = match PayloadAnalysis::analyze(&request.files, &request.prompt) {
            Ok(analysis) => analysis,
            Err(e) => return Err(self.fail(&request, e)),
        };

        let preference = request
            .options
            .preferred
            .unwrap_or(preferences.preferred_method);
        let decision = self.selector.select(
            &analysis,
            preference,
            self.is_ready(Strategy::Fallback, &preferences),
        );
        info!(
            strategy = %decision.strategy,
            files = analysis.file_count,
            total_size = analysis.total_size,
            rationale = %decision.rationale,
            "Strategy selected"
        );
        request.emit(ProgressEvent::StrategySelected {
            strategy: decision.strategy,
            rationale: decision.rationale.clone(),
        });

        let policy = EscalationPolicy::new(preferences.max_retries, self.rate_limit);
        let mut strategy = decision.strategy;
        let mut retries = 0u32;
        let mut original: Option<ProcessingError> = None;

        loop {
            self.statistics.record_attempt();
            let err = match self.execute(strategy, &request, &preferences).await {
                Ok(outcome) => return Ok(self.succeed(&request, outcome, retries, started)),
                Err(err) => err,
            };

            let class = err.class();
            let next = policy.decide(class, strategy, retries, self.availability(&preferences));
            warn!(
                strategy = %strategy,
                class = %class,
                error = %err,
                retries,
                reason = %next.reason,
                "Attempt failed"
            );

            let Some(target) = next.target else {
                return Err(self.fail(&request, original.unwrap_or(err)));
            };

            self.statistics.record_escalation();
            if let Some(observer) = &request.options.observer {
                observer.on_fallback(&err, target);
            }
            request.emit(ProgressEvent::Escalating {
                from: strategy,
                to: target,
                reason: next.reason.clone(),
            });
            if let Some(delay) = next.cooldown {
                info!(delay_ms = delay.as_millis() as u64, "Cooling down before retry");
                request.emit(ProgressEvent::CoolingDown { delay });
                tokio::time::sleep(delay).await;
            }

            original.get_or_insert(err);
            retries += 1;
            strategy = target;
        }
    }

    fn succeed(
        &self,
        request: &ProcessingRequest,
        mut outcome: ProcessingOutcome,
        retries: u32,
        started: Instant,
    ) -> ProcessingOutcome {
        if retries > 0 {
            outcome.processing_type = ProcessingType::FallbackRecovery;
        }
        outcome.processing_time = started.elapsed();
        self.statistics.record_success(outcome.strategy);
        info!(
            strategy = %outcome.strategy,
            processing_type = %outcome.processing_type,
            results = outcome.results.len(),
            partial = outcome.partial,
            elapsed_ms = outcome.processing_time.as_millis() as u64,
            "Request processed"
        );

        if let Some(observer) = &request.options.observer {
            observer.on_complete(&outcome, outcome.strategy);
        }
        if let Some(learning) = &self.learning {
            let analysed: Vec<_> = outcome
                .results
                .iter()
                .filter(|record| !is_error_record(record))
                .cloned()
                .collect();
            learning.record_in_background(analysed, request.options.programme_context.clone());
        }
        outcome
    }

    fn fail(&self, request: &ProcessingRequest, error: ProcessingError) -> ProcessingError {
        self.statistics.record_failure(error.class());
        warn!(error = %error, class = %error.class(), "Request failed");
        if let Some(observer) = &request.options.observer {
            observer.on_error(&error);
        }
        error
    }

    /// Analyze and select without executing anything.
    pub async fn recommend(
        &self,
        files: &[FileAttachment],
        prompt: &str,
    ) -> ProcessingResult<Recommendation> {
        let preferences = *self.preferences.read().await;
        let analysis = PayloadAnalysis::analyze(files, prompt)?;
        let recommendation = self.selector.select(
            &analysis,
            preferences.preferred_method,
            self.is_ready(Strategy::Fallback, &preferences),
        );
        let fallback_configured = preferences.enable_fallback && self.fallback.is_some();
        let alternatives = self.selector.alternatives(&analysis, fallback_configured);
        debug!(strategy = %recommendation.strategy, "Recommendation computed");

        Ok(Recommendation {
            analysis,
            recommendation,
            alternatives,
        })
    }

    pub async fn status(&self) -> ProcessorStatus {
        let preferences = *self.preferences.read().await;
        ProcessorStatus {
            available: CapabilityStatus {
                direct: self.is_ready(Strategy::Direct, &preferences),
                chunked: self.is_ready(Strategy::Chunked, &preferences),
                fallback: self.is_ready(Strategy::Fallback, &preferences),
            },
            preferences,
            statistics: self.statistics.snapshot(),
        }
    }

    pub async fn preferences(&self) -> ProcessorPreferences {
        *self.preferences.read().await
    }

    pub async fn update_preferences(&self, update: PreferencesUpdate) -> ProcessorPreferences {
        let mut preferences = self.preferences.write().await;
        if let Some(method) = update.preferred_method {
            preferences.preferred_method = method;
        }
        if let Some(max_retries) = update.max_retries {
            preferences.max_retries = max_retries;
        }
        if let Some(enable) = update.enable_fallback {
            preferences.enable_fallback = enable;
        }
        info!(preferences = ?*preferences, "Preferences updated");
        *preferences
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.statistics.snapshot()
    }

    pub fn reset_statistics(&self) {
        self.statistics.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisRecord;
    use crate::config::LearningConfig;
    use crate::hybrid::fallback::error_record;
    use crate::learning::{LearningStore, PatternMap};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Capability that replays a fixed script of results
    struct Scripted {
        strategy: Strategy,
        ready: bool,
        script: Mutex<Vec<ProcessingResult<()>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(strategy: Strategy, script: Vec<ProcessingResult<()>>) -> Arc<Self> {
            Arc::new(Self {
                strategy,
                ready: true,
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProcessingCapability for Scripted {
        fn strategy(&self) -> Strategy {
            self.strategy
        }

        fn is_ready(&self) -> bool {
            self.ready
        }

        async fn process(&self, _request: &ProcessingRequest) -> ProcessingResult<ProcessingOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            let next = if script.is_empty() { Ok(()) } else { script.remove(0) };
            next.map(|()| {
                let processing_type = match self.strategy {
                    Strategy::Direct => ProcessingType::Direct,
                    Strategy::Chunked => ProcessingType::ChunkedImmediate,
                    Strategy::Fallback => ProcessingType::FallbackSingle,
                };
                ProcessingOutcome::complete(self.strategy, processing_type, vec![json!({"ok": true})])
            })
        }
    }

    fn small_request() -> ProcessingRequest {
        ProcessingRequest::new(
            "analyze",
            vec![FileAttachment::from_bytes("t.pdf", "application/pdf", vec![1u8; 1024])],
        )
    }

    /// Fallback capability whose second chunk failed
    struct PartialFallback;

    #[async_trait]
    impl ProcessingCapability for PartialFallback {
        fn strategy(&self) -> Strategy {
            Strategy::Fallback
        }

        fn is_ready(&self) -> bool {
            true
        }

        async fn process(&self, _request: &ProcessingRequest) -> ProcessingResult<ProcessingOutcome> {
            let failed = [FileAttachment::from_bytes("b.pdf", "application/pdf", vec![1u8; 8])];
            Ok(ProcessingOutcome::complete(
                Strategy::Fallback,
                ProcessingType::FallbackChunked,
                vec![
                    json!({"subject": "HD101", "grade": "A"}),
                    error_record(&ProcessingError::from_status(500, "boom"), &failed),
                ],
            ))
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        recorded: Mutex<Vec<AnalysisRecord>>,
    }

    #[async_trait]
    impl LearningStore for RecordingStore {
        async fn get_relevant_patterns(
            &self,
            _subjects: &[String],
            _min_confidence: f64,
        ) -> ProcessingResult<PatternMap> {
            Ok(PatternMap::default())
        }

        async fn record_analysis_results(
            &self,
            results: &[AnalysisRecord],
            _programme_context: Option<&str>,
        ) -> ProcessingResult<()> {
            self.recorded.lock().unwrap().extend_from_slice(results);
            Ok(())
        }
    }

    fn timeout() -> ProcessingError {
        ProcessingError::timeout("direct analysis", Duration::from_secs(8))
    }

    #[tokio::test]
    async fn test_direct_success() {
        let direct = Scripted::new(Strategy::Direct, vec![]);
        let processor = HybridProcessor::new(&OrchestrationConfig::default()).with_direct(direct.clone());

        let outcome = processor.process(small_request()).await.unwrap();
        assert_eq!(outcome.processing_type, ProcessingType::Direct);
        assert_eq!(direct.calls(), 1);

        let stats = processor.statistics();
        assert_eq!(stats.success_direct, 1);
        assert_eq!(stats.total_processed, 1);
        assert_eq!(stats.escalations, 0);
    }

    #[tokio::test]
    async fn test_timeout_escalates_to_fallback_recovery() {
        let direct = Scripted::new(Strategy::Direct, vec![Err(timeout())]);
        let fallback = Scripted::new(Strategy::Fallback, vec![]);
        let processor = HybridProcessor::new(&OrchestrationConfig::default())
            .with_direct(direct)
            .with_fallback(fallback.clone());

        let outcome = processor.process(small_request()).await.unwrap();
        assert_eq!(outcome.processing_type, ProcessingType::FallbackRecovery);
        assert_eq!(outcome.strategy, Strategy::Fallback);
        assert_eq!(fallback.calls(), 1);

        let stats = processor.statistics();
        assert_eq!(stats.success_fallback, 1);
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.escalations, 1);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_first_error() {
        let direct = Scripted::new(Strategy::Direct, vec![Err(timeout())]);
        let chunked = Scripted::new(
            Strategy::Chunked,
            vec![Err(ProcessingError::from_status(500, "chunk store exploded"))],
        );
        let processor = HybridProcessor::new(&OrchestrationConfig::default())
            .with_direct(direct)
            .with_chunked(chunked.clone());

        let err = processor.process(small_request()).await.unwrap_err();
        assert_eq!(err, timeout());
        assert_eq!(chunked.calls(), 1);

        let stats = processor.statistics();
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.finished(), stats.total_processed);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_terminal() {
        let direct = Scripted::new(Strategy::Direct, vec![Err(ProcessingError::parse("not json"))]);
        let fallback = Scripted::new(Strategy::Fallback, vec![]);
        let processor = HybridProcessor::new(&OrchestrationConfig::default())
            .with_direct(direct)
            .with_fallback(fallback.clone());

        let err = processor.process(small_request()).await.unwrap_err();
        assert!(matches!(err, ProcessingError::Parse { .. }));
        assert_eq!(fallback.calls(), 0);
        assert_eq!(processor.statistics().errors, 1);
    }

    #[tokio::test]
    async fn test_missing_capability_is_unavailable() {
        let processor = HybridProcessor::new(&OrchestrationConfig::default());
        let err = processor.process(small_request()).await.unwrap_err();
        assert_eq!(err, ProcessingError::unavailable("direct"));
    }

    #[tokio::test]
    async fn test_disabled_fallback_is_never_selected() {
        let fallback = Scripted::new(Strategy::Fallback, vec![]);
        let direct = Scripted::new(Strategy::Direct, vec![Err(timeout())]);
        let processor = HybridProcessor::new(&OrchestrationConfig::default())
            .with_direct(direct)
            .with_fallback(fallback.clone());
        processor
            .update_preferences(PreferencesUpdate {
                enable_fallback: Some(false),
                ..PreferencesUpdate::default()
            })
            .await;

        assert!(processor.process(small_request()).await.is_err());
        assert_eq!(fallback.calls(), 0);
        assert!(!processor.status().await.available.fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_cools_down() {
        let direct = Scripted::new(
            Strategy::Direct,
            vec![Err(ProcessingError::from_status(429, "quota"))],
        );
        let fallback = Scripted::new(Strategy::Fallback, vec![]);
        let processor = HybridProcessor::new(&OrchestrationConfig::default())
            .with_direct(direct)
            .with_fallback(fallback);

        let started = Instant::now();
        let outcome = processor.process(small_request()).await.unwrap();
        assert_eq!(outcome.strategy, Strategy::Fallback);
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_recommend_and_reset() {
        let processor = HybridProcessor::new(&OrchestrationConfig::default())
            .with_direct(Scripted::new(Strategy::Direct, vec![]));
        let files = vec![FileAttachment::from_bytes("a.pdf", "application/pdf", vec![0u8; 10])];

        let rec = processor.recommend(&files, "p").await.unwrap();
        assert_eq!(rec.recommendation.strategy, Strategy::Direct);
        assert_eq!(rec.alternatives.len(), 2);

        processor.process(small_request()).await.unwrap();
        processor.reset_statistics();
        assert_eq!(processor.statistics(), StatisticsSnapshot::default());
    }

    #[tokio::test]
    async fn test_failed_chunk_placeholders_are_not_learned() {
        let store = Arc::new(RecordingStore::default());
        let direct = Scripted::new(Strategy::Direct, vec![Err(timeout())]);
        let processor = HybridProcessor::new(&OrchestrationConfig::default())
            .with_direct(direct)
            .with_fallback(Arc::new(PartialFallback))
            .with_learning(Arc::new(LearningAdvisor::new(
                store.clone(),
                LearningConfig::default(),
            )));

        let outcome = processor.process(small_request()).await.unwrap();
        assert_eq!(outcome.results.len(), 2);

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let recorded = store.recorded.lock().unwrap();
        assert_eq!(recorded.as_slice(), [json!({"subject": "HD101", "grade": "A"})]);
    }
}

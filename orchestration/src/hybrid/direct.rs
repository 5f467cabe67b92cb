//! Direct strategy: one remote call inside the host's time budget

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::types::{ProcessingCapability, ProcessingOutcome, ProcessingRequest, ProcessingType};
use crate::analysis::{AnalysisRequest, RemoteAnalyzer};
use crate::error::ProcessingResult;
use crate::resilience::race_processing;
use crate::strategy::Strategy;

pub struct DirectProcessor {
    analyzer: Arc<dyn RemoteAnalyzer>,
    timeout: Duration,
}

impl DirectProcessor {
    pub fn new(analyzer: Arc<dyn RemoteAnalyzer>, timeout: Duration) -> Self {
        Self { analyzer, timeout }
    }
}

#[async_trait]
impl ProcessingCapability for DirectProcessor {
    fn strategy(&self) -> Strategy {
        Strategy::Direct
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn process(&self, request: &ProcessingRequest) -> ProcessingResult<ProcessingOutcome> {
        let budget = request.options.timeout.unwrap_or(self.timeout);
        let call = AnalysisRequest::new(request.prompt.as_str(), &request.files);
        debug!(
            analyzer = self.analyzer.name(),
            files = call.files.len(),
            budget_ms = budget.as_millis() as u64,
            "Direct analysis"
        );

        let records = race_processing(
            "direct analysis",
            async {
                let response = self.analyzer.analyze(&call).await?;
                response.records()
            },
            budget,
        )
        .await?;

        Ok(ProcessingOutcome::complete(
            Strategy::Direct,
            ProcessingType::Direct,
            records,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisResponse;
    use crate::error::{ErrorClass, ProcessingError};

    struct Sleepy(Duration);

    #[async_trait]
    impl RemoteAnalyzer for Sleepy {
        async fn analyze(&self, _: &AnalysisRequest) -> ProcessingResult<AnalysisResponse> {
            tokio::time::sleep(self.0).await;
            Ok(AnalysisResponse::new("[{\"ok\": true}]"))
        }

        fn name(&self) -> &str {
            "sleepy"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_success() {
        let processor = DirectProcessor::new(Arc::new(Sleepy(Duration::from_secs(1))), Duration::from_secs(8));
        let outcome = processor
            .process(&ProcessingRequest::new("p", vec![]))
            .await
            .unwrap();
        assert_eq!(outcome.processing_type, ProcessingType::Direct);
        assert_eq!(outcome.results.len(), 1);
        assert!(!outcome.partial);
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_timeout_is_classified() {
        let processor = DirectProcessor::new(Arc::new(Sleepy(Duration::from_secs(30))), Duration::from_secs(8));
        let err = processor
            .process(&ProcessingRequest::new("p", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::Timeout { .. }));
        assert_eq!(err.class(), ErrorClass::Timeout);
    }
}

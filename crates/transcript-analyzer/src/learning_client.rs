//! HTTP client for the learning server
//!
//! ```text
//! POST {base}/api/learning/patterns  {"subjects": [...], "minConfidence": 0.3}
//!      -> {"success": true, "data": {"<subject>": {"patterns": [...]}}}
//! POST {base}/api/learning/record    {"analysisResults": [...], "programmeContext": "..."}
//!      -> {"success": true, "data": {"recordedPatterns": 12}}
//! ```

use std::time::Duration;

use async_trait::async_trait;
use orchestration::analysis::AnalysisRecord;
use orchestration::error::{ProcessingError, ProcessingResult};
use orchestration::learning::{LearningStore, PatternMap};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PatternQuery<'a> {
    subjects: &'a [String],
    min_confidence: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordRequest<'a> {
    analysis_results: &'a [AnalysisRecord],
    programme_context: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordSummary {
    #[serde(default)]
    recorded_patterns: u64,
}

pub struct HttpLearningStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLearningStore {
    pub fn new(base_url: impl Into<String>) -> ProcessingResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> ProcessingResult<Envelope<T>> {
        let response = self
            .client
            .post(format!("{}/api/learning{}", self.base_url, endpoint))
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProcessingError::from_status(
                status.as_u16(),
                format!("learning server: {text}"),
            ));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl LearningStore for HttpLearningStore {
    async fn get_relevant_patterns(
        &self,
        subjects: &[String],
        min_confidence: f64,
    ) -> ProcessingResult<PatternMap> {
        if subjects.is_empty() {
            return Ok(PatternMap::new());
        }
        let envelope: Envelope<PatternMap> = self
            .post(
                "/patterns",
                &PatternQuery {
                    subjects,
                    min_confidence,
                },
            )
            .await?;
        Ok(match envelope {
            Envelope {
                success: true,
                data: Some(patterns),
            } => patterns,
            _ => PatternMap::new(),
        })
    }

    async fn record_analysis_results(
        &self,
        results: &[AnalysisRecord],
        programme_context: Option<&str>,
    ) -> ProcessingResult<()> {
        let envelope: Envelope<RecordSummary> = self
            .post(
                "/record",
                &RecordRequest {
                    analysis_results: results,
                    programme_context,
                },
            )
            .await?;
        if !envelope.success {
            return Err(ProcessingError::remote(
                None,
                "learning server rejected the analysis results",
            ));
        }
        if let Some(summary) = envelope.data {
            debug!(recorded = summary.recorded_patterns, "Learning patterns recorded");
        }
        Ok(())
    }
}

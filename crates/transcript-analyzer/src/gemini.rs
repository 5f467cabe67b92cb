//! Gemini `generateContent` client
//!
//! One request per analysis: the prompt as a text part followed by every
//! attachment as an inline base64 part. Non-2xx responses become
//! classifiable [`ProcessingError`]s so the orchestrator can escalate.

use std::time::Duration;

use async_trait::async_trait;
use orchestration::analysis::{AnalysisRequest, AnalysisResponse, RemoteAnalyzer};
use orchestration::error::{ProcessingError, ProcessingResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GeminiEndpoint;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            top_k: 40,
            top_p: 0.95,
            max_output_tokens: 8192,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    #[serde(rename_all = "camelCase")]
    Inline {
        inline_data: InlineData<'a>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Carries the key so it never appears in a URL, and so never in an error.
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Client for one Gemini model and key.
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    generation: GenerationConfig,
    name: String,
}

impl GeminiClient {
    pub fn new(endpoint: &GeminiEndpoint) -> ProcessingResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            model: endpoint.model.clone(),
            api_key: endpoint.api_key.clone(),
            generation: GenerationConfig::default(),
            name: format!("gemini:{}", endpoint.model),
        })
    }

    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn error_from(response: reqwest::Response) -> ProcessingError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| {
                if body.trim().is_empty() {
                    status.canonical_reason().unwrap_or("request failed").to_string()
                } else {
                    body
                }
            });
        ProcessingError::from_status(status.as_u16(), format!("Gemini API error: {message}"))
    }
}

#[async_trait]
impl RemoteAnalyzer for GeminiClient {
    async fn analyze(&self, request: &AnalysisRequest) -> ProcessingResult<AnalysisResponse> {
        let mut parts = vec![Part::Text {
            text: &request.prompt,
        }];
        parts.extend(request.files.iter().map(|file| Part::Inline {
            inline_data: InlineData {
                mime_type: &file.mime_type,
                data: &file.data,
            },
        }));
        let body = GenerateRequest {
            contents: vec![Content { parts }],
            generation_config: self.generation,
        };

        debug!(model = %self.model, files = request.files.len(), "Calling generateContent");
        let response = self
            .client
            .post(self.url(&format!("models/{}:generateContent", self.model)))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let parsed: GenerateResponse = response.json().await?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ProcessingError::parse(
                "Gemini response contained no candidate text",
            ));
        }
        Ok(AnalysisResponse::new(text))
    }

    /// Lists models with the key; a rejected key fails here instead of mid-request.
    async fn health_check(&self) -> ProcessingResult<()> {
        let response = self
            .client
            .get(self.url("models"))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from(response).await)
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

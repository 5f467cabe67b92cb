//! Remote analysis seam
//!
//! The LLM call is opaque to the orchestration core: a prompt plus base64
//! attachments go in, text comes out. Everything that talks to a model
//! implements [`RemoteAnalyzer`]; response text is turned into structured
//! records with [`parse_records`].

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ProcessingError, ProcessingResult};
use crate::payload::{EncodedFile, FileAttachment};

/// One structured analysis record (subject mapping, exemption decision, ...).
///
/// The record schema belongs to the prompt, not to the orchestration core.
pub type AnalysisRecord = serde_json::Value;

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(?:json)?[ \t]*\r?\n?").expect("CODE_FENCE regex should compile")
});

/// Request for one remote analysis call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub prompt: String,
    pub files: Vec<EncodedFile>,
}

impl AnalysisRequest {
    pub fn new(prompt: impl Into<String>, files: &[FileAttachment]) -> Self {
        Self {
            prompt: prompt.into(),
            files: files.iter().map(FileAttachment::encoded).collect(),
        }
    }
}

/// Raw text returned by the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub text: String,
}

impl AnalysisResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Parse the text into analysis records.
    pub fn records(&self) -> ProcessingResult<Vec<AnalysisRecord>> {
        parse_records(&self.text)
    }
}

/// A remote model capable of analyzing a prompt plus attachments
#[async_trait]
pub trait RemoteAnalyzer: Send + Sync {
    /// Perform one remote call. Failures must carry a classifiable error.
    async fn analyze(&self, request: &AnalysisRequest) -> ProcessingResult<AnalysisResponse>;

    /// Cheap probe that the credentials work
    async fn health_check(&self) -> ProcessingResult<()> {
        Ok(())
    }

    /// Short name used in logs
    fn name(&self) -> &str;
}

/// Strip Markdown code fences from model output.
pub fn strip_code_fences(text: &str) -> String {
    CODE_FENCE.replace_all(text, "").trim().to_string()
}

/// Parse model output into records.
///
/// A JSON array yields its elements; a single JSON object yields one record.
/// Anything else is a [`ProcessingError::Parse`].
pub fn parse_records(text: &str) -> ProcessingResult<Vec<AnalysisRecord>> {
    let cleaned = strip_code_fences(text);
    match serde_json::from_str::<serde_json::Value>(&cleaned)? {
        serde_json::Value::Array(items) => Ok(items),
        object @ serde_json::Value::Object(_) => Ok(vec![object]),
        other => Err(ProcessingError::parse(format!(
            "expected a JSON array of records, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

//! Learning-store prompt shaping
//!
//! Historical exemption decisions are kept by an external learning store.
//! Before a request runs, patterns for the caller's subjects are appended
//! to the prompt; after a request succeeds, its records are sent back.
//! Neither direction may block or fail a request: lookups run under a short
//! timeout and recording happens on a detached task.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::analysis::AnalysisRecord;
use crate::config::LearningConfig;
use crate::error::ProcessingResult;
use crate::resilience::race_processing;

const HIGH_CONFIDENCE: f64 = 0.7;
const MODERATE_CONFIDENCE: f64 = 0.4;
const MAX_MODERATE_LINES: usize = 5;

/// One learned mapping from a previous-studies subject to a target subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pattern {
    #[serde(rename = "hkitSubject", alias = "targetSubject")]
    pub target_subject: String,
    pub confidence: f64,
    #[serde(default)]
    pub exemption_rate: f64,
    #[serde(default)]
    pub sample_size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectPatterns {
    #[serde(default)]
    pub normalized: Option<String>,
    #[serde(default)]
    pub patterns: Vec<Pattern>,
}

/// Patterns keyed by the subject name as the caller supplied it
pub type PatternMap = BTreeMap<String, SubjectPatterns>;

/// External store of historical decisions
#[async_trait]
pub trait LearningStore: Send + Sync {
    async fn get_relevant_patterns(
        &self,
        subjects: &[String],
        min_confidence: f64,
    ) -> ProcessingResult<PatternMap>;

    async fn record_analysis_results(
        &self,
        results: &[AnalysisRecord],
        programme_context: Option<&str>,
    ) -> ProcessingResult<()>;
}

/// Render patterns as a prompt section. Empty when nothing clears the
/// moderate-confidence bar.
pub fn format_patterns_for_prompt(patterns: &PatternMap) -> String {
    let total: usize = patterns.values().map(|p| p.patterns.len()).sum();
    let high: Vec<(&String, Vec<&Pattern>)> = patterns
        .iter()
        .map(|(subject, data)| {
            let matches = data
                .patterns
                .iter()
                .filter(|p| p.confidence >= HIGH_CONFIDENCE)
                .collect::<Vec<_>>();
            (subject, matches)
        })
        .filter(|(_, matches)| !matches.is_empty())
        .collect();
    let moderate: Vec<(&String, &Pattern)> = patterns
        .iter()
        .flat_map(|(subject, data)| data.patterns.iter().map(move |p| (subject, p)))
        .filter(|(_, p)| p.confidence >= MODERATE_CONFIDENCE && p.confidence < HIGH_CONFIDENCE)
        .take(MAX_MODERATE_LINES)
        .collect();

    if high.is_empty() && moderate.is_empty() {
        return String::new();
    }

    let mut out = String::from("\n\n=== HISTORICAL EXEMPTION PATTERNS ===\n");
    let _ = writeln!(out, "Based on {total} historical exemption decisions:\n");

    if !high.is_empty() {
        out.push_str("HIGH CONFIDENCE EXEMPTIONS (>=70% confidence):\n");
        for (subject, matches) in &high {
            let _ = writeln!(out, "- \"{subject}\" commonly exempts:");
            for pattern in matches {
                let _ = writeln!(
                    out,
                    "  - {} ({}% exemption rate)",
                    pattern.target_subject,
                    percent(pattern.exemption_rate)
                );
            }
        }
        out.push('\n');
    }

    if !moderate.is_empty() {
        out.push_str("MODERATE CONFIDENCE PATTERNS (40-69% confidence):\n");
        for (subject, pattern) in &moderate {
            let _ = writeln!(
                out,
                "- \"{subject}\" -> {} ({}% exemption rate)",
                pattern.target_subject,
                percent(pattern.exemption_rate)
            );
        }
        out.push('\n');
    }

    out.push_str(
        "Please consider these patterns when making exemption suggestions, \
         but prioritize the specific content match between subjects.\n",
    );
    out.push_str("=== END HISTORICAL PATTERNS ===\n\n");
    out
}

fn percent(rate: f64) -> u32 {
    (rate.clamp(0.0, 1.0) * 100.0).round() as u32
}

/// Wraps a [`LearningStore`] with the never-block, never-fail contract
pub struct LearningAdvisor {
    store: Arc<dyn LearningStore>,
    config: LearningConfig,
}

impl LearningAdvisor {
    pub fn new(store: Arc<dyn LearningStore>, config: LearningConfig) -> Self {
        Self { store, config }
    }

    /// Append historical patterns for `subjects` to `prompt`.
    ///
    /// Returns the prompt unchanged when there are no subjects, the lookup
    /// fails or times out, or nothing relevant is known.
    pub async fn enrich_prompt(&self, prompt: &str, subjects: &[String]) -> String {
        if subjects.is_empty() {
            return prompt.to_string();
        }

        let lookup = race_processing(
            "pattern lookup",
            self.store
                .get_relevant_patterns(subjects, self.config.min_confidence),
            self.config.lookup_timeout,
        )
        .await;

        match lookup {
            Ok(patterns) => {
                let section = format_patterns_for_prompt(&patterns);
                debug!(
                    subjects = subjects.len(),
                    matched = patterns.len(),
                    "Learning patterns fetched"
                );
                format!("{prompt}{section}")
            }
            Err(e) => {
                warn!(error = %e, "Learning lookup failed, continuing without patterns");
                prompt.to_string()
            }
        }
    }

    /// Send results to the store on a detached task.
    pub fn record_in_background(
        &self,
        results: Vec<AnalysisRecord>,
        programme_context: Option<String>,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if results.is_empty() {
                return;
            }
            match store
                .record_analysis_results(&results, programme_context.as_deref())
                .await
            {
                Ok(()) => debug!(records = results.len(), "Recorded analysis results"),
                Err(e) => warn!(error = %e, "Failed to record analysis results"),
            }
        })
    }
}

//! Strategy Selector: deterministic routing between execution paths
//!
//! Consumes [`PayloadAnalysis`] plus the caller's preference and fallback
//! readiness, and returns exactly one [`StrategyDecision`]. No I/O.
//!
//! # Decision ladder
//!
//! ```text
//! forced preference ─────────────────────────────► as requested
//! total ≤ small_size  && files ≤ small_count ────► Direct
//! total ≤ medium_size && files ≤ medium_count ───► Chunked
//! fallback ready ────────────────────────────────► Fallback
//! otherwise ─────────────────────────────────────► Chunked (degraded)
//! ```

use serde::{Deserialize, Serialize};

use crate::payload::PayloadAnalysis;

/// Execution path for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One synchronous remote call inside the host's time budget
    Direct,
    /// Job split into chunks, first chunk synchronous, remainder polled
    Chunked,
    /// Client-side execution not bound by the host's execution ceiling
    Fallback,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Chunked => write!(f, "chunked"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Caller preference; anything other than `Auto` forces the strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferredMethod {
    #[default]
    Auto,
    Direct,
    Chunked,
    Fallback,
}

impl PreferredMethod {
    /// The forced strategy, if any.
    pub fn forced(&self) -> Option<Strategy> {
        match self {
            Self::Auto => None,
            Self::Direct => Some(Strategy::Direct),
            Self::Chunked => Some(Strategy::Chunked),
            Self::Fallback => Some(Strategy::Fallback),
        }
    }
}

impl std::str::FromStr for PreferredMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "hybrid" => Ok(Self::Auto),
            "direct" => Ok(Self::Direct),
            "chunked" => Ok(Self::Chunked),
            "fallback" => Ok(Self::Fallback),
            other => Err(format!("unknown processing method: {other}")),
        }
    }
}

/// Selected strategy with a human-readable rationale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyDecision {
    pub strategy: Strategy,
    pub rationale: String,
}

impl StrategyDecision {
    pub fn new(strategy: Strategy, rationale: impl Into<String>) -> Self {
        Self {
            strategy,
            rationale: rationale.into(),
        }
    }
}

/// Size/count cut-offs for the decision ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionThresholds {
    /// Raw bytes at or below which Direct is considered
    pub small_size: u64,
    pub small_count: usize,
    /// Raw bytes at or below which Chunked is preferred over Fallback
    pub medium_size: u64,
    pub medium_count: usize,
}

impl Default for SelectionThresholds {
    fn default() -> Self {
        Self {
            small_size: 500 * 1024,
            small_count: 2,
            medium_size: 5 * 1024 * 1024,
            medium_count: 8,
        }
    }
}

/// One option presented by [`StrategySelector::alternatives`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyAlternative {
    pub strategy: Strategy,
    pub pros: Vec<String>,
    pub cons: Vec<String>,
}

/// Direct is only listed as an alternative below this raw size.
const DIRECT_ALTERNATIVE_LIMIT: u64 = 1024 * 1024;

/// Deterministic strategy selector
#[derive(Debug, Clone, Default)]
pub struct StrategySelector {
    thresholds: SelectionThresholds,
}

impl StrategySelector {
    pub fn new(thresholds: SelectionThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &SelectionThresholds {
        &self.thresholds
    }

    /// Pick exactly one strategy. Total over well-formed input.
    pub fn select(
        &self,
        analysis: &PayloadAnalysis,
        preference: PreferredMethod,
        fallback_ready: bool,
    ) -> StrategyDecision {
        if let Some(strategy) = preference.forced() {
            return StrategyDecision::new(strategy, "User preference override");
        }

        let t = &self.thresholds;
        if analysis.total_size <= t.small_size && analysis.file_count <= t.small_count {
            return StrategyDecision::new(
                Strategy::Direct,
                format!(
                    "Small payload ({:.1}KB, {} files)",
                    analysis.total_kb(),
                    analysis.file_count
                ),
            );
        }

        if analysis.total_size <= t.medium_size && analysis.file_count <= t.medium_count {
            return StrategyDecision::new(
                Strategy::Chunked,
                format!(
                    "Medium payload ({:.1}MB, {} files)",
                    analysis.total_mb(),
                    analysis.file_count
                ),
            );
        }

        if fallback_ready {
            StrategyDecision::new(
                Strategy::Fallback,
                format!(
                    "Large payload ({:.1}MB) - client-side processing recommended",
                    analysis.total_mb()
                ),
            )
        } else {
            StrategyDecision::new(
                Strategy::Chunked,
                "Large payload - chunked processing (fallback not available)",
            )
        }
    }

    /// Viable alternatives with their trade-offs.
    pub fn alternatives(
        &self,
        analysis: &PayloadAnalysis,
        fallback_configured: bool,
    ) -> Vec<StrategyAlternative> {
        let mut alternatives = Vec::new();

        if analysis.total_size <= DIRECT_ALTERNATIVE_LIMIT {
            alternatives.push(StrategyAlternative {
                strategy: Strategy::Direct,
                pros: strings(&["Fast", "Server-side", "No API key needed"]),
                cons: strings(&["Execution-time ceiling risk"]),
            });
        }

        alternatives.push(StrategyAlternative {
            strategy: Strategy::Chunked,
            pros: strings(&["Handles large files", "Progress tracking", "Reliable"]),
            cons: strings(&["Slower", "Requires polling"]),
        });

        if fallback_configured {
            alternatives.push(StrategyAlternative {
                strategy: Strategy::Fallback,
                pros: strings(&["No execution-time ceiling", "Fastest for large files"]),
                cons: strings(&["Requires API key", "Client-side processing"]),
            });
        }

        alternatives
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;

    fn select(sizes: &[u64], fallback_ready: bool) -> StrategyDecision {
        StrategySelector::default().select(
            &PayloadAnalysis::from_sizes(sizes, 128),
            PreferredMethod::Auto,
            fallback_ready,
        )
    }

    #[test]
    fn test_single_small_file_is_direct() {
        let decision = select(&[400 * KB], false);
        assert_eq!(decision.strategy, Strategy::Direct);
        assert!(decision.rationale.starts_with("Small payload"));
    }

    #[test]
    fn test_prompt_only_is_direct() {
        assert_eq!(select(&[], true).strategy, Strategy::Direct);
    }

    #[test]
    fn test_medium_payload_is_chunked() {
        let decision = select(&[MB + MB / 2, MB + MB / 2], true);
        assert_eq!(decision.strategy, Strategy::Chunked);
        assert!(decision.rationale.contains("Medium payload"));
    }

    #[test]
    fn test_too_many_small_files_is_chunked() {
        // Small by size but over the small file count
        let decision = select(&[10 * KB, 10 * KB, 10 * KB], false);
        assert_eq!(decision.strategy, Strategy::Chunked);
    }

    #[test]
    fn test_large_payload_prefers_ready_fallback() {
        let sizes = vec![MB; 10];
        assert_eq!(select(&sizes, true).strategy, Strategy::Fallback);

        let decision = select(&sizes, false);
        assert_eq!(decision.strategy, Strategy::Chunked);
        assert!(decision.rationale.contains("fallback not available"));
    }

    #[test]
    fn test_never_fallback_unless_ready() {
        for count in 0..20u64 {
            for size in [KB, 300 * KB, MB, 3 * MB] {
                let sizes = vec![size; count as usize];
                assert_ne!(select(&sizes, false).strategy, Strategy::Fallback);
            }
        }
    }

    #[test]
    fn test_forced_preference_wins() {
        let selector = StrategySelector::default();
        let analysis = PayloadAnalysis::from_sizes(&[KB], 0);

        let decision = selector.select(&analysis, PreferredMethod::Fallback, false);
        assert_eq!(decision.strategy, Strategy::Fallback);
        assert_eq!(decision.rationale, "User preference override");
    }

    #[test]
    fn test_threshold_boundaries_inclusive() {
        let t = SelectionThresholds::default();
        assert_eq!(select(&[t.small_size], false).strategy, Strategy::Direct);
        assert_eq!(select(&[t.small_size + 1], false).strategy, Strategy::Chunked);
        assert_eq!(select(&[t.medium_size], true).strategy, Strategy::Chunked);
        assert_eq!(select(&[t.medium_size + 1], true).strategy, Strategy::Fallback);
    }

    #[test]
    fn test_alternatives() {
        let selector = StrategySelector::default();
        let small = PayloadAnalysis::from_sizes(&[100 * KB], 0);
        let large = PayloadAnalysis::from_sizes(&[4 * MB], 0);

        let alts: Vec<Strategy> = selector
            .alternatives(&small, true)
            .into_iter()
            .map(|a| a.strategy)
            .collect();
        assert_eq!(alts, vec![Strategy::Direct, Strategy::Chunked, Strategy::Fallback]);

        let alts: Vec<Strategy> = selector
            .alternatives(&large, false)
            .into_iter()
            .map(|a| a.strategy)
            .collect();
        assert_eq!(alts, vec![Strategy::Chunked]);
    }

    #[test]
    fn test_preferred_method_parsing() {
        assert_eq!("hybrid".parse::<PreferredMethod>(), Ok(PreferredMethod::Auto));
        assert_eq!(" Chunked ".parse::<PreferredMethod>(), Ok(PreferredMethod::Chunked));
        assert!("vercel".parse::<PreferredMethod>().is_err());
    }
}

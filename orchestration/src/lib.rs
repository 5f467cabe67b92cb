//! Transcript Analysis Orchestration Library
//!
//! Runs LLM analysis of uploaded academic transcripts under a short
//! per-invocation execution ceiling. Each request is measured, routed to
//! one of three execution paths, and escalated to another path when the
//! first one fails in a recoverable way.
//!
//! # Components
//!
//! ```text
//!  files + prompt
//!        │
//!        ▼
//!  PayloadAnalysis ──► StrategySelector ──► HybridProcessor
//!                                               │
//!          ┌────────────────────┬───────────────┴──────────┐
//!          ▼                    ▼                          ▼
//!   DirectProcessor      ChunkedProcessor           FallbackProcessor
//!   (one remote call)    │                          (client-side key)
//!                        ├─► ChunkExecutor ─► JobRepository
//!                        │       (first chunk sync,  (memory | kv)
//!                        │        rest in background)
//!                        └─► PollingEngine ─► progress / completion
//! ```
//!
//! The remote model sits behind [`analysis::RemoteAnalyzer`] and the
//! historical-pattern store behind [`learning::LearningStore`]; both are
//! supplied by the embedding application.

#![allow(clippy::uninlined_format_args)]

pub mod analysis;
pub mod chunking;
pub mod config;
pub mod error;
pub mod hybrid;
pub mod jobs;
pub mod learning;
pub mod payload;
pub mod polling;
pub mod resilience;
pub mod strategy;

pub use analysis::{AnalysisRecord, AnalysisRequest, AnalysisResponse, RemoteAnalyzer};
pub use config::{ConfigError, OrchestrationConfig};
pub use error::{ErrorClass, ProcessingError, ProcessingResult};
pub use hybrid::{
    ChunkedProcessor, DirectProcessor, FallbackProcessor, HybridProcessor, ProcessingObserver,
    ProcessingOutcome, ProcessingRequest, ProcessingType, RequestOptions,
};
pub use jobs::{ChunkExecutor, InMemoryJobRepository, JobRepository, KvJobRepository};
pub use payload::{FileAttachment, PayloadAnalysis};
pub use polling::{PollStrategy, PollingEngine};
pub use strategy::{PreferredMethod, Strategy, StrategyDecision, StrategySelector};

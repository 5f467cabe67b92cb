//! Escalation Orchestrator: adaptive multi-strategy processing
//!
//! Routes each request to one of three execution paths and escalates to an
//! alternate path when the first one fails in a recoverable way.
//!
//! ```text
//!                ┌──────────── HybridProcessor ────────────┐
//! request ─────► │ analyze ─► select ─► execute ─► classify │ ─► outcome
//!                └─────┬───────────────┬───────────────┬────┘
//!                      ▼               ▼               ▼
//!              DirectProcessor  ChunkedProcessor  FallbackProcessor
//!              (one call, 8 s)  (job + polling)   (client key, no ceiling)
//! ```
//!
//! Timeouts and oversized payloads move to Fallback when it is ready and to
//! Chunked otherwise. Throttling waits out a capped exponential cooldown
//! before moving to Fallback. Everything else is terminal.

pub mod chunked;
pub mod direct;
pub mod escalation;
pub mod fallback;
pub mod processor;
pub mod statistics;
pub mod types;

pub use chunked::ChunkedProcessor;
pub use direct::DirectProcessor;
pub use escalation::{Availability, EscalationDecision, EscalationPolicy};
pub use fallback::FallbackProcessor;
pub use processor::{
    CapabilityStatus, HybridProcessor, PreferencesUpdate, ProcessorPreferences, ProcessorStatus,
    Recommendation,
};
pub use statistics::{ProcessingStatistics, StatisticsSnapshot};
pub use types::{
    ProcessingCapability, ProcessingObserver, ProcessingOutcome, ProcessingRequest,
    ProcessingType, ProgressEvent, RequestOptions,
};

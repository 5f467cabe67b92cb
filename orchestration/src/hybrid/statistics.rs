//! Process-wide processing counters
//!
//! Every finished request lands in exactly one outcome bucket, so once no
//! request is in flight:
//!
//! ```text
//! total_processed == success_direct + success_chunked + success_fallback
//!                    + timeouts + errors
//! ```
//!
//! `attempts` and `escalations` count strategy executions and switches and
//! sit outside that sum.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::ErrorClass;
use crate::strategy::Strategy;

#[derive(Debug, Default)]
pub struct ProcessingStatistics {
    total_processed: AtomicU64,
    success_direct: AtomicU64,
    success_chunked: AtomicU64,
    success_fallback: AtomicU64,
    timeouts: AtomicU64,
    errors: AtomicU64,
    attempts: AtomicU64,
    escalations: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub total_processed: u64,
    pub success_direct: u64,
    pub success_chunked: u64,
    pub success_fallback: u64,
    pub timeouts: u64,
    pub errors: u64,
    pub attempts: u64,
    pub escalations: u64,
}

impl StatisticsSnapshot {
    /// Sum of the outcome buckets
    pub fn finished(&self) -> u64 {
        self.success_direct
            + self.success_chunked
            + self.success_fallback
            + self.timeouts
            + self.errors
    }

    pub fn success_rate(&self) -> f64 {
        let finished = self.finished();
        if finished == 0 {
            return 0.0;
        }
        (self.success_direct + self.success_chunked + self.success_fallback) as f64
            / finished as f64
    }
}

impl ProcessingStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_request(&self) {
        self.total_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_escalation(&self) {
        self.escalations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self, strategy: Strategy) {
        let counter = match strategy {
            Strategy::Direct => &self.success_direct,
            Strategy::Chunked => &self.success_chunked,
            Strategy::Fallback => &self.success_fallback,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self, class: ErrorClass) {
        match class {
            ErrorClass::Timeout => self.timeouts.fetch_add(1, Ordering::Relaxed),
            _ => self.errors.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            total_processed: self.total_processed.load(Ordering::Relaxed),
            success_direct: self.success_direct.load(Ordering::Relaxed),
            success_chunked: self.success_chunked.load(Ordering::Relaxed),
            success_fallback: self.success_fallback.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            escalations: self.escalations.load(Ordering::Relaxed),
        }
    }

    /// Operator reset; the only way counters go down.
    pub fn reset(&self) {
        for counter in [
            &self.total_processed,
            &self.success_direct,
            &self.success_chunked,
            &self.success_fallback,
            &self.timeouts,
            &self.errors,
            &self.attempts,
            &self.escalations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

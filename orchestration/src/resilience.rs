//! Resilience: bounded races and exponential schedules
//!
//! Two primitives shared by chunk execution, direct calls, rate-limit
//! cooldowns and client polling:
//!
//! ```text
//! race(operation, budget)
//!   ├─ operation finishes first → Ok(output)
//!   └─ budget elapses first     → Err(TimedOut)   (operation is dropped)
//!
//! ExponentialBackoff { initial, factor, max }
//!   delay(n)   = min(initial × factor^n, max)
//!   next(cur)  = min(cur × factor, max)
//! ```
//!
//! Dropping the losing future is the only cancellation there is: a remote
//! call that has already been sent still runs to completion server-side.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProcessingError, ProcessingResult};

/// The budget elapsed before the raced operation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("timed out after {budget:?}")]
pub struct TimedOut {
    pub budget: Duration,
}

/// Race `operation` against `budget`.
pub async fn race<F, T>(operation: F, budget: Duration) -> Result<T, TimedOut>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(budget, operation)
        .await
        .map_err(|_| TimedOut { budget })
}

/// Race a fallible operation, folding a timeout into [`ProcessingError::Timeout`].
pub async fn race_processing<F, T>(
    operation_name: &str,
    operation: F,
    budget: Duration,
) -> ProcessingResult<T>
where
    F: Future<Output = ProcessingResult<T>>,
{
    match race(operation, budget).await {
        Ok(result) => result,
        Err(TimedOut { budget }) => Err(ProcessingError::timeout(operation_name, budget)),
    }
}

/// Capped exponential schedule.
///
/// The factor is clamped to at least 1.0 so successive delays never shrink.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExponentialBackoff {
    #[serde(rename = "initial_ms", with = "millis")]
    pub initial: Duration,
    pub factor: f64,
    #[serde(rename = "max_ms", with = "millis")]
    pub max: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, factor: f64, max: Duration) -> Self {
        let factor = if factor.is_finite() {
            factor.max(1.0)
        } else {
            1.0
        };
        Self {
            initial: initial.min(max),
            factor,
            max,
        }
    }

    /// Cooldown before retrying a throttled call: 1s, 2s, 4s ... capped at 10s.
    pub fn rate_limit() -> Self {
        Self::new(Duration::from_millis(1000), 2.0, Duration::from_millis(10_000))
    }

    /// Delay for the `attempt`-th retry (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        self.scaled(self.initial, self.factor.powi(exponent))
    }

    /// The delay that follows `current`.
    pub fn next(&self, current: Duration) -> Duration {
        self.scaled(current, self.factor)
    }

    fn scaled(&self, base: Duration, multiplier: f64) -> Duration {
        let secs = base.as_secs_f64() * multiplier;
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Serialize durations as integer milliseconds in config files.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

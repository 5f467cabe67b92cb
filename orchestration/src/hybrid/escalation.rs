//! Escalation policy: deterministic next-strategy decisions
//!
//! Consumes a classified failure and the retry budget, and produces an
//! [`EscalationDecision`]. No I/O and no sleeping happens here; the
//! orchestrator applies the cooldown and runs the target.
//!
//! ```text
//! retries exhausted / not retryable ─► terminal
//! Timeout          ─► Fallback if ready, else Chunked
//! PayloadTooLarge  ─► Fallback if ready, else Chunked
//! RateLimit        ─► cooldown, then Fallback if ready, else terminal
//! ```
//!
//! Timeout and payload escalations never re-run the strategy that just
//! failed. A throttled strategy may be retried after its cooldown.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ErrorClass;
use crate::resilience::ExponentialBackoff;
use crate::strategy::Strategy;

/// What to do after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationDecision {
    /// Strategy for the next attempt; `None` ends the request
    pub target: Option<Strategy>,
    /// Wait before the next attempt
    pub cooldown: Option<Duration>,
    pub reason: String,
}

impl EscalationDecision {
    fn terminal(reason: impl Into<String>) -> Self {
        Self {
            target: None,
            cooldown: None,
            reason: reason.into(),
        }
    }

    fn escalate(target: Strategy, cooldown: Option<Duration>, reason: impl Into<String>) -> Self {
        Self {
            target: Some(target),
            cooldown,
            reason: reason.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.target.is_none()
    }
}

/// Which strategies can take over right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Availability {
    pub fallback_ready: bool,
    pub chunked_ready: bool,
}

/// Retry budget and cooldown schedule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EscalationPolicy {
    pub max_retries: u32,
    pub rate_limit: ExponentialBackoff,
}

impl EscalationPolicy {
    pub fn new(max_retries: u32, rate_limit: ExponentialBackoff) -> Self {
        Self {
            max_retries,
            rate_limit,
        }
    }

    /// Decide the next step after `failed` raised an error of `class`,
    /// with `retries_used` escalations already spent.
    pub fn decide(
        &self,
        class: ErrorClass,
        failed: Strategy,
        retries_used: u32,
        availability: Availability,
    ) -> EscalationDecision {
        if retries_used >= self.max_retries {
            return EscalationDecision::terminal(format!(
                "retry budget exhausted ({} of {})",
                retries_used, self.max_retries
            ));
        }
        if !class.is_retryable() {
            return EscalationDecision::terminal(format!("{class} is not retryable"));
        }

        let fallback = availability.fallback_ready.then_some(Strategy::Fallback);
        let chunked = availability.chunked_ready.then_some(Strategy::Chunked);

        match class {
            ErrorClass::Timeout | ErrorClass::PayloadTooLarge => {
                match [fallback, chunked]
                    .into_iter()
                    .flatten()
                    .find(|candidate| *candidate != failed)
                {
                    Some(target) => EscalationDecision::escalate(
                        target,
                        None,
                        format!("{class} during {failed}, switching to {target}"),
                    ),
                    None => EscalationDecision::terminal(format!(
                        "{class} during {failed} and no alternate strategy is ready"
                    )),
                }
            }
            ErrorClass::RateLimit => match fallback {
                Some(target) => EscalationDecision::escalate(
                    target,
                    Some(self.rate_limit.delay(retries_used)),
                    format!("rate limited during {failed}, cooling down then {target}"),
                ),
                None => EscalationDecision::terminal(format!(
                    "rate limited during {failed} and fallback is not ready"
                )),
            },
            _ => EscalationDecision::terminal(format!("{class} is not retryable")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOTH: Availability = Availability {
        fallback_ready: true,
        chunked_ready: true,
    };
    const CHUNKED_ONLY: Availability = Availability {
        fallback_ready: false,
        chunked_ready: true,
    };

    fn policy() -> EscalationPolicy {
        EscalationPolicy::new(2, ExponentialBackoff::rate_limit())
    }

    #[test]
    fn test_timeout_prefers_ready_fallback() {
        let decision = policy().decide(ErrorClass::Timeout, Strategy::Direct, 0, BOTH);
        assert_eq!(decision.target, Some(Strategy::Fallback));
        assert_eq!(decision.cooldown, None);

        let decision = policy().decide(ErrorClass::Timeout, Strategy::Direct, 0, CHUNKED_ONLY);
        assert_eq!(decision.target, Some(Strategy::Chunked));
    }

    #[test]
    fn test_never_reruns_the_failed_strategy_on_timeout() {
        let decision = policy().decide(ErrorClass::Timeout, Strategy::Chunked, 0, CHUNKED_ONLY);
        assert!(decision.is_terminal());

        let decision = policy().decide(ErrorClass::Timeout, Strategy::Fallback, 0, BOTH);
        assert_eq!(decision.target, Some(Strategy::Chunked));
    }

    #[test]
    fn test_payload_too_large() {
        let decision = policy().decide(ErrorClass::PayloadTooLarge, Strategy::Direct, 1, BOTH);
        assert_eq!(decision.target, Some(Strategy::Fallback));
    }

    #[test]
    fn test_rate_limit_cools_down_before_fallback() {
        let decision = policy().decide(ErrorClass::RateLimit, Strategy::Direct, 0, BOTH);
        assert_eq!(decision.target, Some(Strategy::Fallback));
        assert_eq!(decision.cooldown, Some(Duration::from_secs(1)));

        let decision = policy().decide(ErrorClass::RateLimit, Strategy::Fallback, 1, BOTH);
        assert_eq!(decision.target, Some(Strategy::Fallback));
        assert_eq!(decision.cooldown, Some(Duration::from_secs(2)));

        let decision = policy().decide(ErrorClass::RateLimit, Strategy::Direct, 0, CHUNKED_ONLY);
        assert!(decision.is_terminal());
    }

    #[test]
    fn test_budget_exhausted() {
        let decision = policy().decide(ErrorClass::Timeout, Strategy::Direct, 2, BOTH);
        assert!(decision.is_terminal());
        assert!(decision.reason.contains("exhausted"));
    }

    #[test]
    fn test_non_retryable_classes_are_terminal() {
        for class in [
            ErrorClass::Remote,
            ErrorClass::NotFound,
            ErrorClass::Parse,
            ErrorClass::Internal,
        ] {
            assert!(policy().decide(class, Strategy::Direct, 0, BOTH).is_terminal());
        }
    }

    #[test]
    fn test_zero_budget_never_escalates() {
        let policy = EscalationPolicy::new(0, ExponentialBackoff::rate_limit());
        assert!(policy
            .decide(ErrorClass::Timeout, Strategy::Direct, 0, BOTH)
            .is_terminal());
    }
}

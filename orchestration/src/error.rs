//! Processing error types
//!
//! One taxonomy for every failure the orchestration core can observe, plus
//! the classifier that the escalation logic keys off. Remote services often
//! surface failures as opaque text, so classification falls back to keyword
//! matching when the variant alone is not conclusive.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for orchestration operations
pub type ProcessingResult<T> = Result<T, ProcessingError>;

static TIMEOUT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(timeout|timed out|deadline exceeded|gateway time-out)")
        .expect("TIMEOUT_PATTERN regex should compile")
});

static RATE_LIMIT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(rate limit|rate-limit|quota|too many requests|resource exhausted)")
        .expect("RATE_LIMIT_PATTERN regex should compile")
});

static PAYLOAD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(payload too large|request entity too large|file size|too large)")
        .expect("PAYLOAD_PATTERN regex should compile")
});

/// Errors that can occur while analyzing, chunking, polling or escalating
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessingError {
    /// A remote call, chunk or strategy attempt exceeded its time budget
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout { operation: String, elapsed: Duration },

    /// Polling exceeded its global wait budget
    #[error("polling timeout exceeded")]
    PollingTimeout { job_id: String, elapsed: Duration },

    /// Remote service throttled the request
    #[error("rate limit exceeded: {message}")]
    RateLimited { message: String },

    /// Estimated or actual size exceeds the service limits
    #[error("payload too large: {message}")]
    PayloadTooLarge { message: String },

    /// Any other non-2xx or malformed remote response
    #[error("remote error (status {status:?}): {message}")]
    Remote { status: Option<u16>, message: String },

    /// Unknown or expired job id
    #[error("job not found: {job_id}")]
    NotFound { job_id: String },

    /// Response text is not valid JSON after fence stripping
    #[error("failed to parse analysis response: {message}")]
    Parse { message: String },

    /// Malformed request (zero-byte attachment, undecodable payload)
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// A strategy collaborator is missing or not initialized
    #[error("{capability} processor not available")]
    Unavailable { capability: String },

    /// Attempted to append to a job that already reached its terminal state
    #[error("job {job_id} already completed")]
    JobCompleted { job_id: String },

    /// Job repository failure (lock contention, shared store I/O)
    #[error("storage error: {message}")]
    Storage { message: String },

    /// Polling was stopped before the job finished
    #[error("polling cancelled for job {job_id}")]
    Cancelled { job_id: String },
}

impl ProcessingError {
    /// Create a timeout error for the named operation
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed,
        }
    }

    /// Create a remote error with an optional HTTP status
    pub fn remote(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Remote {
            status,
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(job_id: impl Into<String>) -> Self {
        Self::NotFound {
            job_id: job_id.into(),
        }
    }

    /// Create a parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an unavailable-capability error
    pub fn unavailable(capability: impl Into<String>) -> Self {
        Self::Unavailable {
            capability: capability.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Map an HTTP status and message to the most specific variant.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            408 | 504 => Self::Timeout {
                operation: format!("remote call (HTTP {status})"),
                elapsed: Duration::ZERO,
            },
            413 => Self::PayloadTooLarge { message },
            429 => Self::RateLimited { message },
            _ => Self::Remote {
                status: Some(status),
                message,
            },
        }
    }

    /// Classify this error for escalation.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout { .. } | Self::PollingTimeout { .. } => ErrorClass::Timeout,
            Self::RateLimited { .. } => ErrorClass::RateLimit,
            Self::PayloadTooLarge { .. } => ErrorClass::PayloadTooLarge,
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::Parse { .. } => ErrorClass::Parse,
            Self::Remote { status, message } => match status {
                Some(408) | Some(504) => ErrorClass::Timeout,
                Some(413) => ErrorClass::PayloadTooLarge,
                Some(429) => ErrorClass::RateLimit,
                _ => classify_message(message).unwrap_or(ErrorClass::Remote),
            },
            Self::Storage { message } => classify_message(message).unwrap_or(ErrorClass::Internal),
            Self::InvalidInput { .. }
            | Self::Unavailable { .. }
            | Self::JobCompleted { .. }
            | Self::Cancelled { .. } => ErrorClass::Internal,
        }
    }

    /// Whether the escalation orchestrator may retry under another strategy
    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }
}

impl From<reqwest::Error> for ProcessingError {
    fn from(err: reqwest::Error) -> Self {
        // Request URLs may carry credentials
        let err = err.without_url();
        if err.is_timeout() {
            return Self::timeout("http request", Duration::ZERO);
        }
        match err.status() {
            Some(status) => Self::from_status(status.as_u16(), err.to_string()),
            None => Self::remote(None, err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ProcessingError {
    fn from(err: serde_json::Error) -> Self {
        Self::parse(err.to_string())
    }
}

/// Escalation-relevant category of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Timeout,
    RateLimit,
    PayloadTooLarge,
    Remote,
    NotFound,
    Parse,
    Internal,
}

impl ErrorClass {
    /// Only capacity-type failures warrant trying a different strategy.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::RateLimit | Self::PayloadTooLarge)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::PayloadTooLarge => write!(f, "payload_too_large"),
            Self::Remote => write!(f, "remote_error"),
            Self::NotFound => write!(f, "not_found"),
            Self::Parse => write!(f, "parse_error"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Keyword classification for opaque error text.
pub fn classify_message(message: &str) -> Option<ErrorClass> {
    if TIMEOUT_PATTERN.is_match(message) {
        Some(ErrorClass::Timeout)
    } else if RATE_LIMIT_PATTERN.is_match(message) {
        Some(ErrorClass::RateLimit)
    } else if PAYLOAD_PATTERN.is_match(message) {
        Some(ErrorClass::PayloadTooLarge)
    } else {
        None
    }
}

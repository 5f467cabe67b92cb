//! Orchestration configuration
//!
//! `Default` carries the production constants. [`OrchestrationConfig::from_env`]
//! overlays environment variables and [`OrchestrationConfig::from_toml_file`]
//! loads a TOML file where every section and field is optional.
//!
//! ```toml
//! max_retries = 2
//! direct_timeout_ms = 8000
//!
//! [chunking]
//! chunk_size = 5
//! chunk_timeout_ms = 8000
//!
//! [polling.normal]
//! initial_ms = 2000
//! factor = 1.2
//! max_ms = 5000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chunking::DEFAULT_CHUNK_SIZE;
use crate::resilience::{millis, ExponentialBackoff};
use crate::strategy::SelectionThresholds;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Server-side chunked job settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum files per chunk
    pub chunk_size: usize,
    /// Budget for one chunk's remote call
    #[serde(rename = "chunk_timeout_ms", with = "millis")]
    pub chunk_timeout: Duration,
    /// Pause between background chunks
    #[serde(rename = "inter_chunk_delay_ms", with = "millis")]
    pub inter_chunk_delay: Duration,
    /// Age after which a job is gone
    #[serde(rename = "job_ttl_ms", with = "millis")]
    pub job_ttl: Duration,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_timeout: Duration::from_secs(8),
            inter_chunk_delay: Duration::from_millis(100),
            job_ttl: Duration::from_secs(60 * 60),
        }
    }
}

/// Client-side polling schedules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub immediate: ExponentialBackoff,
    pub normal: ExponentialBackoff,
    pub background: ExponentialBackoff,
    /// Global wait budget per polled job
    #[serde(rename = "max_total_time_ms", with = "millis")]
    pub max_total_time: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            immediate: ExponentialBackoff::new(
                Duration::from_millis(1000),
                1.1,
                Duration::from_millis(2000),
            ),
            normal: ExponentialBackoff::new(
                Duration::from_millis(2000),
                1.2,
                Duration::from_millis(5000),
            ),
            background: ExponentialBackoff::new(
                Duration::from_millis(5000),
                1.3,
                Duration::from_millis(15_000),
            ),
            max_total_time: Duration::from_secs(5 * 60),
        }
    }
}

/// Client-side fallback execution limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub chunk_size: usize,
    #[serde(rename = "inter_chunk_delay_ms", with = "millis")]
    pub inter_chunk_delay: Duration,
    /// Any single file above this is rejected outright
    pub max_file_size: u64,
    /// Single call when file count and estimated payload are both within these
    pub single_call_max_files: usize,
    pub single_call_max_payload: u64,
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            chunk_size: 3,
            inter_chunk_delay: Duration::from_secs(1),
            max_file_size: 20 * 1024 * 1024,
            single_call_max_files: 3,
            single_call_max_payload: 5 * 1024 * 1024,
            timeout: Duration::from_secs(25),
        }
    }
}

/// Learning-store prompt shaping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub min_confidence: f64,
    /// Pattern lookups slower than this are skipped
    #[serde(rename = "lookup_timeout_ms", with = "millis")]
    pub lookup_timeout: Duration,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
            lookup_timeout: Duration::from_secs(2),
        }
    }
}

/// Top-level orchestration configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    pub thresholds: SelectionThresholds,
    pub chunking: ChunkingConfig,
    #[serde(rename = "direct_timeout_ms", with = "millis")]
    pub direct_timeout: Duration,
    /// Escalations allowed per request
    pub max_retries: u32,
    /// Cooldown schedule after a throttled attempt
    pub rate_limit: ExponentialBackoff,
    pub polling: PollingConfig,
    pub fallback: FallbackConfig,
    pub learning: LearningConfig,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            thresholds: SelectionThresholds::default(),
            chunking: ChunkingConfig::default(),
            direct_timeout: Duration::from_secs(8),
            max_retries: 2,
            rate_limit: ExponentialBackoff::rate_limit(),
            polling: PollingConfig::default(),
            fallback: FallbackConfig::default(),
            learning: LearningConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|s| s.trim().parse().ok())
}

impl OrchestrationConfig {
    /// Defaults overlaid with `ORCH_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(n) = env_parse("ORCH_MAX_RETRIES") {
            config.max_retries = n;
        }
        if let Some(ms) = env_parse("ORCH_DIRECT_TIMEOUT_MS") {
            config.direct_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse("ORCH_CHUNK_SIZE") {
            config.chunking.chunk_size = n;
        }
        if let Some(ms) = env_parse("ORCH_CHUNK_TIMEOUT_MS") {
            config.chunking.chunk_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse("ORCH_JOB_TTL_SECS") {
            config.chunking.job_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse("ORCH_MAX_POLL_TIME_SECS") {
            config.polling.max_total_time = Duration::from_secs(secs);
        }
        if let Some(c) = env_parse("ORCH_LEARNING_MIN_CONFIDENCE") {
            config.learning.min_confidence = c;
        }

        config
    }

    /// Load from a TOML file; missing fields keep their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunking.chunk_size == 0 || self.fallback.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk sizes must be at least 1".into()));
        }
        if self.chunking.chunk_timeout.is_zero() || self.direct_timeout.is_zero() {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        for (name, schedule) in [
            ("rate_limit", &self.rate_limit),
            ("polling.immediate", &self.polling.immediate),
            ("polling.normal", &self.polling.normal),
            ("polling.background", &self.polling.background),
        ] {
            if !schedule.factor.is_finite() || schedule.factor < 1.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name}: backoff factor must be >= 1.0"
                )));
            }
            if schedule.initial > schedule.max {
                return Err(ConfigError::Invalid(format!(
                    "{name}: initial interval exceeds max"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.learning.min_confidence) {
            return Err(ConfigError::Invalid(
                "learning.min_confidence must be within 0..=1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = OrchestrationConfig::default();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.chunking.chunk_size, 5);
        assert_eq!(config.chunking.chunk_timeout, Duration::from_secs(8));
        assert_eq!(config.polling.max_total_time, Duration::from_secs(300));
        assert_eq!(config.polling.background.max, Duration::from_secs(15));
        assert_eq!(config.fallback.max_file_size, 20 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = OrchestrationConfig::from_toml_str(
            r#"
max_retries = 4

[chunking]
chunk_size = 2

[polling.normal]
initial_ms = 500
factor = 1.5
max_ms = 4000
"#,
        )
        .unwrap();

        assert_eq!(config.max_retries, 4);
        assert_eq!(config.chunking.chunk_size, 2);
        assert_eq!(config.chunking.chunk_timeout, Duration::from_secs(8));
        assert_eq!(config.polling.normal.initial, Duration::from_millis(500));
        assert_eq!(config.polling.immediate, PollingConfig::default().immediate);
        assert_eq!(config.thresholds, SelectionThresholds::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = OrchestrationConfig::from_toml_str("[chunking]\nchunk_size = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = OrchestrationConfig::from_toml_str(
            "[polling.normal]\ninitial_ms = 100\nfactor = 0.5\nmax_ms = 200\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("polling.normal"));
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "direct_timeout_ms = 6000").unwrap();
        writeln!(file, "[thresholds]\nsmall_count = 1").unwrap();

        let config = OrchestrationConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.direct_timeout, Duration::from_secs(6));
        assert_eq!(config.thresholds.small_count, 1);
        assert_eq!(config.thresholds.medium_count, 8);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = OrchestrationConfig::from_toml_file(Path::new("/nonexistent/orch.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}

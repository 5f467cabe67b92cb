use anyhow::{Context, Result};
use orchestration::config::OrchestrationConfig;
use orchestration::jobs::KvStoreConfig;
use std::path::PathBuf;

pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Gemini endpoint used by one execution path.
#[derive(Debug, Clone)]
pub struct GeminiEndpoint {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
}

/// Top-level analyzer configuration.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Server-side key used by the direct and chunked paths
    pub server: Option<GeminiEndpoint>,
    /// The caller's own key; enables the fallback path
    pub fallback: Option<GeminiEndpoint>,
    /// Shared job store; jobs stay in process memory when unset
    pub job_store: Option<KvStoreConfig>,
    /// Learning server for historical exemption patterns
    pub learning_url: Option<String>,
    /// Orchestration TOML; `ORCH_*` variables apply when unset
    pub orchestration_path: Option<PathBuf>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        let base_url =
            std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_GEMINI_URL.into());
        let model = std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_GEMINI_MODEL.into());

        Self {
            server: Self::endpoint_from_env("GEMINI_API_KEY", &base_url, &model),
            fallback: Self::endpoint_from_env("GEMINI_FALLBACK_API_KEY", &base_url, &model),
            job_store: Self::job_store_from_env(),
            learning_url: std::env::var("LEARNING_SERVER_URL").ok(),
            orchestration_path: std::env::var("ORCH_CONFIG").ok().map(PathBuf::from),
        }
    }
}

impl AnalyzerConfig {
    fn endpoint_from_env(key_var: &str, base_url: &str, model: &str) -> Option<GeminiEndpoint> {
        let api_key = std::env::var(key_var).ok().filter(|k| !k.trim().is_empty())?;
        Some(GeminiEndpoint {
            base_url: base_url.to_string(),
            model: model.to_string(),
            api_key,
        })
    }

    fn job_store_from_env() -> Option<KvStoreConfig> {
        let url = std::env::var("JOB_STORE_URL").ok()?;
        let config = KvStoreConfig::new(url);
        Some(match std::env::var("JOB_STORE_TOKEN") {
            Ok(token) => config.with_token(token),
            Err(_) => config,
        })
    }

    /// Resolve the orchestration settings.
    pub fn orchestration(&self) -> Result<OrchestrationConfig> {
        match &self.orchestration_path {
            Some(path) => OrchestrationConfig::from_toml_file(path)
                .with_context(|| format!("Failed to load orchestration config from {}", path.display())),
            None => Ok(OrchestrationConfig::from_env()),
        }
    }

    /// Use `key` for the fallback path, keeping the server endpoint settings.
    pub fn with_fallback_key(mut self, key: impl Into<String>) -> Self {
        let (base_url, model) = match &self.server {
            Some(server) => (server.base_url.clone(), server.model.clone()),
            None => (DEFAULT_GEMINI_URL.to_string(), DEFAULT_GEMINI_MODEL.to_string()),
        };
        self.fallback = Some(GeminiEndpoint {
            base_url,
            model,
            api_key: key.into(),
        });
        self
    }
}

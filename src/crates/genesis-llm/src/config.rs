//! Provider configuration

use crate::error::LlmError;
use std::time::Duration;

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL up to but excluding `/chat/completions`,
    /// e.g. `http://localhost:11434/v1`.
    pub base_url: String,

    /// Bearer token; local servers typically accept any value.
    pub api_key: String,

    pub model: String,

    /// Default sampling temperature when the request does not set one.
    pub temperature: f32,

    pub timeout: Duration,
}

impl LlmConfig {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.6,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build from `GENESIS_LLM_BASE_URL`, `GENESIS_LLM_API_KEY` and
    /// `GENESIS_LLM_MODEL`. The base URL and model are required; the key
    /// defaults to a placeholder accepted by local servers.
    pub fn from_env() -> Result<Self, LlmError> {
        let base_url = std::env::var("GENESIS_LLM_BASE_URL")
            .map_err(|_| LlmError::Config("GENESIS_LLM_BASE_URL is not set".to_string()))?;
        let model = std::env::var("GENESIS_LLM_MODEL")
            .map_err(|_| LlmError::Config("GENESIS_LLM_MODEL is not set".to_string()))?;
        let api_key = std::env::var("GENESIS_LLM_API_KEY").unwrap_or_else(|_| "none".to_string());
        Ok(Self::new(base_url, api_key, model))
    }
}

//! Provider error types

use thiserror::Error;

/// Errors from a remote LLM provider.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Malformed provider response: {0}")]
    Decode(String),

    #[error("Missing configuration: {0}")]
    Config(String),
}

impl From<LlmError> for genesis_graph::GraphError {
    fn from(error: LlmError) -> Self {
        genesis_graph::GraphError::Llm(error.to_string())
    }
}

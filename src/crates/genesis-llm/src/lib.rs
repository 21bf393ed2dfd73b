//! LLM provider implementations for Genesis
//!
//! Implements the `genesis_graph::llm::ChatModel` trait against any
//! OpenAI-compatible chat-completions endpoint (OpenAI itself, Ollama,
//! vLLM, LM Studio and friends all speak this dialect). Supports
//! structured output through the `response_format` field and token
//! streaming over server-sent events, with separated reasoning deltas
//! for models that emit them.

pub mod config;
pub mod error;
pub mod remote;

pub use config::LlmConfig;
pub use error::LlmError;
pub use remote::OpenAiCompatChat;

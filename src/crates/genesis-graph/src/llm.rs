//! LLM provider abstraction
//!
//! [`ChatModel`] is the only interface the runtime needs from a language
//! model: a complete chat call and a token-streaming variant. Providers
//! (remote HTTP APIs, local servers, scripted test doubles) implement the
//! trait; nodes hold it as `Arc<dyn ChatModel>`.
//!
//! Structured output is requested through
//! [`ResponseFormat::JsonSchema`]; providers that support constrained
//! decoding pass the schema through, others fall back to prompt-level
//! instruction. Models that emit separated "thinking" text surface it via
//! [`ChatResponse::reasoning`] and the `reasoning` field of stream chunks.

use crate::error::Result;
use crate::messages::Message;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;

/// Requested shape of the model output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseFormat {
    /// Any JSON object.
    JsonObject,
    /// JSON constrained by the given schema.
    JsonSchema { name: String, schema: Value },
}

/// Generation parameters for one chat call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

/// Messages plus generation parameters.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub config: ChatConfig,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            config: ChatConfig::default(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.config.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.config.response_format = Some(format);
        self
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl UsageMetadata {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Complete response from a chat call.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// The assistant message.
    pub message: Message,

    /// Separated reasoning text, when the model provides it.
    pub reasoning: Option<String>,

    pub usage: Option<UsageMetadata>,

    /// Provider-specific extras (model name, finish reason, ...).
    pub metadata: HashMap<String, Value>,
}

impl ChatResponse {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            reasoning: None,
            usage: None,
            metadata: HashMap::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.message.content
    }
}

/// One increment of a streaming response.
#[derive(Debug, Clone, Default)]
pub struct ChatStreamChunk {
    /// Content delta for this chunk (may be empty).
    pub content: String,

    /// Reasoning delta for this chunk (may be empty).
    pub reasoning: String,

    /// Set on the terminal chunk.
    pub done: bool,

    /// Usage, usually only present on the terminal chunk.
    pub usage: Option<UsageMetadata>,
}

/// Stream of chunks from a streaming chat call.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatStreamChunk>> + Send>>;

/// A chat-completion language model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one chat call to completion.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Run one chat call, yielding token deltas as they arrive.
    ///
    /// The default implementation degrades to [`ChatModel::chat`] and
    /// yields the full response as a single chunk; providers with real
    /// streaming support should override it.
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream> {
        let response = self.chat(request).await?;
        let chunk = ChatStreamChunk {
            content: response.message.content.clone(),
            reasoning: response.reasoning.clone().unwrap_or_default(),
            done: true,
            usage: response.usage,
        };
        Ok(Box::pin(futures::stream::iter(vec![Ok(chunk)])))
    }

    /// Provider-reported model name, for logs.
    fn model_name(&self) -> &str {
        "unknown"
    }
}

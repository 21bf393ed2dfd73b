//! Shared agent machinery
//!
//! [`StructuredAgent`] wraps one LLM-facing node: it renders the node's
//! YAML prompt with per-call variables, streams the model's tokens into
//! the run's stream writer (so the client sees the reply forming),
//! captures separated reasoning as a custom event, and parses the
//! accumulated text into the agent's typed response — tolerating models
//! that wrap their JSON in prose.

use crate::error::{OrchestratorError, Result};
use chrono::Utc;
use futures::StreamExt;
use genesis_graph::llm::{ChatModel, ChatRequest, ResponseFormat};
use genesis_graph::{Message, StreamEvent, StreamWriter};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Prompt loaded from an embedded YAML file.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct PromptTemplate {
    pub system: String,
    #[serde(default)]
    pub user: Option<String>,
}

impl PromptTemplate {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| OrchestratorError::Invalid(format!("prompt template: {e}")))
    }

    /// Substitute `{name}` placeholders. Unknown placeholders are left
    /// in place (prompt JSON examples also use braces).
    pub fn render(template: &str, vars: &HashMap<&str, String>) -> String {
        let mut rendered = template.to_string();
        for (key, value) in vars {
            rendered = rendered.replace(&format!("{{{key}}}"), value);
        }
        rendered
    }
}

/// The model's reply to one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentReply {
    /// Full accumulated text.
    pub raw: String,

    /// Separated reasoning text, when the model produced any.
    pub reasoning: Option<String>,

    /// The reply as an assistant message, for appending to history.
    pub message: Message,
}

impl AgentReply {
    /// The reply as a JSON object: direct parse first, then the first
    /// `{...}` block for models that wrap JSON in prose.
    pub fn parse_value(&self) -> Option<Value> {
        if let Ok(value) = serde_json::from_str::<Value>(self.raw.trim()) {
            if value.is_object() {
                return Some(value);
            }
        }
        let re = Regex::new(r"(?s)\{.*\}").ok()?;
        let block = re.find(&self.raw)?;
        serde_json::from_str(block.as_str()).ok().filter(Value::is_object)
    }

    /// Typed parse via [`AgentReply::parse_value`].
    pub fn parse<T: DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_value(self.parse_value()?).ok()
    }
}

/// One LLM-facing node's agent.
pub struct StructuredAgent {
    llm: Arc<dyn ChatModel>,
    node: &'static str,
    prompt: PromptTemplate,
    schema_name: &'static str,
    schema: Value,
}

impl StructuredAgent {
    pub fn new(
        llm: Arc<dyn ChatModel>,
        node: &'static str,
        prompt_yaml: &str,
        schema_name: &'static str,
        schema: Value,
    ) -> Result<Self> {
        Ok(Self {
            llm,
            node,
            prompt: PromptTemplate::from_yaml(prompt_yaml)?,
            schema_name,
            schema,
        })
    }

    pub fn node(&self) -> &'static str {
        self.node
    }

    /// Invoke the model over the conversation history, streaming tokens
    /// as `messages` events under this agent's node name.
    pub async fn invoke(
        &self,
        history: &[Message],
        vars: &HashMap<&str, String>,
        writer: &StreamWriter,
    ) -> Result<AgentReply> {
        let mut messages =
            vec![Message::system(PromptTemplate::render(&self.prompt.system, vars))];
        messages.extend_from_slice(history);
        if let Some(user) = &self.prompt.user {
            messages.push(Message::human(PromptTemplate::render(user, vars)));
        }

        let request = ChatRequest::new(messages).with_response_format(
            ResponseFormat::JsonSchema {
                name: self.schema_name.to_string(),
                schema: self.schema.clone(),
            },
        );

        let started = Utc::now();
        let mut stream = self
            .llm
            .chat_stream(request)
            .await
            .map_err(|e| OrchestratorError::Llm(e.to_string()))?;

        let mut content = String::new();
        let mut reasoning = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| OrchestratorError::Llm(e.to_string()))?;
            if !chunk.content.is_empty() {
                content.push_str(&chunk.content);
                writer
                    .emit(StreamEvent::message_chunk(self.node, chunk.content))
                    .await;
            }
            if !chunk.reasoning.is_empty() {
                reasoning.push_str(&chunk.reasoning);
            }
        }

        let reasoning = if reasoning.trim().is_empty() {
            None
        } else {
            let think_duration = (Utc::now() - started).num_milliseconds() as f64 / 1000.0;
            writer
                .custom(serde_json::json!({
                    "node": self.node,
                    "content": reasoning.clone(),
                    "timestamp": Utc::now().to_rfc3339(),
                    "think_duration": think_duration,
                }))
                .await;
            Some(reasoning)
        };

        debug!(node = self.node, chars = content.len(), "agent reply accumulated");
        if content.trim().is_empty() {
            warn!(node = self.node, "model returned empty content");
        }

        Ok(AgentReply {
            message: Message::assistant(content.clone()),
            raw: content,
            reasoning,
        })
    }
}

//! OpenAI-compatible chat client
//!
//! Speaks the `/chat/completions` dialect shared by OpenAI, Ollama,
//! vLLM and most local inference servers. Structured output is
//! requested through the `response_format` field; providers that ignore
//! it still work because the agents also describe the expected JSON in
//! their prompts. Streaming uses server-sent events and forwards
//! `delta.content` and `delta.reasoning` separately.

use crate::config::LlmConfig;
use crate::error::LlmError;
use async_trait::async_trait;
use futures::StreamExt;
use genesis_graph::llm::{
    ChatModel, ChatRequest, ChatResponse, ChatStream, ChatStreamChunk, ResponseFormat,
    UsageMetadata,
};
use genesis_graph::{GraphError, Message, MessageRole};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

/// Client for any OpenAI-compatible chat endpoint.
#[derive(Clone)]
pub struct OpenAiCompatChat {
    config: LlmConfig,
    client: Client,
}

impl OpenAiCompatChat {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn convert_message(message: &Message) -> WireMessage {
        WireMessage {
            role: match message.role {
                MessageRole::System => "system",
                MessageRole::Human => "user",
                MessageRole::Assistant => "assistant",
            }
            .to_string(),
            content: message.content.clone(),
        }
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<WireMessage> = request
            .messages
            .iter()
            .map(Self::convert_message)
            .collect();

        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": request
                .config
                .temperature
                .unwrap_or(self.config.temperature),
            "stream": stream,
        });
        if let Some(max_tokens) = request.config.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        match &request.config.response_format {
            Some(ResponseFormat::JsonObject) => {
                body["response_format"] = json!({"type": "json_object"});
            }
            Some(ResponseFormat::JsonSchema { name, schema }) => {
                body["response_format"] = json!({
                    "type": "json_schema",
                    "json_schema": {"name": name, "schema": schema},
                });
            }
            None => {}
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 => LlmError::Authentication(text),
                429 => LlmError::RateLimit(text),
                _ => LlmError::Provider(format!("{status}: {text}")),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatChat {
    async fn chat(&self, request: ChatRequest) -> genesis_graph::Result<ChatResponse> {
        let body = self.build_body(&request, false);
        let response = self.post(&body).await.map_err(GraphError::from)?;

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| GraphError::from(LlmError::Http(e)))?;
        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GraphError::from(LlmError::Decode("empty choices".to_string())))?;

        debug!(model = %self.config.model, finish = ?choice.finish_reason, "chat completed");

        let mut result = ChatResponse::new(Message::assistant(
            choice.message.content.unwrap_or_default(),
        ));
        result.reasoning = choice.message.reasoning.filter(|r| !r.is_empty());
        result.usage = wire
            .usage
            .map(|u| UsageMetadata::new(u.prompt_tokens, u.completion_tokens));
        result
            .metadata
            .insert("model".to_string(), json!(wire.model));
        Ok(result)
    }

    async fn chat_stream(&self, request: ChatRequest) -> genesis_graph::Result<ChatStream> {
        let body = self.build_body(&request, true);
        let response = self.post(&body).await.map_err(GraphError::from)?;

        let mut bytes = response.bytes_stream();
        let stream = async_stream::try_stream! {
            let mut buffer = String::new();
            while let Some(piece) = bytes.next().await {
                let piece = piece.map_err(|e| GraphError::from(LlmError::Http(e)))?;
                buffer.push_str(&String::from_utf8_lossy(&piece));

                // SSE frames are newline-delimited `data: <json>` lines.
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload.is_empty() {
                        continue;
                    }
                    if payload == "[DONE]" {
                        yield ChatStreamChunk { done: true, ..Default::default() };
                        return;
                    }

                    let frame: WireStreamFrame = serde_json::from_str(payload)
                        .map_err(|e| GraphError::from(LlmError::Decode(e.to_string())))?;
                    if let Some(choice) = frame.choices.into_iter().next() {
                        let chunk = ChatStreamChunk {
                            content: choice.delta.content.unwrap_or_default(),
                            reasoning: choice.delta.reasoning.unwrap_or_default(),
                            done: choice.finish_reason.is_some(),
                            usage: frame.usage.map(|u| {
                                UsageMetadata::new(u.prompt_tokens, u.completion_tokens)
                            }),
                        };
                        if !chunk.content.is_empty()
                            || !chunk.reasoning.is_empty()
                            || chunk.done
                        {
                            yield chunk;
                        }
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    model: String,
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
    /// Separated thinking text; providers name it `reasoning` or
    /// `reasoning_content`.
    #[serde(alias = "reasoning_content")]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct WireStreamFrame {
    choices: Vec<WireStreamChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    delta: WireDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    content: Option<String>,
    #[serde(alias = "reasoning_content")]
    reasoning: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use genesis_graph::llm::ChatConfig;

    fn client() -> OpenAiCompatChat {
        OpenAiCompatChat::new(LlmConfig::new("http://localhost:9/v1", "key", "test-model"))
            .unwrap()
    }

    #[test]
    fn test_body_includes_json_schema_format() {
        let request = ChatRequest {
            messages: vec![Message::human("classify this")],
            config: ChatConfig {
                temperature: Some(0.1),
                max_tokens: Some(64),
                response_format: Some(ResponseFormat::JsonSchema {
                    name: "classification".to_string(),
                    schema: json!({"type": "object"}),
                }),
            },
        };
        let body = client().build_body(&request, false);

        assert_eq!(body["model"], "test-model");
        assert_eq!(body["temperature"], 0.1);
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(
            body["response_format"]["json_schema"]["name"],
            "classification"
        );
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_default_temperature_from_config() {
        let request = ChatRequest::new(vec![Message::human("x")]);
        let body = client().build_body(&request, true);
        assert_eq!(body["temperature"], 0.6);
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn test_stream_frame_decodes_reasoning_alias() {
        let frame: WireStreamFrame = serde_json::from_str(
            r#"{"choices":[{"delta":{"reasoning_content":"thinking..."},"finish_reason":null}],"usage":null}"#,
        )
        .unwrap();
        assert_eq!(
            frame.choices[0].delta.reasoning.as_deref(),
            Some("thinking...")
        );
    }
}

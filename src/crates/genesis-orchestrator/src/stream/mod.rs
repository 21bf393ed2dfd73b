//! The NDJSON streaming boundary
//!
//! One request becomes one stream of newline-delimited JSON envelopes
//! `{"type": ..., "data": ...}`:
//!
//! - `messages`  — a user-facing token chunk
//! - `updates`   — one node's state delta
//! - `custom`    — tool stdout lines and reasoning captures
//! - `error`     — terminal; the run failed catastrophically
//! - `persisted` — terminal; carries the final message ids and state uid
//!
//! The driver consumes the graph's event stream, filters token chunks to
//! their user-facing portion, accumulates every state patch, and after
//! the stream ends merges the patches, persists the final state and the
//! assistant message on fresh repository handles, and emits the
//! `persisted` line. Persistence failures are logged and never retract
//! events already sent.

pub mod filter;
pub mod merge;

use crate::config::GenesisConfig;
use crate::error::OrchestratorError;
use crate::orchestrator::Orchestrator;
use crate::repo::{Attachment, MessageKind, MessageRepo, MessageUpdate, StateRepo};
use filter::ChunkFilter;
use futures::Stream;
use genesis_graph::{Message, RunConfig, StreamEvent};
use merge::{deep_merge, flatten_state_update, interrupt_message};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// One NDJSON line.
pub fn ndjson_line(event_type: &str, data: &Value) -> String {
    let mut line = json!({"type": event_type, "data": data}).to_string();
    line.push('\n');
    line
}

/// Everything one message request needs to drive a run.
pub struct RunRequest {
    pub chat_id: String,
    pub user_message_id: String,
    pub assistant_message_id: String,
    /// Conversation context (history plus the new user turn).
    pub messages: Vec<Message>,
    /// Resume a suspended run instead of starting a new one.
    pub interrupted: bool,
    /// The user's text; delivered as feedback when resuming.
    pub feedback: String,
}

/// Repository handles used for final persistence.
#[derive(Clone)]
pub struct StreamDeps {
    pub messages: Arc<dyn MessageRepo>,
    pub states: Arc<dyn StateRepo>,
}

/// Drive one run and yield its NDJSON lines.
pub fn message_event_stream(
    orchestrator: Arc<Orchestrator>,
    deps: StreamDeps,
    config: GenesisConfig,
    request: RunRequest,
) -> impl Stream<Item = String> + Send {
    async_stream::stream! {
        let run_config = RunConfig::new(request.chat_id.clone())
            .with_value("message_id", json!(request.assistant_message_id));

        let receiver = if request.interrupted {
            orchestrator
                .resume_with_feedback(&request.feedback, run_config)
                .await
        } else {
            orchestrator
                .run_stream(request.messages.clone(), run_config)
                .await
        };

        let mut receiver = match receiver {
            Ok(receiver) => receiver,
            Err(error) => {
                yield ndjson_line("error", &json!({"message": error.to_string()}));
                return;
            }
        };

        let mut chunk_filter = ChunkFilter::new();
        let mut accum_state: Vec<Value> = Vec::new();
        let mut reasoning_events: Vec<Value> = Vec::new();
        let mut failed = false;

        while let Some(chunk) = receiver.recv().await {
            match chunk.event {
                StreamEvent::MessageChunk { node, chunk, .. } => {
                    if let Some(text) = chunk_filter.feed(&chunk) {
                        yield ndjson_line(
                            "messages",
                            &json!({"content": text, "node": node}),
                        );
                    }
                    accum_state.extend(chunk_filter.drain_parsed());
                }
                StreamEvent::Updates { node, update } => {
                    let patch = json!({ node: update });
                    accum_state.push(patch.clone());
                    yield ndjson_line("updates", &patch);
                }
                StreamEvent::Custom { data } => {
                    if is_reasoning_event(&data) {
                        reasoning_events.push(data.clone());
                    }
                    yield ndjson_line("custom", &data);
                }
                StreamEvent::Error { message } => {
                    failed = true;
                    yield ndjson_line("error", &json!({"message": message}));
                    break;
                }
                StreamEvent::Values { .. } => {}
            }
        }

        if failed {
            return;
        }

        // Merge every patch into the final state dict.
        let mut merged = json!({});
        for patch in &accum_state {
            deep_merge(&mut merged, &flatten_state_update(patch));
        }

        // Interrupt detection looks only at the latest patch: a resumed
        // and completed run has older interrupt markers that no longer
        // apply.
        let last_flat = accum_state
            .last()
            .map(flatten_state_update)
            .unwrap_or_else(|| json!({}));
        let pending_question = interrupt_message(&last_flat);

        let (message_type, kind, content) = match &pending_question {
            Some(question) => ("question", MessageKind::Question, question.clone()),
            None => (
                "response",
                MessageKind::Response,
                extract_response(&merged),
            ),
        };

        // Final persistence runs on fresh handles after streaming; a
        // failure here must not retract what the client already saw.
        let state_uid = match deps
            .states
            .create_state(merged.clone())
            .await
            .map_err(|e| OrchestratorError::Persistence(e.to_string()))
        {
            Ok(record) => Some(record.uid),
            Err(error) => {
                warn!(%error, "final state persistence failed");
                None
            }
        };

        let attachments = output_attachments(&merged, &config);
        let update = MessageUpdate {
            content: Some(content),
            state_id: state_uid.clone(),
            reasoning: if reasoning_events.is_empty() {
                None
            } else {
                Some(json!({"content": reasoning_events}))
            },
            kind: Some(kind),
            attachments: if attachments.is_empty() {
                None
            } else {
                Some(attachments)
            },
            precedent_id: None,
        };
        if let Err(error) = deps
            .messages
            .update_message(&request.assistant_message_id, update)
            .await
        {
            warn!(%error, "assistant message update failed");
        }
        if let Some(uid) = &state_uid {
            if let Err(error) = deps
                .states
                .link_message(uid, &request.assistant_message_id)
                .await
            {
                warn!(%error, "state back-link failed");
            }
        }

        yield ndjson_line(
            "persisted",
            &json!({
                "user_message_id": request.user_message_id,
                "assistant_message_id": request.assistant_message_id,
                "state_uid": state_uid,
                "message_type": message_type,
            }),
        );
    }
}

/// Reasoning captures carry exactly these fields (see the agents'
/// custom events); anything else is tool output.
fn is_reasoning_event(data: &Value) -> bool {
    data.get("node").is_some()
        && data.get("content").is_some()
        && data.get("timestamp").is_some()
        && data.get("think_duration").is_some()
}

/// Final assistant text: the finalizer's `response`, else the last
/// assistant message in the merged state.
fn extract_response(merged: &Value) -> String {
    if let Some(response) = merged.get("response").and_then(Value::as_str) {
        if !response.is_empty() {
            return response.to_string();
        }
    }
    merged
        .get("messages")
        .and_then(Value::as_array)
        .and_then(|messages| {
            messages
                .iter()
                .rev()
                .find(|m| m.get("role").and_then(Value::as_str) == Some("assistant"))
        })
        .and_then(|m| m.get("content").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

/// Attachment metadata for the run's final artifact, when it is a real
/// file under the outputs tree.
fn output_attachments(merged: &Value, config: &GenesisConfig) -> Vec<Attachment> {
    let Some(final_output) = merged
        .get("execution_results")
        .and_then(|r| r.get("final_output"))
        .and_then(Value::as_str)
    else {
        return Vec::new();
    };

    let path = Path::new(final_output);
    let Ok(metadata) = std::fs::metadata(path) else {
        return Vec::new();
    };
    if !metadata.is_file() || !path.starts_with(&config.outputs_root) {
        return Vec::new();
    }

    vec![Attachment {
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        path: final_output.to_string(),
        size: metadata.len(),
        mime_type: guess_mime(path),
    }]
}

fn guess_mime(path: &Path) -> String {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "json" => "application/json",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
    .to_string()
}

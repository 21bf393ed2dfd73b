//! HTTP handlers

use crate::api::AppState;
use crate::repo::{Attachment, MessageKind, MessageUpdate, Precedent};
use crate::stream::{message_event_stream, RunRequest, StreamDeps};
use axum::body::{Body, Bytes};
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use genesis_graph::Message;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::path::PathBuf;
use tracing::{info, warn};

type ApiError = (StatusCode, String);

fn internal(error: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
}

/// `POST /messages/{chat_id}` — multipart `{message, files?, interrupted?}`.
/// Streams the run back as `application/x-ndjson`.
pub async fn post_message(
    State(app): State<AppState>,
    Path(chat_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut message_text = String::new();
    let mut interrupted = false;
    let mut uploads: Vec<(String, Bytes)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "message" => {
                message_text = field
                    .text()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
            }
            "interrupted" => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
                interrupted = matches!(raw.trim(), "true" | "1" | "yes");
            }
            "files" => {
                let name = field
                    .file_name()
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "file".to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
                uploads.push((name, bytes));
            }
            _ => {}
        }
    }

    if app
        .chats
        .get_chat(&chat_id)
        .await
        .map_err(internal)?
        .is_none()
    {
        return Err((StatusCode::NOT_FOUND, "Chat not found".to_string()));
    }
    if message_text.trim().is_empty() {
        // Resuming an interrupted workflow requires feedback text.
        return Err((
            StatusCode::BAD_REQUEST,
            "A message is required; provide your response to continue.".to_string(),
        ));
    }

    let attachments = stage_uploads(&app, &chat_id, uploads).map_err(internal)?;
    let file_tags: Vec<String> = attachments
        .iter()
        .map(|a| format!("<file>inputs/{}/{}</file>", chat_id, a.filename))
        .collect();
    let orchestrator_content = if file_tags.is_empty() {
        message_text.clone()
    } else if message_text.trim().is_empty() {
        file_tags.join("\n")
    } else {
        format!("{}\n\n{}", message_text, file_tags.join("\n"))
    };

    // Message rows first: the user turn, then the assistant placeholder
    // whose id names the output directory for this run.
    let user_msg = app
        .messages
        .create_message(
            &chat_id,
            "user",
            &message_text,
            attachments,
            MessageKind::Question,
        )
        .await
        .map_err(internal)?;
    let assistant_msg = app
        .messages
        .create_message(&chat_id, "assistant", "", Vec::new(), MessageKind::Response)
        .await
        .map_err(internal)?;

    // Conversation context, oldest first, skipping the empty placeholder.
    let mut conversation: Vec<Message> = Vec::new();
    for record in app
        .messages
        .list_messages(&chat_id)
        .await
        .map_err(internal)?
    {
        if record.id == assistant_msg.id {
            continue;
        }
        if record.role == "user" {
            let content = if record.id == user_msg.id {
                orchestrator_content.clone()
            } else {
                with_attachment_tags(&record.content, &record.attachments, &chat_id)
            };
            conversation.push(Message::human(content));
        } else {
            conversation.push(Message::assistant(record.content.clone()));
        }
    }

    info!(
        %chat_id,
        interrupted,
        messages = conversation.len(),
        "dispatching message run"
    );

    let stream = message_event_stream(
        app.orchestrator.clone(),
        StreamDeps {
            messages: app.messages.clone(),
            states: app.states.clone(),
        },
        app.config.clone(),
        RunRequest {
            chat_id,
            user_message_id: user_msg.id,
            assistant_message_id: assistant_msg.id,
            messages: conversation,
            interrupted,
            feedback: message_text,
        },
    );

    let body = Body::from_stream(stream.map(|line| Ok::<_, Infallible>(Bytes::from(line))));
    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        body,
    )
        .into_response())
}

/// `GET /messages/{message_id}` — the persisted state dict.
pub async fn get_message_state(
    State(app): State<AppState>,
    Path(message_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let state = app
        .states
        .get_by_message(&message_id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "State not found".to_string()))?;
    Ok(Json(state.data))
}

/// `POST /messages/{message_id}/precedent` — save the message's workflow
/// as a precedent.
pub async fn save_precedent(
    State(app): State<AppState>,
    Path(message_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let message = app
        .messages
        .get_message(&message_id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Message not found".to_string()))?;
    let state = app
        .states
        .get_by_message(&message_id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "State not found".to_string()))?;

    let precedent = precedent_from_state(&state.data);
    let uid = app.vectors.save(precedent).await.map_err(internal)?;

    app.messages
        .update_message(
            &message_id,
            MessageUpdate {
                precedent_id: Some(Some(uid.clone())),
                ..MessageUpdate::default()
            },
        )
        .await
        .map_err(internal)?;

    info!(message_id = %message.id, %uid, "precedent saved");
    Ok(Json(json!({"uid": uid})))
}

/// `DELETE /messages/{message_id}/precedent`.
pub async fn delete_precedent(
    State(app): State<AppState>,
    Path(message_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let message = app
        .messages
        .get_message(&message_id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Message not found".to_string()))?;
    let Some(uid) = message.precedent_id else {
        return Ok(StatusCode::NO_CONTENT);
    };

    // Null the pointer before deleting the target.
    app.messages
        .update_message(
            &message_id,
            MessageUpdate {
                precedent_id: Some(None),
                ..MessageUpdate::default()
            },
        )
        .await
        .map_err(internal)?;
    app.vectors.delete(&[uid]).await.map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ChatBody {
    pub title: String,
}

pub async fn list_chats(State(app): State<AppState>) -> Result<Json<Value>, ApiError> {
    let chats = app.chats.list_chats().await.map_err(internal)?;
    Ok(Json(json!(chats)))
}

pub async fn create_chat(
    State(app): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Json<Value>, ApiError> {
    let chat = app.chats.create_chat(&body.title).await.map_err(internal)?;
    Ok(Json(json!(chat)))
}

pub async fn rename_chat(
    State(app): State<AppState>,
    Path(chat_id): Path<String>,
    Json(body): Json<ChatBody>,
) -> Result<Json<Value>, ApiError> {
    let chat = app
        .chats
        .rename_chat(&chat_id, &body.title)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Chat not found".to_string()))?;
    Ok(Json(json!(chat)))
}

pub async fn delete_chat(
    State(app): State<AppState>,
    Path(chat_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if app.chats.delete_chat(&chat_id).await.map_err(internal)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, "Chat not found".to_string()))
    }
}

/// `POST /artifacts/{chat_id}/upload` — stage files under
/// `inputs/<chat_id>/`.
pub async fn upload_artifacts(
    State(app): State<AppState>,
    Path(chat_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut uploads = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    {
        let name = field
            .file_name()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "file".to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
        uploads.push((name, bytes));
    }
    let attachments = stage_uploads(&app, &chat_id, uploads).map_err(internal)?;
    Ok(Json(json!({"attachments": attachments})))
}

/// Write uploads into the chat's input directory, avoiding collisions
/// with a numeric suffix.
fn stage_uploads(
    app: &AppState,
    chat_id: &str,
    uploads: Vec<(String, Bytes)>,
) -> std::io::Result<Vec<Attachment>> {
    if uploads.is_empty() {
        return Ok(Vec::new());
    }
    let base = app.config.chat_inputs(chat_id);
    std::fs::create_dir_all(&base)?;

    let mut attachments = Vec::new();
    for (name, bytes) in uploads {
        // Strip any client-provided directories.
        let name = PathBuf::from(name)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());

        let mut dest = base.join(&name);
        let stem = dest
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        let ext = dest
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let mut counter = 1;
        while dest.exists() {
            dest = base.join(format!("{stem}_{counter}{ext}"));
            counter += 1;
        }

        std::fs::write(&dest, &bytes)?;
        let size = bytes.len() as u64;
        let filename = dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or(name);
        attachments.push(Attachment {
            mime_type: guess_upload_mime(&filename),
            path: dest.to_string_lossy().to_string(),
            size,
            filename,
        });
    }
    Ok(attachments)
}

fn guess_upload_mime(filename: &str) -> String {
    let ext = filename.rsplit('.').next().unwrap_or_default().to_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Re-attach `<file>` tags to a historical message so the router can see
/// its uploads.
fn with_attachment_tags(content: &str, attachments: &[Attachment], chat_id: &str) -> String {
    if attachments.is_empty() {
        return content.to_string();
    }
    let tags: Vec<String> = attachments
        .iter()
        .map(|a| format!("<file>inputs/{}/{}</file>", chat_id, a.filename))
        .collect();
    if content.trim().is_empty() {
        tags.join("\n")
    } else {
        format!("{}\n\n{}", content, tags.join("\n"))
    }
}

/// Build a precedent from a persisted state dict.
fn precedent_from_state(state: &Value) -> Precedent {
    let objective = state
        .get("objective")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    // The stored pipeline: tool metadata restricted to the chosen steps,
    // in execution order.
    let chosen_names: Vec<String> = state
        .get("chosen_path")
        .and_then(Value::as_array)
        .map(|steps| {
            steps
                .iter()
                .filter_map(|s| s.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let tool_metadata = state
        .get("tool_metadata")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let path: Vec<Value> = chosen_names
        .iter()
        .filter_map(|name| {
            tool_metadata
                .iter()
                .find(|t| t.get("name").and_then(Value::as_str) == Some(name))
                .cloned()
        })
        .collect();

    // The router reply, replayed as a worked example for future runs.
    let router_format = json!({
        "path": state.get("chosen_path").cloned().unwrap_or(Value::Null),
        "reasoning": state.get("route_reasoning").cloned().unwrap_or(Value::Null),
    });

    let last_user = state
        .get("messages")
        .and_then(Value::as_array)
        .and_then(|messages| {
            messages
                .iter()
                .rev()
                .find(|m| m.get("role").and_then(Value::as_str) == Some("human"))
        })
        .and_then(|m| m.get("content").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();

    let mut precedent = Precedent {
        description: format!("{objective} {last_user}").trim().to_string(),
        objective,
        messages: last_user,
        router_format,
        is_complex: state
            .get("is_complex")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        ..Precedent::default()
    };
    precedent.input_type = state
        .get("input_type")
        .and_then(|v| serde_json::from_value(v.clone()).ok());
    precedent.type_savepoint = state
        .get("type_savepoint")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    precedent.path = serde_json::from_value(Value::Array(path)).unwrap_or_default();
    if precedent.path.is_empty() {
        warn!("saving precedent without a tool path");
    }
    precedent
}

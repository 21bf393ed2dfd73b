//! Repository interfaces
//!
//! The core consumes storage through these typed traits; the concrete
//! backends are adapters. The crate ships in-memory implementations
//! ([`memory`]) used by tests and single-process deployments.
//!
//! Lifecycle notes: a message row is created on arrival, its state row
//! once the first graph update is observed, and the message's `state_id`
//! is back-filled after the stream ends — the two pointers are not
//! required to be consistent mid-run. Deletes null the pointer before
//! removing the target.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use genesis_tools::{ToolMetadata, WorkflowType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Whether an assistant message answers the request or asks the user a
/// clarifying question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Question,
    Response,
}

/// One conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

/// An uploaded or produced file attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub path: String,
    pub size: u64,
    pub mime_type: String,
}

/// One stored message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub chat_id: String,
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub reasoning: Option<Value>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub state_id: Option<String>,
    #[serde(default)]
    pub precedent_id: Option<String>,
    pub kind: MessageKind,
}

/// Partial update applied atomically to a message.
#[derive(Debug, Clone, Default)]
pub struct MessageUpdate {
    pub content: Option<String>,
    pub state_id: Option<String>,
    pub reasoning: Option<Value>,
    pub kind: Option<MessageKind>,
    pub attachments: Option<Vec<Attachment>>,
    pub precedent_id: Option<Option<String>>,
}

/// Persisted final graph state of one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateRecord {
    pub uid: String,
    #[serde(default)]
    pub message_id: Option<String>,
    pub data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A saved workflow, retrievable by semantic similarity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Precedent {
    #[serde(default, alias = "id")]
    pub uid: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub objective: String,
    /// Conversation digest stored for display.
    #[serde(default)]
    pub messages: String,
    /// The successful pipeline's tool metadata.
    #[serde(default)]
    pub path: Vec<ToolMetadata>,
    /// The router reply that produced it, reused as a worked example.
    #[serde(default)]
    pub router_format: Value,
    #[serde(default)]
    pub input_type: Option<WorkflowType>,
    #[serde(default)]
    pub type_savepoint: Vec<WorkflowType>,
    #[serde(default)]
    pub is_complex: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Similarity score attached by a search.
    #[serde(default)]
    pub score: f64,
}

/// Chat CRUD.
#[async_trait]
pub trait ChatRepo: Send + Sync {
    async fn create_chat(&self, title: &str) -> Result<ChatRecord>;
    async fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRecord>>;
    async fn list_chats(&self) -> Result<Vec<ChatRecord>>;
    async fn rename_chat(&self, chat_id: &str, title: &str) -> Result<Option<ChatRecord>>;
    async fn delete_chat(&self, chat_id: &str) -> Result<bool>;
}

/// Message CRUD with atomic partial update.
#[async_trait]
pub trait MessageRepo: Send + Sync {
    async fn create_message(
        &self,
        chat_id: &str,
        role: &str,
        content: &str,
        attachments: Vec<Attachment>,
        kind: MessageKind,
    ) -> Result<MessageRecord>;

    async fn get_message(&self, message_id: &str) -> Result<Option<MessageRecord>>;

    /// All messages of a chat, oldest first.
    async fn list_messages(&self, chat_id: &str) -> Result<Vec<MessageRecord>>;

    async fn update_message(
        &self,
        message_id: &str,
        update: MessageUpdate,
    ) -> Result<Option<MessageRecord>>;

    async fn delete_message(&self, message_id: &str) -> Result<bool>;
}

/// Persisted-state CRUD.
#[async_trait]
pub trait StateRepo: Send + Sync {
    async fn create_state(&self, data: Value) -> Result<StateRecord>;
    async fn update_state(&self, uid: &str, data: Value) -> Result<Option<StateRecord>>;
    async fn get_state(&self, uid: &str) -> Result<Option<StateRecord>>;
    async fn get_by_message(&self, message_id: &str) -> Result<Option<StateRecord>>;
    async fn link_message(&self, uid: &str, message_id: &str) -> Result<()>;
}

/// Precedent store keyed by vector similarity over descriptions.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Up to `limit` precedents similar to `query`, best first, each
    /// with its `score` populated.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Precedent>>;

    /// Store a precedent; returns its uid.
    async fn save(&self, precedent: Precedent) -> Result<String>;

    async fn delete(&self, uids: &[String]) -> Result<()>;

    async fn list_all(&self) -> Result<Vec<Precedent>>;
}

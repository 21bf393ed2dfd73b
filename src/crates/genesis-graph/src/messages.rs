//! Conversation message types
//!
//! Messages are the append-only conversational record threaded through
//! graph state. They serialize to plain JSON objects so that they survive
//! checkpointing and the NDJSON stream without a custom codec.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Instructions and context for the model.
    System,
    /// End-user input.
    Human,
    /// Model output.
    Assistant,
}

/// A single conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Stable identifier; lets reducers replace an updated message
    /// instead of duplicating it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub role: MessageRole,

    pub content: String,

    /// Free-form extra data (attachments, provider metadata).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Some(Uuid::new_v4().to_string()),
            role,
            content: content.into(),
            metadata: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Human, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Merge `update` into `current`: messages whose id matches an existing
/// one replace it in place, everything else is appended.
pub fn add_messages(current: &mut Vec<Message>, update: Vec<Message>) {
    for message in update {
        let existing = message
            .id
            .as_ref()
            .and_then(|id| current.iter().position(|m| m.id.as_ref() == Some(id)));
        match existing {
            Some(index) => current[index] = message,
            None => current.push(message),
        }
    }
}

/// Decode a JSON array of messages, tolerating unknown entries by
/// skipping them.
pub fn messages_from_value(value: &Value) -> Vec<Message> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_constructors_set_role() {
        assert_eq!(Message::human("hi").role, MessageRole::Human);
        assert_eq!(Message::assistant("ok").role, MessageRole::Assistant);
        assert_eq!(Message::system("rules").role, MessageRole::System);
    }

    #[test]
    fn test_add_messages_appends() {
        let mut history = vec![Message::human("one")];
        add_messages(&mut history, vec![Message::assistant("two")]);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "two");
    }

    #[test]
    fn test_add_messages_replaces_by_id() {
        let mut history = vec![Message::human("draft").with_id("m1")];
        add_messages(&mut history, vec![Message::human("final").with_id("m1")]);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "final");
    }

    #[test]
    fn test_roundtrip_through_value() {
        let original = vec![Message::human("hello"), Message::assistant("hi there")];
        let value = serde_json::to_value(&original).unwrap();
        let decoded = messages_from_value(&value);
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_messages_from_value_skips_garbage() {
        let value = json!([
            {"role": "human", "content": "ok"},
            {"bogus": true}
        ]);
        let decoded = messages_from_value(&value);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].content, "ok");
    }
}

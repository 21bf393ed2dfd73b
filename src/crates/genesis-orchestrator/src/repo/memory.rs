//! In-memory repository implementations
//!
//! Backed by `DashMap`; suitable for tests and single-process
//! deployments. The vector store scores by token overlap between the
//! query and each precedent's description/objective — a stand-in with
//! the same contract as a real embedding store.

use crate::error::Result;
use crate::repo::{
    Attachment, ChatRecord, ChatRepo, MessageKind, MessageRecord, MessageRepo, MessageUpdate,
    Precedent, StateRecord, StateRepo, VectorStore,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryChatRepo {
    chats: DashMap<String, ChatRecord>,
}

impl InMemoryChatRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a chat with a fixed id (tests and imports).
    pub fn insert_with_id(&self, chat_id: &str, title: &str) -> ChatRecord {
        let record = ChatRecord {
            id: chat_id.to_string(),
            title: title.to_string(),
            created_at: Utc::now(),
        };
        self.chats.insert(chat_id.to_string(), record.clone());
        record
    }
}

#[async_trait]
impl ChatRepo for InMemoryChatRepo {
    async fn create_chat(&self, title: &str) -> Result<ChatRecord> {
        let record = ChatRecord {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            created_at: Utc::now(),
        };
        self.chats.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRecord>> {
        Ok(self.chats.get(chat_id).map(|r| r.clone()))
    }

    async fn list_chats(&self) -> Result<Vec<ChatRecord>> {
        let mut chats: Vec<ChatRecord> = self.chats.iter().map(|r| r.clone()).collect();
        chats.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(chats)
    }

    async fn rename_chat(&self, chat_id: &str, title: &str) -> Result<Option<ChatRecord>> {
        Ok(self.chats.get_mut(chat_id).map(|mut r| {
            r.title = title.to_string();
            r.clone()
        }))
    }

    async fn delete_chat(&self, chat_id: &str) -> Result<bool> {
        Ok(self.chats.remove(chat_id).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepo {
    messages: DashMap<String, MessageRecord>,
}

impl InMemoryMessageRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageRepo for InMemoryMessageRepo {
    async fn create_message(
        &self,
        chat_id: &str,
        role: &str,
        content: &str,
        attachments: Vec<Attachment>,
        kind: MessageKind,
    ) -> Result<MessageRecord> {
        let record = MessageRecord {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            reasoning: None,
            attachments,
            created_at: Utc::now(),
            state_id: None,
            precedent_id: None,
            kind,
        };
        self.messages.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get_message(&self, message_id: &str) -> Result<Option<MessageRecord>> {
        Ok(self.messages.get(message_id).map(|r| r.clone()))
    }

    async fn list_messages(&self, chat_id: &str) -> Result<Vec<MessageRecord>> {
        let mut messages: Vec<MessageRecord> = self
            .messages
            .iter()
            .filter(|r| r.chat_id == chat_id)
            .map(|r| r.clone())
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }

    async fn update_message(
        &self,
        message_id: &str,
        update: MessageUpdate,
    ) -> Result<Option<MessageRecord>> {
        Ok(self.messages.get_mut(message_id).map(|mut record| {
            if let Some(content) = update.content {
                record.content = content;
            }
            if let Some(state_id) = update.state_id {
                record.state_id = Some(state_id);
            }
            if let Some(reasoning) = update.reasoning {
                record.reasoning = Some(reasoning);
            }
            if let Some(kind) = update.kind {
                record.kind = kind;
            }
            if let Some(attachments) = update.attachments {
                record.attachments = attachments;
            }
            if let Some(precedent_id) = update.precedent_id {
                record.precedent_id = precedent_id;
            }
            record.clone()
        }))
    }

    async fn delete_message(&self, message_id: &str) -> Result<bool> {
        Ok(self.messages.remove(message_id).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryStateRepo {
    states: DashMap<String, StateRecord>,
}

impl InMemoryStateRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateRepo for InMemoryStateRepo {
    async fn create_state(&self, data: Value) -> Result<StateRecord> {
        let now = Utc::now();
        let record = StateRecord {
            uid: Uuid::new_v4().to_string(),
            message_id: None,
            data,
            created_at: now,
            updated_at: now,
        };
        self.states.insert(record.uid.clone(), record.clone());
        Ok(record)
    }

    async fn update_state(&self, uid: &str, data: Value) -> Result<Option<StateRecord>> {
        Ok(self.states.get_mut(uid).map(|mut record| {
            record.data = data;
            record.updated_at = Utc::now();
            record.clone()
        }))
    }

    async fn get_state(&self, uid: &str) -> Result<Option<StateRecord>> {
        Ok(self.states.get(uid).map(|r| r.clone()))
    }

    async fn get_by_message(&self, message_id: &str) -> Result<Option<StateRecord>> {
        Ok(self
            .states
            .iter()
            .find(|r| r.message_id.as_deref() == Some(message_id))
            .map(|r| r.clone()))
    }

    async fn link_message(&self, uid: &str, message_id: &str) -> Result<()> {
        if let Some(mut record) = self.states.get_mut(uid) {
            record.message_id = Some(message_id.to_string());
        }
        Ok(())
    }
}

/// Token-overlap similarity store. Scores are Jaccard overlap between
/// lowercase word sets; anything above `threshold` is a candidate.
pub struct InMemoryVectorStore {
    precedents: DashMap<String, Precedent>,
    threshold: f64,
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self {
            precedents: DashMap::new(),
            threshold: 0.1,
        }
    }
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn similarity(query: &HashSet<String>, document: &str) -> f64 {
    let doc_tokens = tokenize(document);
    if query.is_empty() || doc_tokens.is_empty() {
        return 0.0;
    }
    let intersection = query.intersection(&doc_tokens).count() as f64;
    let union = query.union(&doc_tokens).count() as f64;
    intersection / union
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Precedent>> {
        let query_tokens = tokenize(query);
        let mut scored: Vec<Precedent> = self
            .precedents
            .iter()
            .filter_map(|entry| {
                let text = format!("{} {}", entry.description, entry.objective);
                let score = similarity(&query_tokens, &text);
                if score < self.threshold {
                    return None;
                }
                let mut precedent = entry.clone();
                precedent.score = score;
                Some(precedent)
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn save(&self, mut precedent: Precedent) -> Result<String> {
        if precedent.uid.is_empty() {
            precedent.uid = Uuid::new_v4().to_string();
        }
        if precedent.created_at.is_none() {
            precedent.created_at = Some(Utc::now());
        }
        let uid = precedent.uid.clone();
        self.precedents.insert(uid.clone(), precedent);
        Ok(uid)
    }

    async fn delete(&self, uids: &[String]) -> Result<()> {
        for uid in uids {
            self.precedents.remove(uid);
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Precedent>> {
        Ok(self.precedents.iter().map(|r| r.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_message_lifecycle() {
        let repo = InMemoryMessageRepo::new();
        let message = repo
            .create_message("c1", "assistant", "", Vec::new(), MessageKind::Response)
            .await
            .unwrap();
        assert!(message.state_id.is_none());

        let updated = repo
            .update_message(
                &message.id,
                MessageUpdate {
                    content: Some("done".to_string()),
                    state_id: Some("s1".to_string()),
                    kind: Some(MessageKind::Question),
                    ..MessageUpdate::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.content, "done");
        assert_eq!(updated.state_id.as_deref(), Some("s1"));
        assert_eq!(updated.kind, MessageKind::Question);
    }

    #[tokio::test]
    async fn test_messages_listed_in_creation_order() {
        let repo = InMemoryMessageRepo::new();
        for text in ["one", "two", "three"] {
            repo.create_message("c1", "user", text, Vec::new(), MessageKind::Question)
                .await
                .unwrap();
        }
        repo.create_message("other", "user", "x", Vec::new(), MessageKind::Question)
            .await
            .unwrap();

        let listed = repo.list_messages("c1").await.unwrap();
        let contents: Vec<&str> = listed.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_state_link_and_lookup() {
        let repo = InMemoryStateRepo::new();
        let state = repo
            .create_state(serde_json::json!({"response": "hi"}))
            .await
            .unwrap();
        repo.link_message(&state.uid, "m1").await.unwrap();

        let found = repo.get_by_message("m1").await.unwrap().unwrap();
        assert_eq!(found.uid, state.uid);
        assert_eq!(found.data["response"], "hi");
    }

    #[tokio::test]
    async fn test_vector_search_ranks_by_overlap() {
        let store = InMemoryVectorStore::new();
        store
            .save(Precedent {
                description: "translate japanese text in an image to english".to_string(),
                objective: "image translation".to_string(),
                ..Precedent::default()
            })
            .await
            .unwrap();
        store
            .save(Precedent {
                description: "denoise a podcast audio recording".to_string(),
                objective: "audio cleanup".to_string(),
                ..Precedent::default()
            })
            .await
            .unwrap();

        let results = store
            .search("translate the japanese in this image", 3)
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert!(results[0].description.contains("translate"));
        assert!(results[0].score > 0.0);
    }

    #[tokio::test]
    async fn test_vector_threshold_filters() {
        let store = InMemoryVectorStore::new().with_threshold(0.9);
        store
            .save(Precedent {
                description: "completely unrelated subject".to_string(),
                ..Precedent::default()
            })
            .await
            .unwrap();
        let results = store.search("translate my image", 3).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_precedent_delete() {
        let store = InMemoryVectorStore::new();
        let uid = store.save(Precedent::default()).await.unwrap();
        store.delete(&[uid.clone()]).await.unwrap();
        assert!(store.list_all().await.unwrap().is_empty());
    }
}

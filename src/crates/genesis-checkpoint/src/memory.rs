//! In-memory checkpoint storage
//!
//! [`InMemorySaver`] keeps one append-only checkpoint list per thread in a
//! shared `HashMap` behind a `tokio::sync::RwLock`. Data lives as long as
//! the process; it is the right backend for development, tests and
//! single-process deployments, and the reference for implementing
//! database-backed savers.

use crate::checkpoint::{Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple};
use crate::error::{CheckpointError, Result};
use crate::traits::CheckpointSaver;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct CheckpointEntry {
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
    config: CheckpointConfig,
}

/// Thread-safe in-memory [`CheckpointSaver`].
#[derive(Clone, Default)]
pub struct InMemorySaver {
    storage: Arc<RwLock<HashMap<String, Vec<CheckpointEntry>>>>,
}

impl InMemorySaver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct threads currently tracked.
    pub async fn thread_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Total number of stored checkpoints across all threads.
    pub async fn checkpoint_count(&self) -> usize {
        self.storage.read().await.values().map(Vec::len).sum()
    }

    /// Delete everything. Useful between tests.
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

#[async_trait]
impl CheckpointSaver for InMemorySaver {
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig> {
        let thread_id = config
            .thread_id()
            .ok_or(CheckpointError::MissingThreadId)?
            .to_string();

        let stored_config = CheckpointConfig {
            thread_id: Some(thread_id.clone()),
            checkpoint_id: Some(checkpoint.id.clone()),
            configurable: config.configurable.clone(),
        };

        let mut storage = self.storage.write().await;
        storage.entry(thread_id).or_default().push(CheckpointEntry {
            checkpoint,
            metadata,
            config: stored_config.clone(),
        });

        Ok(stored_config)
    }

    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        let thread_id = config.thread_id().ok_or(CheckpointError::MissingThreadId)?;

        let storage = self.storage.read().await;
        let entries = match storage.get(thread_id) {
            Some(entries) if !entries.is_empty() => entries,
            _ => return Ok(None),
        };

        let entry = match &config.checkpoint_id {
            Some(id) => entries.iter().rev().find(|e| &e.checkpoint.id == id),
            None => entries.last(),
        };

        Ok(entry.map(|e| CheckpointTuple {
            config: e.config.clone(),
            checkpoint: e.checkpoint.clone(),
            metadata: e.metadata.clone(),
        }))
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointTuple>> {
        let storage = self.storage.read().await;
        Ok(storage
            .get(thread_id)
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| CheckpointTuple {
                        config: e.config.clone(),
                        checkpoint: e.checkpoint.clone(),
                        metadata: e.metadata.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.storage.write().await.remove(thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointSource;
    use serde_json::json;
    use std::collections::HashMap;

    fn config(thread: &str) -> CheckpointConfig {
        CheckpointConfig::new().with_thread_id(thread)
    }

    #[tokio::test]
    async fn test_put_and_get_latest() {
        let saver = InMemorySaver::new();
        let cfg = config("t1");

        saver
            .put(
                &cfg,
                Checkpoint::new(json!({"step": 0})),
                CheckpointMetadata::new(0, CheckpointSource::Loop),
            )
            .await
            .unwrap();
        saver
            .put(
                &cfg,
                Checkpoint::new(json!({"step": 1})),
                CheckpointMetadata::new(1, CheckpointSource::Loop),
            )
            .await
            .unwrap();

        let tuple = saver.get_tuple(&cfg).await.unwrap().unwrap();
        assert_eq!(tuple.checkpoint.channel_values["step"], 1);
        assert_eq!(tuple.metadata.step, 1);
    }

    #[tokio::test]
    async fn test_get_by_checkpoint_id() {
        let saver = InMemorySaver::new();
        let cfg = config("t1");

        let first = saver
            .put(
                &cfg,
                Checkpoint::new(json!({"step": 0})),
                CheckpointMetadata::new(0, CheckpointSource::Loop),
            )
            .await
            .unwrap();
        saver
            .put(
                &cfg,
                Checkpoint::new(json!({"step": 1})),
                CheckpointMetadata::new(1, CheckpointSource::Loop),
            )
            .await
            .unwrap();

        let by_id = CheckpointConfig {
            thread_id: Some("t1".into()),
            checkpoint_id: first.checkpoint_id.clone(),
            configurable: HashMap::new(),
        };
        let tuple = saver.get_tuple(&by_id).await.unwrap().unwrap();
        assert_eq!(tuple.checkpoint.channel_values["step"], 0);
    }

    #[tokio::test]
    async fn test_thread_isolation() {
        let saver = InMemorySaver::new();
        saver
            .put(
                &config("a"),
                Checkpoint::new(json!({"who": "a"})),
                CheckpointMetadata::new(0, CheckpointSource::Input),
            )
            .await
            .unwrap();
        saver
            .put(
                &config("b"),
                Checkpoint::new(json!({"who": "b"})),
                CheckpointMetadata::new(0, CheckpointSource::Input),
            )
            .await
            .unwrap();

        assert_eq!(saver.thread_count().await, 2);
        let tuple = saver.get_tuple(&config("a")).await.unwrap().unwrap();
        assert_eq!(tuple.checkpoint.channel_values["who"], "a");
    }

    #[tokio::test]
    async fn test_missing_thread_returns_none() {
        let saver = InMemorySaver::new();
        assert!(saver.get_tuple(&config("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_thread_id_is_error() {
        let saver = InMemorySaver::new();
        let err = saver.get_tuple(&CheckpointConfig::new()).await.unwrap_err();
        assert!(matches!(err, CheckpointError::MissingThreadId));
    }

    #[tokio::test]
    async fn test_delete_thread_and_clear() {
        let saver = InMemorySaver::new();
        saver
            .put(
                &config("a"),
                Checkpoint::new(json!({})),
                CheckpointMetadata::new(0, CheckpointSource::Input),
            )
            .await
            .unwrap();

        saver.delete_thread("a").await.unwrap();
        assert_eq!(saver.checkpoint_count().await, 0);

        saver
            .put(
                &config("b"),
                Checkpoint::new(json!({})),
                CheckpointMetadata::new(0, CheckpointSource::Input),
            )
            .await
            .unwrap();
        saver.clear().await;
        assert_eq!(saver.thread_count().await, 0);
    }
}

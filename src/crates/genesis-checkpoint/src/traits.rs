//! Storage backend abstraction for checkpoints
//!
//! Implement [`CheckpointSaver`] to persist graph state in any store.
//! Every method takes a [`CheckpointConfig`] whose `thread_id` selects the
//! checkpoint history; `get_tuple` returns the latest snapshot for the
//! thread unless a specific `checkpoint_id` is requested.

use crate::checkpoint::{Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple};
use crate::error::Result;
use async_trait::async_trait;

/// Persistence backend for graph checkpoints.
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Store a checkpoint for the thread identified by `config`.
    ///
    /// Returns a config pointing at the stored checkpoint (thread id plus
    /// the new checkpoint id).
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig>;

    /// Load a checkpoint: the one named by `config.checkpoint_id`, or the
    /// latest for the thread when no id is given. `None` when the thread
    /// has no history.
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>>;

    /// All checkpoints for a thread, oldest first.
    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointTuple>>;

    /// Drop a thread's entire checkpoint history.
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;
}

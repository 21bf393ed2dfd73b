//! Core checkpoint data structures
//!
//! A [`Checkpoint`] captures the complete graph state at a point in time
//! together with the node that is waiting for input, if any. A
//! [`CheckpointConfig`] identifies a checkpoint: the thread id selects the
//! history, an optional checkpoint id selects a specific snapshot (latest
//! otherwise), and the free-form `configurable` map carries run-scoped
//! values such as the message id that the executor uses for output paths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Snapshot of graph state at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique checkpoint identifier.
    pub id: String,

    /// Creation timestamp.
    pub ts: DateTime<Utc>,

    /// Complete graph state as a JSON object.
    pub channel_values: Value,

    /// Node waiting for resume input, when the run is suspended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_node: Option<String>,
}

impl Checkpoint {
    /// Create a checkpoint for the given state with a fresh id.
    pub fn new(channel_values: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            channel_values,
            pending_node: None,
        }
    }

    /// Mark the checkpoint as suspended at `node`.
    pub fn with_pending_node(mut self, node: impl Into<String>) -> Self {
        self.pending_node = Some(node.into());
        self
    }
}

/// Identifies a checkpoint and carries run-scoped configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Thread (conversation) identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    /// Specific checkpoint to load; latest for the thread when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,

    /// Run-scoped values (e.g. `message_id`) visible to nodes.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub configurable: HashMap<String, Value>,
}

impl CheckpointConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    pub fn with_configurable(mut self, key: impl Into<String>, value: Value) -> Self {
        self.configurable.insert(key.into(), value);
        self
    }

    /// Thread id or an error-friendly accessor for savers.
    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }
}

/// Where a checkpoint came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Initial state before the first node ran.
    Input,
    /// Produced by the normal node loop.
    Loop,
    /// Produced while resuming from an interrupt.
    Resume,
}

/// Metadata stored alongside each checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Step counter within the thread (-1 for the input snapshot).
    pub step: i64,

    /// Origin of this checkpoint.
    pub source: CheckpointSource,
}

impl CheckpointMetadata {
    pub fn new(step: i64, source: CheckpointSource) -> Self {
        Self { step, source }
    }
}

/// A checkpoint together with its identifying config and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointTuple {
    pub config: CheckpointConfig,
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
}

//! Streaming events emitted during graph execution
//!
//! A graph run produces a single ordered stream of [`StreamChunk`]s over a
//! bounded channel. Which event kinds are produced is selected by the
//! [`StreamMode`] set passed to `CompiledGraph::stream`:
//!
//! - `Updates` — per-node state deltas
//! - `Messages` — LLM token chunks forwarded by nodes
//! - `Custom`  — application events (tool stdout lines, reasoning)
//! - `Values`  — the full state after each node
//!
//! Nodes receive a [`StreamWriter`] through their context and emit through
//! it; the writer drops events whose mode is not enabled, so a caller that
//! only wants `Updates` pays nothing for token chunks. Error events always
//! pass the filter.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Event categories a caller can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Full state after each node.
    Values,
    /// Node output deltas.
    Updates,
    /// LLM token chunks.
    Messages,
    /// Application-defined events.
    Custom,
}

/// Events emitted during graph execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum StreamEvent {
    /// Complete graph state after a node ran.
    Values { state: Value },

    /// Patch produced by one node.
    Updates { node: String, update: Value },

    /// Token-level chunk forwarded from an LLM call inside a node.
    MessageChunk {
        node: String,
        chunk: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },

    /// Application-defined payload (tool stdout, reasoning capture).
    Custom { data: Value },

    /// The run failed; terminal.
    Error { message: String },
}

impl StreamEvent {
    pub fn message_chunk(node: impl Into<String>, chunk: impl Into<String>) -> Self {
        Self::MessageChunk {
            node: node.into(),
            chunk: chunk.into(),
            metadata: None,
        }
    }

    pub fn custom(data: Value) -> Self {
        Self::Custom { data }
    }

    /// The mode that gates this event. Errors are not gated.
    pub fn mode(&self) -> Option<StreamMode> {
        match self {
            Self::Values { .. } => Some(StreamMode::Values),
            Self::Updates { .. } => Some(StreamMode::Updates),
            Self::MessageChunk { .. } => Some(StreamMode::Messages),
            Self::Custom { .. } => Some(StreamMode::Custom),
            Self::Error { .. } => None,
        }
    }
}

/// An event plus the mode it was emitted under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub mode: Option<StreamMode>,
    pub event: StreamEvent,
}

/// Handle nodes use to emit events into the run's stream.
///
/// Cloneable; all clones feed the same channel. Emission applies the
/// mode filter first, so disabled event kinds cost nothing downstream.
#[derive(Clone)]
pub struct StreamWriter {
    tx: mpsc::Sender<StreamChunk>,
    modes: Arc<HashSet<StreamMode>>,
}

impl StreamWriter {
    /// Create a writer/receiver pair for the given modes.
    pub fn channel(
        modes: Vec<StreamMode>,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<StreamChunk>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let writer = Self {
            tx,
            modes: Arc::new(modes.into_iter().collect()),
        };
        (writer, rx)
    }

    /// Whether a mode is enabled for this run.
    pub fn wants(&self, mode: StreamMode) -> bool {
        self.modes.contains(&mode)
    }

    /// Whether the consuming side has gone away. Producers use this to
    /// abort work whose results nobody will see.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Emit an event, waiting if the channel is full. Events whose mode
    /// is disabled are dropped; a closed channel (consumer gone) is also
    /// treated as a drop so producers never error on cancellation.
    pub async fn emit(&self, event: StreamEvent) {
        let mode = event.mode();
        if let Some(mode) = mode {
            if !self.modes.contains(&mode) {
                return;
            }
        }
        let _ = self.tx.send(StreamChunk { mode, event }).await;
    }

    /// Emit a custom event.
    pub async fn custom(&self, data: Value) {
        self.emit(StreamEvent::Custom { data }).await;
    }
}

//! Error types for graph construction and execution

use crate::state::StateError;
use thiserror::Error;

/// Errors raised while building, validating or executing a graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Graph structure is invalid (missing nodes, dangling edges, ...).
    #[error("Graph validation failed: {0}")]
    Validation(String),

    /// A node's closure returned an error; the run is aborted.
    #[error("Node '{node}' failed: {error}")]
    NodeExecution { node: String, error: String },

    /// General execution failure outside any single node.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Resume was requested but the thread has no suspended run.
    #[error("No pending interrupt for thread '{0}'")]
    NoPendingInterrupt(String),

    /// State reducer failure while merging a node patch.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Checkpoint persistence failure.
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] genesis_checkpoint::CheckpointError),

    /// JSON (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failure reported by an LLM provider.
    #[error("LLM error: {0}")]
    Llm(String),
}

pub type Result<T> = std::result::Result<T, GraphError>;

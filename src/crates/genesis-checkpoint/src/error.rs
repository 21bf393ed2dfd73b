//! Error types for checkpoint operations

use thiserror::Error;

/// Errors that can occur while persisting or loading checkpoints.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The config did not carry a thread id, so the checkpoint cannot be keyed.
    #[error("Missing thread_id in checkpoint config")]
    MissingThreadId,

    /// No checkpoint exists for the requested thread or checkpoint id.
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// Checkpoint (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific storage failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

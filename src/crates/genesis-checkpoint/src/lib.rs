//! Checkpoint persistence for Genesis graph runs
//!
//! A checkpoint is a snapshot of a graph's state after a node has run,
//! keyed by the conversation thread id. Checkpoints are what make
//! interrupt/resume possible: when a run pauses at a feedback node, the
//! frozen state plus the pending node name are persisted here, and a later
//! resume call re-enters the graph from that snapshot.
//!
//! The [`CheckpointSaver`] trait abstracts the storage backend. The crate
//! ships [`InMemorySaver`], which keeps one checkpoint history per thread
//! in a `tokio::sync::RwLock`-guarded map; database-backed savers can be
//! plugged in by implementing the same trait.

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod traits;

pub use checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSource, CheckpointTuple,
};
pub use error::{CheckpointError, Result};
pub use memory::InMemorySaver;
pub use traits::CheckpointSaver;

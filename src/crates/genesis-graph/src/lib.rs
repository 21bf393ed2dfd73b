//! Genesis graph runtime
//!
//! A small state-graph execution engine: nodes are async closures over a
//! JSON state object, edges are direct or data-driven (a router closure
//! reads the state and names the next node), and state patches returned by
//! nodes are merged through a [`state::StateSchema`] of per-field reducers.
//!
//! The compiled graph executes nodes strictly sequentially per thread,
//! checkpoints the full state after every node through a
//! [`genesis_checkpoint::CheckpointSaver`], and streams execution events
//! (node updates, LLM token chunks, custom tool events) over a bounded
//! channel. A node may return an interrupt instead of a patch; the run
//! then suspends with the state frozen and can be re-entered later with
//! [`command::Command::resume`].
//!
//! The crate also hosts the conversation [`messages`] types and the
//! [`llm::ChatModel`] trait that providers implement, so that application
//! crates depend on one definition of both.

pub mod command;
pub mod error;
pub mod graph;
pub mod interrupt;
pub mod llm;
pub mod messages;
pub mod state;
pub mod stream;

pub use command::Command;
pub use error::{GraphError, Result};
pub use graph::{
    CompiledGraph, NodeContext, NodeOutput, RunConfig, StateGraph, END, START,
};
pub use interrupt::{Interrupt, INTERRUPT_KEY};
pub use messages::{add_messages, messages_from_value, Message, MessageRole};
pub use stream::{StreamChunk, StreamEvent, StreamMode, StreamWriter};

//! Genesis — conversational task orchestrator
//!
//! One HTTP message request becomes a streamed run of an agent graph:
//! the request is matched against stored precedents, classified, planned
//! into a typed tool pipeline, executed with each tool in its own child
//! process, and finalized into a user-facing response — with every
//! intermediate event (state deltas, LLM tokens, subprocess stdout)
//! streamed back as newline-delimited JSON.
//!
//! Crate layout:
//!
//! - [`state`] — the conversation state threaded through the graph
//! - [`agents`] — structured-output LLM agents behind each graph node
//! - [`orchestrator`] — graph assembly and run/resume entry points
//! - [`executor`] — process-isolated pipeline execution
//! - [`repo`] — repository traits + in-memory implementations
//! - [`stream`] — the NDJSON streaming boundary
//! - [`api`] — the axum HTTP surface

pub mod agents;
pub mod api;
pub mod config;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod path;
pub mod repo;
pub mod state;
pub mod stream;

pub use config::GenesisConfig;
pub use error::{OrchestratorError, Result};
pub use orchestrator::Orchestrator;
pub use state::ConversationState;

//! LLM agents behind the graph nodes
//!
//! Each LLM-facing node (precedent, classify, route, finalize) is backed
//! by a structured-output agent: a YAML prompt template, a JSON schema
//! for the expected reply, token streaming through the graph's stream
//! writer, and defensive parsing with typed fallbacks.

pub mod base;
pub mod classifier;
pub mod finalizer;
pub mod precedent;
pub mod router;

pub use base::{AgentReply, PromptTemplate, StructuredAgent};
pub use classifier::{ClassificationResponse, Classifier};
pub use finalizer::{FinalizationResponse, Finalizer};
pub use precedent::{PrecedentAgent, PrecedentResponse};
pub use router::{Router, RoutingResponse};

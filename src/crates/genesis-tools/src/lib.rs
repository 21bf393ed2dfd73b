//! Tool registry and path generation for Genesis
//!
//! Tools are plain Python functions marked with a `@pathtool` decorator
//! that declares a typed contract: a primary input parameter, an output
//! (the return value or a key of a returned mapping), additional required
//! inputs and defaults. This crate discovers those declarations by
//! **parsing the source files** — no tool module is ever imported or
//! executed at registration time, so heavy native dependencies stay out
//! of the server process until a tool actually runs in its own child
//! process.
//!
//! On top of the registry sits the [`generator::PathGenerator`]: given a
//! starting [`types::WorkflowType`] and a target type, it enumerates
//! every ordered tool sequence whose declared input/output types chain
//! from start to target.

pub mod error;
pub mod generator;
pub mod metadata;
pub mod parse;
pub mod registry;
pub mod types;

pub use error::{RegistryError, Result};
pub use generator::{PathGenerator, DEFAULT_MAX_DEPTH};
pub use metadata::{ModuleRef, ToolMetadata};
pub use registry::{NativeTool, ToolBinding, ToolRegistry};
pub use types::{ParamType, WorkflowType};

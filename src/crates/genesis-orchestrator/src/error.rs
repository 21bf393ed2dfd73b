//! Orchestrator error taxonomy

use thiserror::Error;

/// Errors surfaced by the orchestrator and its executor.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A tool declaration was malformed; fatal at startup.
    #[error("Registry error: {0}")]
    Registry(#[from] genesis_tools::RegistryError),

    /// Graph construction or execution failure.
    #[error("Graph error: {0}")]
    Graph(#[from] genesis_graph::GraphError),

    /// No candidate pipeline connects the input type to the target type.
    #[error("No path found from {input} to {target}")]
    PathNotFound { input: String, target: String },

    /// A child process exited non-zero, timed out, or could not start.
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    /// A `${step.output}` reference points at a missing state-store key.
    #[error("Unresolved reference '{reference}' for tool '{tool}'")]
    Resolution { tool: String, reference: String },

    /// A required parameter has no value, default, or fallback.
    #[error("Tool '{tool}' is missing required input '{param}'")]
    MissingInput { tool: String, param: String },

    /// Upstream LLM call failed.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Best-effort persistence failed; logged, never aborts a stream.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Invalid(String),
}

impl From<OrchestratorError> for genesis_graph::GraphError {
    fn from(error: OrchestratorError) -> Self {
        match error {
            OrchestratorError::Graph(inner) => inner,
            other => genesis_graph::GraphError::Execution(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

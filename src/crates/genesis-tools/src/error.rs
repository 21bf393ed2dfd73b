//! Registry and path-generation errors

use std::path::PathBuf;
use thiserror::Error;

/// Fatal problems with tool declarations or registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two tools were registered under the same name.
    #[error("Duplicate tool name '{0}'")]
    DuplicateTool(String),

    /// The declared input key is not a parameter of the function.
    #[error("Tool '{tool}': input key '{input_key}' is not a parameter")]
    InputKeyNotAParameter { tool: String, input_key: String },

    /// The primary input parameter has no annotation, or its annotation
    /// does not resolve to a workflow type.
    #[error("Tool '{tool}': parameter '{param}' must be annotated with a workflow type")]
    InputTypeNotWorkflow { tool: String, param: String },

    /// The output type could not be resolved to a workflow type.
    #[error("Tool '{tool}': output '{output_key}' must resolve to a workflow type")]
    OutputTypeNotWorkflow { tool: String, output_key: String },

    /// `output` names a mapping key but no `output_key_types` entry
    /// declares its type.
    #[error("Tool '{tool}': output key '{output_key}' requires an output_key_types entry")]
    MissingOutputKeyType { tool: String, output_key: String },

    /// A `requires` entry does not match any function parameter.
    #[error("Tool '{tool}': required input '{param}' is not a parameter")]
    RequiredInputNotAParameter { tool: String, param: String },

    /// A `requires` entry's type disagrees with the parameter annotation.
    #[error("Tool '{tool}': required input '{param}' type mismatch ({declared} vs {annotated})")]
    RequiredInputTypeMismatch {
        tool: String,
        param: String,
        declared: String,
        annotated: String,
    },

    /// The tool is registered but has neither a native binding nor a
    /// module reference to execute.
    #[error("Tool '{0}' has no executable binding")]
    NoBinding(String),

    /// The requested tool is not in the registry.
    #[error("Tool '{0}' is not registered")]
    UnknownTool(String),

    /// A source file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A decorated function could not be parsed.
    #[error("Parse error in {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, RegistryError>;

//! Tool metadata
//!
//! [`ToolMetadata`] is the registry's view of one tool: its typed
//! contract plus a [`ModuleRef`] telling the executor how to invoke it.
//! Invariants are enforced at registration, not at use: the input key is
//! a real parameter annotated with a workflow tag, the output resolves to
//! a workflow tag, and every `requires` entry names an annotated
//! parameter of matching type.

use crate::error::{RegistryError, Result};
use crate::types::{ParamType, WorkflowType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Output key meaning "the function's return value".
pub const RETURN_KEY: &str = "return";

/// How the executor locates the tool's code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRef {
    /// Source file the declaration was found in.
    pub file: PathBuf,

    /// Dotted module path importable from the project root.
    pub module: String,

    /// Function name inside the module.
    pub function: String,
}

/// Declaration of one registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,

    pub description: String,

    /// The parameter whose type drives path chaining. Always first in
    /// `input_params`.
    pub input_key: String,

    /// `"return"` or a key of the returned mapping.
    pub output_key: String,

    /// Ordered parameter names, `input_key` first.
    pub input_params: Vec<String>,

    /// Output names; `["return"]` or explicit keys.
    pub output_params: Vec<String>,

    /// Parameter name (and `"return"`) to resolved type.
    pub param_types: BTreeMap<String, ParamType>,

    /// Additional inputs that must be satisfied for the tool to run.
    pub required_inputs: BTreeMap<String, ParamType>,

    /// Parameter defaults recovered from the signature; a null default
    /// is legitimate and kept as `Value::Null`.
    pub default_params: BTreeMap<String, Value>,

    /// Invocation target; absent only for native test bindings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<ModuleRef>,
}

impl ToolMetadata {
    /// Workflow tag consumed by the tool's primary input.
    ///
    /// Panics are avoided by registration-time validation; on a
    /// hand-built unvalidated value this returns `None`.
    pub fn input_type(&self) -> Option<WorkflowType> {
        self.param_types.get(&self.input_key)?.as_workflow()
    }

    /// Workflow tag produced by the tool's primary output.
    pub fn output_type(&self) -> Option<WorkflowType> {
        self.param_types.get(&self.output_key)?.as_workflow()
    }

    /// The key earlier steps' references use: `name.output_key`.
    pub fn output_state_key(&self) -> String {
        format!("{}.{}", self.name, self.output_key)
    }

    /// Whether a parameter is declared with a non-serializable client
    /// type.
    pub fn is_model_param(&self, param: &str) -> bool {
        self.param_types
            .get(param)
            .map(|t| !t.is_serializable())
            .unwrap_or(false)
    }

    /// Enforce the declaration invariants. Called by the registry before
    /// a tool is accepted.
    pub fn validate(&self) -> Result<()> {
        if !self.input_params.contains(&self.input_key) {
            return Err(RegistryError::InputKeyNotAParameter {
                tool: self.name.clone(),
                input_key: self.input_key.clone(),
            });
        }

        if self.input_type().is_none() {
            return Err(RegistryError::InputTypeNotWorkflow {
                tool: self.name.clone(),
                param: self.input_key.clone(),
            });
        }

        if self.output_params.is_empty() || self.output_key.trim().is_empty() {
            return Err(RegistryError::OutputTypeNotWorkflow {
                tool: self.name.clone(),
                output_key: self.output_key.clone(),
            });
        }

        if self.output_type().is_none() {
            return Err(RegistryError::OutputTypeNotWorkflow {
                tool: self.name.clone(),
                output_key: self.output_key.clone(),
            });
        }

        for (param, declared) in &self.required_inputs {
            if !self.input_params.contains(param) {
                return Err(RegistryError::RequiredInputNotAParameter {
                    tool: self.name.clone(),
                    param: param.clone(),
                });
            }
            match self.param_types.get(param) {
                Some(annotated) if annotated == declared => {}
                Some(annotated) => {
                    return Err(RegistryError::RequiredInputTypeMismatch {
                        tool: self.name.clone(),
                        param: param.clone(),
                        declared: declared.symbol().to_string(),
                        annotated: annotated.symbol().to_string(),
                    });
                }
                None => {
                    return Err(RegistryError::RequiredInputTypeMismatch {
                        tool: self.name.clone(),
                        param: param.clone(),
                        declared: declared.symbol().to_string(),
                        annotated: "unannotated".to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tool(name: &str, input: WorkflowType, output: WorkflowType) -> ToolMetadata {
        let mut param_types = BTreeMap::new();
        param_types.insert("input_path".to_string(), ParamType::Workflow(input));
        param_types.insert(RETURN_KEY.to_string(), ParamType::Workflow(output));
        ToolMetadata {
            name: name.to_string(),
            description: format!("Execute {name}"),
            input_key: "input_path".to_string(),
            output_key: RETURN_KEY.to_string(),
            input_params: vec!["input_path".to_string()],
            output_params: vec![RETURN_KEY.to_string()],
            param_types,
            required_inputs: BTreeMap::new(),
            default_params: BTreeMap::new(),
            module: None,
        }
    }

    #[test]
    fn test_valid_tool_passes() {
        let tool = sample_tool("ocr", WorkflowType::ImageFile, WorkflowType::StructuredData);
        tool.validate().unwrap();
        assert_eq!(tool.input_type(), Some(WorkflowType::ImageFile));
        assert_eq!(tool.output_type(), Some(WorkflowType::StructuredData));
        assert_eq!(tool.output_state_key(), "ocr.return");
    }

    #[test]
    fn test_input_key_must_be_parameter() {
        let mut tool = sample_tool("t", WorkflowType::Text, WorkflowType::Text);
        tool.input_key = "ghost".to_string();
        assert!(matches!(
            tool.validate(),
            Err(RegistryError::InputKeyNotAParameter { .. })
        ));
    }

    #[test]
    fn test_input_type_must_be_workflow() {
        let mut tool = sample_tool("t", WorkflowType::Text, WorkflowType::Text);
        tool.param_types
            .insert("input_path".to_string(), ParamType::Str);
        assert!(matches!(
            tool.validate(),
            Err(RegistryError::InputTypeNotWorkflow { .. })
        ));
    }

    #[test]
    fn test_requires_must_name_parameter() {
        let mut tool = sample_tool("t", WorkflowType::Text, WorkflowType::Text);
        tool.required_inputs.insert(
            "missing".to_string(),
            ParamType::Workflow(WorkflowType::ImageFile),
        );
        assert!(matches!(
            tool.validate(),
            Err(RegistryError::RequiredInputNotAParameter { .. })
        ));
    }

    #[test]
    fn test_requires_type_mismatch() {
        let mut tool = sample_tool("t", WorkflowType::Text, WorkflowType::Text);
        tool.input_params.push("mask".to_string());
        tool.param_types.insert(
            "mask".to_string(),
            ParamType::Workflow(WorkflowType::ImageFile),
        );
        tool.required_inputs.insert(
            "mask".to_string(),
            ParamType::Workflow(WorkflowType::StructuredData),
        );
        assert!(matches!(
            tool.validate(),
            Err(RegistryError::RequiredInputTypeMismatch { .. })
        ));
    }
}

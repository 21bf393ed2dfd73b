//! Pipeline step models
//!
//! [`SimplePath`] is the router LLM's shorthand (tool name plus the
//! parameter values it chose); [`PathStep`] is the fully expanded form
//! the executor runs, built from registry metadata with defaults merged
//! in. Parameter values may reference an earlier step's output with the
//! `${stepName.outputKey}` syntax.

use genesis_tools::{ParamType, ToolMetadata, WorkflowType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Sentinel parameter value meaning "the orchestrator's language model".
/// Tools receiving it reconstruct their own client when isolated.
pub const LLM_SENTINEL: &str = "llm";

/// One step as the router LLM expresses it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimplePath {
    pub name: String,
    #[serde(default)]
    pub param_values: Map<String, Value>,
}

/// One fully expanded step of a chosen pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathStep {
    pub name: String,
    pub description: String,
    pub input_params: Vec<String>,
    pub output_params: Vec<String>,
    pub param_values: Map<String, Value>,
    pub param_types: BTreeMap<String, ParamType>,
    #[serde(default)]
    pub default_params: BTreeMap<String, Value>,
}

impl PathStep {
    /// Expand a [`SimplePath`] entry against its registry metadata.
    /// Provided values win; parameters that are missing or explicitly
    /// null fall back to their declared defaults.
    pub fn from_metadata(meta: &ToolMetadata, provided: Map<String, Value>) -> Self {
        let mut param_values = provided;
        for (key, default) in &meta.default_params {
            let needs_default = match param_values.get(key) {
                None => true,
                Some(Value::Null) => true,
                Some(_) => false,
            };
            if needs_default {
                param_values.insert(key.clone(), default.clone());
            }
        }

        Self {
            name: meta.name.clone(),
            description: meta.description.clone(),
            input_params: meta.input_params.clone(),
            output_params: meta.output_params.clone(),
            param_values,
            param_types: meta.param_types.clone(),
            default_params: meta.default_params.clone(),
        }
    }

    /// Primary output key (`return` or a mapping key).
    pub fn output_key(&self) -> &str {
        self.output_params
            .first()
            .map(String::as_str)
            .unwrap_or("return")
    }

    /// State-store key this step's primary output lands under.
    pub fn output_state_key(&self) -> String {
        format!("{}.{}", self.name, self.output_key())
    }

    /// Workflow tag of the primary output, when declared.
    pub fn primary_output_type(&self) -> Option<WorkflowType> {
        self.param_types.get(self.output_key())?.as_workflow()
    }

    /// Whether a parameter is declared with a non-serializable client
    /// type, or currently holds the LLM sentinel.
    pub fn is_model_param(&self, param: &str) -> bool {
        if self
            .param_values
            .get(param)
            .and_then(|v| v.as_str())
            .map(|s| s == LLM_SENTINEL)
            .unwrap_or(false)
        {
            return true;
        }
        self.param_types
            .get(param)
            .map(|t| !t.is_serializable())
            .unwrap_or(false)
    }
}

/// Decode a `${stepName.outputKey}` reference, if `value` is one.
pub fn parse_reference(value: &Value) -> Option<(String, String)> {
    let raw = value.as_str()?;
    let inner = raw.strip_prefix("${")?.strip_suffix('}')?;
    let (step, key) = inner.split_once('.')?;
    if step.is_empty() || key.is_empty() {
        return None;
    }
    Some((step.to_string(), key.to_string()))
}

/// Render a reference to a step's primary output.
pub fn reference_to(step: &PathStep) -> String {
    format!("${{{}}}", step.output_state_key())
}

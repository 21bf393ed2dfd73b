//! State schema and reducer system
//!
//! Graph state is a JSON object. When a node returns a patch, each field
//! of the patch is merged into the state by that field's [`Reducer`]:
//! simple values are replaced, message lists are appended, and object
//! fields can be deep-merged. A [`StateSchema`] maps field names to
//! reducers and applies patches field-wise; fields without an explicit
//! reducer fall back to the schema default (overwrite when unset).

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during state operations.
#[derive(Debug, Error)]
pub enum StateError {
    /// State structure is invalid (e.g. not an object when expected).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Reducer encountered incompatible types or failed to merge.
    #[error("Reducer error: {0}")]
    ReducerError(String),
}

pub type Result<T> = std::result::Result<T, StateError>;

/// Merge strategy for a single state field.
pub trait Reducer: Send + Sync {
    /// Combine the current value (possibly null) with an update.
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value>;

    /// Human-readable reducer name.
    fn name(&self) -> &str;
}

/// Last write wins. The default behavior for unconfigured fields.
#[derive(Debug, Clone)]
pub struct OverwriteReducer;

impl Reducer for OverwriteReducer {
    fn reduce(&self, _current: &Value, update: &Value) -> Result<Value> {
        Ok(update.clone())
    }

    fn name(&self) -> &str {
        "overwrite"
    }
}

/// Concatenates arrays; a scalar update is appended as a single element.
///
/// Used for message history and other append-only logs.
#[derive(Debug, Clone)]
pub struct AppendReducer;

impl Reducer for AppendReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value> {
        match (current, update) {
            (Value::Array(curr), Value::Array(upd)) => {
                let mut result = curr.clone();
                result.extend_from_slice(upd);
                Ok(Value::Array(result))
            }
            (Value::Null, Value::Array(upd)) => Ok(Value::Array(upd.clone())),
            (Value::Array(curr), single) => {
                let mut result = curr.clone();
                result.push(single.clone());
                Ok(Value::Array(result))
            }
            (Value::Null, single) => Ok(Value::Array(vec![single.clone()])),
            _ => Err(StateError::ReducerError(
                "AppendReducer requires array values".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        "append"
    }
}

/// Shallow object merge; update keys win on conflict.
#[derive(Debug, Clone)]
pub struct MergeReducer;

impl Reducer for MergeReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value> {
        match (current, update) {
            (Value::Object(curr), Value::Object(upd)) => {
                let mut result = curr.clone();
                for (key, value) in upd {
                    result.insert(key.clone(), value.clone());
                }
                Ok(Value::Object(result))
            }
            (Value::Null, Value::Object(upd)) => Ok(Value::Object(upd.clone())),
            _ => Err(StateError::ReducerError(
                "MergeReducer requires object values".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        "merge"
    }
}

/// Field-to-reducer mapping applied to every node patch.
#[derive(Default)]
pub struct StateSchema {
    fields: HashMap<String, Box<dyn Reducer>>,
    default_reducer: Option<Box<dyn Reducer>>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reducer for a field.
    pub fn add_field(&mut self, field_name: impl Into<String>, reducer: Box<dyn Reducer>) {
        self.fields.insert(field_name.into(), reducer);
    }

    /// Reducer used for fields without an explicit entry.
    pub fn with_default_reducer(mut self, reducer: Box<dyn Reducer>) -> Self {
        self.default_reducer = Some(reducer);
        self
    }

    fn get_reducer(&self, field_name: &str) -> Option<&dyn Reducer> {
        self.fields
            .get(field_name)
            .map(|r| r.as_ref())
            .or_else(|| self.default_reducer.as_ref().map(|r| r.as_ref()))
    }

    /// Merge `update` into `state` in place, field by field.
    pub fn apply(&self, state: &mut Value, update: &Value) -> Result<()> {
        let state_obj = state
            .as_object_mut()
            .ok_or_else(|| StateError::InvalidState("State must be an object".to_string()))?;

        let update_obj = update
            .as_object()
            .ok_or_else(|| StateError::InvalidState("Update must be an object".to_string()))?;

        for (field_name, update_value) in update_obj {
            let current_value = state_obj.get(field_name).cloned().unwrap_or(Value::Null);

            let reduced_value = if let Some(reducer) = self.get_reducer(field_name) {
                reducer.reduce(&current_value, update_value)?
            } else {
                update_value.clone()
            };

            state_obj.insert(field_name.clone(), reduced_value);
        }

        Ok(())
    }

    /// Registered field names.
    pub fn fields(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_overwrite_reducer() {
        let reducer = OverwriteReducer;
        let result = reducer
            .reduce(&json!({"old": "value"}), &json!({"new": "value"}))
            .unwrap();
        assert_eq!(result, json!({"new": "value"}));
    }

    #[test]
    fn test_append_reducer_arrays() {
        let reducer = AppendReducer;
        let result = reducer.reduce(&json!([1, 2, 3]), &json!([4, 5])).unwrap();
        assert_eq!(result, json!([1, 2, 3, 4, 5]));
    }

    #[test]
    fn test_append_reducer_null_current() {
        let reducer = AppendReducer;
        let result = reducer.reduce(&Value::Null, &json!([1, 2])).unwrap();
        assert_eq!(result, json!([1, 2]));
    }

    #[test]
    fn test_append_reducer_single_value() {
        let reducer = AppendReducer;
        let result = reducer.reduce(&json!([1, 2]), &json!(3)).unwrap();
        assert_eq!(result, json!([1, 2, 3]));
    }

    #[test]
    fn test_append_reducer_rejects_scalars() {
        let reducer = AppendReducer;
        assert!(reducer.reduce(&json!(42), &json!("x")).is_err());
    }

    #[test]
    fn test_merge_reducer() {
        let reducer = MergeReducer;
        let result = reducer
            .reduce(&json!({"a": 1, "b": 2}), &json!({"b": 3, "c": 4}))
            .unwrap();
        assert_eq!(result, json!({"a": 1, "b": 3, "c": 4}));
    }

    #[test]
    fn test_schema_apply_mixed_fields() {
        let mut schema = StateSchema::new();
        schema.add_field("messages", Box::new(AppendReducer));

        let mut state = json!({
            "messages": ["hello"],
            "node": "classify"
        });
        schema
            .apply(
                &mut state,
                &json!({"messages": ["world"], "node": "route"}),
            )
            .unwrap();

        assert_eq!(state["messages"], json!(["hello", "world"]));
        assert_eq!(state["node"], "route");
    }

    #[test]
    fn test_schema_default_reducer() {
        let schema = StateSchema::new().with_default_reducer(Box::new(OverwriteReducer));

        let mut state = json!({"field": "old"});
        schema
            .apply(&mut state, &json!({"field": "new", "other": "value"}))
            .unwrap();

        assert_eq!(state["field"], "new");
        assert_eq!(state["other"], "value");
    }

    #[test]
    fn test_schema_rejects_non_object_state() {
        let schema = StateSchema::new();
        let mut state = json!("not an object");
        assert!(schema.apply(&mut state, &json!({})).is_err());
    }
}

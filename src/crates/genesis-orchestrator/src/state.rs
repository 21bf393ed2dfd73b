//! Conversation state
//!
//! [`ConversationState`] is the record threaded through the agent graph.
//! It lives in graph state as plain JSON (so checkpointing and the
//! update stream stay schema-free) and is decoded back into the typed
//! struct at node entry. The schema reduces `messages` with id-aware
//! append semantics; every other field is overwritten by the node that
//! produced it.

use crate::executor::ExecutionResult;
use crate::path::PathStep;
use crate::repo::Precedent;
use genesis_graph::state::{OverwriteReducer, Reducer, StateError, StateSchema};
use genesis_graph::{add_messages, messages_from_value, Message};
use genesis_tools::{ToolMetadata, WorkflowType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Graph node names.
pub mod nodes {
    pub const PRECEDENT: &str = "precedent";
    pub const CLASSIFY: &str = "classify";
    pub const FIND_PATH: &str = "find_path";
    pub const ROUTE: &str = "route";
    pub const EXECUTE: &str = "execute";
    pub const FINALIZE: &str = "finalize";
    pub const WAITING_FOR_FEEDBACK: &str = "waiting_for_feedback";
    /// Router-visible terminal marker.
    pub const END: &str = "END";
}

/// The working state of one conversation turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    // Control flow
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub node: String,
    #[serde(default)]
    pub next_node: String,

    // Classifier outputs
    #[serde(default)]
    pub objective: String,
    #[serde(default)]
    pub input_type: Option<WorkflowType>,
    /// Intended intermediate/final output types; the last entry is the
    /// current path-search target. Partial re-plans append to it.
    #[serde(default)]
    pub type_savepoint: Vec<WorkflowType>,
    #[serde(default)]
    pub is_complex: bool,
    #[serde(default)]
    pub classify_reasoning: String,
    #[serde(default)]
    pub classify_clarification: Option<String>,

    // Precedent outputs
    #[serde(default)]
    pub precedents_found: Vec<Precedent>,
    #[serde(default)]
    pub precedent_reasoning: String,
    #[serde(default)]
    pub precedent_clarification: Option<String>,
    #[serde(default)]
    pub chosen_precedent: Option<String>,

    // Path outputs
    #[serde(default)]
    pub tool_metadata: Vec<ToolMetadata>,
    #[serde(default)]
    pub all_paths: Vec<Vec<ToolMetadata>>,

    // Router outputs
    #[serde(default)]
    pub chosen_path: Vec<PathStep>,
    #[serde(default)]
    pub route_reasoning: String,
    #[serde(default)]
    pub route_clarification: Option<String>,
    /// True when the chosen path was cut short at an unresolvable step
    /// and the remainder must be re-planned.
    #[serde(default)]
    pub is_partial: bool,

    // Executor outputs
    #[serde(default)]
    pub execution_results: Option<ExecutionResult>,
    #[serde(default)]
    pub execution_instance: Option<String>,
    #[serde(default)]
    pub execution_output_path: Option<String>,

    // Finalizer outputs
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub finalize_reasoning: String,
    #[serde(default)]
    pub summary: Option<String>,

    #[serde(default)]
    pub error_details: Option<String>,
}

impl ConversationState {
    /// Fresh state for a new run, seeded with the conversation so far.
    pub fn initial(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Decode from the graph's JSON state. Unknown fields are ignored so
    /// interrupt markers and future additions do not break nodes.
    pub fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// The current path-search target type.
    pub fn current_target(&self) -> Option<WorkflowType> {
        self.type_savepoint.last().copied()
    }

    /// Concatenated human-message text, used as the precedent query.
    pub fn user_query(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == genesis_graph::MessageRole::Human)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Reducer schema for the graph: `messages` merges with id-aware
    /// append, everything else is replaced by the writing node.
    pub fn schema() -> StateSchema {
        let mut schema = StateSchema::new();
        schema.add_field("messages", Box::new(MessagesReducer));
        schema.with_default_reducer(Box::new(OverwriteReducer))
    }
}

/// Append semantics for the `messages` field: entries with a known id
/// replace the original, new entries append. Nodes therefore return only
/// the messages they added (or edited).
pub struct MessagesReducer;

impl Reducer for MessagesReducer {
    fn reduce(&self, current: &Value, update: &Value) -> Result<Value, StateError> {
        let mut messages = messages_from_value(current);
        add_messages(&mut messages, messages_from_value(update));
        serde_json::to_value(messages)
            .map_err(|e| StateError::ReducerError(e.to_string()))
    }

    fn name(&self) -> &str {
        "messages"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_initial_state_roundtrip() {
        let state = ConversationState::initial(vec![Message::human("translate my image")]);
        let value = state.to_value();
        let decoded = ConversationState::from_value(&value);
        assert_eq!(decoded.messages.len(), 1);
        assert!(!decoded.is_complex);
        assert!(decoded.input_type.is_none());
    }

    #[test]
    fn test_from_value_tolerates_interrupt_marker() {
        let value = json!({
            "messages": [],
            "node": "classify",
            "__interrupt__": ["which file?"]
        });
        let state = ConversationState::from_value(&value);
        assert_eq!(state.node, "classify");
    }

    #[test]
    fn test_current_target_is_last_savepoint() {
        let mut state = ConversationState::default();
        state.type_savepoint = vec![WorkflowType::StructuredData, WorkflowType::ImageFile];
        assert_eq!(state.current_target(), Some(WorkflowType::ImageFile));
    }

    #[test]
    fn test_user_query_joins_human_messages() {
        let state = ConversationState::initial(vec![
            Message::human("first"),
            Message::assistant("ignored"),
            Message::human("second"),
        ]);
        assert_eq!(state.user_query(), "first second");
    }

    #[test]
    fn test_schema_appends_messages_and_overwrites_rest() {
        let schema = ConversationState::schema();
        let mut state = ConversationState::initial(vec![Message::human("hi")]).to_value();

        let patch = json!({
            "messages": [{"role": "assistant", "content": "hello", "id": "a1"}],
            "node": "finalize"
        });
        schema.apply(&mut state, &patch).unwrap();

        assert_eq!(state["messages"].as_array().unwrap().len(), 2);
        assert_eq!(state["node"], "finalize");

        // Same-id message replaces rather than duplicates.
        let patch = json!({
            "messages": [{"role": "assistant", "content": "edited", "id": "a1"}]
        });
        schema.apply(&mut state, &patch).unwrap();
        let messages = state["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1]["content"], "edited");
    }
}

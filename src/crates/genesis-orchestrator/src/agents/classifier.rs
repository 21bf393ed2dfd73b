//! Classification agent
//!
//! Produces the objective, input/output workflow types and complexity
//! verdict that drive the rest of the graph. Trivial text-only tasks
//! bypass tool planning entirely and go straight to finalize.

use crate::agents::base::StructuredAgent;
use crate::error::Result;
use crate::state::{nodes, ConversationState};
use genesis_graph::llm::ChatModel;
use genesis_graph::StreamWriter;
use genesis_tools::WorkflowType;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Structured reply expected from the classification model.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassificationResponse {
    pub objective: String,
    pub input_type: WorkflowType,
    pub output_type: WorkflowType,
    pub is_complex: bool,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub clarification_question: Option<String>,
}

pub struct Classifier {
    agent: StructuredAgent,
}

impl Classifier {
    pub fn new(llm: Arc<dyn ChatModel>) -> Result<Self> {
        let schema = json!({
            "type": "object",
            "properties": {
                "objective": {"type": "string"},
                "input_type": {"type": "string"},
                "output_type": {"type": "string"},
                "is_complex": {"type": "boolean"},
                "reasoning": {"type": "string"},
                "clarification_question": {"type": ["string", "null"]}
            },
            "required": ["objective", "input_type", "output_type", "is_complex", "reasoning"]
        });
        Ok(Self {
            agent: StructuredAgent::new(
                llm,
                nodes::CLASSIFY,
                include_str!("prompts/classifier.yaml"),
                "classification",
                schema,
            )?,
        })
    }

    /// Run classification and return the node's state patch.
    pub async fn classify(
        &self,
        state: &ConversationState,
        writer: &StreamWriter,
    ) -> Result<Value> {
        let reply = self
            .agent
            .invoke(&state.messages, &HashMap::new(), writer)
            .await?;

        // Unparseable output degrades to a trivial text task rather than
        // aborting the run.
        let classification =
            reply
                .parse::<ClassificationResponse>()
                .unwrap_or(ClassificationResponse {
                    objective: "free_text".to_string(),
                    input_type: WorkflowType::Text,
                    output_type: WorkflowType::Text,
                    is_complex: false,
                    reasoning: String::new(),
                    clarification_question: None,
                });

        let next_node = if classification.clarification_question.is_some() {
            nodes::WAITING_FOR_FEEDBACK
        } else if classification.is_complex {
            nodes::FIND_PATH
        } else {
            nodes::FINALIZE
        };

        info!(
            next_node,
            input = %classification.input_type,
            output = %classification.output_type,
            complex = classification.is_complex,
            "classifier decision"
        );

        Ok(json!({
            "node": nodes::CLASSIFY,
            "next_node": next_node,
            "objective": classification.objective,
            "input_type": classification.input_type,
            "type_savepoint": [classification.output_type],
            "is_complex": classification.is_complex,
            "classify_reasoning": classification.reasoning,
            "classify_clarification": classification.clarification_question,
            "messages": [reply.message],
        }))
    }
}

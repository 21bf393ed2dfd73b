//! Finalization agent
//!
//! Composes the user-facing response from the conversation and the
//! execution results. A complete, non-partial run ends the graph; an
//! incomplete one loops back to `find_path` to continue the pipeline.

use crate::agents::base::StructuredAgent;
use crate::error::Result;
use crate::executor::ExecutionResult;
use crate::state::{nodes, ConversationState};
use genesis_graph::llm::ChatModel;
use genesis_graph::StreamWriter;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Structured reply expected from the finalization model.
#[derive(Debug, Clone, Deserialize)]
pub struct FinalizationResponse {
    pub is_complete: bool,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub summary: Option<String>,
}

pub struct Finalizer {
    agent: StructuredAgent,
}

impl Finalizer {
    pub fn new(llm: Arc<dyn ChatModel>) -> Result<Self> {
        let schema = json!({
            "type": "object",
            "properties": {
                "is_complete": {"type": "boolean"},
                "response": {"type": "string"},
                "reasoning": {"type": "string"},
                "summary": {"type": ["string", "null"]}
            },
            "required": ["is_complete", "response", "reasoning"]
        });
        Ok(Self {
            agent: StructuredAgent::new(
                llm,
                nodes::FINALIZE,
                include_str!("prompts/finalizer.yaml"),
                "finalization",
                schema,
            )?,
        })
    }

    /// Run finalization and return the node's state patch.
    pub async fn finalize(
        &self,
        state: &ConversationState,
        writer: &StreamWriter,
    ) -> Result<Value> {
        let mut vars = HashMap::new();
        vars.insert(
            "execution_summary",
            format_execution_results(state.execution_results.as_ref()),
        );

        let reply = self.agent.invoke(&state.messages, &vars, writer).await?;

        // A reply we cannot parse is still a reply; show it verbatim.
        let finalization = reply
            .parse::<FinalizationResponse>()
            .unwrap_or(FinalizationResponse {
                is_complete: true,
                response: reply.raw.clone(),
                reasoning: String::new(),
                summary: None,
            });

        let next_node = if finalization.is_complete && !state.is_partial {
            nodes::END
        } else {
            nodes::FIND_PATH
        };

        info!(
            next_node,
            complete = finalization.is_complete,
            partial = state.is_partial,
            "finalizer decision"
        );

        Ok(json!({
            "node": nodes::FINALIZE,
            "next_node": next_node,
            "is_complete": finalization.is_complete,
            "response": finalization.response,
            "finalize_reasoning": finalization.reasoning,
            "summary": finalization.summary,
            "messages": [reply.message],
        }))
    }
}

/// Readable execution summary for the prompt.
fn format_execution_results(results: Option<&ExecutionResult>) -> String {
    let Some(results) = results else {
        return "No tools were executed for this request.".to_string();
    };

    let mut lines = vec![
        "EXECUTION RESULTS:".to_string(),
        format!("Success: {}", results.success),
        format!("Execution Path: {}", results.execution_path.join(" -> ")),
        format!("Steps Completed: {}", results.steps_completed),
    ];
    if let Some(output) = &results.final_output {
        lines.push(format!("Final Output: {output}"));
    }
    if let Some(error) = &results.error_info {
        lines.push(format!(
            "Error Info: tool '{}' failed with {}: {}",
            error.tool_name, error.error_type, error.error
        ));
    }
    lines.join("\n")
}

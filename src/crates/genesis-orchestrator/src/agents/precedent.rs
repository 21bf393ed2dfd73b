//! Precedent-selection agent
//!
//! Looks at vector-store candidates retrieved for the user's query and
//! either adopts one — copying its classification and tool metadata into
//! state so the graph can skip classify and find_path — or rejects them
//! all and falls through to classification.

use crate::agents::base::StructuredAgent;
use crate::error::Result;
use crate::repo::Precedent;
use crate::state::{nodes, ConversationState};
use genesis_graph::llm::ChatModel;
use genesis_graph::StreamWriter;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Structured reply expected from the precedent model.
#[derive(Debug, Clone, Deserialize)]
pub struct PrecedentResponse {
    /// 0-based index of the chosen candidate, or -1 for no match.
    pub index: i64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub clarification_question: Option<String>,
}

pub struct PrecedentAgent {
    agent: StructuredAgent,
}

impl PrecedentAgent {
    pub fn new(llm: Arc<dyn ChatModel>) -> Result<Self> {
        let schema = json!({
            "type": "object",
            "properties": {
                "index": {"type": "integer"},
                "reasoning": {"type": "string"},
                "clarification_question": {"type": ["string", "null"]}
            },
            "required": ["index", "reasoning"]
        });
        Ok(Self {
            agent: StructuredAgent::new(
                llm,
                nodes::PRECEDENT,
                include_str!("prompts/precedent.yaml"),
                "precedent_selection",
                schema,
            )?,
        })
    }

    /// Analyze retrieved candidates and return the node's state patch.
    pub async fn analyze(
        &self,
        state: &ConversationState,
        precedents: &[Precedent],
        writer: &StreamWriter,
    ) -> Result<Value> {
        let mut vars = HashMap::new();
        vars.insert("precedents", format_candidates(precedents));

        let reply = self.agent.invoke(&state.messages, &vars, writer).await?;

        let selection = reply.parse::<PrecedentResponse>().unwrap_or(PrecedentResponse {
            index: -1,
            reasoning: reply.raw.clone(),
            clarification_question: None,
        });

        let chosen = usize::try_from(selection.index)
            .ok()
            .and_then(|i| precedents.get(i));

        let next_node = if selection.clarification_question.is_some() {
            nodes::WAITING_FOR_FEEDBACK
        } else if chosen.is_some() {
            nodes::ROUTE
        } else {
            nodes::CLASSIFY
        };

        info!(
            next_node,
            index = selection.index,
            candidates = precedents.len(),
            "precedent decision"
        );

        let mut patch = json!({
            "node": nodes::PRECEDENT,
            "next_node": next_node,
            "precedent_reasoning": selection.reasoning,
            "precedent_clarification": selection.clarification_question,
            "messages": [reply.message],
        });

        if let Some(precedent) = chosen {
            // Adopt the precedent wholesale: classification data plus
            // the stored pipeline as both candidate path and router
            // metadata. classify and find_path are skipped.
            patch["chosen_precedent"] = json!(precedent.uid);
            patch["objective"] = json!(precedent.objective);
            patch["input_type"] = json!(precedent.input_type);
            patch["type_savepoint"] = json!(precedent.type_savepoint);
            patch["is_complex"] = json!(precedent.is_complex);
            patch["all_paths"] = json!([precedent.path]);
            patch["tool_metadata"] = json!(precedent.path);
        }

        Ok(patch)
    }
}

/// Compact candidate listing for the prompt.
fn format_candidates(precedents: &[Precedent]) -> String {
    if precedents.is_empty() {
        return "(none)".to_string();
    }
    precedents
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let tools: Vec<&str> = p.path.iter().map(|t| t.name.as_str()).collect();
            format!(
                "{i}. objective: {} | tools: [{}] | similarity: {:.3}",
                p.objective,
                tools.join(" -> "),
                p.score
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

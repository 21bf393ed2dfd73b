//! Routing agent
//!
//! Turns the candidate pipelines from `find_path` into one concrete,
//! parameterized plan. The model answers in [`SimplePath`] shorthand;
//! the router expands each entry against the registry metadata in state,
//! merging declared defaults, and then audits the plan: a step whose
//! provided value is empty with no matching default cannot run, so the
//! plan is cut short there (`is_partial`), the executed prefix's output
//! type is pushed onto the savepoint stack, and control goes back to
//! `find_path` to plan the remainder.

use crate::agents::base::StructuredAgent;
use crate::error::Result;
use crate::path::{PathStep, SimplePath};
use crate::state::{nodes, ConversationState};
use genesis_graph::llm::ChatModel;
use genesis_graph::{Message, MessageRole, StreamWriter};
use genesis_tools::{ToolMetadata, WorkflowType};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Structured reply expected from the routing model.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingResponse {
    #[serde(default)]
    pub path: Vec<SimplePath>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub clarification_question: Option<String>,
}

/// Outcome of the plan audit.
struct RouteDecision {
    next_node: &'static str,
    chosen_path: Vec<PathStep>,
    is_partial: bool,
    savepoint_extension: Option<WorkflowType>,
}

pub struct Router {
    agent: StructuredAgent,
}

impl Router {
    pub fn new(llm: Arc<dyn ChatModel>) -> Result<Self> {
        let schema = json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string"},
                            "param_values": {"type": "object"}
                        },
                        "required": ["name"]
                    }
                },
                "reasoning": {"type": "string"},
                "clarification_question": {"type": ["string", "null"]}
            },
            "required": ["path", "reasoning"]
        });
        Ok(Self {
            agent: StructuredAgent::new(
                llm,
                nodes::ROUTE,
                include_str!("prompts/router.yaml"),
                "routing",
                schema,
            )?,
        })
    }

    /// Run routing and return the node's state patch.
    pub async fn route(&self, state: &ConversationState, writer: &StreamWriter) -> Result<Value> {
        let available_files = extract_files_from_messages(&state.messages);

        let classification = json!({
            "objective": state.objective,
            "input_type": state.input_type,
            "output_type": state.current_target(),
            "is_complex": state.is_complex,
            "reasoning": if state.classify_reasoning.is_empty() {
                &state.precedent_reasoning
            } else {
                &state.classify_reasoning
            },
        });

        let path_names: Vec<Vec<&str>> = state
            .all_paths
            .iter()
            .map(|path| path.iter().map(|t| t.name.as_str()).collect())
            .collect();

        let mut vars = HashMap::new();
        vars.insert(
            "classification",
            serde_json::to_string_pretty(&classification)?,
        );
        vars.insert("available_files", format!("{available_files:?}"));
        vars.insert(
            "tool_descriptions",
            serde_json::to_string_pretty(&state.tool_metadata)?,
        );
        vars.insert("available_paths", serde_json::to_string(&path_names)?);
        vars.insert(
            "precedent_examples",
            format_precedent_examples(state),
        );

        let reply = self.agent.invoke(&state.messages, &vars, writer).await?;

        let routing = parse_routing(reply.parse_value()).unwrap_or_else(|| {
            warn!("routing model returned an invalid response; asking for clarification");
            RoutingResponse {
                path: Vec::new(),
                reasoning:
                    "Routing model returned an invalid or empty response; requesting clarification."
                        .to_string(),
                clarification_question: Some(
                    "Please confirm the desired steps and tools so I can proceed.".to_string(),
                ),
            }
        });

        let mut type_savepoint = state.type_savepoint.clone();
        let decision = decide(&routing, &state.tool_metadata);
        if let Some(extension) = decision.savepoint_extension {
            type_savepoint.push(extension);
        }

        info!(
            next_node = decision.next_node,
            steps = routing.path.len(),
            partial = decision.is_partial,
            "router decision"
        );

        Ok(json!({
            "node": nodes::ROUTE,
            "next_node": decision.next_node,
            "chosen_path": decision.chosen_path,
            "is_partial": decision.is_partial,
            "route_reasoning": routing.reasoning,
            "route_clarification": routing.clarification_question,
            "type_savepoint": type_savepoint,
            "messages": [reply.message],
        }))
    }
}

/// Normalize and decode the model's routing JSON: `tool_name` keys
/// become `name`, and non-object `param_values` are dropped.
fn parse_routing(value: Option<Value>) -> Option<RoutingResponse> {
    let mut value = value?;
    if let Some(steps) = value.get_mut("path").and_then(Value::as_array_mut) {
        for step in steps {
            let Some(obj) = step.as_object_mut() else { continue };
            if !obj.contains_key("name") {
                if let Some(name) = obj.remove("tool_name") {
                    obj.insert("name".to_string(), name);
                }
            }
            if let Some(pv) = obj.get("param_values") {
                if !pv.is_object() {
                    obj.remove("param_values");
                }
            }
        }
    }
    serde_json::from_value(value).ok()
}

/// Expand `simple[..end]` into full steps, skipping names the metadata
/// does not know.
fn expand_prefix(
    simple: &[SimplePath],
    tools_by_name: &HashMap<&str, &ToolMetadata>,
    end: usize,
) -> Vec<PathStep> {
    simple[..end.min(simple.len())]
        .iter()
        .filter_map(|step| {
            tools_by_name
                .get(step.name.as_str())
                .map(|meta| PathStep::from_metadata(meta, step.param_values.clone()))
        })
        .collect()
}

fn decide(routing: &RoutingResponse, tool_metadata: &[ToolMetadata]) -> RouteDecision {
    let tools_by_name: HashMap<&str, &ToolMetadata> = tool_metadata
        .iter()
        .map(|meta| (meta.name.as_str(), meta))
        .collect();

    // A clarification question always wins; keep whatever plan the model
    // had so the resumed run can build on it.
    if routing.clarification_question.is_some() {
        return RouteDecision {
            next_node: nodes::WAITING_FOR_FEEDBACK,
            chosen_path: expand_prefix(&routing.path, &tools_by_name, routing.path.len()),
            is_partial: false,
            savepoint_extension: None,
        };
    }

    for (index, step) in routing.path.iter().enumerate() {
        let meta = tools_by_name.get(step.name.as_str()).copied();
        let broken = match meta {
            None => true,
            Some(meta) => has_invalid_empty_values(&step.param_values, meta),
        };
        if !broken {
            continue;
        }

        // Cut the plan before the unresolvable step and re-plan from the
        // prefix's output type.
        let chosen_path = expand_prefix(&routing.path, &tools_by_name, index);
        if chosen_path.is_empty() {
            return RouteDecision {
                next_node: nodes::WAITING_FOR_FEEDBACK,
                chosen_path,
                is_partial: true,
                savepoint_extension: None,
            };
        }
        let savepoint_extension = chosen_path.last().and_then(PathStep::primary_output_type);
        return RouteDecision {
            next_node: nodes::FIND_PATH,
            chosen_path,
            is_partial: true,
            savepoint_extension,
        };
    }

    RouteDecision {
        next_node: nodes::EXECUTE,
        chosen_path: expand_prefix(&routing.path, &tools_by_name, routing.path.len()),
        is_partial: false,
        savepoint_extension: None,
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// An empty provided value is invalid unless the tool declares an equal
/// default (a null default legitimately accepts null).
fn has_invalid_empty_values(param_values: &Map<String, Value>, meta: &ToolMetadata) -> bool {
    for (key, value) in param_values {
        if !is_empty_value(value) {
            continue;
        }
        match meta.default_params.get(key) {
            Some(default) if default == value => continue,
            Some(Value::Null) if value.is_null() => continue,
            _ => return true,
        }
    }
    false
}

/// File names mentioned as `<file>...</file>` tags in human messages,
/// deduplicated in order of first appearance.
pub fn extract_files_from_messages(messages: &[Message]) -> Vec<String> {
    let re = Regex::new(r"<file>(?:.*[/\\])?([^/\\<]+)</file>").expect("static regex");
    let mut files = Vec::new();
    for message in messages {
        if message.role != MessageRole::Human {
            continue;
        }
        for capture in re.captures_iter(&message.content) {
            let name = capture[1].to_string();
            if !files.contains(&name) {
                files.push(name);
            }
        }
    }
    files
}

/// Precedent router replies formatted as worked examples for the prompt.
fn format_precedent_examples(state: &ConversationState) -> String {
    let mut blocks = Vec::new();
    for (index, precedent) in state.precedents_found.iter().enumerate() {
        if precedent.router_format.is_null() {
            continue;
        }
        let Ok(example) = serde_json::to_string_pretty(&precedent.router_format) else {
            continue;
        };
        blocks.push(format!(
            "### Example {}: {}\n```json\n{}\n```",
            index + 1,
            precedent.objective,
            example
        ));
    }
    if blocks.is_empty() {
        String::new()
    } else {
        format!("Worked examples from similar past tasks:\n{}", blocks.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genesis_tools::ParamType;
    use std::collections::BTreeMap;

    fn meta(name: &str, input: WorkflowType, output: WorkflowType) -> ToolMetadata {
        let mut param_types = BTreeMap::new();
        param_types.insert("data".to_string(), ParamType::Workflow(input));
        param_types.insert("return".to_string(), ParamType::Workflow(output));
        ToolMetadata {
            name: name.to_string(),
            description: format!("Execute {name}"),
            input_key: "data".to_string(),
            output_key: "return".to_string(),
            input_params: vec!["data".to_string()],
            output_params: vec!["return".to_string()],
            param_types,
            required_inputs: BTreeMap::new(),
            default_params: BTreeMap::new(),
            module: None,
        }
    }

    fn simple(name: &str, values: Value) -> SimplePath {
        SimplePath {
            name: name.to_string(),
            param_values: values.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_extract_files_dedupes_and_strips_paths() {
        let messages = vec![
            Message::human("here\n<file>inputs/c1/photo.png</file>\n<file>photo.png</file>"),
            Message::assistant("<file>ignored.png</file>"),
            Message::human("<file>inputs/c1/doc.pdf</file>"),
        ];
        assert_eq!(
            extract_files_from_messages(&messages),
            vec!["photo.png".to_string(), "doc.pdf".to_string()]
        );
    }

    #[test]
    fn test_parse_routing_normalizes_tool_name_key() {
        let value = json!({
            "path": [{"tool_name": "image_ocr", "param_values": {"data": "p.png"}}],
            "reasoning": "one step is enough"
        });
        let routing = parse_routing(Some(value)).unwrap();
        assert_eq!(routing.path[0].name, "image_ocr");
        assert_eq!(routing.path[0].param_values["data"], "p.png");
    }

    #[test]
    fn test_decide_complete_plan_executes() {
        let tools = vec![
            meta("ocr", WorkflowType::ImageFile, WorkflowType::StructuredData),
            meta(
                "translate",
                WorkflowType::StructuredData,
                WorkflowType::StructuredData,
            ),
        ];
        let routing = RoutingResponse {
            path: vec![
                simple("ocr", json!({"data": "p.png"})),
                simple("translate", json!({"data": "${ocr.return}"})),
            ],
            reasoning: String::new(),
            clarification_question: None,
        };

        let decision = decide(&routing, &tools);
        assert_eq!(decision.next_node, nodes::EXECUTE);
        assert_eq!(decision.chosen_path.len(), 2);
        assert!(!decision.is_partial);
    }

    #[test]
    fn test_decide_partial_plan_replans_with_savepoint() {
        let tools = vec![
            meta("ocr", WorkflowType::ImageFile, WorkflowType::StructuredData),
            meta(
                "translate",
                WorkflowType::StructuredData,
                WorkflowType::StructuredData,
            ),
            meta("render", WorkflowType::StructuredData, WorkflowType::ImageFile),
        ];
        let routing = RoutingResponse {
            path: vec![
                simple("ocr", json!({"data": "p.png"})),
                // Empty value with no default: unresolvable.
                simple("translate", json!({"data": ""})),
                simple("render", json!({"data": "${translate.return}"})),
            ],
            reasoning: String::new(),
            clarification_question: None,
        };

        let decision = decide(&routing, &tools);
        assert_eq!(decision.next_node, nodes::FIND_PATH);
        assert!(decision.is_partial);
        assert_eq!(decision.chosen_path.len(), 1);
        assert_eq!(decision.chosen_path[0].name, "ocr");
        assert_eq!(
            decision.savepoint_extension,
            Some(WorkflowType::StructuredData)
        );
    }

    #[test]
    fn test_decide_partial_at_first_step_asks_user() {
        let tools = vec![meta(
            "ocr",
            WorkflowType::ImageFile,
            WorkflowType::StructuredData,
        )];
        let routing = RoutingResponse {
            path: vec![simple("ocr", json!({"data": null}))],
            reasoning: String::new(),
            clarification_question: None,
        };

        let decision = decide(&routing, &tools);
        assert_eq!(decision.next_node, nodes::WAITING_FOR_FEEDBACK);
        assert!(decision.is_partial);
        assert!(decision.chosen_path.is_empty());
    }

    #[test]
    fn test_decide_clarification_overrides() {
        let tools = vec![meta(
            "ocr",
            WorkflowType::ImageFile,
            WorkflowType::StructuredData,
        )];
        let routing = RoutingResponse {
            path: vec![simple("ocr", json!({"data": null}))],
            reasoning: String::new(),
            clarification_question: Some("Which image?".to_string()),
        };

        let decision = decide(&routing, &tools);
        assert_eq!(decision.next_node, nodes::WAITING_FOR_FEEDBACK);
        assert!(!decision.is_partial);
    }

    #[test]
    fn test_empty_value_matching_default_is_valid() {
        let mut tool = meta("translate", WorkflowType::Text, WorkflowType::Text);
        tool.default_params
            .insert("mask".to_string(), Value::Null);
        let mut values = Map::new();
        values.insert("mask".to_string(), Value::Null);
        assert!(!has_invalid_empty_values(&values, &tool));

        values.insert("other".to_string(), json!(""));
        assert!(has_invalid_empty_values(&values, &tool));
    }
}

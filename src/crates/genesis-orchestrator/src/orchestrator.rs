//! Graph assembly and run entry points
//!
//! Builds the fixed agent graph — precedent, classify, find_path, route,
//! execute, finalize, waiting_for_feedback — over the conversation state
//! schema, wires its data-driven edges, and exposes streaming run and
//! resume entry points keyed by conversation thread id.
//!
//! Transitions are data-driven: each node writes `next_node` into the
//! state and the edge router reads it. Two edges are fixed by design:
//! `execute` always hands off to `finalize`, and `find_path` hands off
//! to `route` except when no candidate path exists, in which case it
//! routes to `finalize` to report the dead end.

use crate::agents::{Classifier, Finalizer, PrecedentAgent, Router};
use crate::config::GenesisConfig;
use crate::error::Result;
use crate::executor::PathExecutor;
use crate::repo::VectorStore;
use crate::state::{nodes, ConversationState};
use genesis_checkpoint::CheckpointSaver;
use genesis_graph::llm::ChatModel;
use genesis_graph::{
    Command, Message, NodeOutput, RunConfig, StateGraph, StreamChunk, StreamMode, END, START,
};
use genesis_tools::{PathGenerator, ToolMetadata, ToolRegistry};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Stream modes every request subscribes to.
fn stream_modes() -> Vec<StreamMode> {
    vec![StreamMode::Updates, StreamMode::Messages, StreamMode::Custom]
}

/// The assembled agent graph plus everything its nodes capture.
pub struct Orchestrator {
    graph: genesis_graph::CompiledGraph,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn ChatModel>,
        registry: Arc<ToolRegistry>,
        vector_store: Arc<dyn VectorStore>,
        checkpointer: Arc<dyn CheckpointSaver>,
        config: GenesisConfig,
    ) -> Result<Self> {
        let classifier = Arc::new(Classifier::new(llm.clone())?);
        let precedent = Arc::new(PrecedentAgent::new(llm.clone())?);
        let router = Arc::new(Router::new(llm.clone())?);
        let finalizer = Arc::new(Finalizer::new(llm.clone())?);
        let executor = Arc::new(PathExecutor::new(config.clone(), registry.clone()));
        let generator = PathGenerator::new();

        info!(
            tools = registry.len(),
            isolation = %config.isolation_mode,
            "building orchestrator graph"
        );

        let mut graph = StateGraph::with_schema(ConversationState::schema());

        {
            let vector_store = vector_store.clone();
            let precedent = precedent.clone();
            graph.add_node(nodes::PRECEDENT, move |value, ctx| {
                let vector_store = vector_store.clone();
                let precedent = precedent.clone();
                Box::pin(async move {
                    let state = ConversationState::from_value(&value);
                    let query = state.user_query();

                    let candidates = if query.trim().is_empty() {
                        Vec::new()
                    } else {
                        match vector_store.search(&query, 3).await {
                            Ok(candidates) => candidates,
                            Err(error) => {
                                warn!(%error, "precedent search failed; continuing without");
                                Vec::new()
                            }
                        }
                    };

                    if candidates.is_empty() {
                        return Ok(NodeOutput::Update(json!({
                            "node": nodes::PRECEDENT,
                            "next_node": nodes::CLASSIFY,
                            "precedent_reasoning": "No precedents found to analyze",
                            "precedent_clarification": Value::Null,
                            "precedents_found": [],
                        })));
                    }

                    let mut patch = precedent.analyze(&state, &candidates, &ctx.writer).await?;
                    patch["precedents_found"] = json!(candidates);
                    Ok(NodeOutput::Update(patch))
                })
            });
        }

        {
            let classifier = classifier.clone();
            graph.add_node(nodes::CLASSIFY, move |value, ctx| {
                let classifier = classifier.clone();
                Box::pin(async move {
                    let state = ConversationState::from_value(&value);
                    let patch = classifier.classify(&state, &ctx.writer).await?;
                    Ok(NodeOutput::Update(patch))
                })
            });
        }

        {
            let registry = registry.clone();
            let generator = generator.clone();
            graph.add_node(nodes::FIND_PATH, move |value, _ctx| {
                let registry = registry.clone();
                let generator = generator.clone();
                Box::pin(async move {
                    let state = ConversationState::from_value(&value);
                    let Some(input) = state.input_type else {
                        return Err(genesis_graph::GraphError::Execution(
                            "find_path requires input_type to be set".to_string(),
                        ));
                    };
                    let Some(target) = state.current_target() else {
                        return Err(genesis_graph::GraphError::Execution(
                            "find_path requires a type savepoint".to_string(),
                        ));
                    };

                    let all_paths = generator.find_all_paths(&registry, input, target);
                    if all_paths.is_empty() {
                        // Not fatal: finalize reports the dead end to
                        // the user instead of aborting the run.
                        let error = crate::error::OrchestratorError::PathNotFound {
                            input: input.to_string(),
                            target: target.to_string(),
                        };
                        warn!(%error, "no candidate path; reporting to finalize");
                        return Ok(NodeOutput::Update(json!({
                            "node": nodes::FIND_PATH,
                            "next_node": nodes::FINALIZE,
                            "all_paths": [],
                            "tool_metadata": [],
                            "error_details": error.to_string(),
                        })));
                    }

                    // De-duplicated union of tools across all candidate
                    // paths, preserving first-seen order, for the
                    // router's prompt.
                    let mut unique: Vec<ToolMetadata> = Vec::new();
                    for path in &all_paths {
                        for tool in path {
                            if !unique.iter().any(|t| t.name == tool.name) {
                                unique.push(tool.clone());
                            }
                        }
                    }
                    info!(
                        paths = all_paths.len(),
                        tools = unique.len(),
                        "find_path enumerated candidates"
                    );

                    Ok(NodeOutput::Update(json!({
                        "node": nodes::FIND_PATH,
                        "next_node": nodes::ROUTE,
                        "all_paths": all_paths,
                        "tool_metadata": unique,
                    })))
                })
            });
        }

        {
            let router = router.clone();
            graph.add_node(nodes::ROUTE, move |value, ctx| {
                let router = router.clone();
                Box::pin(async move {
                    let state = ConversationState::from_value(&value);
                    let patch = router.route(&state, &ctx.writer).await?;
                    Ok(NodeOutput::Update(patch))
                })
            });
        }

        {
            let executor = executor.clone();
            graph.add_node(nodes::EXECUTE, move |value, ctx| {
                let executor = executor.clone();
                Box::pin(async move {
                    let state = ConversationState::from_value(&value);
                    let chat_id = ctx.config.thread_id.clone();
                    let message_id = ctx
                        .config
                        .get_str("message_id")
                        .unwrap_or("unknown")
                        .to_string();

                    let (results, instance) = executor
                        .execute_path(&state.chosen_path, &chat_id, &message_id, &ctx.writer)
                        .await?;

                    // The final artifact's directory, for the client.
                    let execution_output_path = results
                        .final_output
                        .as_ref()
                        .and_then(Value::as_str)
                        .map(Path::new)
                        .filter(|p| p.exists())
                        .and_then(Path::parent)
                        .map(|p| p.to_string_lossy().to_string());

                    Ok(NodeOutput::Update(json!({
                        "node": nodes::EXECUTE,
                        "next_node": nodes::FINALIZE,
                        "execution_results": results,
                        "execution_instance": instance,
                        "execution_output_path": execution_output_path,
                    })))
                })
            });
        }

        {
            let finalizer = finalizer.clone();
            graph.add_node(nodes::FINALIZE, move |value, ctx| {
                let finalizer = finalizer.clone();
                Box::pin(async move {
                    let state = ConversationState::from_value(&value);
                    let patch = finalizer.finalize(&state, &ctx.writer).await?;
                    Ok(NodeOutput::Update(patch))
                })
            });
        }

        graph.add_node(nodes::WAITING_FOR_FEEDBACK, move |value, ctx| {
            Box::pin(async move {
                let state = ConversationState::from_value(&value);
                let (question, return_node) = match state.node.as_str() {
                    nodes::CLASSIFY => (state.classify_clarification.clone(), nodes::CLASSIFY),
                    nodes::PRECEDENT => {
                        (state.precedent_clarification.clone(), nodes::PRECEDENT)
                    }
                    _ => (state.route_clarification.clone(), nodes::ROUTE),
                };

                match ctx.resume {
                    Some(feedback) => {
                        let text = feedback
                            .as_str()
                            .map(str::to_string)
                            .unwrap_or_else(|| feedback.to_string());
                        Ok(NodeOutput::Update(json!({
                            "node": nodes::WAITING_FOR_FEEDBACK,
                            "next_node": return_node,
                            "messages": [Message::human(text)],
                        })))
                    }
                    None => Ok(NodeOutput::Interrupt(json!(question.unwrap_or_else(
                        || "Please provide additional information:".to_string()
                    )))),
                }
            })
        });

        graph.add_edge(START, nodes::PRECEDENT);
        for node in [
            nodes::PRECEDENT,
            nodes::CLASSIFY,
            nodes::FIND_PATH,
            nodes::ROUTE,
            nodes::FINALIZE,
            nodes::WAITING_FOR_FEEDBACK,
        ] {
            graph.add_conditional_edge(node, |state: &Value| {
                state["next_node"].as_str().unwrap_or(END).to_string()
            });
        }
        graph.add_edge(nodes::EXECUTE, nodes::FINALIZE);

        let graph = graph.compile()?.with_checkpointer(checkpointer);
        Ok(Self { graph })
    }

    /// Build the message list for a run: history plus the new user turn.
    pub fn build_messages(user_input: Option<&str>, history: Vec<Message>) -> Vec<Message> {
        let mut messages = history;
        if let Some(input) = user_input {
            messages.push(Message::human(input));
        }
        messages
    }

    /// Start a streaming run for one message.
    pub async fn run_stream(
        &self,
        messages: Vec<Message>,
        config: RunConfig,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        let initial = ConversationState::initial(messages).to_value();
        info!(thread_id = %config.thread_id, "starting orchestrator run");
        Ok(self.graph.stream(initial, config, stream_modes()).await?)
    }

    /// Resume a suspended run, delivering `feedback` to the interrupted
    /// node.
    pub async fn resume_with_feedback(
        &self,
        feedback: &str,
        config: RunConfig,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        info!(thread_id = %config.thread_id, "resuming orchestrator run");
        Ok(self
            .graph
            .resume(Command::resume(feedback), config, stream_modes())
            .await?)
    }

    /// Latest checkpointed state for a thread.
    pub async fn get_state(&self, config: &RunConfig) -> Result<Option<Value>> {
        Ok(self.graph.get_state(config).await?)
    }
}

//! Graph construction and compiled execution
//!
//! [`StateGraph`] is the builder: register async node closures, connect
//! them with direct or conditional edges, then [`StateGraph::compile`]
//! into a [`CompiledGraph`]. Compilation validates the structure; the
//! compiled graph is cheap to clone and is driven through
//! [`CompiledGraph::invoke`], [`CompiledGraph::stream`] or
//! [`CompiledGraph::resume`].
//!
//! Execution is strictly sequential within one run: a node receives the
//! current state and a [`NodeContext`], returns either a state patch
//! (merged through the schema) or an interrupt (the run suspends), and
//! the edge logic picks the next node. With a checkpointer attached, the
//! full state is persisted after every node under the run's thread id,
//! which is what makes suspended runs resumable.

use crate::command::Command;
use crate::error::{GraphError, Result};
use crate::interrupt::Interrupt;
use crate::state::StateSchema;
use crate::stream::{StreamChunk, StreamEvent, StreamMode, StreamWriter};
use genesis_checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, CheckpointSource,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Virtual entry node; add an edge from here to the real first node.
pub const START: &str = "__start__";

/// Virtual terminal node. Conditional routers may also return the
/// literal string `"END"`.
pub const END: &str = "__end__";

pub type NodeId = String;

/// Per-run configuration threaded into every node.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Conversation thread id; keys the checkpoint history.
    pub thread_id: String,

    /// Run-scoped values (e.g. `message_id`) readable by nodes.
    pub configurable: HashMap<String, Value>,
}

impl RunConfig {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            configurable: HashMap::new(),
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.configurable.insert(key.into(), value);
        self
    }

    /// String-typed configurable lookup.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.configurable.get(key).and_then(|v| v.as_str())
    }

    fn checkpoint_config(&self) -> CheckpointConfig {
        let mut config = CheckpointConfig::new().with_thread_id(self.thread_id.clone());
        for (key, value) in &self.configurable {
            config = config.with_configurable(key.clone(), value.clone());
        }
        config
    }
}

/// Everything a node can reach besides the state itself.
#[derive(Clone)]
pub struct NodeContext {
    pub config: RunConfig,

    /// Emits stream events for this run.
    pub writer: StreamWriter,

    /// Present only when the run is being resumed into this node: the
    /// value the caller supplied with [`Command::resume`].
    pub resume: Option<Value>,
}

/// What a node produced.
#[derive(Debug, Clone)]
pub enum NodeOutput {
    /// State patch to merge through the schema.
    Update(Value),

    /// Suspend the run; the payload is surfaced to the caller.
    Interrupt(Value),
}

impl From<Value> for NodeOutput {
    fn from(value: Value) -> Self {
        Self::Update(value)
    }
}

pub type NodeFuture = Pin<Box<dyn Future<Output = Result<NodeOutput>> + Send>>;
pub type NodeFn = Arc<dyn Fn(Value, NodeContext) -> NodeFuture + Send + Sync>;
pub type EdgeRouter = Arc<dyn Fn(&Value) -> String + Send + Sync>;

enum Edge {
    Direct(NodeId),
    Conditional(EdgeRouter),
}

/// Mutable graph builder.
#[derive(Default)]
pub struct StateGraph {
    nodes: HashMap<NodeId, NodeFn>,
    edges: HashMap<NodeId, Edge>,
    schema: StateSchema,
}

impl StateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build with a state schema (reducers per field).
    pub fn with_schema(schema: StateSchema) -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            schema,
        }
    }

    /// Register a node. The closure receives the current state and the
    /// run context and returns a patch or an interrupt.
    pub fn add_node<F>(&mut self, id: impl Into<String>, f: F)
    where
        F: Fn(Value, NodeContext) -> NodeFuture + Send + Sync + 'static,
    {
        self.nodes.insert(id.into(), Arc::new(f));
    }

    /// Unconditional transition `from -> to`.
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.edges.insert(from.into(), Edge::Direct(to.into()));
    }

    /// Data-driven transition: the router reads the state after `from`
    /// ran and returns the next node name (or `"END"`).
    pub fn add_conditional_edge<F>(&mut self, from: impl Into<String>, router: F)
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        self.edges
            .insert(from.into(), Edge::Conditional(Arc::new(router)));
    }

    /// Validate structure: a START edge must exist, direct edges must
    /// point at registered nodes (or END), and edge sources must be
    /// registered nodes (or START).
    pub fn validate(&self) -> Result<()> {
        if !self.edges.contains_key(START) {
            return Err(GraphError::Validation(
                "Graph has no entry edge from START".to_string(),
            ));
        }
        for (from, edge) in &self.edges {
            if from != START && !self.nodes.contains_key(from) {
                return Err(GraphError::Validation(format!(
                    "Edge source '{from}' is not a registered node"
                )));
            }
            if let Edge::Direct(to) = edge {
                if !is_end(to) && !self.nodes.contains_key(to) {
                    return Err(GraphError::Validation(format!(
                        "Edge target '{to}' is not a registered node"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Validate and freeze into an executable graph.
    pub fn compile(self) -> Result<CompiledGraph> {
        self.validate()?;
        Ok(CompiledGraph {
            inner: Arc::new(GraphInner {
                nodes: self.nodes,
                edges: self.edges,
                schema: self.schema,
            }),
            checkpointer: None,
            stream_buffer: 256,
        })
    }
}

struct GraphInner {
    nodes: HashMap<NodeId, NodeFn>,
    edges: HashMap<NodeId, Edge>,
    schema: StateSchema,
}

fn is_end(node: &str) -> bool {
    node == END || node == "END"
}

/// Executable graph. Cloning is cheap; clones share structure and
/// checkpointer.
#[derive(Clone)]
pub struct CompiledGraph {
    inner: Arc<GraphInner>,
    checkpointer: Option<Arc<dyn CheckpointSaver>>,
    stream_buffer: usize,
}

impl CompiledGraph {
    /// Attach a checkpoint backend. Required for resume support.
    pub fn with_checkpointer(mut self, saver: Arc<dyn CheckpointSaver>) -> Self {
        self.checkpointer = Some(saver);
        self
    }

    /// Channel capacity for [`CompiledGraph::stream`].
    pub fn with_stream_buffer(mut self, buffer: usize) -> Self {
        self.stream_buffer = buffer.max(1);
        self
    }

    /// Run to completion (or first interrupt) and return the final state.
    pub async fn invoke(&self, input: Value, config: RunConfig) -> Result<Value> {
        let (writer, _rx) = StreamWriter::channel(vec![], 1);
        let start = self.entry_node(&input)?;
        self.clone()
            .run_loop(input, start, None, config, writer, -1, CheckpointSource::Loop)
            .await
    }

    /// Run the graph, streaming events with the given modes. The returned
    /// receiver yields events in causal order and closes when the run
    /// completes, suspends on an interrupt, or fails (after an error
    /// event).
    pub async fn stream(
        &self,
        input: Value,
        config: RunConfig,
        modes: Vec<StreamMode>,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        let (writer, rx) = StreamWriter::channel(modes, self.stream_buffer);
        let start = self.entry_node(&input)?;

        // Snapshot the initial state so a crash before the first node
        // still leaves the thread resumable from its input.
        self.put_checkpoint(&config, input.clone(), None, -1, CheckpointSource::Input)
            .await;

        let graph = self.clone();
        tokio::spawn(async move {
            let _ = graph
                .run_loop(
                    input,
                    start,
                    None,
                    config,
                    writer,
                    -1,
                    CheckpointSource::Loop,
                )
                .await;
        });

        Ok(rx)
    }

    /// Re-enter a suspended run. The checkpointed state is loaded, the
    /// command's update (if any) is applied, and execution restarts at
    /// the node that raised the interrupt with `command.resume` exposed
    /// through its context.
    pub async fn resume(
        &self,
        command: Command,
        config: RunConfig,
        modes: Vec<StreamMode>,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        let saver = self.checkpointer.as_ref().ok_or_else(|| {
            GraphError::Validation("resume requires a checkpointer".to_string())
        })?;

        let tuple = saver
            .get_tuple(&config.checkpoint_config())
            .await?
            .ok_or_else(|| GraphError::NoPendingInterrupt(config.thread_id.clone()))?;

        let pending = tuple
            .checkpoint
            .pending_node
            .clone()
            .ok_or_else(|| GraphError::NoPendingInterrupt(config.thread_id.clone()))?;

        let mut state = tuple.checkpoint.channel_values;
        if let Some(update) = &command.update {
            self.inner.schema.apply(&mut state, update)?;
        }

        let (writer, rx) = StreamWriter::channel(modes, self.stream_buffer);
        let step = tuple.metadata.step;
        let graph = self.clone();
        tokio::spawn(async move {
            let _ = graph
                .run_loop(
                    state,
                    pending,
                    command.resume,
                    config,
                    writer,
                    step,
                    CheckpointSource::Resume,
                )
                .await;
        });

        Ok(rx)
    }

    /// Latest checkpointed state for a thread, if any.
    pub async fn get_state(&self, config: &RunConfig) -> Result<Option<Value>> {
        match &self.checkpointer {
            Some(saver) => Ok(saver
                .get_tuple(&config.checkpoint_config())
                .await?
                .map(|t| t.checkpoint.channel_values)),
            None => Ok(None),
        }
    }

    fn entry_node(&self, state: &Value) -> Result<NodeId> {
        self.next_node(START, state)
    }

    fn next_node(&self, from: &str, state: &Value) -> Result<NodeId> {
        match self.inner.edges.get(from) {
            Some(Edge::Direct(to)) => Ok(to.clone()),
            Some(Edge::Conditional(router)) => {
                let target = router(state);
                if target.is_empty() {
                    return Err(GraphError::Execution(format!(
                        "Conditional edge from '{from}' returned an empty target"
                    )));
                }
                Ok(target)
            }
            // A node without an outgoing edge terminates the run.
            None => Ok(END.to_string()),
        }
    }

    async fn put_checkpoint(
        &self,
        config: &RunConfig,
        state: Value,
        pending_node: Option<String>,
        step: i64,
        source: CheckpointSource,
    ) {
        let Some(saver) = &self.checkpointer else {
            return;
        };
        let mut checkpoint = Checkpoint::new(state);
        if let Some(node) = pending_node {
            checkpoint = checkpoint.with_pending_node(node);
        }
        if let Err(error) = saver
            .put(
                &config.checkpoint_config(),
                checkpoint,
                CheckpointMetadata::new(step, source),
            )
            .await
        {
            warn!(%error, thread_id = %config.thread_id, "checkpoint write failed");
        }
    }

    async fn run_loop(
        self,
        mut state: Value,
        start: NodeId,
        mut resume: Option<Value>,
        config: RunConfig,
        writer: StreamWriter,
        mut step: i64,
        source: CheckpointSource,
    ) -> Result<Value> {
        let mut current = start;

        loop {
            if is_end(&current) {
                return Ok(state);
            }

            // A dropped consumer cancels the run; the last checkpoint
            // keeps the thread resumable.
            if writer.is_closed() {
                warn!(thread_id = %config.thread_id, "stream consumer gone; aborting run");
                return Ok(state);
            }

            let node_fn = match self.inner.nodes.get(&current) {
                Some(f) => f.clone(),
                None => {
                    let error = GraphError::Execution(format!("Unknown node '{current}'"));
                    writer
                        .emit(StreamEvent::Error {
                            message: error.to_string(),
                        })
                        .await;
                    return Err(error);
                }
            };

            let ctx = NodeContext {
                config: config.clone(),
                writer: writer.clone(),
                resume: resume.take(),
            };

            debug!(node = %current, thread_id = %config.thread_id, "entering node");

            let output = match node_fn(state.clone(), ctx).await {
                Ok(output) => output,
                Err(error) => {
                    let error = GraphError::NodeExecution {
                        node: current.clone(),
                        error: error.to_string(),
                    };
                    // Preserve the failure on the thread's checkpoint so
                    // callers can inspect it after the stream closes.
                    let _ = self
                        .inner
                        .schema
                        .apply(&mut state, &json!({ "error_details": error.to_string() }));
                    step += 1;
                    self.put_checkpoint(&config, state.clone(), None, step, source)
                        .await;
                    writer
                        .emit(StreamEvent::Error {
                            message: error.to_string(),
                        })
                        .await;
                    return Err(error);
                }
            };

            match output {
                NodeOutput::Update(patch) => {
                    self.inner.schema.apply(&mut state, &patch)?;
                    writer
                        .emit(StreamEvent::Updates {
                            node: current.clone(),
                            update: patch,
                        })
                        .await;
                    if writer.wants(StreamMode::Values) {
                        writer
                            .emit(StreamEvent::Values {
                                state: state.clone(),
                            })
                            .await;
                    }

                    step += 1;
                    self.put_checkpoint(&config, state.clone(), None, step, source)
                        .await;

                    current = self.next_node(&current, &state)?;
                }
                NodeOutput::Interrupt(value) => {
                    let interrupt = Interrupt::new(current.clone(), value);
                    writer
                        .emit(StreamEvent::Updates {
                            node: current.clone(),
                            update: interrupt.patch(),
                        })
                        .await;

                    step += 1;
                    self.put_checkpoint(&config, state.clone(), Some(current), step, source)
                        .await;
                    return Ok(state);
                }
            }
        }
    }
}

//! Pipeline execution engine
//!
//! Runs a chosen path step by step: one fresh workspace per pipeline
//! holds the file-backed state store shared by every step, each step
//! runs either through a native binding (tests, `none` isolation) or in
//! its own child process, and execution stops at the first failure. The
//! caller receives an [`ExecutionResult`] recording what ran, the final
//! output and any error.

pub mod isolation;
pub mod state_store;

use crate::config::GenesisConfig;
use crate::error::{OrchestratorError, Result};
use crate::path::{parse_reference, PathStep};
use genesis_graph::StreamWriter;
use genesis_tools::{ToolBinding, ToolRegistry};
use isolation::{run_tool_isolated, should_isolate, IsolationMode, ParamSource, StepContext};
use serde_json::{json, Map, Value};
use state_store::StateStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identity of the failing step inside an [`ExecutionResult`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorInfo {
    pub error: String,
    pub error_type: String,
    pub tool_name: String,
    pub execution_failed: bool,
}

/// Outcome of one pipeline execution.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExecutionResult {
    /// True iff `error_info` is absent.
    pub success: bool,

    /// Names of steps attempted, in order (the failing step included).
    pub execution_path: Vec<String>,

    pub steps_completed: usize,

    /// Primary output of the last completed step.
    pub final_output: Option<Value>,

    pub error_info: Option<ErrorInfo>,

    pub metadata: Map<String, Value>,
}

/// Executes chosen paths with per-tool process isolation.
#[derive(Clone)]
pub struct PathExecutor {
    config: GenesisConfig,
    registry: Arc<ToolRegistry>,
}

impl PathExecutor {
    pub fn new(config: GenesisConfig, registry: Arc<ToolRegistry>) -> Self {
        Self { config, registry }
    }

    /// Execute `chosen_path` sequentially. Never returns `Err` for a
    /// tool failure — that is captured in the result — only for
    /// workspace setup problems.
    ///
    /// Returns the result together with the workspace identifier.
    pub async fn execute_path(
        &self,
        chosen_path: &[PathStep],
        chat_id: &str,
        message_id: &str,
        writer: &StreamWriter,
    ) -> Result<(ExecutionResult, Option<String>)> {
        if chosen_path.is_empty() {
            return Ok((
                ExecutionResult {
                    success: true,
                    execution_path: Vec::new(),
                    steps_completed: 0,
                    final_output: None,
                    error_info: None,
                    metadata: Map::new(),
                },
                None,
            ));
        }

        // One workspace per pipeline run; all steps share its state
        // store so cross-step references resolve.
        let tmp_root = self.config.tmp_root();
        std::fs::create_dir_all(&tmp_root)?;
        let instance = format!(
            "genesis_{}_{}",
            chosen_path[0].name,
            Uuid::new_v4().simple()
        );
        let workspace = tmp_root.join(&instance);
        let store = StateStore::new(&workspace)?;

        let mut execution_path = Vec::new();
        let mut final_output: Option<Value> = None;
        let mut error_info: Option<ErrorInfo> = None;

        for (index, step) in chosen_path.iter().enumerate() {
            let step_index = index + 1;
            execution_path.push(step.name.clone());

            let ctx = StepContext {
                chat_id,
                message_id,
                step_index,
                config: &self.config,
                writer,
            };

            writer
                .custom(json!({
                    "tool_name": step.name,
                    "workspace_dir": workspace.to_string_lossy(),
                    "status": "start",
                }))
                .await;

            match self.run_step(step, &ctx, &workspace, &store).await {
                Ok(value) => {
                    self.write_preview(&ctx, step, &value);
                    final_output = Some(value);
                    writer
                        .custom(json!({
                            "tool_name": step.name,
                            "workspace_dir": workspace.to_string_lossy(),
                            "status": "end",
                        }))
                        .await;
                }
                Err(error) => {
                    warn!(tool = %step.name, %error, "step failed; aborting pipeline");
                    writer
                        .custom(json!({
                            "tool_name": step.name,
                            "stdout": format!("ERROR: {error}"),
                        }))
                        .await;
                    error_info = Some(ErrorInfo {
                        error: error.to_string(),
                        error_type: error_kind(&error),
                        tool_name: step.name.clone(),
                        execution_failed: true,
                    });
                    break;
                }
            }
        }

        if !self.config.keep_workspace {
            if let Err(error) = std::fs::remove_dir_all(&workspace) {
                warn!(%error, workspace = %workspace.display(), "workspace cleanup failed");
            }
        }

        let steps_completed = execution_path.len();
        let mut metadata = Map::new();
        metadata.insert("execution_method".to_string(), json!("direct_loop"));
        metadata.insert(
            "isolation_mode".to_string(),
            json!(self.config.isolation_mode.to_string()),
        );

        let result = ExecutionResult {
            success: error_info.is_none(),
            execution_path,
            steps_completed,
            final_output,
            error_info,
            metadata,
        };
        info!(
            success = result.success,
            steps = result.steps_completed,
            "pipeline execution finished"
        );
        Ok((result, Some(instance)))
    }

    async fn run_step(
        &self,
        step: &PathStep,
        ctx: &StepContext<'_>,
        workspace: &Path,
        store: &StateStore,
    ) -> Result<Value> {
        let mut step = step.clone();
        self.resolve_file_paths(&mut step, ctx.chat_id, ctx.message_id)?;

        let sources = self.resolve_param_sources(&step, store)?;
        let binding = self.registry.resolve_binding(&step.name)?;

        let isolate = should_isolate(
            self.config.isolation_mode,
            &step.name,
            self.registry.has_native(&step.name),
        );

        match binding {
            ToolBinding::Module(_) if self.config.isolation_mode == IsolationMode::None => {
                // A module-backed tool can only run in a child process;
                // honoring the in-process policy means refusing it.
                Err(OrchestratorError::ToolExecution {
                    tool: step.name.clone(),
                    message: "module-backed tool requires a subprocess; isolation mode 'none' \
                              only runs native bindings"
                        .to_string(),
                })
            }
            ToolBinding::Module(module) => {
                // Module-backed tools can only run in a child process.
                run_tool_isolated(&step, &module, &sources, workspace, store, ctx).await
            }
            ToolBinding::Native(function) if !isolate => {
                self.run_native(&step, function, &sources, store, ctx).await
            }
            ToolBinding::Native(function) => {
                // Isolation was requested, but a native binding has no
                // module to materialize; run it in-process and say so.
                debug!(tool = %step.name, "native binding; isolation request ignored");
                self.run_native(&step, function, &sources, store, ctx).await
            }
        }
    }

    async fn run_native(
        &self,
        step: &PathStep,
        function: genesis_tools::NativeTool,
        sources: &[(String, ParamSource)],
        store: &StateStore,
        ctx: &StepContext<'_>,
    ) -> Result<Value> {
        let mut kwargs = Map::new();
        for (param, source) in sources {
            let value = match source {
                ParamSource::Literal(value) => value.clone(),
                ParamSource::Reference(key) => {
                    store.get(key)?.unwrap_or(Value::Null)
                }
                ParamSource::Null => Value::Null,
            };
            kwargs.insert(param.clone(), value);
        }

        let result = tokio::time::timeout(self.config.tool_timeout, async {
            function(kwargs)
        })
        .await
        .map_err(|_| OrchestratorError::ToolExecution {
            tool: step.name.clone(),
            message: format!("timed out after {}s", self.config.tool_timeout.as_secs()),
        })?
        .map_err(|message| OrchestratorError::ToolExecution {
            tool: step.name.clone(),
            message,
        })?;

        store.set(&step.output_state_key(), result.clone())?;
        store.push_execution_step(&step.name)?;
        ctx.writer
            .custom(json!({
                "tool_name": step.name,
                "stdout": format!("{} completed successfully", step.name),
            }))
            .await;
        Ok(result)
    }

    /// Build each parameter's source following the resolution order:
    /// reference, literal, default, null for model clients — anything
    /// else still unset is a missing required input and fails the step
    /// before any process is launched.
    fn resolve_param_sources(
        &self,
        step: &PathStep,
        store: &StateStore,
    ) -> Result<Vec<(String, ParamSource)>> {
        let mut sources = Vec::new();

        for param in &step.input_params {
            if let Some(value) = step.param_values.get(param) {
                if let Some((ref_step, ref_key)) = parse_reference(value) {
                    let key = format!("{ref_step}.{ref_key}");
                    // A dangling reference is a failure of the plan, not
                    // of the tool; catch it pre-spawn.
                    if !store.contains(&key)? {
                        return Err(OrchestratorError::Resolution {
                            tool: step.name.clone(),
                            reference: key,
                        });
                    }
                    sources.push((param.clone(), ParamSource::Reference(key)));
                    continue;
                }
                if step.is_model_param(param) {
                    sources.push((param.clone(), ParamSource::Null));
                    continue;
                }
                if !value.is_null() {
                    sources.push((param.clone(), ParamSource::Literal(value.clone())));
                    continue;
                }
            }

            if let Some(default) = step.default_params.get(param) {
                sources.push((param.clone(), ParamSource::Literal(default.clone())));
                continue;
            }
            if step.is_model_param(param) {
                sources.push((param.clone(), ParamSource::Null));
                continue;
            }

            return Err(OrchestratorError::MissingInput {
                tool: step.name.clone(),
                param: param.clone(),
            });
        }

        Ok(sources)
    }

    /// Resolve bare filenames in string parameters: outputs land under
    /// the message's output directory, inputs under the chat's input
    /// directory (when the file exists there). Values containing a path
    /// separator pass through unchanged.
    fn resolve_file_paths(
        &self,
        step: &mut PathStep,
        chat_id: &str,
        message_id: &str,
    ) -> Result<()> {
        let output_params = step.output_params.clone();
        for (param, value) in step.param_values.iter_mut() {
            let Some(name) = value.as_str() else { continue };
            if name.is_empty() || name.contains('/') || name.contains('\\') {
                continue;
            }
            if parse_reference(value).is_some() {
                continue;
            }

            let is_output = output_params.contains(param) || param == "output_path";
            if is_output {
                let resolved = self
                    .config
                    .message_outputs(chat_id, message_id)
                    .join(name);
                if let Some(parent) = resolved.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                *value = json!(resolved.to_string_lossy());
            } else {
                let candidate = self.config.chat_inputs(chat_id).join(name);
                if candidate.exists() {
                    *value = json!(candidate.to_string_lossy());
                }
            }
        }
        Ok(())
    }

    /// Best-effort `.txt` preview of a non-file step result under the
    /// message's output directory.
    fn write_preview(&self, ctx: &StepContext<'_>, step: &PathStep, value: &Value) {
        // File-path results are already artifacts; no preview needed.
        if let Some(text) = value.as_str() {
            if PathBuf::from(text).exists() {
                return;
            }
        }
        let prefix = ctx.step_file_prefix(&step.name);
        let path = prefix.with_extension("txt");
        let content = serde_json::to_string_pretty(value)
            .unwrap_or_else(|_| value.to_string());
        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, content.as_bytes())
        };
        if let Err(error) = write() {
            warn!(%error, path = %path.display(), "preview write failed");
        }
    }
}

fn error_kind(error: &OrchestratorError) -> String {
    match error {
        OrchestratorError::ToolExecution { .. } => "ToolExecutionError",
        OrchestratorError::Resolution { .. } => "ResolutionError",
        OrchestratorError::MissingInput { .. } => "ResolutionError",
        OrchestratorError::Registry(_) => "RegistryError",
        _ => "ExecutionError",
    }
    .to_string()
}

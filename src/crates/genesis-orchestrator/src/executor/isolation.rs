//! Process isolation for tool steps
//!
//! Each isolated step gets a generated, self-contained Python driver
//! script in the run's workspace: it opens the file-backed state store,
//! resolves its parameters (literals inline, `${step.output}` references
//! from the store, nulls for non-serializable clients), invokes the tool
//! function once, stores its outputs under `stepName.outputKey`, and
//! appends itself to the persisted `execution_path`.
//!
//! The parent spawns the script with the project root as working
//! directory, injects execution-scoped environment variables, captures
//! both pipes line by line (appending to per-step log files and
//! forwarding each line upward as a custom stream event), enforces the
//! per-step timeout, and reads the step's outputs back from the store.

use crate::config::GenesisConfig;
use crate::error::{OrchestratorError, Result};
use crate::executor::state_store::StateStore;
use crate::path::PathStep;
use genesis_graph::StreamWriter;
use genesis_tools::ModuleRef;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Per-tool subprocess isolation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationMode {
    /// Run native bindings in-process. Testing only.
    None,
    /// Isolate the known heavy tools and anything without a native
    /// binding. The default.
    Smart,
    /// Isolate every tool.
    All,
}

impl FromStr for IsolationMode {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(IsolationMode::None),
            "smart" => Ok(IsolationMode::Smart),
            "all" => Ok(IsolationMode::All),
            other => Err(format!("unknown isolation mode '{other}'")),
        }
    }
}

impl std::fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            IsolationMode::None => "none",
            IsolationMode::Smart => "smart",
            IsolationMode::All => "all",
        })
    }
}

/// Tools isolated under [`IsolationMode::Smart`]: their native
/// dependencies (CUDA, OCR and inpainting models) must never load into
/// the server process.
pub const SMART_ISOLATED_TOOLS: [&str; 4] = ["erase", "image_ocr", "translate", "inpaint_text"];

/// Whether a step runs in a child process under the given policy.
pub fn should_isolate(mode: IsolationMode, tool_name: &str, has_native: bool) -> bool {
    match mode {
        IsolationMode::None => false,
        IsolationMode::All => true,
        IsolationMode::Smart => {
            SMART_ISOLATED_TOOLS.contains(&tool_name) || !has_native
        }
    }
}

/// How one parameter reaches the child process.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamSource {
    /// Inline JSON literal.
    Literal(Value),
    /// State-store key of an earlier step's output.
    Reference(String),
    /// Non-serializable parameter; the tool reconstructs its default.
    Null,
}

/// Identifiers and config for one step run.
pub struct StepContext<'a> {
    pub chat_id: &'a str,
    pub message_id: &'a str,
    /// 1-based index in the pipeline; prefixes log file names.
    pub step_index: usize,
    pub config: &'a GenesisConfig,
    pub writer: &'a StreamWriter,
}

impl StepContext<'_> {
    /// `outputs/<chat>/<message>/NN_<tool>` — the shared prefix of the
    /// step's log and preview files.
    pub fn step_file_prefix(&self, tool_name: &str) -> PathBuf {
        self.config
            .message_outputs(self.chat_id, self.message_id)
            .join(format!("{:02}_{}", self.step_index, tool_name))
    }
}

/// Escape arbitrary text into a double-quoted Python string literal.
fn py_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// A Python expression decoding `value`.
fn py_json(value: &Value) -> String {
    format!("json.loads({})", py_string(&value.to_string()))
}

/// Generate the driver script for one step.
pub fn build_driver_script(
    step: &PathStep,
    module: &ModuleRef,
    sources: &[(String, ParamSource)],
    workspace: &Path,
) -> String {
    let mut script = String::new();
    script.push_str("import importlib\nimport json\nimport os\nimport pickle\nimport sys\nimport uuid\nfrom pathlib import Path\n\n");
    script.push_str("os.environ.setdefault(\"KMP_DUPLICATE_LIB_OK\", \"TRUE\")\n\n");

    script.push_str(&format!(
        "WORKSPACE = Path({})\n",
        py_string(&workspace.to_string_lossy())
    ));
    script.push_str(
        r#"STATE_FILE = WORKSPACE / "execution_state.json"
BLOBS_DIR = WORKSPACE / "pickled_objects"


def _load_state():
    if STATE_FILE.exists():
        with open(STATE_FILE) as handle:
            return json.load(handle)
    return {}


def _save_state(state):
    with open(STATE_FILE, "w") as handle:
        json.dump(state, handle, indent=2, default=str)


def state_get(key):
    value = _load_state().get(key)
    if isinstance(value, dict) and "__blob_ref__" in value:
        with open(value["__blob_ref__"], "rb") as handle:
            return pickle.load(handle)
    return value


def state_set(key, value):
    state = _load_state()
    try:
        json.dumps(value)
        state[key] = value
    except (TypeError, ValueError):
        BLOBS_DIR.mkdir(exist_ok=True)
        blob_path = BLOBS_DIR / (uuid.uuid4().hex + ".pkl")
        with open(blob_path, "wb") as handle:
            pickle.dump(value, handle)
        state[key] = {"__blob_ref__": str(blob_path)}
    _save_state(state)


kwargs = {}
"#,
    );

    for (param, source) in sources {
        match source {
            ParamSource::Literal(value) => {
                script.push_str(&format!(
                    "kwargs[{}] = {}\n",
                    py_string(param),
                    py_json(value)
                ));
            }
            ParamSource::Reference(key) => {
                script.push_str(&format!(
                    "kwargs[{}] = state_get({})\n",
                    py_string(param),
                    py_string(key)
                ));
            }
            ParamSource::Null => {
                script.push_str(&format!("kwargs[{}] = None\n", py_string(param)));
            }
        }
    }

    script.push('\n');
    script.push_str(&format!(
        "module = importlib.import_module({})\n",
        py_string(&module.module)
    ));
    script.push_str(&format!(
        "func = getattr(module, {})\n",
        py_string(&module.function)
    ));
    script.push_str(&format!(
        "print(\"Executing {} with kwargs: \" + str(sorted(kwargs.keys())), flush=True)\n",
        step.name
    ));
    script.push_str("result = func(**kwargs)\n");
    script.push_str(&format!(
        "print(\"{} completed successfully\", flush=True)\n\n",
        step.name
    ));

    // Store the primary output. A named output key selects that key from
    // a returned mapping; "return" stores the whole value.
    let output_key = step.output_key();
    if output_key == "return" {
        script.push_str(&format!(
            "state_set({}, result)\n",
            py_string(&step.output_state_key())
        ));
    } else {
        script.push_str(&format!(
            "value = result.get({}) if isinstance(result, dict) else result\n",
            py_string(output_key)
        ));
        script.push_str(&format!(
            "state_set({}, value)\n",
            py_string(&step.output_state_key())
        ));
    }

    script.push_str(&format!(
        r#"
execution_path = state_get("execution_path") or []
execution_path.append({})
state_set("execution_path", execution_path)
"#,
        py_string(&step.name)
    ));

    script
}

/// Execute one step in a child process, streaming its output live.
/// Returns the step's primary output read back from the state store.
pub async fn run_tool_isolated(
    step: &PathStep,
    module: &ModuleRef,
    sources: &[(String, ParamSource)],
    workspace: &Path,
    store: &StateStore,
    ctx: &StepContext<'_>,
) -> Result<Value> {
    let script = build_driver_script(step, module, sources, workspace);
    let script_path = workspace.join(format!("run_{}.py", step.name));
    std::fs::write(&script_path, &script)?;

    // Log files live alongside the message's artifacts. A failure to
    // open them is logged and ignored; streaming continues regardless.
    let prefix = ctx.step_file_prefix(&step.name);
    if let Some(parent) = prefix.parent() {
        if let Err(error) = std::fs::create_dir_all(parent) {
            warn!(%error, dir = %parent.display(), "cannot create output directory");
        }
    }
    let mut stdout_log = open_log(&prefix, "stdout");
    let mut stderr_log = open_log(&prefix, "stderr");

    let mut command = tokio::process::Command::new(&ctx.config.python_bin);
    command
        .arg(&script_path)
        .current_dir(&ctx.config.project_root)
        .env("GENESIS_CONVERSATION_ID", ctx.chat_id)
        .env("GENESIS_MESSAGE_ID", ctx.message_id)
        .env("GENESIS_STEP_INDEX", ctx.step_index.to_string())
        .env(
            "GENESIS_ISOLATION_MODE",
            ctx.config.isolation_mode.to_string(),
        )
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Client disconnects drop the run; the child must die with it.
        .kill_on_drop(true);

    // Tool modules import relative to the project root.
    let python_path = match std::env::var("PYTHONPATH") {
        Ok(existing) if !existing.is_empty() => format!(
            "{}{}{}",
            ctx.config.project_root.display(),
            if cfg!(windows) { ";" } else { ":" },
            existing
        ),
        _ => ctx.config.project_root.display().to_string(),
    };
    command.env("PYTHONPATH", python_path);

    debug!(tool = %step.name, script = %script_path.display(), "spawning tool process");
    let mut child = command.spawn().map_err(|error| OrchestratorError::ToolExecution {
        tool: step.name.clone(),
        message: format!("failed to spawn {}: {error}", ctx.config.python_bin),
    })?;

    // Line reader tasks feed one channel so lines are forwarded in the
    // order they are read.
    let (tx, mut rx) = mpsc::channel::<(bool, String)>(64);
    if let Some(stdout) = child.stdout.take() {
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send((true, line)).await.is_err() {
                    break;
                }
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send((false, line)).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);

    let run = async {
        while let Some((is_stdout, line)) = rx.recv().await {
            let log = if is_stdout {
                &mut stdout_log
            } else {
                &mut stderr_log
            };
            if let Some(handle) = log {
                use std::io::Write;
                if let Err(error) = writeln!(handle, "{line}") {
                    warn!(%error, tool = %step.name, "log write failed");
                }
            }
            ctx.writer
                .custom(json!({ "tool_name": step.name, "stdout": line }))
                .await;

            // Nobody is listening anymore: reap the child now instead
            // of letting it run to completion.
            if ctx.writer.is_closed() {
                warn!(tool = %step.name, "stream consumer gone; killing tool process");
                let _ = child.start_kill();
            }
        }
        child.wait().await
    };

    let status = match tokio::time::timeout(ctx.config.tool_timeout, run).await {
        Ok(status) => status.map_err(|error| OrchestratorError::ToolExecution {
            tool: step.name.clone(),
            message: error.to_string(),
        })?,
        Err(_) => {
            let _ = child.start_kill();
            return Err(OrchestratorError::ToolExecution {
                tool: step.name.clone(),
                message: format!(
                    "timed out after {}s",
                    ctx.config.tool_timeout.as_secs()
                ),
            });
        }
    };

    if !status.success() {
        return Err(OrchestratorError::ToolExecution {
            tool: step.name.clone(),
            message: format!(
                "exited with status {}",
                status.code().unwrap_or(-1)
            ),
        });
    }

    Ok(store.get(&step.output_state_key())?.unwrap_or(Value::Null))
}

fn open_log(prefix: &Path, suffix: &str) -> Option<std::fs::File> {
    let path = prefix.with_file_name(format!(
        "{}_{suffix}.log",
        prefix.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
    ));
    match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => Some(file),
        Err(error) => {
            warn!(%error, path = %path.display(), "cannot open log file");
            None
        }
    }
}

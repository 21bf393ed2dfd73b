//! Environment-backed configuration
//!
//! All recognized keys use the `GENESIS_` prefix. Directory roots default
//! relative to the project root; the isolation mode and workspace
//! retention map directly onto the executor's behavior.

use crate::executor::isolation::IsolationMode;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the orchestrator and executor.
#[derive(Debug, Clone)]
pub struct GenesisConfig {
    /// Base directory for `inputs/`, `outputs/` and `tmp/`.
    pub project_root: PathBuf,

    /// Where user uploads live (`inputs/<chat_id>/<filename>`).
    pub inputs_root: PathBuf,

    /// Where per-message artifacts and logs land
    /// (`outputs/<chat_id>/<message_id>/`).
    pub outputs_root: PathBuf,

    /// Directory scanned for `@pathtool` declarations at startup.
    pub tools_dir: PathBuf,

    /// Per-tool subprocess isolation policy.
    pub isolation_mode: IsolationMode,

    /// Retain `tmp/` workspaces after a run (debugging).
    pub keep_workspace: bool,

    /// Per-tool-step timeout; the child is killed past this.
    pub tool_timeout: Duration,

    /// Interpreter used for tool child processes.
    pub python_bin: String,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        let project_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            inputs_root: project_root.join("inputs"),
            outputs_root: project_root.join("outputs"),
            tools_dir: project_root.join("tools"),
            project_root,
            isolation_mode: IsolationMode::Smart,
            keep_workspace: false,
            tool_timeout: Duration::from_secs(300),
            python_bin: "python3".to_string(),
        }
    }
}

impl GenesisConfig {
    /// Read configuration from `GENESIS_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Self {
        let project_root = std::env::var("GENESIS_PROJECT_ROOT")
            .map(PathBuf::from)
            .or_else(|_| std::env::current_dir())
            .unwrap_or_else(|_| PathBuf::from("."));

        let inputs_root = std::env::var("GENESIS_INPUTS_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| project_root.join("inputs"));
        let outputs_root = std::env::var("GENESIS_OUTPUTS_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| project_root.join("outputs"));
        let tools_dir = std::env::var("GENESIS_TOOLS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| project_root.join("tools"));

        let isolation_mode = std::env::var("GENESIS_ISOLATION_MODE")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(IsolationMode::Smart);

        let keep_workspace = std::env::var("GENESIS_KEEP_WORKSPACE")
            .map(|v| matches!(v.trim(), "1" | "true" | "True" | "yes" | "YES"))
            .unwrap_or(false);

        let tool_timeout = std::env::var("GENESIS_TOOL_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(300));

        let python_bin =
            std::env::var("GENESIS_PYTHON_BIN").unwrap_or_else(|_| "python3".to_string());

        Self {
            project_root,
            inputs_root,
            outputs_root,
            tools_dir,
            isolation_mode,
            keep_workspace,
            tool_timeout,
            python_bin,
        }
    }

    /// Root for per-run workspaces.
    pub fn tmp_root(&self) -> PathBuf {
        self.project_root.join("tmp")
    }

    /// Input directory for one chat.
    pub fn chat_inputs(&self, chat_id: &str) -> PathBuf {
        self.inputs_root.join(chat_id)
    }

    /// Output directory for one message.
    pub fn message_outputs(&self, chat_id: &str, message_id: &str) -> PathBuf {
        self.outputs_root.join(chat_id).join(message_id)
    }
}

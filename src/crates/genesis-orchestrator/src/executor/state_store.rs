//! File-backed execution state
//!
//! The state store is the only channel between the orchestrator and its
//! tool child processes: a single `execution_state.json` object mapping
//! `stepName.outputKey` entries (plus free keys) to values, with a
//! `pickled_objects/` side directory for payloads that are not JSON.
//! Non-JSON values appear in the state file as
//! `{"__blob_ref__": "<path>"}` markers.
//!
//! Within one execution only one process writes at a time: the parent
//! waits for each child before launching the next, so plain read-modify-
//! write is safe.

use crate::error::{OrchestratorError, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Key under which children record the tools they completed, in order.
pub const EXECUTION_PATH_KEY: &str = "execution_path";

/// Marker key of a blob reference entry.
pub const BLOB_REF_KEY: &str = "__blob_ref__";

/// State persistence for one pipeline execution workspace.
#[derive(Debug, Clone)]
pub struct StateStore {
    state_file: PathBuf,
    blobs_dir: PathBuf,
}

impl StateStore {
    /// Open (creating if needed) the store inside a workspace directory.
    pub fn new(workspace: &Path) -> Result<Self> {
        std::fs::create_dir_all(workspace)?;
        let blobs_dir = workspace.join("pickled_objects");
        std::fs::create_dir_all(&blobs_dir)?;

        let store = Self {
            state_file: workspace.join("execution_state.json"),
            blobs_dir,
        };
        if !store.state_file.exists() {
            store.save(&Map::new())?;
        }
        Ok(store)
    }

    pub fn load(&self) -> Result<Map<String, Value>> {
        if !self.state_file.exists() {
            return Ok(Map::new());
        }
        let text = std::fs::read_to_string(&self.state_file)?;
        let value: Value = serde_json::from_str(&text)?;
        match value {
            Value::Object(map) => Ok(map),
            _ => Err(OrchestratorError::Invalid(format!(
                "state file {} is not a JSON object",
                self.state_file.display()
            ))),
        }
    }

    fn save(&self, state: &Map<String, Value>) -> Result<()> {
        let text = serde_json::to_string_pretty(state)?;
        std::fs::write(&self.state_file, text)?;
        Ok(())
    }

    /// Value at `key`, or `None`. Blob references are returned as their
    /// marker object; use [`StateStore::get_blob`] to follow them.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.load()?.get(key).cloned())
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.load()?.contains_key(key))
    }

    /// Store a JSON value.
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut state = self.load()?;
        state.insert(key.to_string(), value);
        self.save(&state)
    }

    /// Store an opaque payload as a blob file, leaving a reference in
    /// the state object.
    pub fn set_blob(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let blob_path = self.blobs_dir.join(format!("{}.pkl", Uuid::new_v4().simple()));
        std::fs::write(&blob_path, bytes)?;
        self.set(
            key,
            serde_json::json!({ BLOB_REF_KEY: blob_path.to_string_lossy() }),
        )
    }

    /// Follow a blob reference at `key`, returning the raw payload.
    pub fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(value) = self.get(key)? else {
            return Ok(None);
        };
        let Some(path) = value.get(BLOB_REF_KEY).and_then(|p| p.as_str()) else {
            return Ok(None);
        };
        Ok(Some(std::fs::read(path)?))
    }

    /// The ordered list of completed step names.
    pub fn execution_path(&self) -> Result<Vec<String>> {
        Ok(self
            .get(EXECUTION_PATH_KEY)?
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default())
    }

    /// Append a completed step name.
    pub fn push_execution_step(&self, tool_name: &str) -> Result<()> {
        let mut path = self.execution_path()?;
        path.push(tool_name.to_string());
        self.set(EXECUTION_PATH_KEY, serde_json::json!(path))
    }
}

//! Resume commands
//!
//! A [`Command`] is the caller's input when re-entering a suspended run:
//! `resume` carries the value handed to the interrupted node (user
//! feedback), `update` optionally patches the state before the node runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Input for resuming a suspended graph run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Command {
    /// Value delivered to the interrupted node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume: Option<Value>,

    /// State patch applied before the node re-runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<Value>,
}

impl Command {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resume(value: impl Into<Value>) -> Self {
        Self {
            resume: Some(value.into()),
            update: None,
        }
    }

    pub fn with_update(mut self, update: Value) -> Self {
        self.update = Some(update);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resume_builder() {
        let cmd = Command::resume("translate it to English");
        assert_eq!(cmd.resume.unwrap(), json!("translate it to English"));
        assert!(cmd.update.is_none());
    }
}

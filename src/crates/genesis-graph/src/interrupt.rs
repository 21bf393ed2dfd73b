//! Graph interrupts
//!
//! An interrupt pauses a run with the state frozen: the node that raised
//! it is recorded as the checkpoint's pending node, an `updates` event
//! carrying the interrupt payload under [`INTERRUPT_KEY`] is emitted, and
//! the stream ends. A later resume re-enters the graph at the pending
//! node with the caller-provided value (typically user feedback) exposed
//! through the node context.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// State-patch key under which an interrupt payload is surfaced.
///
/// Consumers detect a suspended run by the presence of this key in the
/// final `updates` event of a stream.
pub const INTERRUPT_KEY: &str = "__interrupt__";

/// A pending interrupt: which node paused, and the payload shown to the
/// caller (for Genesis, the clarification question).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interrupt {
    pub node: String,
    pub value: Value,
}

impl Interrupt {
    pub fn new(node: impl Into<String>, value: Value) -> Self {
        Self {
            node: node.into(),
            value,
        }
    }

    /// The patch emitted on the update stream for this interrupt.
    ///
    /// The payload is wrapped in a single-element array to keep the shape
    /// uniform for consumers that merge patches.
    pub fn patch(&self) -> Value {
        json!({ INTERRUPT_KEY: [self.value] })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_shape() {
        let interrupt = Interrupt::new("waiting_for_feedback", json!("Which language?"));
        let patch = interrupt.patch();
        assert_eq!(patch[INTERRUPT_KEY][0], "Which language?");
    }
}

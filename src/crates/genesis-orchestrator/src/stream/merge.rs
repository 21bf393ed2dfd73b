//! State-patch accumulation
//!
//! The update stream produces per-node patches shaped
//! `{"classify": {...}}`. For persistence they are flattened (the node
//! level stripped) and deep-merged into one state dict: objects merge
//! key-wise, the `messages` list appends, everything else is replaced by
//! the later patch.

use crate::state::nodes;
use genesis_graph::INTERRUPT_KEY;
use serde_json::{Map, Value};

const NODE_KEYS: [&str; 7] = [
    nodes::PRECEDENT,
    nodes::CLASSIFY,
    nodes::FIND_PATH,
    nodes::ROUTE,
    nodes::EXECUTE,
    nodes::FINALIZE,
    nodes::WAITING_FOR_FEEDBACK,
];

/// Strip the node-name level from an update patch. Keys that are not
/// node names (agent JSON captured from the token stream, interrupt
/// markers) pass through unchanged.
pub fn flatten_state_update(patch: &Value) -> Value {
    let mut flat = Map::new();
    let Some(object) = patch.as_object() else {
        return Value::Object(flat);
    };

    for (key, value) in object {
        if NODE_KEYS.contains(&key.as_str()) {
            if let Some(inner) = value.as_object() {
                for (inner_key, inner_value) in inner {
                    flat.insert(inner_key.clone(), inner_value.clone());
                }
                continue;
            }
        }
        flat.insert(key.clone(), value.clone());
    }
    Value::Object(flat)
}

/// Merge `patch` into `base`: nested objects merge recursively,
/// `messages` arrays append, other values are replaced.
pub fn deep_merge(base: &mut Value, patch: &Value) {
    let Some(patch_obj) = patch.as_object() else {
        *base = patch.clone();
        return;
    };
    if !base.is_object() {
        *base = Value::Object(Map::new());
    }
    let base_obj = base.as_object_mut().expect("just ensured object");

    for (key, patch_value) in patch_obj {
        match base_obj.get_mut(key) {
            Some(base_value) if base_value.is_object() && patch_value.is_object() => {
                deep_merge(base_value, patch_value);
            }
            Some(Value::Array(existing)) if key == "messages" && patch_value.is_array() => {
                existing.extend(patch_value.as_array().cloned().unwrap_or_default());
            }
            _ => {
                base_obj.insert(key.clone(), patch_value.clone());
            }
        }
    }
}

/// Whether a flattened patch carries an interrupt marker, and its
/// payload text.
pub fn interrupt_message(flattened: &Value) -> Option<String> {
    let marker = flattened.get(INTERRUPT_KEY)?;
    let first = marker.as_array()?.first()?;
    Some(match first.as_str() {
        Some(text) => text.to_string(),
        None => first.to_string(),
    })
}

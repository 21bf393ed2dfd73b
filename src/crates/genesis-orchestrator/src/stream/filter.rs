//! User-facing token filtering
//!
//! Agents answer in JSON, streamed token by token. The client should see
//! only the human-readable portion — the string value of the `response`
//! or `clarification_question` key — not the surrounding JSON. The
//! filter accumulates chunks and tracks a two-state machine:
//!
//! - `Normal`: watch the accumulator for a recognized key followed by an
//!   opening quote whose value has not closed yet, then switch to
//!   `InValue`, forwarding whatever part of the current chunk lies
//!   inside the value.
//! - `InValue`: forward chunk text up to the first unescaped quote, then
//!   switch back.
//!
//! Independently, whenever the accumulator parses as a complete JSON
//! object it is captured for state persistence and the buffer resets.

use serde_json::Value;

const USER_FACING_KEYS: [&str; 2] = ["\"response\":", "\"clarification_question\":"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterState {
    Normal,
    InValue,
}

/// Streaming filter over one run's token chunks.
pub struct ChunkFilter {
    accumulator: String,
    state: FilterState,
    parsed: Vec<Value>,
}

impl Default for ChunkFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkFilter {
    pub fn new() -> Self {
        Self {
            accumulator: String::new(),
            state: FilterState::Normal,
            parsed: Vec::new(),
        }
    }

    /// Feed one chunk; returns the user-facing text to forward, if any.
    pub fn feed(&mut self, chunk: &str) -> Option<String> {
        if chunk.is_empty() {
            return None;
        }
        self.accumulator.push_str(chunk);

        let forwarded = match self.state {
            FilterState::Normal => self.scan_for_value_start(chunk),
            FilterState::InValue => self.scan_for_value_end(chunk),
        };

        // A complete JSON object in the buffer is captured for the
        // persistence path and the stream machinery resets.
        if let Ok(value) = serde_json::from_str::<Value>(self.accumulator.trim()) {
            if value.is_object() {
                self.parsed.push(value);
                self.accumulator.clear();
                self.state = FilterState::Normal;
            }
        }

        forwarded.filter(|text| !text.is_empty())
    }

    /// Parsed complete objects accumulated so far, draining the buffer.
    pub fn drain_parsed(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.parsed)
    }

    fn scan_for_value_start(&mut self, chunk: &str) -> Option<String> {
        let (key_pos, key) = USER_FACING_KEYS
            .iter()
            .filter_map(|key| self.accumulator.rfind(key).map(|pos| (pos, *key)))
            .max_by_key(|(pos, _)| *pos)?;

        let after_key = &self.accumulator[key_pos + key.len()..];
        let trimmed = after_key.trim_start();
        if !trimmed.starts_with('"') {
            return None;
        }

        // Position of the opening quote in the accumulator.
        let quote_pos = key_pos + key.len() + (after_key.len() - trimmed.len());
        let value_so_far = &self.accumulator[quote_pos + 1..];

        // Already-closed or empty values are not streamed.
        if find_unescaped_quote(value_so_far).is_some() {
            return None;
        }
        if trimmed.starts_with("\"\"") || trimmed.starts_with("\"null\"") {
            return None;
        }

        self.state = FilterState::InValue;

        // Forward only the part of the current chunk inside the value.
        let chunk_start = self.accumulator.len() - chunk.len();
        let forward_from = (quote_pos + 1).max(chunk_start);
        Some(self.accumulator[forward_from..].to_string())
    }

    fn scan_for_value_end(&mut self, chunk: &str) -> Option<String> {
        match find_unescaped_quote(chunk) {
            None => Some(chunk.to_string()),
            Some(0) => {
                self.state = FilterState::Normal;
                None
            }
            Some(index) => {
                self.state = FilterState::Normal;
                Some(chunk[..index].to_string())
            }
        }
    }
}

/// Byte index of the first quote not preceded by a backslash.
fn find_unescaped_quote(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'"' && (i == 0 || bytes[i - 1] != b'\\') {
            return Some(i);
        }
    }
    None
}

//! Path generation
//!
//! Enumerates every ordered tool sequence whose chained input/output
//! workflow types transform a starting type into a target type, using
//! only tools currently in the registry.
//!
//! The search is breadth-first over partial paths, so results come out
//! shortest first; within one length the order is stable (frontier order
//! crossed with registry registration order). A tool appears at most once
//! per path, and the empty path is never returned even when start and
//! target coincide. A path that reaches the target is recorded and still
//! extended — a longer pipeline may pass through the target type on its
//! way to more processing (extract, then translate, both structured
//! data). Search depth is bounded by [`PathGenerator::max_depth`]
//! ([`DEFAULT_MAX_DEPTH`] = 6) to keep enumeration tractable on dense
//! registries.
//!
//! A tool with `required_inputs` is still a valid chain edge; satisfying
//! those extra inputs is the router's and executor's job, not the
//! generator's.

use crate::metadata::ToolMetadata;
use crate::registry::ToolRegistry;
use crate::types::WorkflowType;
use std::collections::VecDeque;
use tracing::debug;

/// Default bound on the number of tools in one path.
pub const DEFAULT_MAX_DEPTH: usize = 6;

/// Enumerates typed tool pipelines over a registry.
#[derive(Debug, Clone)]
pub struct PathGenerator {
    max_depth: usize,
}

impl Default for PathGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl PathGenerator {
    pub fn new() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Override the depth bound.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// All tool sequences leading from `input_type` to `target_type`,
    /// shortest first.
    pub fn find_all_paths(
        &self,
        registry: &ToolRegistry,
        input_type: WorkflowType,
        target_type: WorkflowType,
    ) -> Vec<Vec<ToolMetadata>> {
        let mut results: Vec<Vec<ToolMetadata>> = Vec::new();

        // Partial paths paired with their current frontier type.
        let mut frontier: VecDeque<(Vec<ToolMetadata>, WorkflowType)> = VecDeque::new();
        frontier.push_back((Vec::new(), input_type));

        while let Some((path, current_type)) = frontier.pop_front() {
            if path.len() >= self.max_depth {
                continue;
            }
            for tool in registry.tools_for_input_type(current_type) {
                if path.iter().any(|step| step.name == tool.name) {
                    continue;
                }
                // Registration guarantees the output type resolves.
                let Some(output_type) = tool.output_type() else {
                    continue;
                };

                let mut extended = path.clone();
                extended.push(tool.clone());

                if output_type == target_type {
                    results.push(extended.clone());
                }
                frontier.push_back((extended, output_type));
            }
        }

        debug!(
            input = %input_type,
            target = %target_type,
            paths = results.len(),
            "path enumeration complete"
        );
        results
    }
}

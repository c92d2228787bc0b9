use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 10;

/// Bounds on a single tool-call loop run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopLimits {
    /// Tool execution rounds allowed per run; `None` is unbounded.
    pub max_rounds: Option<usize>,
    /// Run the calls of one response concurrently.
    pub parallel_tools: bool,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_rounds: Some(DEFAULT_MAX_TOOL_ROUNDS),
            parallel_tools: false,
        }
    }
}

impl LoopLimits {
    pub fn unbounded() -> Self {
        Self {
            max_rounds: None,
            ..Self::default()
        }
    }

    /// Whether another round may start after `completed` rounds.
    pub fn allows_round(&self, completed: usize) -> bool {
        self.max_rounds.map_or(true, |max| completed < max)
    }
}

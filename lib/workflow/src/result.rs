//! What a block handler returns.

use crate::context::Artifact;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use workforge_core::BlockId;

/// A `goto` block's control signal, carried as `__goto` inside a
/// `state_delta` and intercepted by [`crate::value::apply_delta`] rather
/// than ever landing in `WorkflowContext.state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GotoSignal {
    pub target_block_id: BlockId,
    #[serde(default)]
    pub defer: bool,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_name: Option<String>,
}

fn default_max_concurrent() -> u32 {
    10
}

/// A control signal a handler requests via its `BlockResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlSignal {
    Goto(GotoSignal),
    /// Suspend the run for a `ui_*` block; carries the block's `logic`
    /// map so the Execution Service can broadcast it verbatim.
    Pause { ui_config: Map<String, Value> },
    Skip,
}

/// What a handler invocation produces.
///
/// Handlers never mutate `WorkflowContext` directly; the Interpreter
/// applies `state_delta` via [`crate::value::apply_delta`] and appends
/// `artifacts`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_delta: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_signal: Option<ControlSignal>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
}

impl BlockResult {
    /// Convenience constructor for a handler that only sets state.
    #[must_use]
    pub fn with_delta(delta: Map<String, Value>) -> Self {
        Self {
            state_delta: Some(delta),
            ..Self::default()
        }
    }

    /// Convenience constructor for a handler with no observable effect.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

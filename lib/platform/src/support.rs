//! Shared helpers for block handlers: bound-output construction and
//! `logic` resolution against the run context.

use serde_json::{Map, Value};
use workforge_workflow::value::{bind_key, resolve_dynamic, resolve_value};
use workforge_workflow::{Block, BlockResult, WorkflowContext};

/// Resolves `block.logic[key]` against `ctx`, recursing into nested
/// objects/arrays. Returns `Value::Null` if the key is absent.
#[must_use]
pub fn logic_value(block: &Block, ctx: &WorkflowContext, key: &str) -> Value {
    block
        .logic
        .get(key)
        .map(|v| resolve_dynamic(v, ctx))
        .unwrap_or(Value::Null)
}

/// Resolves `block.logic[key]` as a single (non-recursive) reference.
#[must_use]
pub fn logic_scalar(block: &Block, ctx: &WorkflowContext, key: &str) -> Value {
    block
        .logic
        .get(key)
        .map(|v| resolve_value(v, ctx))
        .unwrap_or(Value::Null)
}

/// Builds a single-key `BlockResult` at the path named by `block.logic.bind_to`,
/// falling back to `default_path` (e.g. `"$state.result"`) when unset.
#[must_use]
pub fn bind_output(block: &Block, default_path: &str, value: Value) -> BlockResult {
    let bind_to = block.logic_str("bind_to").unwrap_or(default_path);
    let mut delta = Map::new();
    delta.insert(bind_key(bind_to).to_string(), value);
    BlockResult::with_delta(delta)
}

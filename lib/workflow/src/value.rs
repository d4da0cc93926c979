//! Reference resolution and state-delta merge (Context Manager, C1).

use crate::context::WorkflowContext;
use crate::error::ContextError;
use serde_json::{Map, Value};

/// Resolves a single value against the context.
///
/// Never fails: an unresolved path yields [`Value::Null`]. Bare
/// non-string values pass through unchanged. Recursion into nested
/// objects/arrays only happens via [`resolve_dynamic`]; this function
/// resolves exactly one leaf.
#[must_use]
pub fn resolve_value(value: &Value, ctx: &WorkflowContext) -> Value {
    match value {
        Value::String(s) => resolve_string(s, ctx),
        other => other.clone(),
    }
}

fn resolve_string(s: &str, ctx: &WorkflowContext) -> Value {
    if let Some(path) = s.strip_prefix("$state.") {
        return lookup_path(&Value::Object(ctx.state.clone()), path).unwrap_or(Value::Null);
    }
    if let Some(path) = s.strip_prefix("$event.") {
        return lookup_path(&ctx.event, path).unwrap_or(Value::Null);
    }
    if let Some(name) = s.strip_prefix("$secrets.") {
        return ctx
            .secrets
            .get(name)
            .cloned()
            .unwrap_or(Value::Null);
    }
    if contains_template(s) {
        return Value::String(render_template(s, ctx));
    }
    Value::String(s.to_string())
}

fn contains_template(s: &str) -> bool {
    s.contains("{{") && s.contains("}}")
}

/// Substitutes every `{{path}}` occurrence in `s` with its resolved
/// string representation. A missing reference resolves to the empty
/// string. Non-string resolved values are rendered via their JSON text
/// minus surrounding quotes for plain strings.
fn render_template(s: &str, ctx: &WorkflowContext) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            // Unterminated template marker: emit verbatim.
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let path = after_open[..end].trim();
        out.push_str(&render_template_value(path, ctx));
        rest = &after_open[end + 2..];
    }
    out.push_str(rest);
    out
}

fn render_template_value(path: &str, ctx: &WorkflowContext) -> String {
    let resolved = if let Some(rest) = path.strip_prefix("event.") {
        lookup_path(&ctx.event, rest)
    } else if let Some(rest) = path.strip_prefix("state.") {
        lookup_path(&Value::Object(ctx.state.clone()), rest)
    } else if let Some(rest) = path.strip_prefix("secrets.") {
        ctx.secrets.get(rest).cloned()
    } else {
        lookup_path(&Value::Object(ctx.state.clone()), path)
    };

    match resolved {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Dot-walks `root` by `path`, indexing arrays by numeric segments.
fn lookup_path(root: &Value, path: &str) -> Option<Value> {
    let mut current = root;
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current.clone())
}

/// Recursively resolves every string leaf in `value` against `ctx`.
/// Used by handlers that call `resolveDynamic` on a nested `logic`
/// payload rather than a single scalar.
#[must_use]
pub fn resolve_dynamic(value: &Value, ctx: &WorkflowContext) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_dynamic(v, ctx)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| resolve_dynamic(v, ctx)).collect())
        }
        leaf => resolve_value(leaf, ctx),
    }
}

/// Strips a handler's `bind_to: "$state.foo"` path down to the key used
/// inside a `state_delta` (`foo`).
#[must_use]
pub fn bind_key(bind_to: &str) -> &str {
    bind_to.strip_prefix("$state.").unwrap_or(bind_to)
}

/// Shallow-merges `delta` into `ctx.state`. Keys prefixed `__` are control
/// signals, not state — they are never written into `state`, matching the
/// distilled spec's interception of `__goto`.
///
/// # Errors
///
/// Returns [`ContextError::DeltaNotAnObject`] if `delta` is not a JSON
/// object (callers should only ever pass `BlockResult::state_delta`,
/// which is typed as a map, but this is the single application point and
/// stays defensive against a deserialized-from-storage delta).
pub fn apply_delta(ctx: &mut WorkflowContext, delta: &Map<String, Value>) -> Result<(), ContextError> {
    for (key, val) in delta {
        if key.starts_with("__") {
            continue;
        }
        ctx.state.insert(key.clone(), val.clone());
    }
    Ok(())
}

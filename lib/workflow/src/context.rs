//! The mutable state threaded through a single run.

use crate::version::TriggerType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use workforge_core::{DeviceId, OrgId, RunId, WorkflowId, WorkflowVersionId};

/// A file or blob produced by a block during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

/// Per-loop-name iteration counter, advanced by `goto` targets that carry
/// a `loopName`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LoopCounter {
    pub index: u32,
}

/// Denormalized run metadata carried inside the context for handlers that
/// need to read it (e.g. to stamp `deviceId` into an artifact).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub id: RunId,
    pub workflow_id: WorkflowId,
    pub version_id: WorkflowVersionId,
    pub status: String,
    pub trigger_type: TriggerType,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<OrgId>,
}

/// The single mutable object threaded through a run.
///
/// Owned exclusively by the Interpreter. Handlers never see a `&mut`
/// reference to this type: they receive `&WorkflowContext` and return a
/// `BlockResult` describing the delta, which only the Interpreter applies
/// (see [`crate::value::apply_delta`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowContext {
    /// Accumulates across blocks via shallow-merged state deltas.
    pub state: Map<String, Value>,
    /// Ephemeral, handler-owned memoization scratch space for one run.
    /// Not persisted across pause/resume in the wire snapshot's `entries`
    /// form other than as a flat key/value list (see `value::snapshot`).
    pub cache: HashMap<String, Value>,
    pub artifacts: Vec<Artifact>,
    /// Resolved secret material; empty for public runs.
    pub secrets: Map<String, Value>,
    pub run: RunMeta,
    pub event: Value,
    pub loops: HashMap<String, LoopCounter>,
    /// Branch-taken markers recorded by `goto`, for analytics only.
    pub paths: Vec<String>,
}

impl WorkflowContext {
    /// Creates a fresh context for a new run.
    #[must_use]
    pub fn new(run: RunMeta, event: Value, initial_state: Option<Value>) -> Self {
        let state = match initial_state {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };

        Self {
            state,
            cache: HashMap::new(),
            artifacts: Vec::new(),
            secrets: Map::new(),
            run,
            event,
            loops: HashMap::new(),
            paths: Vec::new(),
        }
    }
}

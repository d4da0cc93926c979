//! The persisted outer record of one workflow execution.

use crate::context::{Artifact, LoopCounter, WorkflowContext};
use crate::step::Step;
use crate::version::{TriggerType, WorkflowVersion};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use workforge_core::{BlockId, DeviceId, OrgId, RunId, WorkflowId};

/// Looks up secret material by name for a single run; absent for public
/// (unauthenticated) runs.
pub trait KeyResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<Value>;
}

/// Immutable input to a run.
pub struct RunConfig {
    pub run_id: RunId,
    pub org_id: OrgId,
    pub device_id: DeviceId,
    pub workflow_version: WorkflowVersion,
    pub event: Value,
    pub initial_state: Option<Value>,
    pub key_resolver: Option<Box<dyn KeyResolver>>,
}

impl RunConfig {
    /// A public trigger has no key resolver: `context.secrets` stays empty.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.key_resolver.is_none()
    }
}

/// A serializable snapshot of `WorkflowContext`, sufficient to rehydrate
/// it on resume. `cache` is flattened to an entry list so it round-trips
/// through JSON the same way a `HashMap<String, Value>` would, matching
/// the wire shape named in the distilled spec (`cache[entries]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub state: Map<String, Value>,
    pub cache_entries: Vec<(String, Value)>,
    pub artifacts: Vec<Artifact>,
    pub event: Value,
    pub loops: HashMap<String, LoopCounter>,
}

/// Everything needed to reconstruct a `WorkflowContext` and continue
/// execution after a `ui_*` block suspends the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PausedRunState {
    pub current_block_index: usize,
    pub context_snapshot: ContextSnapshot,
    pub paused_block_id: BlockId,
    pub paused_ui_config: Map<String, Value>,
}

/// Either the executed Step list (running/terminal run) or a paused
/// snapshot (`awaiting_action`), matching `Run.stepsJson`'s dual shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunSteps {
    Steps(Vec<Step>),
    Paused(PausedRunState),
}

impl RunSteps {
    #[must_use]
    pub fn as_steps(&self) -> Option<&[Step]> {
        match self {
            Self::Steps(steps) => Some(steps),
            Self::Paused(_) => None,
        }
    }

    #[must_use]
    pub fn as_paused(&self) -> Option<&PausedRunState> {
        match self {
            Self::Paused(paused) => Some(paused),
            Self::Steps(_) => None,
        }
    }
}

/// The lifecycle status of a [`Run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    AwaitingAction,
}

impl RunStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// The persisted outer record of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub workflow_id: WorkflowId,
    pub version: workforge_core::WorkflowVersionId,
    pub org_id: OrgId,
    pub status: RunStatus,
    pub trigger_type: TriggerType,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub steps_json: RunSteps,
}

impl Run {
    /// Seals a run that reached a terminal state.
    pub fn finish(&mut self, status: RunStatus, error_message: Option<String>) {
        debug_assert!(status.is_terminal());
        let now = chrono::Utc::now();
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0));
        self.status = status;
        self.error_message = error_message;
    }
}

/// Produces a `ContextSnapshot` from a live context, and rehydrates one
/// back into a context for `resumeRun`.
impl WorkflowContext {
    #[must_use]
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            state: self.state.clone(),
            cache_entries: self.cache.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            artifacts: self.artifacts.clone(),
            event: self.event.clone(),
            loops: self.loops.clone(),
        }
    }

    /// Rehydrates a context from a snapshot, re-attaching the run
    /// metadata that isn't itself part of the wire snapshot.
    #[must_use]
    pub fn rehydrate(snapshot: ContextSnapshot, run: crate::context::RunMeta, secrets: Map<String, Value>) -> Self {
        Self {
            state: snapshot.state,
            cache: snapshot.cache_entries.into_iter().collect(),
            artifacts: snapshot.artifacts,
            secrets,
            run,
            event: snapshot.event,
            loops: snapshot.loops,
            paths: Vec::new(),
        }
    }
}

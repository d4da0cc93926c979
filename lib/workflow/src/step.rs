//! The per-block execution record.

use crate::block::BlockType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use workforge_core::{BlockId, StepId};

/// The executor's error taxonomy (§4.3) plus the service-level codes
/// raised above it (§7). One closed set so `Step.error.code` and
/// `Run.errorMessage`-producing errors share a single representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    Timeout,
    UpstreamError,
    SsrfBlocked,
    SandboxError,
    CapabilityUnavailable,
    InternalError,
    RunNotFound,
    WorkflowNotFound,
    WorkflowDisabled,
    NoPublishedVersion,
    RestrictedBlockType,
    RateLimited,
    GotoTargetNotFound,
    LoopLimitExceeded,
    Cancelled,
    RunTimeout,
}

impl ErrorCode {
    /// Fatal errors cannot be recovered by a block's `on_error` policy —
    /// they always abort the run.
    #[must_use]
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::LoopLimitExceeded | Self::RunTimeout | Self::InternalError
        )
    }
}

/// The error attached to a failed [`Step`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepError {
    pub code: ErrorCode,
    pub message: String,
}

/// Terminal or in-flight status of a single block invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Completed,
    Failed,
    Skipped,
}

/// The executed-block record the Interpreter seals once a block's
/// dispatch finishes (successfully, with an error, or skipped).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step_id: StepId,
    pub block_id: BlockId,
    pub block_type: BlockType,
    pub block_name: String,
    pub status: StepStatus,
    /// Strictly monotonic within a run.
    pub execution_order: u32,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_snapshot: Option<Value>,
}

impl Step {
    /// Seals a running step as completed.
    pub fn complete(&mut self, duration_ms: u64, output_snapshot: Option<Value>) {
        self.status = StepStatus::Completed;
        self.duration_ms = Some(duration_ms);
        self.output_snapshot = output_snapshot;
    }

    /// Seals a running step as failed.
    pub fn fail(&mut self, duration_ms: u64, error: StepError) {
        self.status = StepStatus::Failed;
        self.duration_ms = Some(duration_ms);
        self.error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_step() -> Step {
        Step {
            step_id: StepId::new(),
            block_id: BlockId::new(),
            block_type: BlockType::String,
            block_name: "greet".into(),
            status: StepStatus::Running,
            execution_order: 0,
            started_at: chrono::Utc::now(),
            duration_ms: None,
            error: None,
            output_snapshot: None,
        }
    }

    #[test]
    fn complete_seals_status_and_duration() {
        let mut step = running_step();
        step.complete(12, Some(serde_json::json!({"ok": true})));
        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.duration_ms, Some(12));
        assert!(step.error.is_none());
    }

    #[test]
    fn fail_seals_status_and_error() {
        let mut step = running_step();
        step.fail(
            5,
            StepError {
                code: ErrorCode::SandboxError,
                message: "kaboom".into(),
            },
        );
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.error.unwrap().code, ErrorCode::SandboxError);
    }

    #[test]
    fn fatal_codes_are_flagged() {
        assert!(ErrorCode::LoopLimitExceeded.is_fatal());
        assert!(ErrorCode::RunTimeout.is_fatal());
        assert!(!ErrorCode::ValidationError.is_fatal());
        assert!(!ErrorCode::SsrfBlocked.is_fatal());
    }
}

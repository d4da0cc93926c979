//! Service-level errors surfaced by the Execution Service (C5).

use std::fmt;
use workforge_workflow::ErrorCode;

/// Errors raised before a run is ever dispatched to the Interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    WorkflowNotFound,
    WorkflowDisabled,
    NoPublishedVersion,
    RunNotFound,
    RestrictedBlockType { block_type: String },
    RateLimited { retry_after_ms: u64 },
    ActionFailed { reason: &'static str },
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkflowNotFound => write!(f, "workflow not found"),
            Self::WorkflowDisabled => write!(f, "workflow is disabled"),
            Self::NoPublishedVersion => write!(f, "workflow has no published version"),
            Self::RunNotFound => write!(f, "run not found"),
            Self::RestrictedBlockType { block_type } => {
                write!(f, "block type '{block_type}' is not allowed on public triggers")
            }
            Self::RateLimited { retry_after_ms } => {
                write!(f, "rate limited, retry after {retry_after_ms}ms")
            }
            Self::ActionFailed { reason } => write!(f, "action failed: {reason}"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl ServiceError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::WorkflowNotFound => ErrorCode::WorkflowNotFound,
            Self::WorkflowDisabled => ErrorCode::WorkflowDisabled,
            Self::NoPublishedVersion => ErrorCode::NoPublishedVersion,
            Self::RunNotFound => ErrorCode::RunNotFound,
            Self::RestrictedBlockType { .. } => ErrorCode::RestrictedBlockType,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::ActionFailed { .. } => ErrorCode::ValidationError,
        }
    }
}

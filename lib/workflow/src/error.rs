//! Error types for the data-model crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `ContextError`: value resolution / delta-merge failures
//! - `WorkflowError`: high-level workflow/version lookups (wraps lower errors via context)

use workforge_core::{BlockId, WorkflowId, WorkflowVersionId};
use std::fmt;

/// Errors from the Context Manager (C1): reference resolution itself
/// never throws (per the distilled spec, unresolved paths yield `null`),
/// but the snapshot/rehydrate and delta-merge operations around it can
/// still fail on malformed input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// A snapshot's `cache_entries` contained a duplicate key.
    DuplicateCacheKey { key: String },
    /// `state_delta` was not an object and therefore cannot be merged.
    DeltaNotAnObject,
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateCacheKey { key } => write!(f, "duplicate cache key: {key}"),
            Self::DeltaNotAnObject => write!(f, "state delta is not an object"),
        }
    }
}

impl std::error::Error for ContextError {}

/// High-level workflow/version errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// Workflow has no matching record.
    NotFound { id: WorkflowId },
    /// Workflow exists but is disabled.
    Disabled { id: WorkflowId },
    /// Workflow has no published version.
    NoPublishedVersion { id: WorkflowId },
    /// Referenced version id does not exist on the workflow.
    VersionNotFound { id: WorkflowVersionId },
    /// `goto` target block id is not present in the version.
    GotoTargetNotFound { block_id: BlockId },
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "workflow not found: {id}"),
            Self::Disabled { id } => write!(f, "workflow disabled: {id}"),
            Self::NoPublishedVersion { id } => {
                write!(f, "workflow has no published version: {id}")
            }
            Self::VersionNotFound { id } => write!(f, "workflow version not found: {id}"),
            Self::GotoTargetNotFound { block_id } => {
                write!(f, "goto target block not found: {block_id}")
            }
        }
    }
}

impl std::error::Error for WorkflowError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_error_display() {
        let err = ContextError::DuplicateCacheKey { key: "memo".into() };
        assert!(err.to_string().contains("memo"));
    }

    #[test]
    fn workflow_error_display() {
        let id = WorkflowId::new();
        let err = WorkflowError::NoPublishedVersion { id };
        assert!(err.to_string().contains("no published version"));
    }
}

//! Error types for block dispatch.

use std::fmt;
use workforge_workflow::{BlockType, ErrorCode};

/// Raised by a [`crate::registry::BlockHandler`] invocation. The executor
/// classifies and wraps this into a sealed `Step`.
#[derive(Debug, Clone)]
pub struct HandlerError {
    pub code: ErrorCode,
    pub message: String,
    /// Whether the executor should retry this invocation per its backoff
    /// schedule. Ignored for handlers that drive their own retries
    /// (`fetch`).
    pub retryable: bool,
}

impl HandlerError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: false,
        }
    }

    #[must_use]
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for HandlerError {}

/// Errors from [`crate::registry::BlockHandlerRegistry`] lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    UnknownBlockType { block_type: BlockType },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownBlockType { block_type } => {
                write!(f, "no handler registered for block type: {}", block_type.as_str())
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Errors surfaced by the Interpreter state machine itself (distinct from
/// per-block `HandlerError`s, which become `Step.error`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterpreterError {
    GotoTargetNotFound,
    LoopLimitExceeded,
    RunTimeout,
    Cancelled,
}

impl fmt::Display for InterpreterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GotoTargetNotFound => write!(f, "goto target block not found"),
            Self::LoopLimitExceeded => write!(f, "loop max iterations exceeded"),
            Self::RunTimeout => write!(f, "run exceeded its time budget"),
            Self::Cancelled => write!(f, "run was cancelled"),
        }
    }
}

impl std::error::Error for InterpreterError {}

impl InterpreterError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::GotoTargetNotFound => ErrorCode::GotoTargetNotFound,
            Self::LoopLimitExceeded => ErrorCode::LoopLimitExceeded,
            Self::RunTimeout => ErrorCode::RunTimeout,
            Self::Cancelled => ErrorCode::Cancelled,
        }
    }
}

//! Core identifiers and error handling for the workforge runtime.
//!
//! This crate provides the ID newtypes and the shared `Result` alias used
//! throughout the engine's crates.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{BlockId, DeviceId, OrgId, ParseIdError, RunId, StepId, WorkflowId, WorkflowVersionId};

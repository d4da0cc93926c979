//! Block/version data model, Context Manager (C1), and the envelope
//! wire format shared across the workforge engine.

pub mod block;
pub mod context;
pub mod envelope;
pub mod error;
pub mod result;
pub mod run;
pub mod step;
pub mod value;
pub mod version;

pub use block::{Block, BlockType, OnError};
pub use context::{Artifact, LoopCounter, RunMeta, WorkflowContext};
pub use envelope::{Envelope, RawEnvelope, CURRENT_VERSION};
pub use error::{ContextError, WorkflowError};
pub use result::{BlockResult, ControlSignal, GotoSignal};
pub use run::{ContextSnapshot, KeyResolver, PausedRunState, Run, RunConfig, RunStatus, RunSteps};
pub use step::{ErrorCode, Step, StepError, StepStatus};
pub use version::{ExecutionEnvironment, TriggerType, VersionStatus, WorkflowVersion, PUBLIC_RUN_ALLOWED_TYPES};

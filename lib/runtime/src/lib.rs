//! Execution Service (C5): run lifecycle, broadcasting, rate limiting,
//! cancellation, and persistence seams layered on top of the
//! Interpreter.

pub mod broadcast;
pub mod cancellation;
pub mod error;
pub mod rate_limit;
pub mod service;
pub mod slug;
pub mod store;

pub use broadcast::{InMemoryBroadcaster, NatsBroadcaster, RunBroadcaster, RunEvent};
pub use cancellation::CancellationRegistry;
pub use error::ServiceError;
pub use rate_limit::{hash_ip, RateLimitDecision, RateLimiter};
pub use service::{BroadcastSink, ExecutionService};
pub use slug::generate_unique_slug;
pub use store::{InMemoryRunStore, InMemoryWorkflowStore, PgRunStore, PgWorkflowStore, RunStore, StoreError, Workflow, WorkflowStore};

//! Block Executor (C3): timeout, retry, and error classification around a
//! single handler invocation.

use crate::error::HandlerError;
use crate::registry::BlockHandlerRegistry;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use workforge_core::{RunId, StepId};
use workforge_workflow::{Block, BlockResult, ErrorCode, Step, StepError, StepStatus, WorkflowContext};

/// Receives `step.started`/`step.finished` notifications from the
/// executor, translated by the Execution Service into `run:step`
/// broadcasts. Kept separate from the broadcast transport so the
/// interpreter/executor crates stay transport-agnostic.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn step_started(&self, run_id: RunId, step: &Step);
    async fn step_finished(&self, run_id: RunId, step: &Step);
}

/// An `EventSink` that does nothing, for callers that don't need
/// broadcasting (most unit tests).
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn step_started(&self, _run_id: RunId, _step: &Step) {}
    async fn step_finished(&self, _run_id: RunId, _step: &Step) {}
}

/// Per-block timeout/retry policy. The Interpreter supplies the defaults
/// named in the distilled spec (60s server / 10s public) based on
/// `RunConfig::is_public`.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorPolicy {
    pub timeout: Duration,
    /// Max retries for handlers that mark their error `retryable`.
    /// Default 0 for arbitrary blocks.
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl ExecutorPolicy {
    #[must_use]
    pub fn server_default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_retries: 0,
            initial_backoff: Duration::from_millis(100),
        }
    }

    #[must_use]
    pub fn public_default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 0,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

/// Wraps one `BlockHandler` invocation with a deadline, bounded retry,
/// and error classification; always returns a sealed `Step`. On success
/// the `BlockResult` the Interpreter needs to apply is also returned.
pub struct BlockExecutor<'a> {
    registry: &'a BlockHandlerRegistry,
    sink: &'a dyn EventSink,
}

impl<'a> BlockExecutor<'a> {
    #[must_use]
    pub fn new(registry: &'a BlockHandlerRegistry, sink: &'a dyn EventSink) -> Self {
        Self { registry, sink }
    }

    /// Runs `block`'s handler to completion (success, exhausted retries,
    /// timeout, or cancellation), emitting `step.started`/`step.finished`
    /// through the sink.
    pub async fn execute(
        &self,
        run_id: RunId,
        block: &Block,
        ctx: &WorkflowContext,
        execution_order: u32,
        policy: ExecutorPolicy,
        cancel: &CancellationToken,
    ) -> (Step, Option<BlockResult>) {
        let started_at = chrono::Utc::now();
        let mut step = Step {
            step_id: StepId::new(),
            block_id: block.id,
            block_type: block.block_type,
            block_name: block.name.clone(),
            status: StepStatus::Running,
            execution_order,
            started_at,
            duration_ms: None,
            error: None,
            output_snapshot: None,
        };
        self.sink.step_started(run_id, &step).await;

        let handler = match self.registry.resolve(block.block_type) {
            Ok(handler) => handler.clone(),
            Err(_) => {
                let elapsed = elapsed_ms(started_at);
                step.fail(
                    elapsed,
                    StepError {
                        code: ErrorCode::InternalError,
                        message: format!("no handler registered for {}", block.block_type.as_str()),
                    },
                );
                self.sink.step_finished(run_id, &step).await;
                return (step, None);
            }
        };

        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                let elapsed = elapsed_ms(started_at);
                step.fail(
                    elapsed,
                    StepError {
                        code: ErrorCode::Cancelled,
                        message: "run was cancelled".into(),
                    },
                );
                self.sink.step_finished(run_id, &step).await;
                return (step, None);
            }

            let dispatch = tokio::time::timeout(policy.timeout, handler.execute(block, ctx, cancel));

            let outcome: Result<Result<BlockResult, HandlerError>, tokio::time::error::Elapsed> =
                dispatch.await;

            match outcome {
                Ok(Ok(result)) => {
                    let elapsed = elapsed_ms(started_at);
                    step.complete(elapsed, block_output_snapshot(&result));
                    self.sink.step_finished(run_id, &step).await;
                    return (step, Some(result));
                }
                Ok(Err(handler_err)) => {
                    if handler_err.retryable && attempt < policy.max_retries {
                        attempt += 1;
                        let backoff = policy.initial_backoff * 2u32.pow(attempt - 1);
                        tokio::select! {
                            () = tokio::time::sleep(backoff) => continue,
                            () = cancel.cancelled() => {
                                let elapsed = elapsed_ms(started_at);
                                step.fail(elapsed, StepError { code: ErrorCode::Cancelled, message: "run was cancelled".into() });
                                self.sink.step_finished(run_id, &step).await;
                                return (step, None);
                            }
                        }
                    }
                    let elapsed = elapsed_ms(started_at);
                    step.fail(
                        elapsed,
                        StepError {
                            code: handler_err.code,
                            message: handler_err.message,
                        },
                    );
                    self.sink.step_finished(run_id, &step).await;
                    return (step, None);
                }
                Err(_elapsed) => {
                    let elapsed = elapsed_ms(started_at);
                    step.fail(
                        elapsed,
                        StepError {
                            code: ErrorCode::Timeout,
                            message: format!("block exceeded {:?} timeout", policy.timeout),
                        },
                    );
                    self.sink.step_finished(run_id, &step).await;
                    return (step, None);
                }
            }
        }
    }
}

fn elapsed_ms(started_at: chrono::DateTime<chrono::Utc>) -> u64 {
    (chrono::Utc::now() - started_at).num_milliseconds().max(0) as u64
}

fn block_output_snapshot(result: &BlockResult) -> Option<serde_json::Value> {
    result
        .state_delta
        .as_ref()
        .map(|delta| serde_json::Value::Object(delta.clone()))
}

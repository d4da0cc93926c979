//! Handlers for the remaining flow types that aren't `fetch` or `code`:
//! `goto`, `sleep`, `location`, `agent`.

use crate::adapter::Coordinates;
use crate::support::{bind_output, logic_scalar};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use workforge_core::BlockId;
use workforge_interpreter::{BlockHandler, HandlerError};
use workforge_workflow::{Block, BlockResult, ControlSignal, ErrorCode, GotoSignal, WorkflowContext};

/// Upper clamp for `sleep_duration_ms`; a missing or negative value
/// clamps to zero, not this bound.
const MAX_SLEEP_DURATION_MS: i64 = 300_000;

/// Translates a `goto` block's `logic` into a `ControlSignal::Goto` —
/// the Interpreter resolves the target index, not this handler.
pub struct GotoHandler;

#[async_trait]
impl BlockHandler for GotoHandler {
    async fn execute(
        &self,
        block: &Block,
        _ctx: &WorkflowContext,
        _cancel: &CancellationToken,
    ) -> Result<BlockResult, HandlerError> {
        let Some(target) = block.logic_str("target_block_id") else {
            return Err(HandlerError::new(ErrorCode::ValidationError, "goto block requires target_block_id"));
        };
        let target_block_id: BlockId = target
            .parse()
            .map_err(|e: workforge_core::ParseIdError| HandlerError::new(ErrorCode::ValidationError, e.to_string()))?;

        Ok(BlockResult {
            control_signal: Some(ControlSignal::Goto(GotoSignal {
                target_block_id,
                defer: block.logic_bool("defer"),
                max_concurrent: block.logic_i64("max_concurrent").unwrap_or(10).clamp(1, u32::MAX as i64) as u32,
                loop_name: block.logic_str("loop_name").map(str::to_string),
            })),
            ..BlockResult::default()
        })
    }
}

/// Cooperatively cancellable sleep, clamped to `[0, MAX_SLEEP_DURATION_MS]`.
pub struct SleepHandler;

#[async_trait]
impl BlockHandler for SleepHandler {
    async fn execute(
        &self,
        block: &Block,
        _ctx: &WorkflowContext,
        cancel: &CancellationToken,
    ) -> Result<BlockResult, HandlerError> {
        let requested = block.logic_i64("sleep_duration_ms").unwrap_or(0);
        let clamped = requested.clamp(0, MAX_SLEEP_DURATION_MS) as u64;

        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(clamped)) => Ok(BlockResult::empty()),
            () = cancel.cancelled() => Err(HandlerError::new(ErrorCode::Cancelled, "run was cancelled")),
        }
    }
}

/// Surfaces the adapter's last-known coordinates. Registered only on
/// platforms with `has_location`; everywhere else the registry carries
/// an `UnsupportedStub` instead.
pub struct LocationHandler {
    coordinates: Coordinates,
}

impl LocationHandler {
    #[must_use]
    pub fn new(coordinates: Coordinates) -> Self {
        Self { coordinates }
    }
}

#[async_trait]
impl BlockHandler for LocationHandler {
    async fn execute(
        &self,
        block: &Block,
        _ctx: &WorkflowContext,
        _cancel: &CancellationToken,
    ) -> Result<BlockResult, HandlerError> {
        Ok(bind_output(
            block,
            "$state.location",
            serde_json::json!({
                "latitude": self.coordinates.latitude,
                "longitude": self.coordinates.longitude,
                "accuracyM": self.coordinates.accuracy_m,
            }),
        ))
    }
}

/// No agent backend is wired up; this records the resolved prompt so a
/// workflow author can see what would have been sent, rather than
/// fabricating a model response.
pub struct AgentHandler;

#[async_trait]
impl BlockHandler for AgentHandler {
    async fn execute(
        &self,
        block: &Block,
        ctx: &WorkflowContext,
        _cancel: &CancellationToken,
    ) -> Result<BlockResult, HandlerError> {
        let prompt = logic_scalar(block, ctx, "agent_prompt");
        let Some(prompt) = prompt.as_str().filter(|p| !p.trim().is_empty()) else {
            return Err(HandlerError::new(ErrorCode::ValidationError, "agent block requires a non-empty agent_prompt"));
        };

        Ok(bind_output(
            block,
            "$state.agentResult",
            serde_json::json!({ "prompt": prompt, "completion": null }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workforge_workflow::{BlockType, OnError, RunMeta, TriggerType};

    fn ctx() -> WorkflowContext {
        WorkflowContext::new(
            RunMeta {
                id: workforge_core::RunId::new(),
                workflow_id: workforge_core::WorkflowId::new(),
                version_id: workforge_core::WorkflowVersionId::new(),
                status: "running".into(),
                trigger_type: TriggerType::Api,
                started_at: chrono::Utc::now(),
                platform: "server".into(),
                device_id: None,
                org_id: None,
            },
            serde_json::Value::Null,
            None,
        )
    }

    fn block(block_type: BlockType, logic: serde_json::Value) -> Block {
        Block {
            id: workforge_core::BlockId::new(),
            name: "b".into(),
            block_type,
            logic: logic.as_object().cloned().unwrap_or_default(),
            order: 0,
            conditions: None,
            on_error: OnError::default(),
        }
    }

    #[tokio::test]
    async fn goto_handler_emits_control_signal() {
        let target = BlockId::new();
        let block = block(BlockType::Goto, serde_json::json!({"target_block_id": target.to_string(), "defer": true, "loop_name": "retry"}));
        let result = GotoHandler.execute(&block, &ctx(), &CancellationToken::new()).await.unwrap();
        match result.control_signal {
            Some(ControlSignal::Goto(signal)) => {
                assert_eq!(signal.target_block_id, target);
                assert!(signal.defer);
                assert_eq!(signal.loop_name.as_deref(), Some("retry"));
            }
            other => panic!("expected a goto signal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn goto_handler_rejects_unparsable_target() {
        let block = block(BlockType::Goto, serde_json::json!({"target_block_id": "not-a-block-id"}));
        let err = GotoHandler.execute(&block, &ctx(), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn sleep_handler_clamps_negative_duration_to_zero() {
        let block = block(BlockType::Sleep, serde_json::json!({"sleep_duration_ms": -50}));
        let start = std::time::Instant::now();
        SleepHandler.execute(&block, &ctx(), &CancellationToken::new()).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn sleep_handler_is_cancelled_promptly() {
        let block = block(BlockType::Sleep, serde_json::json!({"sleep_duration_ms": 2_000}));
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });
        let err = SleepHandler.execute(&block, &ctx(), &cancel).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Cancelled);
    }

    #[tokio::test]
    async fn location_handler_binds_coordinates() {
        let handler = LocationHandler::new(Coordinates { latitude: 1.0, longitude: 2.0, accuracy_m: Some(5.0) });
        let block = block(BlockType::Location, serde_json::json!({}));
        let result = handler.execute(&block, &ctx(), &CancellationToken::new()).await.unwrap();
        assert_eq!(result.state_delta.unwrap()["location"]["latitude"], serde_json::json!(1.0));
    }
}

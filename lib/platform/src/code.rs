//! `code` handler: sandboxed JavaScript execution via `rquickjs`.
//!
//! The sandbox exposes only `state`, `event`, and `secrets` as frozen
//! JSON values; it never gains a networking global, so
//! `code_allow_network` has nothing to grant against today — documented
//! in the project ledger rather than silently ignored.

use crate::support::bind_output;
use async_trait::async_trait;
use rquickjs::{Context, Runtime};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use workforge_interpreter::{BlockHandler, HandlerError};
use workforge_workflow::{Block, BlockResult, ErrorCode, WorkflowContext};

pub struct CodeHandler;

#[async_trait]
impl BlockHandler for CodeHandler {
    async fn execute(
        &self,
        block: &Block,
        ctx: &WorkflowContext,
        cancel: &CancellationToken,
    ) -> Result<BlockResult, HandlerError> {
        let Some(source) = block.logic_str("code_source") else {
            return Err(HandlerError::new(ErrorCode::ValidationError, "code block requires code_source"));
        };
        let source = source.to_string();
        let memory_limit_mb = block.logic_i64("code_memory_limit_mb").unwrap_or(128).max(1) as usize;
        let timeout_ms = block.logic_i64("code_timeout_ms").unwrap_or(5_000).max(0) as u64;

        let state_json = serde_json::to_string(&serde_json::Value::Object(ctx.state.clone()))
            .map_err(|e| HandlerError::new(ErrorCode::InternalError, e.to_string()))?;
        let event_json = serde_json::to_string(&ctx.event).map_err(|e| HandlerError::new(ErrorCode::InternalError, e.to_string()))?;
        let secrets_json = serde_json::to_string(&serde_json::Value::Object(ctx.secrets.clone()))
            .map_err(|e| HandlerError::new(ErrorCode::InternalError, e.to_string()))?;

        let cancel_for_sandbox = cancel.clone();
        let join = tokio::task::spawn_blocking(move || {
            run_sandboxed(&source, memory_limit_mb, timeout_ms, &state_json, &event_json, &secrets_json, cancel_for_sandbox)
        });

        tokio::select! {
            outcome = join => match outcome {
                Ok(Ok(value)) => Ok(bind_output(block, "$state.result", value)),
                Ok(Err(message)) => Err(HandlerError::new(ErrorCode::SandboxError, message)),
                Err(join_err) => Err(HandlerError::new(ErrorCode::InternalError, join_err.to_string())),
            },
            () = cancel.cancelled() => Err(HandlerError::new(ErrorCode::Cancelled, "run was cancelled")),
        }
    }
}

fn run_sandboxed(
    source: &str,
    memory_limit_mb: usize,
    timeout_ms: u64,
    state_json: &str,
    event_json: &str,
    secrets_json: &str,
    cancel: CancellationToken,
) -> Result<serde_json::Value, String> {
    let runtime = Runtime::new().map_err(|e| e.to_string())?;
    runtime.set_memory_limit(memory_limit_mb * 1024 * 1024);
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    runtime.set_interrupt_handler(Some(Box::new(move || Instant::now() >= deadline || cancel.is_cancelled())));

    let context = Context::full(&runtime).map_err(|e| e.to_string())?;
    let script = format!(
        "(function() {{\n  var state = {state_json};\n  var event = {event_json};\n  var secrets = Object.freeze({secrets_json});\n  var __result = (function() {{\n{source}\n  }})();\n  return JSON.stringify(__result === undefined ? null : __result);\n}})();"
    );

    let rendered: String = context
        .with(|ctx| ctx.eval(script.as_bytes()))
        .map_err(|e| e.to_string())?;

    serde_json::from_str(&rendered).map_err(|e| format!("code block returned non-JSON-serializable value: {e}"))
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
            serde_json::json!({"name": "World"}),
            Some(serde_json::json!({"counter": 41})),
        )
    }

    fn block(code_source: &str) -> Block {
        Block {
            id: workforge_core::BlockId::new(),
            name: "c".into(),
            block_type: BlockType::Code,
            logic: serde_json::json!({"code_source": code_source}).as_object().unwrap().clone(),
            order: 0,
            conditions: None,
            on_error: OnError::default(),
        }
    }

    #[tokio::test]
    async fn runs_javascript_against_a_frozen_state_view() {
        let block = block("return state.counter + 1;");
        let result = CodeHandler.execute(&block, &ctx(), &CancellationToken::new()).await.unwrap();
        assert_eq!(result.state_delta.unwrap()["result"], serde_json::json!(42));
    }

    #[tokio::test]
    async fn uncaught_exception_becomes_sandbox_error() {
        let block = block("throw new Error('kaboom');");
        let err = CodeHandler.execute(&block, &ctx(), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SandboxError);
    }

    #[tokio::test]
    async fn infinite_loop_is_interrupted_by_the_timeout() {
        let mut block = block("while (true) {}");
        block.logic.insert("code_timeout_ms".into(), serde_json::json!(50));
        let err = CodeHandler.execute(&block, &ctx(), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SandboxError);
    }
}

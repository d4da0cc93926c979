//! `validation` (required everywhere) plus the optional I/O-adjacent
//! types (`video`, `image`, `filesystem`, `ftp`) that a capable adapter
//! may register a real handler for.

use crate::support::{bind_output, logic_value};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use workforge_interpreter::{BlockHandler, HandlerError};
use workforge_workflow::{Block, BlockResult, ErrorCode, WorkflowContext};

/// Checks `validation_value` against `validation_rules`, a map of
/// `path -> rule` where `rule` is one of `required`, `string`, `number`,
/// `boolean`, `array`, `object`.
pub struct ValidationHandler;

#[async_trait]
impl BlockHandler for ValidationHandler {
    async fn execute(
        &self,
        block: &Block,
        ctx: &WorkflowContext,
        _cancel: &CancellationToken,
    ) -> Result<BlockResult, HandlerError> {
        let value = logic_value(block, ctx, "validation_value");
        let Value::Object(rules) = logic_value(block, ctx, "validation_rules") else {
            return Ok(BlockResult::empty());
        };

        let Value::Object(target) = &value else {
            return Err(HandlerError::new(ErrorCode::ValidationError, "validation_value must resolve to an object"));
        };

        for (field, rule) in &rules {
            let Some(rule) = rule.as_str() else { continue };
            let present = target.get(field);
            let ok = match rule {
                "required" => present.is_some_and(|v| !v.is_null()),
                "string" => present.is_some_and(Value::is_string),
                "number" => present.is_some_and(Value::is_number),
                "boolean" => present.is_some_and(Value::is_boolean),
                "array" => present.is_some_and(Value::is_array),
                "object" => present.is_some_and(Value::is_object),
                _ => true,
            };
            if !ok {
                return Err(HandlerError::new(
                    ErrorCode::ValidationError,
                    format!("field '{field}' failed rule '{rule}'"),
                ));
            }
        }

        Ok(BlockResult::empty())
    }
}

/// Pure-metadata handler: records that a video asset reference was seen,
/// without decoding or transcoding it. Registered wherever `has_video`.
pub struct VideoHandler;

#[async_trait]
impl BlockHandler for VideoHandler {
    async fn execute(
        &self,
        block: &Block,
        ctx: &WorkflowContext,
        _cancel: &CancellationToken,
    ) -> Result<BlockResult, HandlerError> {
        let source = logic_value(block, ctx, "video_source");
        Ok(bind_output(block, "$state.video", serde_json::json!({ "source": source })))
    }
}

/// Mirrors `VideoHandler` for still images. Registered wherever the
/// adapter carries `image` support (Server).
pub struct ImageHandler;

#[async_trait]
impl BlockHandler for ImageHandler {
    async fn execute(
        &self,
        block: &Block,
        ctx: &WorkflowContext,
        _cancel: &CancellationToken,
    ) -> Result<BlockResult, HandlerError> {
        let source = logic_value(block, ctx, "image_source");
        Ok(bind_output(block, "$state.image", serde_json::json!({ "source": source })))
    }
}

/// Reads a file relative to the adapter's filesystem root. Writes are
/// intentionally out of scope: the distilled spec only names read access
/// for this block type's invariants.
pub struct FilesystemHandler {
    root: PathBuf,
}

impl FilesystemHandler {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, HandlerError> {
        let candidate = self.root.join(relative);
        let canonical_root = self
            .root
            .canonicalize()
            .map_err(|e| HandlerError::new(ErrorCode::InternalError, e.to_string()))?;
        let canonical = candidate
            .canonicalize()
            .map_err(|e| HandlerError::new(ErrorCode::ValidationError, format!("filesystem_path not found: {e}")))?;
        if !canonical.starts_with(&canonical_root) {
            return Err(HandlerError::new(ErrorCode::ValidationError, "filesystem_path escapes the adapter root"));
        }
        Ok(canonical)
    }
}

#[async_trait]
impl BlockHandler for FilesystemHandler {
    async fn execute(
        &self,
        block: &Block,
        _ctx: &WorkflowContext,
        _cancel: &CancellationToken,
    ) -> Result<BlockResult, HandlerError> {
        let Some(relative) = block.logic_str("filesystem_path") else {
            return Err(HandlerError::new(ErrorCode::ValidationError, "filesystem block requires filesystem_path"));
        };
        let path = self.resolve(relative)?;
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| HandlerError::new(ErrorCode::UpstreamError, e.to_string()))?;
        Ok(bind_output(block, "$state.fileContents", Value::String(contents)))
    }
}

/// Unimplemented beyond capability gating: the distilled spec names FTP
/// only as a type adapters may opt into, with no operation semantics.
pub struct FtpHandler;

#[async_trait]
impl BlockHandler for FtpHandler {
    async fn execute(
        &self,
        _block: &Block,
        _ctx: &WorkflowContext,
        _cancel: &CancellationToken,
    ) -> Result<BlockResult, HandlerError> {
        Err(HandlerError::new(ErrorCode::InternalError, "ftp block has no configured transport"))
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
            Value::Null,
            None,
        )
    }

    fn block(logic: Value) -> Block {
        Block {
            id: workforge_core::BlockId::new(),
            name: "b".into(),
            block_type: BlockType::Validation,
            logic: logic.as_object().cloned().unwrap_or_default(),
            order: 0,
            conditions: None,
            on_error: OnError::default(),
        }
    }

    #[tokio::test]
    async fn validation_handler_passes_satisfied_rules() {
        let block = block(serde_json::json!({
            "validation_value": {"name": "Alice"},
            "validation_rules": {"name": "required"},
        }));
        assert!(ValidationHandler.execute(&block, &ctx(), &CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn validation_handler_fails_missing_required_field() {
        let block = block(serde_json::json!({
            "validation_value": {},
            "validation_rules": {"name": "required"},
        }));
        let err = ValidationHandler.execute(&block, &ctx(), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn filesystem_handler_rejects_paths_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let handler = FilesystemHandler::new(dir.path().to_path_buf());
        let mut block = block(serde_json::json!({"filesystem_path": "../../etc/passwd"}));
        block.block_type = BlockType::Filesystem;
        let err = handler.execute(&block, &ctx(), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn filesystem_handler_reads_a_file_under_the_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("greeting.txt"), "hello").unwrap();
        let handler = FilesystemHandler::new(dir.path().to_path_buf());
        let mut block = block(serde_json::json!({"filesystem_path": "greeting.txt"}));
        block.block_type = BlockType::Filesystem;
        let result = handler.execute(&block, &ctx(), &CancellationToken::new()).await.unwrap();
        assert_eq!(result.state_delta.unwrap()["fileContents"], serde_json::json!("hello"));
    }
}

//! Block Handler Registry (C2): capability-gated `blockType -> handler` dispatch.

use crate::error::{HandlerError, RegistryError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use workforge_workflow::{Block, BlockResult, BlockType, ErrorCode, WorkflowContext};

/// What a platform adapter can actually do. Gates which block types get a
/// real handler versus an unsupported stub.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub has_camera: bool,
    pub has_filesystem: bool,
    pub has_ftp: bool,
    pub has_ui: bool,
    pub has_video: bool,
    pub has_location: bool,
}

/// A single block type's executor. Implementations receive a read-only
/// context — the Interpreter is the only thing that ever mutates
/// `WorkflowContext.state`.
#[async_trait]
pub trait BlockHandler: Send + Sync {
    async fn execute(
        &self,
        block: &Block,
        ctx: &WorkflowContext,
        cancel: &CancellationToken,
    ) -> Result<BlockResult, HandlerError>;
}

/// Always fails `CAPABILITY_UNAVAILABLE`, naming the platform. Registered
/// by an adapter for block types it cannot support at all.
pub struct UnsupportedStub {
    platform: &'static str,
    block_type: BlockType,
}

impl UnsupportedStub {
    #[must_use]
    pub fn new(platform: &'static str, block_type: BlockType) -> Self {
        Self { platform, block_type }
    }
}

#[async_trait]
impl BlockHandler for UnsupportedStub {
    async fn execute(
        &self,
        _block: &Block,
        _ctx: &WorkflowContext,
        _cancel: &CancellationToken,
    ) -> Result<BlockResult, HandlerError> {
        Err(HandlerError::new(
            ErrorCode::CapabilityUnavailable,
            format!(
                "block type '{}' is not supported on platform '{}'",
                self.block_type.as_str(),
                self.platform
            ),
        ))
    }
}

/// Returns `{}` with no effect. Used for `ui_*` types: the Interpreter
/// intercepts those before dispatch (see `Interpreter::run_main_sequence`,
/// which pauses on `block.block_type.is_ui()` without ever calling a
/// handler), so this handler only exists to satisfy registry completeness
/// and is not expected to be reached in normal operation.
pub struct Passthrough;

#[async_trait]
impl BlockHandler for Passthrough {
    async fn execute(
        &self,
        _block: &Block,
        _ctx: &WorkflowContext,
        _cancel: &CancellationToken,
    ) -> Result<BlockResult, HandlerError> {
        Ok(BlockResult::empty())
    }
}

/// The populated `blockType -> handler` map, built once by a platform
/// adapter via [`crate::adapter::PlatformAdapter::register_blocks`].
#[derive(Default)]
pub struct BlockHandlerRegistry {
    handlers: HashMap<BlockType, Arc<dyn BlockHandler>>,
}

impl BlockHandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, block_type: BlockType, handler: Arc<dyn BlockHandler>) {
        self.handlers.insert(block_type, handler);
    }

    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownBlockType`] if nothing is
    /// registered for `block_type`.
    pub fn resolve(&self, block_type: BlockType) -> Result<&Arc<dyn BlockHandler>, RegistryError> {
        self.handlers
            .get(&block_type)
            .ok_or(RegistryError::UnknownBlockType { block_type })
    }

    /// Required registrations per the distilled spec: all six data types,
    /// all six flow types, `validation`, and `video`.
    #[must_use]
    pub fn missing_required(&self) -> Vec<BlockType> {
        const REQUIRED: &[BlockType] = &[
            BlockType::Object,
            BlockType::String,
            BlockType::Array,
            BlockType::Math,
            BlockType::Date,
            BlockType::Normalize,
            BlockType::Fetch,
            BlockType::Agent,
            BlockType::Goto,
            BlockType::Sleep,
            BlockType::Location,
            BlockType::Code,
            BlockType::Validation,
            BlockType::Video,
        ];
        REQUIRED
            .iter()
            .copied()
            .filter(|ty| !self.handlers.contains_key(ty))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_unknown_type_fails() {
        let registry = BlockHandlerRegistry::new();
        let err = registry.resolve(BlockType::Fetch).err().expect("resolve should fail for unregistered type");
        assert_eq!(err, RegistryError::UnknownBlockType { block_type: BlockType::Fetch });
    }

    #[test]
    fn resolve_returns_registered_handler() {
        let mut registry = BlockHandlerRegistry::new();
        registry.register(BlockType::UiForm, Arc::new(Passthrough));
        assert!(registry.resolve(BlockType::UiForm).is_ok());
    }

    #[test]
    fn missing_required_lists_unregistered_required_types() {
        let mut registry = BlockHandlerRegistry::new();
        registry.register(BlockType::Object, Arc::new(Passthrough));
        let missing = registry.missing_required();
        assert!(missing.contains(&BlockType::Fetch));
        assert!(!missing.contains(&BlockType::Object));
    }

    #[tokio::test]
    async fn unsupported_stub_fails_capability_unavailable() {
        let stub = UnsupportedStub::new("cloud-worker", BlockType::Ftp);
        let block = test_block(BlockType::Ftp);
        let ctx = test_context();
        let err = stub
            .execute(&block, &ctx, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CapabilityUnavailable);
        assert!(err.message.contains("cloud-worker"));
    }

    fn test_block(block_type: BlockType) -> Block {
        Block {
            id: workforge_core::BlockId::new(),
            name: "b".into(),
            block_type,
            logic: serde_json::Map::new(),
            order: 0,
            conditions: None,
            on_error: Default::default(),
        }
    }

    fn test_context() -> WorkflowContext {
        WorkflowContext::new(
            workforge_workflow::RunMeta {
                id: workforge_core::RunId::new(),
                workflow_id: workforge_core::WorkflowId::new(),
                version_id: workforge_core::WorkflowVersionId::new(),
                status: "running".into(),
                trigger_type: workforge_workflow::TriggerType::Api,
                started_at: chrono::Utc::now(),
                platform: "server".into(),
                device_id: None,
                org_id: None,
            },
            serde_json::Value::Null,
            None,
        )
    }
}

//! A published or draft ordered sequence of blocks.

use crate::block::{Block, BlockType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use workforge_core::{WorkflowId, WorkflowVersionId};
use std::collections::HashSet;

/// How a workflow version is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Interactive,
    Api,
    Schedule,
    Hook,
    Vision,
}

/// Draft versions are editable and never executed by a real trigger;
/// published versions are immutable and are the only ones eligible for
/// `NO_PUBLISHED_VERSION`-checked triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Draft,
    Published,
}

/// Where a version's blocks are permitted to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionEnvironment {
    Cloud,
    Desktop,
    Mobile,
    Kiosk,
}

/// Block types a public (unauthenticated) trigger may execute. Anything
/// else present in the version's block list causes the Execution Service
/// to refuse the trigger with `RESTRICTED_BLOCK_TYPE` before dispatch.
pub const PUBLIC_RUN_ALLOWED_TYPES: &[BlockType] = &[
    BlockType::Object,
    BlockType::String,
    BlockType::Array,
    BlockType::Math,
    BlockType::Date,
    BlockType::Normalize,
    BlockType::Fetch,
    BlockType::Agent,
    BlockType::Code,
    BlockType::Goto,
    BlockType::Sleep,
    BlockType::Validation,
    BlockType::UiForm,
    BlockType::UiTable,
    BlockType::UiDetails,
];

/// An ordered, versioned definition of a workflow's blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowVersion {
    pub id: WorkflowVersionId,
    pub workflow_id: WorkflowId,
    /// Ordered by `Block.order`; the Interpreter indexes into this slice.
    pub blocks: Vec<Block>,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub trigger_config: Value,
    pub execution_environments: HashSet<ExecutionEnvironment>,
    pub status: VersionStatus,
}

impl WorkflowVersion {
    /// Returns blocks sorted by `order`, the sequence the Interpreter walks.
    #[must_use]
    pub fn ordered_blocks(&self) -> Vec<&Block> {
        let mut blocks: Vec<&Block> = self.blocks.iter().collect();
        blocks.sort_by_key(|b| b.order);
        blocks
    }

    /// Finds the index (within `ordered_blocks`) of the block with the
    /// given id, used by `goto` target resolution.
    #[must_use]
    pub fn index_of(&self, ordered: &[&Block], block_id: workforge_core::BlockId) -> Option<usize> {
        ordered.iter().position(|b| b.id == block_id)
    }

    /// First block type in this version's list that is not on the public
    /// allowlist, if any.
    #[must_use]
    pub fn first_restricted_block_type(&self) -> Option<BlockType> {
        self.blocks
            .iter()
            .map(|b| b.block_type)
            .find(|ty| !PUBLIC_RUN_ALLOWED_TYPES.contains(ty))
    }
}

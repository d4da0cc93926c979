//! The declarative, immutable workflow step.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use workforge_core::BlockId;

/// The type of a block, and therefore which handler dispatches it.
///
/// Closed sum: adding a new block type means adding a variant here, a
/// handler in the registry, and (if it should be reachable from a public
/// trigger) an entry in [`crate::version::PUBLIC_RUN_ALLOWED_TYPES`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Object,
    String,
    Array,
    Math,
    Date,
    Normalize,
    Fetch,
    Agent,
    Goto,
    Sleep,
    Code,
    Location,
    Image,
    Filesystem,
    Ftp,
    Validation,
    Video,
    UiCamera,
    UiForm,
    UiTable,
    UiDetails,
}

impl BlockType {
    /// Whether this block type suspends the run for user interaction.
    #[must_use]
    pub fn is_ui(self) -> bool {
        matches!(
            self,
            Self::UiCamera | Self::UiForm | Self::UiTable | Self::UiDetails
        )
    }

    /// Returns a lowercase, snake_case name matching the wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::String => "string",
            Self::Array => "array",
            Self::Math => "math",
            Self::Date => "date",
            Self::Normalize => "normalize",
            Self::Fetch => "fetch",
            Self::Agent => "agent",
            Self::Goto => "goto",
            Self::Sleep => "sleep",
            Self::Code => "code",
            Self::Location => "location",
            Self::Image => "image",
            Self::Filesystem => "filesystem",
            Self::Ftp => "ftp",
            Self::Validation => "validation",
            Self::Video => "video",
            Self::UiCamera => "ui_camera",
            Self::UiForm => "ui_form",
            Self::UiTable => "ui_table",
            Self::UiDetails => "ui_details",
        }
    }
}

/// Policy for what the Interpreter does when a block's executor fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OnError {
    /// Abort the run with `Run.status = failed` (default).
    FailRun,
    /// Record the failed step and advance to the next block.
    Continue,
    /// Record the failed step and jump to the named block.
    Goto { block_id: BlockId },
}

impl Default for OnError {
    fn default() -> Self {
        Self::FailRun
    }
}

/// An immutable declarative unit within a [`crate::version::WorkflowVersion`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub name: String,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    /// Untyped option bag; values may be reference strings resolved at
    /// dispatch time (see `workforge_workflow::value`).
    #[serde(default)]
    pub logic: Map<String, Value>,
    /// Position within the version's block list. Source order, not
    /// necessarily execution order once `goto` is involved.
    pub order: u32,
    /// Optional guard; if present and it resolves falsy, the Interpreter
    /// records a skipped Step instead of dispatching.
    #[serde(default)]
    pub conditions: Option<Value>,
    /// Recovery policy used by the Interpreter on executor failure.
    #[serde(default)]
    pub on_error: OnError,
}

impl Block {
    /// Reads a string field from `logic`.
    #[must_use]
    pub fn logic_str(&self, key: &str) -> Option<&str> {
        self.logic.get(key).and_then(Value::as_str)
    }

    /// Reads an i64 field from `logic`.
    #[must_use]
    pub fn logic_i64(&self, key: &str) -> Option<i64> {
        self.logic.get(key).and_then(Value::as_i64)
    }

    /// Reads a bool field from `logic`, defaulting to `false`.
    #[must_use]
    pub fn logic_bool(&self, key: &str) -> bool {
        self.logic
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

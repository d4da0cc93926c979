//! Handlers for the six data block types: `object`, `string`, `array`,
//! `math`, `date`, `normalize`. These never touch the network or the
//! filesystem, so every platform adapter registers all six unconditionally.

use crate::support::{bind_output, logic_scalar, logic_value};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use workforge_workflow::{Block, BlockResult, ErrorCode, WorkflowContext};
use workforge_interpreter::{BlockHandler, HandlerError};

/// Copies `object_value` (resolved against the context) to its bind path.
/// The simplest of the data handlers: a literal-or-reference passthrough.
pub struct ObjectHandler;

#[async_trait]
impl BlockHandler for ObjectHandler {
    async fn execute(
        &self,
        block: &Block,
        ctx: &WorkflowContext,
        _cancel: &CancellationToken,
    ) -> Result<BlockResult, HandlerError> {
        let value = logic_value(block, ctx, "object_value");
        Ok(bind_output(block, "$state.data", value))
    }
}

/// Renders `string_template` and binds it to `string_outputKey` (falling
/// back to `bind_to`, then `$state.result`).
pub struct StringHandler;

#[async_trait]
impl BlockHandler for StringHandler {
    async fn execute(
        &self,
        block: &Block,
        ctx: &WorkflowContext,
        _cancel: &CancellationToken,
    ) -> Result<BlockResult, HandlerError> {
        let Some(template) = block.logic_str("string_template") else {
            return Err(HandlerError::new(
                ErrorCode::ValidationError,
                "string block requires string_template",
            ));
        };
        let rendered = logic_scalar(block, ctx, "string_template");
        let _ = template;
        let default_path = "$state.result";
        let bind_to = block
            .logic_str("string_outputKey")
            .or_else(|| block.logic_str("bind_to"))
            .unwrap_or(default_path);
        Ok(bind_output(block, bind_to, rendered))
    }
}

/// Applies a small set of array transforms to `array_items`.
pub struct ArrayHandler;

#[async_trait]
impl BlockHandler for ArrayHandler {
    async fn execute(
        &self,
        block: &Block,
        ctx: &WorkflowContext,
        _cancel: &CancellationToken,
    ) -> Result<BlockResult, HandlerError> {
        let items = logic_value(block, ctx, "array_items");
        let Value::Array(items) = items else {
            return Err(HandlerError::new(
                ErrorCode::ValidationError,
                "array block requires array_items to resolve to a JSON array",
            ));
        };

        let result = match block.logic_str("array_operation").unwrap_or("identity") {
            "flatten" => Value::Array(
                items
                    .into_iter()
                    .flat_map(|v| match v {
                        Value::Array(inner) => inner,
                        other => vec![other],
                    })
                    .collect(),
            ),
            "unique" => {
                let mut seen = Vec::new();
                for item in items {
                    if !seen.contains(&item) {
                        seen.push(item);
                    }
                }
                Value::Array(seen)
            }
            "reverse" => {
                let mut rev = items;
                rev.reverse();
                Value::Array(rev)
            }
            _ => Value::Array(items),
        };

        Ok(bind_output(block, "$state.result", result))
    }
}

/// Applies one arithmetic operation across `math_operands`.
pub struct MathHandler;

#[async_trait]
impl BlockHandler for MathHandler {
    async fn execute(
        &self,
        block: &Block,
        ctx: &WorkflowContext,
        _cancel: &CancellationToken,
    ) -> Result<BlockResult, HandlerError> {
        let operands = logic_value(block, ctx, "math_operands");
        let Value::Array(operands) = operands else {
            return Err(HandlerError::new(
                ErrorCode::ValidationError,
                "math block requires math_operands to resolve to a JSON array",
            ));
        };
        let numbers: Option<Vec<f64>> = operands.iter().map(Value::as_f64).collect();
        let Some(numbers) = numbers else {
            return Err(HandlerError::new(
                ErrorCode::ValidationError,
                "math_operands must all be numeric",
            ));
        };
        if numbers.is_empty() {
            return Err(HandlerError::new(
                ErrorCode::ValidationError,
                "math block requires at least one operand",
            ));
        }

        let operation = block.logic_str("math_operation").unwrap_or("add");
        let result = match operation {
            "add" => numbers.iter().sum::<f64>(),
            "subtract" => numbers[1..].iter().fold(numbers[0], |acc, n| acc - n),
            "multiply" => numbers.iter().product::<f64>(),
            "divide" => {
                let mut acc = numbers[0];
                for n in &numbers[1..] {
                    if *n == 0.0 {
                        return Err(HandlerError::new(ErrorCode::ValidationError, "division by zero"));
                    }
                    acc /= n;
                }
                acc
            }
            other => {
                return Err(HandlerError::new(
                    ErrorCode::ValidationError,
                    format!("unknown math_operation: {other}"),
                ))
            }
        };

        Ok(bind_output(block, "$state.result", serde_json::json!(result)))
    }
}

/// `date_operation` ∈ `{now, add, format}` against an RFC 3339 timestamp.
pub struct DateHandler;

#[async_trait]
impl BlockHandler for DateHandler {
    async fn execute(
        &self,
        block: &Block,
        ctx: &WorkflowContext,
        _cancel: &CancellationToken,
    ) -> Result<BlockResult, HandlerError> {
        let operation = block.logic_str("date_operation").unwrap_or("now");
        let result = match operation {
            "now" => Value::String(Utc::now().to_rfc3339()),
            "add" => {
                let base = parse_date(block, ctx)?;
                let amount = block.logic_i64("date_amount").unwrap_or(0);
                let unit = block.logic_str("date_unit").unwrap_or("seconds");
                let delta = match unit {
                    "seconds" => ChronoDuration::seconds(amount),
                    "minutes" => ChronoDuration::minutes(amount),
                    "hours" => ChronoDuration::hours(amount),
                    "days" => ChronoDuration::days(amount),
                    other => {
                        return Err(HandlerError::new(
                            ErrorCode::ValidationError,
                            format!("unknown date_unit: {other}"),
                        ))
                    }
                };
                Value::String((base + delta).to_rfc3339())
            }
            "format" => {
                let base = parse_date(block, ctx)?;
                match block.logic_str("date_format").unwrap_or("rfc3339") {
                    "unix" => Value::Number(base.timestamp().into()),
                    "rfc3339" => Value::String(base.to_rfc3339()),
                    other => {
                        return Err(HandlerError::new(
                            ErrorCode::ValidationError,
                            format!("unknown date_format: {other}"),
                        ))
                    }
                }
            }
            other => {
                return Err(HandlerError::new(
                    ErrorCode::ValidationError,
                    format!("unknown date_operation: {other}"),
                ))
            }
        };

        Ok(bind_output(block, "$state.result", result))
    }
}

fn parse_date(block: &Block, ctx: &WorkflowContext) -> Result<DateTime<Utc>, HandlerError> {
    let value = logic_scalar(block, ctx, "date_value");
    let Some(s) = value.as_str() else {
        return Err(HandlerError::new(ErrorCode::ValidationError, "date_value must be a string"));
    };
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| HandlerError::new(ErrorCode::ValidationError, format!("invalid date_value: {e}")))
}

/// Recursively trims strings in `normalize_value`, lowercasing them when
/// `normalize_lowercase` is set.
pub struct NormalizeHandler;

#[async_trait]
impl BlockHandler for NormalizeHandler {
    async fn execute(
        &self,
        block: &Block,
        ctx: &WorkflowContext,
        _cancel: &CancellationToken,
    ) -> Result<BlockResult, HandlerError> {
        let value = logic_value(block, ctx, "normalize_value");
        let lowercase = block.logic_bool("normalize_lowercase");
        Ok(bind_output(block, "$state.result", normalize(value, lowercase)))
    }
}

fn normalize(value: Value, lowercase: bool) -> Value {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            Value::String(if lowercase { trimmed.to_lowercase() } else { trimmed.to_string() })
        }
        Value::Array(items) => Value::Array(items.into_iter().map(|v| normalize(v, lowercase)).collect()),
        Value::Object(map) => {
            Value::Object(map.into_iter().map(|(k, v)| (k, normalize(v, lowercase))).collect())
        }
        other => other,
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
            serde_json::json!({"name": "World"}),
            Some(serde_json::json!({"counter": 42})),
        )
    }

    fn block(block_type: BlockType, logic: Value) -> Block {
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
    async fn object_handler_binds_resolved_value() {
        let block = block(BlockType::Object, serde_json::json!({"object_value": {"counter": "$state.counter"}, "bind_to": "$state.data"}));
        let result = ObjectHandler.execute(&block, &ctx(), &CancellationToken::new()).await.unwrap();
        let delta = result.state_delta.unwrap();
        assert_eq!(delta["data"]["counter"], serde_json::json!(42));
    }

    #[tokio::test]
    async fn string_handler_renders_template_and_binds_output_key() {
        let block = block(
            BlockType::String,
            serde_json::json!({"string_template": "Hello, {{event.name}}!", "string_outputKey": "greeting"}),
        );
        let result = StringHandler.execute(&block, &ctx(), &CancellationToken::new()).await.unwrap();
        let delta = result.state_delta.unwrap();
        assert_eq!(delta["greeting"], serde_json::json!("Hello, World!"));
    }

    #[tokio::test]
    async fn string_handler_rejects_missing_template() {
        let block = block(BlockType::String, serde_json::json!({}));
        let err = StringHandler.execute(&block, &ctx(), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn math_handler_adds_operands() {
        let block = block(BlockType::Math, serde_json::json!({"math_operation": "add", "math_operands": [1, 2, 3]}));
        let result = MathHandler.execute(&block, &ctx(), &CancellationToken::new()).await.unwrap();
        assert_eq!(result.state_delta.unwrap()["result"], serde_json::json!(6.0));
    }

    #[tokio::test]
    async fn math_handler_rejects_division_by_zero() {
        let block = block(BlockType::Math, serde_json::json!({"math_operation": "divide", "math_operands": [1, 0]}));
        let err = MathHandler.execute(&block, &ctx(), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn array_handler_deduplicates() {
        let block = block(BlockType::Array, serde_json::json!({"array_operation": "unique", "array_items": [1, 1, 2]}));
        let result = ArrayHandler.execute(&block, &ctx(), &CancellationToken::new()).await.unwrap();
        assert_eq!(result.state_delta.unwrap()["result"], serde_json::json!([1, 2]));
    }

    #[tokio::test]
    async fn normalize_handler_trims_and_lowercases() {
        let block = block(
            BlockType::Normalize,
            serde_json::json!({"normalize_value": "  Hello  ", "normalize_lowercase": true}),
        );
        let result = NormalizeHandler.execute(&block, &ctx(), &CancellationToken::new()).await.unwrap();
        assert_eq!(result.state_delta.unwrap()["result"], serde_json::json!("hello"));
    }

    #[tokio::test]
    async fn date_handler_formats_unix_timestamp() {
        let block = block(
            BlockType::Date,
            serde_json::json!({"date_operation": "format", "date_value": "2024-01-01T00:00:00Z", "date_format": "unix"}),
        );
        let result = DateHandler.execute(&block, &ctx(), &CancellationToken::new()).await.unwrap();
        assert_eq!(result.state_delta.unwrap()["result"], serde_json::json!(1_704_067_200i64));
    }
}

//! Interpreter (C4): the sequencing state machine described in the
//! design notes as "index-and-step-counter, not recursion".

use crate::executor::{BlockExecutor, EventSink, ExecutorPolicy};
use crate::registry::BlockHandlerRegistry;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use workforge_core::RunId;
use workforge_workflow::{
    value, Block, BlockType, ControlSignal, ErrorCode, OnError, PausedRunState, RunMeta, Step,
    StepStatus, WorkflowContext, WorkflowVersion,
};

/// Step/time budgets for one run.
#[derive(Debug, Clone, Copy)]
pub struct Budgets {
    pub max_steps: u32,
    pub run_timeout: Duration,
}

impl Budgets {
    #[must_use]
    pub fn server_default() -> Self {
        Self {
            max_steps: 1000,
            run_timeout: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn public_default() -> Self {
        Self {
            max_steps: 1000,
            run_timeout: Duration::from_secs(30),
        }
    }
}

/// What `executeRun`/`resumeRun` produce.
#[derive(Debug, Clone)]
pub enum RunResult {
    Completed { steps: Vec<Step> },
    Failed { steps: Vec<Step>, error_message: String },
    Cancelled { steps: Vec<Step> },
    AwaitingAction { paused: PausedRunState },
}

struct DeferredBranch {
    dispatch_order: u32,
    start_index: usize,
    max_concurrent: u32,
}

/// Sequences a `WorkflowVersion`'s blocks against a `WorkflowContext`,
/// consuming control-flow signals and enforcing run budgets.
pub struct Interpreter<'a> {
    registry: &'a BlockHandlerRegistry,
    sink: &'a dyn EventSink,
}

impl<'a> Interpreter<'a> {
    #[must_use]
    pub fn new(registry: &'a BlockHandlerRegistry, sink: &'a dyn EventSink) -> Self {
        Self { registry, sink }
    }

    /// Fresh run from block index 0.
    pub async fn execute_run(
        &self,
        version: &WorkflowVersion,
        mut ctx: WorkflowContext,
        policy: ExecutorPolicy,
        budgets: Budgets,
        cancel: &CancellationToken,
    ) -> RunResult {
        let ordered = version.ordered_blocks();
        self.run_from(&ordered, &mut ctx, 0, policy, budgets, cancel).await
    }

    /// Continuation after a `ui_*` block paused the run. `ctx` must
    /// already have been rehydrated from the paused snapshot, with any
    /// `submitAction` payload merged into its state by the caller.
    pub async fn resume_run(
        &self,
        version: &WorkflowVersion,
        from_block_index: usize,
        mut ctx: WorkflowContext,
        policy: ExecutorPolicy,
        budgets: Budgets,
        cancel: &CancellationToken,
    ) -> RunResult {
        let ordered = version.ordered_blocks();
        self.run_from(&ordered, &mut ctx, from_block_index, policy, budgets, cancel)
            .await
    }

    async fn run_from(
        &self,
        ordered: &[&Block],
        ctx: &mut WorkflowContext,
        start_index: usize,
        policy: ExecutorPolicy,
        budgets: Budgets,
        cancel: &CancellationToken,
    ) -> RunResult {
        let run_id = ctx.run.id;
        let started = Instant::now();
        let mut steps = Vec::new();
        let mut steps_executed: u32 = 0;
        let mut execution_order: u32 = 0;
        let mut deferred = Vec::new();

        let outcome = self
            .run_main_sequence(
                ordered,
                ctx,
                start_index,
                run_id,
                policy,
                budgets,
                started,
                &mut steps,
                &mut steps_executed,
                &mut execution_order,
                &mut deferred,
                cancel,
            )
            .await;

        match outcome {
            MainOutcome::Completed => {
                self.join_deferred(ordered, ctx, deferred, run_id, policy, &mut steps, &mut execution_order, cancel)
                    .await;
                RunResult::Completed { steps }
            }
            MainOutcome::Failed(message) => RunResult::Failed { steps, error_message: message },
            MainOutcome::Cancelled => RunResult::Cancelled { steps },
            MainOutcome::AwaitingAction(paused) => RunResult::AwaitingAction { paused },
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_main_sequence(
        &self,
        ordered: &[&Block],
        ctx: &mut WorkflowContext,
        mut i: usize,
        run_id: RunId,
        policy: ExecutorPolicy,
        budgets: Budgets,
        started: Instant,
        steps: &mut Vec<Step>,
        steps_executed: &mut u32,
        execution_order: &mut u32,
        deferred: &mut Vec<DeferredBranch>,
        cancel: &CancellationToken,
    ) -> MainOutcome {
        let n = ordered.len();
        while i < n {
            if cancel.is_cancelled() {
                return MainOutcome::Cancelled;
            }
            if started.elapsed() > budgets.run_timeout {
                return MainOutcome::Failed("run exceeded its time budget".into());
            }
            if *steps_executed >= budgets.max_steps {
                return MainOutcome::Failed("run exceeded its step budget".into());
            }

            let block = ordered[i];

            if let Some(conditions) = &block.conditions {
                let resolved = value::resolve_value(conditions, ctx);
                if !truthy(&resolved) {
                    steps.push(skipped_step(block, *execution_order));
                    *execution_order += 1;
                    i += 1;
                    continue;
                }
            }

            if block.block_type.is_ui() {
                let running = running_step(block, *execution_order);
                self.sink.step_started(run_id, &running).await;
                *execution_order += 1;
                return MainOutcome::AwaitingAction(PausedRunState {
                    current_block_index: i,
                    context_snapshot: ctx.snapshot(),
                    paused_block_id: block.id,
                    paused_ui_config: block.logic.clone(),
                });
            }

            let executor = BlockExecutor::new(self.registry, self.sink);
            let (step, result) = executor
                .execute(run_id, block, ctx, *execution_order, policy, cancel)
                .await;
            *execution_order += 1;
            *steps_executed += 1;
            let step_status = step.status;
            let step_error_code = step.error.as_ref().map(|e| e.code);
            let step_error_message = step.error.as_ref().map(|e| e.message.clone());
            steps.push(step);

            match (step_status, result) {
                (StepStatus::Completed, Some(result)) => {
                    if let Some(delta) = &result.state_delta {
                        let _ = value::apply_delta(ctx, delta);
                    }
                    for artifact in result.artifacts {
                        ctx.artifacts.push(artifact);
                    }
                    match result.control_signal {
                        Some(ControlSignal::Goto(signal)) => {
                            match self.apply_goto(ordered, ctx, block, &signal, deferred) {
                                Ok(Some(next_index)) => {
                                    i = next_index;
                                    continue;
                                }
                                Ok(None) => {
                                    // deferred: queued, main sequence advances normally
                                    i += 1;
                                    continue;
                                }
                                Err(code) => {
                                    return MainOutcome::Failed(match code {
                                        ErrorCode::GotoTargetNotFound => "goto target block not found".into(),
                                        ErrorCode::LoopLimitExceeded => "loop max iterations exceeded".into(),
                                        _ => "goto failed".into(),
                                    });
                                }
                            }
                        }
                        Some(ControlSignal::Skip) | None => {
                            i += 1;
                        }
                        Some(ControlSignal::Pause { .. }) => {
                            // Handlers signal pause only via the ui_* path above;
                            // a non-UI handler requesting pause is treated as a
                            // no-op continuation.
                            i += 1;
                        }
                    }
                }
                (StepStatus::Failed, _) => {
                    if step_error_code.is_some_and(ErrorCode::is_fatal) {
                        return MainOutcome::Failed(fatal_message(step_error_code, step_error_message));
                    }
                    match &block.on_error {
                        OnError::FailRun => {
                            return MainOutcome::Failed(fatal_message(step_error_code, step_error_message));
                        }
                        OnError::Continue => {
                            i += 1;
                        }
                        OnError::Goto { block_id } => match ordered.iter().position(|b| b.id == *block_id) {
                            Some(idx) => i = idx,
                            None => return MainOutcome::Failed("goto target block not found".into()),
                        },
                    }
                }
                _ => {
                    i += 1;
                }
            }
        }

        MainOutcome::Completed
    }

    /// Applies a `goto` control signal. Returns `Ok(Some(index))` to jump
    /// immediately, `Ok(None)` when the branch was queued for deferred
    /// execution, or `Err(code)` on a fatal goto failure.
    fn apply_goto(
        &self,
        ordered: &[&Block],
        ctx: &mut WorkflowContext,
        current_block: &Block,
        signal: &workforge_workflow::GotoSignal,
        deferred: &mut Vec<DeferredBranch>,
    ) -> Result<Option<usize>, ErrorCode> {
        let target_index = ordered
            .iter()
            .position(|b| b.id == signal.target_block_id)
            .ok_or(ErrorCode::GotoTargetNotFound)?;

        if let Some(loop_name) = &signal.loop_name {
            let counter = ctx.loops.entry(loop_name.clone()).or_default();
            counter.index += 1;
            if let Some(cap) = current_block.logic_i64("loop_max_iterations") {
                if i64::from(counter.index) > cap {
                    return Err(ErrorCode::LoopLimitExceeded);
                }
            }
        }

        if signal.defer {
            deferred.push(DeferredBranch {
                dispatch_order: deferred.len() as u32,
                start_index: target_index,
                max_concurrent: signal.max_concurrent,
            });
            Ok(None)
        } else {
            Ok(Some(target_index))
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn join_deferred(
        &self,
        ordered: &[&Block],
        ctx: &mut WorkflowContext,
        mut deferred: Vec<DeferredBranch>,
        run_id: RunId,
        policy: ExecutorPolicy,
        steps: &mut Vec<Step>,
        execution_order: &mut u32,
        cancel: &CancellationToken,
    ) {
        if deferred.is_empty() {
            return;
        }
        deferred.sort_by_key(|d| d.dispatch_order);
        let max_concurrent = deferred.iter().map(|d| d.max_concurrent).min().unwrap_or(10).max(1) as usize;

        let base_snapshot = ctx.snapshot();
        let run_meta = ctx.run.clone();
        let secrets = ctx.secrets.clone();

        let results: Vec<(Map, Vec<Step>)> = stream::iter(deferred.into_iter())
            .map(|branch| {
                let snapshot = base_snapshot.clone();
                let run_meta = run_meta.clone();
                let secrets = secrets.clone();
                async move {
                    let mut branch_ctx = WorkflowContext::rehydrate(snapshot, run_meta, secrets);
                    let mut branch_steps = Vec::new();
                    let mut branch_executed = 0u32;
                    let mut branch_order = 0u32;
                    let mut branch_deferred = Vec::new();
                    let outcome = self
                        .run_main_sequence(
                            ordered,
                            &mut branch_ctx,
                            branch.start_index,
                            run_id,
                            policy,
                            Budgets { max_steps: 1000, run_timeout: Duration::from_secs(300) },
                            Instant::now(),
                            &mut branch_steps,
                            &mut branch_executed,
                            &mut branch_order,
                            &mut branch_deferred,
                            cancel,
                        )
                        .await;
                    if matches!(outcome, MainOutcome::Completed) && !branch_deferred.is_empty() {
                        Box::pin(self.join_deferred(
                            ordered,
                            &mut branch_ctx,
                            branch_deferred,
                            run_id,
                            policy,
                            &mut branch_steps,
                            &mut branch_order,
                            cancel,
                        ))
                        .await;
                    }
                    (branch_ctx.state, branch_steps)
                }
            })
            .buffered(max_concurrent)
            .collect()
            .await;

        for (state, branch_steps) in results {
            for (key, value) in state {
                ctx.state.insert(key, value);
            }
            for mut step in branch_steps {
                step.execution_order = *execution_order;
                *execution_order += 1;
                steps.push(step);
            }
        }
    }
}

type Map = serde_json::Map<String, serde_json::Value>;

enum MainOutcome {
    Completed,
    Failed(String),
    Cancelled,
    AwaitingAction(PausedRunState),
}

/// `Run.errorMessage` is the human-readable message of the first fatal
/// error, per the distilled spec — not just its code.
fn fatal_message(code: Option<ErrorCode>, message: Option<String>) -> String {
    match (message, code) {
        (Some(message), _) => message,
        (None, Some(code)) => format!("block failed: {code:?}"),
        (None, None) => "block failed".into(),
    }
}

fn truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Null => false,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
    }
}

fn skipped_step(block: &Block, execution_order: u32) -> Step {
    Step {
        step_id: workforge_core::StepId::new(),
        block_id: block.id,
        block_type: block.block_type,
        block_name: block.name.clone(),
        status: StepStatus::Skipped,
        execution_order,
        started_at: chrono::Utc::now(),
        duration_ms: Some(0),
        error: None,
        output_snapshot: None,
    }
}

fn running_step(block: &Block, execution_order: u32) -> Step {
    Step {
        step_id: workforge_core::StepId::new(),
        block_id: block.id,
        block_type: block.block_type,
        block_name: block.name.clone(),
        status: StepStatus::Running,
        execution_order,
        started_at: chrono::Utc::now(),
        duration_ms: None,
        error: None,
        output_snapshot: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::NullEventSink;
    use crate::registry::{BlockHandler, BlockHandlerRegistry};
    use async_trait::async_trait;
    use std::sync::Arc;
    use workforge_workflow::BlockResult;

    struct StringTemplateHandler;

    #[async_trait]
    impl BlockHandler for StringTemplateHandler {
        async fn execute(
            &self,
            block: &Block,
            ctx: &WorkflowContext,
            _cancel: &CancellationToken,
        ) -> Result<BlockResult, crate::error::HandlerError> {
            let template = block.logic_str("string_template").unwrap_or("");
            let resolved = value::resolve_value(&serde_json::json!(template), ctx);
            let output_key = block.logic_str("string_outputKey").unwrap_or("output").to_string();
            let mut delta = serde_json::Map::new();
            delta.insert(output_key, resolved);
            Ok(BlockResult::with_delta(delta))
        }
    }

    struct ObjectSetHandler;

    #[async_trait]
    impl BlockHandler for ObjectSetHandler {
        async fn execute(
            &self,
            block: &Block,
            _ctx: &WorkflowContext,
            _cancel: &CancellationToken,
        ) -> Result<BlockResult, crate::error::HandlerError> {
            let key = block.logic_str("object_key").unwrap_or("data").to_string();
            let value = block.logic.get("object_value").cloned().unwrap_or(serde_json::Value::Null);
            let mut delta = serde_json::Map::new();
            delta.insert(key, value);
            Ok(BlockResult::with_delta(delta))
        }
    }

    fn meta() -> RunMeta {
        RunMeta {
            id: workforge_core::RunId::new(),
            workflow_id: workforge_core::WorkflowId::new(),
            version_id: workforge_core::WorkflowVersionId::new(),
            status: "running".into(),
            trigger_type: workforge_workflow::TriggerType::Api,
            started_at: chrono::Utc::now(),
            platform: "server".into(),
            device_id: None,
            org_id: None,
        }
    }

    fn block(order: u32, block_type: BlockType, logic: serde_json::Value) -> Block {
        Block {
            id: workforge_core::BlockId::new(),
            name: format!("b{order}"),
            block_type,
            logic: logic.as_object().cloned().unwrap_or_default(),
            order,
            conditions: None,
            on_error: Default::default(),
        }
    }

    fn version(blocks: Vec<Block>) -> WorkflowVersion {
        WorkflowVersion {
            id: workforge_core::WorkflowVersionId::new(),
            workflow_id: workforge_core::WorkflowId::new(),
            blocks,
            trigger_type: workforge_workflow::TriggerType::Api,
            trigger_config: serde_json::Value::Null,
            execution_environments: HashSet::from([workforge_workflow::ExecutionEnvironment::Cloud]),
            status: workforge_workflow::VersionStatus::Published,
        }
    }

    #[tokio::test]
    async fn trivial_success_scenario() {
        let mut registry = BlockHandlerRegistry::new();
        registry.register(BlockType::String, Arc::new(StringTemplateHandler));
        let sink = NullEventSink;
        let interp = Interpreter::new(&registry, &sink);

        let b = block(
            0,
            BlockType::String,
            serde_json::json!({"string_template": "Hello, {{event.name}}!", "string_outputKey": "greeting"}),
        );
        let v = version(vec![b]);
        let ctx = WorkflowContext::new(meta(), serde_json::json!({"name": "World"}), None);

        let result = interp
            .execute_run(
                &v,
                ctx,
                ExecutorPolicy::server_default(),
                Budgets::server_default(),
                &CancellationToken::new(),
            )
            .await;

        match result {
            RunResult::Completed { steps } => {
                assert_eq!(steps.len(), 1);
                assert_eq!(steps[0].status, StepStatus::Completed);
            }
            other => panic!("expected completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sequenced_blocks_scenario() {
        let mut registry = BlockHandlerRegistry::new();
        registry.register(BlockType::Object, Arc::new(ObjectSetHandler));
        registry.register(BlockType::String, Arc::new(StringTemplateHandler));
        let sink = NullEventSink;
        let interp = Interpreter::new(&registry, &sink);

        let o = block(0, BlockType::Object, serde_json::json!({"object_key": "counter", "object_value": 42}));
        let s = block(
            1,
            BlockType::String,
            serde_json::json!({"string_template": "Count is: {{state.counter}}", "string_outputKey": "formatted"}),
        );
        let v = version(vec![o, s]);
        let ctx = WorkflowContext::new(meta(), serde_json::Value::Null, None);

        let result = interp
            .execute_run(&v, ctx, ExecutorPolicy::server_default(), Budgets::server_default(), &CancellationToken::new())
            .await;

        match result {
            RunResult::Completed { steps } => assert_eq!(steps.len(), 2),
            other => panic!("expected completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ui_block_pauses_run() {
        let registry = BlockHandlerRegistry::new();
        let sink = NullEventSink;
        let interp = Interpreter::new(&registry, &sink);

        let ui = block(0, BlockType::UiForm, serde_json::json!({"fields": ["name"]}));
        let after = block(1, BlockType::Object, serde_json::json!({}));
        let v = version(vec![ui.clone(), after]);
        let ctx = WorkflowContext::new(meta(), serde_json::Value::Null, None);

        let result = interp
            .execute_run(&v, ctx, ExecutorPolicy::server_default(), Budgets::server_default(), &CancellationToken::new())
            .await;

        match result {
            RunResult::AwaitingAction { paused } => {
                assert_eq!(paused.current_block_index, 0);
                assert_eq!(paused.paused_block_id, ui.id);
            }
            other => panic!("expected awaiting_action, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_seals_cancelled() {
        let registry = BlockHandlerRegistry::new();
        let sink = NullEventSink;
        let interp = Interpreter::new(&registry, &sink);
        let b = block(0, BlockType::Object, serde_json::json!({}));
        let v = version(vec![b]);
        let ctx = WorkflowContext::new(meta(), serde_json::Value::Null, None);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = interp
            .execute_run(&v, ctx, ExecutorPolicy::server_default(), Budgets::server_default(), &cancel)
            .await;

        assert!(matches!(result, RunResult::Cancelled { .. }));
    }

    #[tokio::test]
    async fn conditions_false_skips_block() {
        let mut registry = BlockHandlerRegistry::new();
        registry.register(BlockType::Object, Arc::new(ObjectSetHandler));
        let sink = NullEventSink;
        let interp = Interpreter::new(&registry, &sink);

        let mut b = block(0, BlockType::Object, serde_json::json!({"object_key": "x", "object_value": 1}));
        b.conditions = Some(serde_json::json!(false));
        let v = version(vec![b]);
        let ctx = WorkflowContext::new(meta(), serde_json::Value::Null, None);

        let result = interp
            .execute_run(&v, ctx, ExecutorPolicy::server_default(), Budgets::server_default(), &CancellationToken::new())
            .await;

        match result {
            RunResult::Completed { steps } => assert_eq!(steps[0].status, StepStatus::Skipped),
            other => panic!("expected completed, got {other:?}"),
        }
    }
}

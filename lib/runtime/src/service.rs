//! Execution Service (C5): validates triggers, owns the run lifecycle,
//! and is the only component allowed to touch persistence, broadcast,
//! cancellation, and rate limiting. It never inspects or mutates
//! `context.state` directly — that's the Interpreter's job.

use crate::broadcast::{RunBroadcaster, RunEvent};
use crate::cancellation::CancellationRegistry;
use crate::error::ServiceError;
use crate::rate_limit::RateLimiter;
use crate::store::{RunStore, WorkflowStore};
use serde_json::Value;
use std::sync::Arc;
use workforge_core::{DeviceId, OrgId, RunId, WorkflowId};
use workforge_interpreter::{Budgets, EventSink, ExecutorPolicy, Interpreter};
use workforge_workflow::{
    context::RunMeta,
    run::{ContextSnapshot, KeyResolver, PausedRunState, RunConfig, RunSteps},
    step::Step,
    version::WorkflowVersion,
    Run, RunStatus, WorkflowContext,
};

/// An `EventSink` that forwards every step to a `RunBroadcaster`, so the
/// interpreter's per-step callback and the live HTTP stream share one
/// code path.
pub struct BroadcastSink {
    broadcaster: Arc<dyn RunBroadcaster>,
}

impl BroadcastSink {
    #[must_use]
    pub fn new(broadcaster: Arc<dyn RunBroadcaster>) -> Self {
        Self { broadcaster }
    }
}

#[async_trait::async_trait]
impl EventSink for BroadcastSink {
    async fn step_started(&self, run_id: RunId, step: &Step) {
        self.broadcaster
            .publish(RunEvent::StepStarted {
                run_id,
                timestamp: chrono::Utc::now(),
                step: step.clone(),
            })
            .await;
    }

    async fn step_finished(&self, run_id: RunId, step: &Step) {
        self.broadcaster
            .publish(RunEvent::StepCompleted {
                run_id,
                timestamp: chrono::Utc::now(),
                step: step.clone(),
            })
            .await;
    }
}

pub struct ExecutionService {
    pub workflows: Arc<dyn WorkflowStore>,
    pub runs: Arc<dyn RunStore>,
    pub broadcaster: Arc<dyn RunBroadcaster>,
    pub cancellations: Arc<CancellationRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub registry: Arc<workforge_interpreter::BlockHandlerRegistry>,
}

impl ExecutionService {
    /// Validates a trigger against the workflow's enabled flag and
    /// published version, per the lifecycle rules named for triggering a
    /// run: the workflow must exist, be enabled, and have a published
    /// version before a run record is ever created.
    async fn resolve_published_version(&self, workflow_id: WorkflowId) -> Result<WorkflowVersion, ServiceError> {
        let workflow = self
            .workflows
            .get_workflow(workflow_id)
            .await
            .map_err(|_| ServiceError::WorkflowNotFound)?
            .ok_or(ServiceError::WorkflowNotFound)?;

        if !workflow.enabled {
            return Err(ServiceError::WorkflowDisabled);
        }

        let version_id = workflow.published_version_id.ok_or(ServiceError::NoPublishedVersion)?;

        self.workflows
            .get_version(version_id)
            .await
            .map_err(|_| ServiceError::NoPublishedVersion)?
            .ok_or(ServiceError::NoPublishedVersion)
    }

    /// `POST /workflows/:id/trigger` — an authenticated trigger, so every
    /// block type is permitted and secrets resolve normally.
    pub async fn trigger(
        &self,
        workflow_id: WorkflowId,
        org_id: OrgId,
        device_id: DeviceId,
        event: Value,
        initial_state: Option<Value>,
        key_resolver: Option<Box<dyn KeyResolver>>,
    ) -> Result<RunId, ServiceError> {
        let version = self.resolve_published_version(workflow_id).await?;
        let run_id = RunId::new();
        self.start_run(
            run_id,
            RunConfig {
                run_id,
                org_id,
                device_id,
                workflow_version: version,
                event,
                initial_state,
                key_resolver,
            },
            Budgets::server_default(),
            ExecutorPolicy::server_default(),
        )
        .await?;
        Ok(run_id)
    }

    /// `POST /w/:slug/run` — an unauthenticated trigger: every block in
    /// the version must be in the public allowlist, and the caller is
    /// rate-limited by `(slug, sha256(ip)[:16])` against the workflow's own
    /// `rate_limit_per_minute` override when it has one.
    pub async fn trigger_public(&self, slug: &str, event: Value, ip_hash: &str) -> Result<RunId, ServiceError> {
        let workflow = self
            .workflows
            .get_by_slug(slug)
            .await
            .map_err(|_| ServiceError::WorkflowNotFound)?
            .ok_or(ServiceError::WorkflowNotFound)?;

        if !workflow.enabled {
            return Err(ServiceError::WorkflowDisabled);
        }

        let version = self.resolve_published_version(workflow.id).await?;

        if let Some(restricted) = version.first_restricted_block_type() {
            return Err(ServiceError::RestrictedBlockType {
                block_type: restricted.as_str().to_string(),
            });
        }

        let decision = self.rate_limiter.check(slug, ip_hash, workflow.rate_limit_per_minute);
        if !decision.allowed {
            return Err(ServiceError::RateLimited {
                retry_after_ms: decision.retry_after_ms,
            });
        }

        let run_id = RunId::new();
        self.start_run(
            run_id,
            RunConfig {
                run_id,
                org_id: workflow.org_id,
                device_id: DeviceId::new(),
                workflow_version: version,
                event,
                initial_state: None,
                key_resolver: None,
            },
            Budgets::public_default(),
            ExecutorPolicy::public_default(),
        )
        .await?;
        Ok(run_id)
    }

    async fn start_run(
        &self,
        run_id: RunId,
        config: RunConfig,
        budgets: Budgets,
        policy: ExecutorPolicy,
    ) -> Result<(), ServiceError> {
        let run_meta = RunMeta {
            id: run_id,
            workflow_id: config.workflow_version.workflow_id,
            version_id: config.workflow_version.id,
            status: "running".to_string(),
            trigger_type: config.workflow_version.trigger_type,
            started_at: chrono::Utc::now(),
            platform: "server".to_string(),
            device_id: Some(config.device_id),
            org_id: Some(config.org_id),
        };

        let run = Run {
            id: run_id,
            workflow_id: config.workflow_version.workflow_id,
            version: config.workflow_version.id,
            org_id: config.org_id,
            status: RunStatus::Running,
            trigger_type: config.workflow_version.trigger_type,
            started_at: run_meta.started_at,
            completed_at: None,
            duration_ms: None,
            error_message: None,
            steps_json: RunSteps::Steps(Vec::new()),
        };
        self.runs
            .create(&run)
            .await
            .map_err(|_| ServiceError::ActionFailed { reason: "failed to persist run" })?;

        let runs = self.runs.clone();
        let broadcaster = self.broadcaster.clone();
        let cancellations = self.cancellations.clone();
        let registry = self.registry.clone();

        tokio::spawn(async move {
            broadcaster.publish(RunEvent::RunStarted { run_id, timestamp: run_meta.started_at }).await;

            let secrets = resolve_secrets(config.key_resolver.as_deref(), &config.workflow_version);
            let mut ctx = WorkflowContext::new(run_meta, config.event, config.initial_state);
            ctx.secrets = secrets;

            let token = cancellations.register(run_id);
            let sink = BroadcastSink::new(broadcaster.clone());
            let interpreter = Interpreter::new(registry.as_ref(), &sink);

            let version = config.workflow_version;
            let result = interpreter.execute_run(&version, ctx, policy, budgets, &token).await;
            finalize_run(runs.as_ref(), broadcaster.as_ref(), run_id, result).await;
            cancellations.forget(run_id);
        });

        Ok(())
    }

    /// `POST /runs/:id/actions` — resumes a paused run after a `ui_*`
    /// block's action payload is submitted. The caller is responsible for
    /// merging the submitted payload into the rehydrated state before the
    /// Interpreter dispatches the next block, so the Execution Service
    /// never looks inside `state` itself.
    pub async fn submit_action(
        &self,
        run_id: RunId,
        action_payload: Value,
    ) -> Result<(), ServiceError> {
        let run = self.runs.get(run_id).await.ok().flatten().ok_or(ServiceError::RunNotFound)?;
        let RunSteps::Paused(paused) = &run.steps_json else {
            return Err(ServiceError::ActionFailed { reason: "run is not awaiting action" });
        };
        let paused: PausedRunState = paused.clone();

        let version = self
            .workflows
            .get_version(run.version)
            .await
            .map_err(|_| ServiceError::NoPublishedVersion)?
            .ok_or(ServiceError::NoPublishedVersion)?;

        let run_meta = RunMeta {
            id: run.id,
            workflow_id: run.workflow_id,
            version_id: run.version,
            status: "running".to_string(),
            trigger_type: run.trigger_type,
            started_at: run.started_at,
            platform: "server".to_string(),
            device_id: None,
            org_id: Some(run.org_id),
        };

        let mut snapshot: ContextSnapshot = paused.context_snapshot.clone();
        merge_action_payload(&mut snapshot, action_payload);

        let ctx = WorkflowContext::rehydrate(snapshot, run_meta, serde_json::Map::new());
        let budgets = Budgets::server_default();
        let policy = ExecutorPolicy::server_default();
        // `current_block_index` is the ui_* block that paused the run; its
        // submitted action payload is already merged into state above, so
        // resume continues one block past it, not back onto it.
        let resume_from = paused.current_block_index + 1;

        let runs = self.runs.clone();
        let broadcaster = self.broadcaster.clone();
        let cancellations = self.cancellations.clone();
        let registry = self.registry.clone();

        tokio::spawn(async move {
            let token = cancellations.register(run_id);
            let sink = BroadcastSink::new(broadcaster.clone());
            let interpreter = Interpreter::new(registry.as_ref(), &sink);

            let result = interpreter.resume_run(&version, resume_from, ctx, policy, budgets, &token).await;
            finalize_run(runs.as_ref(), broadcaster.as_ref(), run_id, result).await;
            cancellations.forget(run_id);
        });

        Ok(())
    }

    /// `POST /runs/:id/cancel` — idempotent; cancelling a run that has
    /// already finished or was never started is not an error.
    pub async fn cancel(&self, run_id: RunId) -> Result<(), ServiceError> {
        self.cancellations.cancel(run_id);
        Ok(())
    }
}

/// Persists the Interpreter's outcome and broadcasts the matching
/// terminal (or awaiting-action) event. A free function rather than a
/// method since it runs inside the detached task `start_run`/
/// `submit_action` spawn, past the point where `&self` is still held.
async fn finalize_run(runs: &dyn RunStore, broadcaster: &dyn RunBroadcaster, run_id: RunId, result: workforge_interpreter::RunResult) {
    use workforge_interpreter::RunResult;

    let Ok(Some(mut run)) = runs.get(run_id).await else {
        return;
    };

    match result {
        RunResult::Completed { steps } => {
            run.steps_json = RunSteps::Steps(steps);
            run.finish(RunStatus::Completed, None);
            broadcaster
                .publish(RunEvent::RunCompleted {
                    run_id,
                    timestamp: chrono::Utc::now(),
                })
                .await;
        }
        RunResult::Failed { steps, error_message } => {
            run.steps_json = RunSteps::Steps(steps);
            run.finish(RunStatus::Failed, Some(error_message.clone()));
            broadcaster
                .publish(RunEvent::RunFailed {
                    run_id,
                    timestamp: chrono::Utc::now(),
                    error_message,
                })
                .await;
        }
        RunResult::Cancelled { steps } => {
            run.steps_json = RunSteps::Steps(steps);
            run.finish(RunStatus::Cancelled, None);
            broadcaster
                .publish(RunEvent::RunCancelled {
                    run_id,
                    timestamp: chrono::Utc::now(),
                })
                .await;
        }
        RunResult::AwaitingAction { paused } => {
            run.status = RunStatus::AwaitingAction;
            run.steps_json = RunSteps::Paused(paused);
            broadcaster
                .publish(RunEvent::RunAwaitingAction {
                    run_id,
                    timestamp: chrono::Utc::now(),
                })
                .await;
        }
    }

    let _ = runs.update(&run).await;
}

fn resolve_secrets(
    key_resolver: Option<&dyn KeyResolver>,
    version: &WorkflowVersion,
) -> serde_json::Map<String, Value> {
    let Some(resolver) = key_resolver else {
        return serde_json::Map::new();
    };
    let mut secrets = serde_json::Map::new();
    for block in version.ordered_blocks() {
        if let Some(name) = block.logic_str("secretName") {
            if let Some(value) = resolver.resolve(name) {
                secrets.insert(name.to_string(), value);
            }
        }
    }
    secrets
}

fn merge_action_payload(snapshot: &mut ContextSnapshot, payload: Value) {
    if let Value::Object(map) = payload {
        for (key, value) in map {
            if !key.starts_with("__") {
                snapshot.state.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::InMemoryBroadcaster;
    use crate::store::{InMemoryRunStore, InMemoryWorkflowStore, Workflow};
    use workforge_interpreter::BlockHandlerRegistry;
    use workforge_workflow::{Block, OnError, VersionStatus};
    use workforge_core::WorkflowVersionId;

    fn registry() -> Arc<BlockHandlerRegistry> {
        let mut registry = BlockHandlerRegistry::new();
        registry.register(workforge_workflow::BlockType::Object, Arc::new(workforge_interpreter::Passthrough));
        Arc::new(registry)
    }

    fn version_with_blocks(workflow_id: WorkflowId, blocks: Vec<Block>) -> WorkflowVersion {
        WorkflowVersion {
            id: WorkflowVersionId::new(),
            workflow_id,
            blocks,
            trigger_type: workforge_workflow::TriggerType::Api,
            trigger_config: serde_json::Value::Null,
            execution_environments: std::iter::once(workforge_workflow::ExecutionEnvironment::Cloud).collect(),
            status: VersionStatus::Published,
        }
    }

    fn service() -> (ExecutionService, Arc<InMemoryWorkflowStore>, Arc<InMemoryRunStore>) {
        let workflows = Arc::new(InMemoryWorkflowStore::default());
        let runs = Arc::new(InMemoryRunStore::default());
        let service = ExecutionService {
            workflows: workflows.clone(),
            runs: runs.clone(),
            broadcaster: Arc::new(InMemoryBroadcaster::default()),
            cancellations: Arc::new(CancellationRegistry::new()),
            rate_limiter: Arc::new(RateLimiter::new()),
            registry: registry(),
        };
        (service, workflows, runs)
    }

    #[tokio::test]
    async fn trigger_rejects_a_disabled_workflow() {
        let (service, workflows, _runs) = service();
        let workflow_id = WorkflowId::new();
        workflows.insert_workflow(Workflow {
            id: workflow_id,
            org_id: OrgId::new(),
            name: "demo".into(),
            enabled: false,
            published_version_id: None,
            public_slug: None,
            rate_limit_per_minute: None,
        });

        let err = service
            .trigger(workflow_id, OrgId::new(), DeviceId::new(), Value::Null, None, None)
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::WorkflowDisabled);
    }

    #[tokio::test]
    async fn trigger_rejects_a_workflow_with_no_published_version() {
        let (service, workflows, _runs) = service();
        let workflow_id = WorkflowId::new();
        workflows.insert_workflow(Workflow {
            id: workflow_id,
            org_id: OrgId::new(),
            name: "demo".into(),
            enabled: true,
            published_version_id: None,
            public_slug: None,
            rate_limit_per_minute: None,
        });

        let err = service
            .trigger(workflow_id, OrgId::new(), DeviceId::new(), Value::Null, None, None)
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::NoPublishedVersion);
    }

    /// `trigger`/`submit_action` hand the run off to a detached task and
    /// return as soon as it's persisted, so tests that need the final
    /// status must wait for the broadcaster's terminal event rather than
    /// checking the store immediately.
    async fn await_terminal(broadcaster: &dyn RunBroadcaster, run_id: RunId) -> RunEvent {
        let mut rx = broadcaster.subscribe(run_id).await.expect("run channel still open");
        loop {
            let event = rx.recv().await.expect("broadcaster channel closed before a terminal event");
            if matches!(
                event,
                RunEvent::RunCompleted { .. } | RunEvent::RunFailed { .. } | RunEvent::RunCancelled { .. } | RunEvent::RunAwaitingAction { .. }
            ) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn trigger_runs_a_trivial_workflow_to_completion() {
        let (service, workflows, runs) = service();
        let broadcaster = service.broadcaster.clone();
        let workflow_id = WorkflowId::new();
        let block = Block {
            id: workforge_core::BlockId::new(),
            name: "noop".into(),
            block_type: workforge_workflow::BlockType::Object,
            logic: serde_json::Map::new(),
            order: 0,
            conditions: None,
            on_error: OnError::FailRun,
        };
        let version = version_with_blocks(workflow_id, vec![block]);
        let version_id = version.id;
        workflows.insert_version(version);
        workflows.insert_workflow(Workflow {
            id: workflow_id,
            org_id: OrgId::new(),
            name: "demo".into(),
            enabled: true,
            published_version_id: Some(version_id),
            public_slug: None,
            rate_limit_per_minute: None,
        });

        // `trigger` never actually suspends against the in-memory stores
        // (every await inside resolves immediately), so the spawned run
        // task has not been polled yet when it returns here — subscribing
        // now still happens before the task gets a chance to publish.
        let run_id = service
            .trigger(workflow_id, OrgId::new(), DeviceId::new(), Value::Null, None, None)
            .await
            .unwrap();

        let event = await_terminal(&*broadcaster, run_id).await;
        assert!(matches!(event, RunEvent::RunCompleted { .. }));

        let run = runs.get(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn submit_action_resumes_past_the_paused_block_to_completion() {
        let (service, workflows, runs) = service();
        let broadcaster = service.broadcaster.clone();
        let workflow_id = WorkflowId::new();

        let ui_block = Block {
            id: workforge_core::BlockId::new(),
            name: "ask_name".into(),
            block_type: workforge_workflow::BlockType::UiForm,
            logic: serde_json::Map::new(),
            order: 0,
            conditions: None,
            on_error: OnError::FailRun,
        };
        let after_block = Block {
            id: workforge_core::BlockId::new(),
            name: "noop".into(),
            block_type: workforge_workflow::BlockType::Object,
            logic: serde_json::Map::new(),
            order: 1,
            conditions: None,
            on_error: OnError::FailRun,
        };
        let version = version_with_blocks(workflow_id, vec![ui_block, after_block]);
        let version_id = version.id;
        workflows.insert_version(version);
        workflows.insert_workflow(Workflow {
            id: workflow_id,
            org_id: OrgId::new(),
            name: "demo".into(),
            enabled: true,
            published_version_id: Some(version_id),
            public_slug: None,
            rate_limit_per_minute: None,
        });

        let run_id = service
            .trigger(workflow_id, OrgId::new(), DeviceId::new(), Value::Null, None, None)
            .await
            .unwrap();
        let event = await_terminal(&*broadcaster, run_id).await;
        assert!(matches!(event, RunEvent::RunAwaitingAction { .. }));

        let paused = runs.get(run_id).await.unwrap().unwrap();
        let RunSteps::Paused(paused_state) = &paused.steps_json else {
            panic!("expected the run to be paused on the ui_* block");
        };
        assert_eq!(paused_state.current_block_index, 0);

        service.submit_action(run_id, serde_json::json!({"name": "Ada"})).await.unwrap();
        let event = await_terminal(&*broadcaster, run_id).await;
        assert!(matches!(event, RunEvent::RunCompleted { .. }));

        let run = runs.get(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
    }
}

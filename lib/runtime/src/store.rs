//! Persistence seams for workflows and runs.
//!
//! Trait-based so the Execution Service stays storage-agnostic; an
//! in-memory implementation backs tests, a `sqlx`-backed one backs the
//! server binary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use workforge_core::{OrgId, WorkflowId, WorkflowVersionId};
use workforge_workflow::{Run, RunStatus, RunSteps, WorkflowVersion};

/// The workflow aggregate the Execution Service validates a trigger
/// against — whether it's enabled and which version is published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub org_id: OrgId,
    pub name: String,
    pub enabled: bool,
    pub published_version_id: Option<WorkflowVersionId>,
    /// Set once a public run slug has been generated for this workflow.
    pub public_slug: Option<String>,
    /// Per-workflow override for the public-slug rate limit; `None` falls
    /// back to `RateLimiter`'s 10/minute default.
    pub rate_limit_per_minute: Option<usize>,
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn get_workflow(&self, id: WorkflowId) -> Result<Option<Workflow>, StoreError>;
    async fn get_version(&self, id: WorkflowVersionId) -> Result<Option<WorkflowVersion>, StoreError>;
    async fn get_by_slug(&self, slug: &str) -> Result<Option<Workflow>, StoreError>;
}

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create(&self, run: &Run) -> Result<(), StoreError>;
    async fn get(&self, id: workforge_core::RunId) -> Result<Option<Run>, StoreError>;
    async fn update(&self, run: &Run) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct StoreError(pub String);

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "store error: {}", self.0)
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        Self(e.to_string())
    }
}

/// Renders a `#[serde(rename_all = "snake_case")]` enum to the bare
/// string stored in its column, instead of a quoted JSON scalar.
fn enum_to_column<T: Serialize>(value: T) -> Result<String, StoreError> {
    match serde_json::to_value(value).map_err(|e| StoreError(e.to_string()))? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(StoreError(format!("expected a string-like enum, got {other}"))),
    }
}

/// Append-only in-process store, sufficient for single-node deployments
/// and tests. `DashMap`'s per-shard locking gives the "serialized per
/// `runId`" write guarantee the distilled spec names, without a global
/// mutex.
#[derive(Default)]
pub struct InMemoryRunStore {
    runs: DashMap<workforge_core::RunId, Run>,
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create(&self, run: &Run) -> Result<(), StoreError> {
        self.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get(&self, id: workforge_core::RunId) -> Result<Option<Run>, StoreError> {
        Ok(self.runs.get(&id).map(|r| r.clone()))
    }

    async fn update(&self, run: &Run) -> Result<(), StoreError> {
        self.runs.insert(run.id, run.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryWorkflowStore {
    workflows: DashMap<WorkflowId, Workflow>,
    versions: DashMap<WorkflowVersionId, WorkflowVersion>,
}

impl InMemoryWorkflowStore {
    pub fn insert_workflow(&self, workflow: Workflow) {
        self.workflows.insert(workflow.id, workflow);
    }

    pub fn insert_version(&self, version: WorkflowVersion) {
        self.versions.insert(version.id, version);
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn get_workflow(&self, id: WorkflowId) -> Result<Option<Workflow>, StoreError> {
        Ok(self.workflows.get(&id).map(|w| w.clone()))
    }

    async fn get_version(&self, id: WorkflowVersionId) -> Result<Option<WorkflowVersion>, StoreError> {
        Ok(self.versions.get(&id).map(|v| v.clone()))
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Workflow>, StoreError> {
        Ok(self.workflows.iter().find(|w| w.public_slug.as_deref() == Some(slug)).map(|w| w.clone()))
    }
}

/// `sqlx`-backed `RunStore`, matching the distilled spec's `runs` table
/// layout (`id, workflow_id, version, org_id, status, trigger_type,
/// started_at, completed_at, duration_ms, error_message, steps_json`).
pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct RunRow {
    id: String,
    workflow_id: String,
    version: String,
    org_id: String,
    status: String,
    trigger_type: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
    error_message: Option<String>,
    steps_json: serde_json::Value,
}

impl RunRow {
    fn try_into_run(self) -> Result<Run, StoreError> {
        let status: RunStatus =
            serde_json::from_value(serde_json::Value::String(self.status)).map_err(|e| StoreError(e.to_string()))?;
        let trigger_type = serde_json::from_value(serde_json::Value::String(self.trigger_type))
            .map_err(|e| StoreError(e.to_string()))?;
        let steps_json: RunSteps = serde_json::from_value(self.steps_json).map_err(|e| StoreError(e.to_string()))?;

        Ok(Run {
            id: workforge_core::RunId::from_str(&self.id).map_err(|e| StoreError(e.to_string()))?,
            workflow_id: WorkflowId::from_str(&self.workflow_id).map_err(|e| StoreError(e.to_string()))?,
            version: WorkflowVersionId::from_str(&self.version).map_err(|e| StoreError(e.to_string()))?,
            org_id: OrgId::from_str(&self.org_id).map_err(|e| StoreError(e.to_string()))?,
            status,
            trigger_type,
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_ms: self.duration_ms,
            error_message: self.error_message,
            steps_json,
        })
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn create(&self, run: &Run) -> Result<(), StoreError> {
        let status = enum_to_column(run.status)?;
        let trigger_type = enum_to_column(run.trigger_type)?;
        let steps_json = serde_json::to_value(&run.steps_json).map_err(|e| StoreError(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO runs
                (id, workflow_id, version, org_id, status, trigger_type,
                 started_at, completed_at, duration_ms, error_message, steps_json)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.workflow_id.to_string())
        .bind(run.version.to_string())
        .bind(run.org_id.to_string())
        .bind(status)
        .bind(trigger_type)
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(run.duration_ms)
        .bind(&run.error_message)
        .bind(steps_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: workforge_core::RunId) -> Result<Option<Run>, StoreError> {
        let row: Option<RunRow> = sqlx::query_as(
            r#"
            SELECT id, workflow_id, version, org_id, status, trigger_type,
                   started_at, completed_at, duration_ms, error_message, steps_json
            FROM runs
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(RunRow::try_into_run).transpose()
    }

    async fn update(&self, run: &Run) -> Result<(), StoreError> {
        let status = enum_to_column(run.status)?;
        let steps_json = serde_json::to_value(&run.steps_json).map_err(|e| StoreError(e.to_string()))?;

        sqlx::query(
            r#"
            UPDATE runs
            SET status = $2, completed_at = $3, duration_ms = $4, error_message = $5, steps_json = $6
            WHERE id = $1
            "#,
        )
        .bind(run.id.to_string())
        .bind(status)
        .bind(run.completed_at)
        .bind(run.duration_ms)
        .bind(&run.error_message)
        .bind(steps_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// `sqlx`-backed `WorkflowStore`, matching a minimal `workflows` /
/// `workflow_versions` schema. Versions are stored as a single JSONB
/// blob (`blocks` don't need relational access patterns).
pub struct PgWorkflowStore {
    pool: PgPool,
}

impl PgWorkflowStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct WorkflowRow {
    id: String,
    org_id: String,
    name: String,
    enabled: bool,
    published_version_id: Option<String>,
    public_slug: Option<String>,
    rate_limit_per_minute: Option<i64>,
}

impl WorkflowRow {
    fn try_into_workflow(self) -> Result<Workflow, StoreError> {
        Ok(Workflow {
            id: WorkflowId::from_str(&self.id).map_err(|e| StoreError(e.to_string()))?,
            org_id: OrgId::from_str(&self.org_id).map_err(|e| StoreError(e.to_string()))?,
            name: self.name,
            enabled: self.enabled,
            published_version_id: self
                .published_version_id
                .map(|v| WorkflowVersionId::from_str(&v))
                .transpose()
                .map_err(|e| StoreError(e.to_string()))?,
            public_slug: self.public_slug,
            rate_limit_per_minute: self.rate_limit_per_minute.map(|n| n.max(0) as usize),
        })
    }
}

#[derive(FromRow)]
struct VersionRow {
    definition: serde_json::Value,
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn get_workflow(&self, id: WorkflowId) -> Result<Option<Workflow>, StoreError> {
        let row: Option<WorkflowRow> = sqlx::query_as(
            r#"
            SELECT id, org_id, name, enabled, published_version_id, public_slug, rate_limit_per_minute
            FROM workflows
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(WorkflowRow::try_into_workflow).transpose()
    }

    async fn get_version(&self, id: WorkflowVersionId) -> Result<Option<WorkflowVersion>, StoreError> {
        let row: Option<VersionRow> = sqlx::query_as(
            r#"
            SELECT definition
            FROM workflow_versions
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        serde_json::from_value(row.definition)
            .map(Some)
            .map_err(|e| StoreError(e.to_string()))
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Workflow>, StoreError> {
        let row: Option<WorkflowRow> = sqlx::query_as(
            r#"
            SELECT id, org_id, name, enabled, published_version_id, public_slug, rate_limit_per_minute
            FROM workflows
            WHERE public_slug = $1
            "#,
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        row.map(WorkflowRow::try_into_workflow).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use workforge_workflow::TriggerType;

    fn run(status: RunStatus) -> Run {
        Run {
            id: workforge_core::RunId::new(),
            workflow_id: WorkflowId::new(),
            version: WorkflowVersionId::new(),
            org_id: OrgId::new(),
            status,
            trigger_type: TriggerType::Api,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            error_message: None,
            steps_json: RunSteps::Steps(Vec::new()),
        }
    }

    #[tokio::test]
    async fn in_memory_store_round_trips_a_run() {
        let store = InMemoryRunStore::default();
        let r = run(RunStatus::Pending);
        store.create(&r).await.unwrap();

        let fetched = store.get(r.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Pending);

        let mut updated = fetched;
        updated.status = RunStatus::Running;
        store.update(&updated).await.unwrap();

        let fetched_again = store.get(r.id).await.unwrap().unwrap();
        assert_eq!(fetched_again.status, RunStatus::Running);
    }

    #[tokio::test]
    async fn in_memory_store_missing_run_is_none() {
        let store = InMemoryRunStore::default();
        assert!(store.get(workforge_core::RunId::new()).await.unwrap().is_none());
    }
}

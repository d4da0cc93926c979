//! The HTTP trigger surface: authenticated trigger/cancel/actions/live,
//! and their public, slug-addressed, rate-limited counterparts.

use crate::error::ApiError;
use crate::secrets::EnvKeyResolver;
use crate::state::AppState;
use axum::extract::{ConnectInfo, Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::{http::StatusCode, Json};
use futures::stream::{self, Stream};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::str::FromStr;
use workforge_core::{DeviceId, OrgId, RunId, WorkflowId};
use workforge_runtime::{hash_ip, RunEvent};
use workforge_workflow::ErrorCode;

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    #[serde(default)]
    pub trigger_type: Option<String>,
    #[serde(default)]
    pub metadata: TriggerMetadata,
    #[serde(default)]
    pub event: Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct TriggerMetadata {
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

/// `POST /workflows/:id/trigger`
pub async fn trigger(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(body): Json<TriggerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let workflow_id = parse_id::<WorkflowId>(&workflow_id, "workflow id")?;
    let org_id = parse_optional_id::<OrgId>(body.metadata.org_id.as_deref(), OrgId::new)?;
    let device_id = parse_optional_id::<DeviceId>(body.metadata.device_id.as_deref(), DeviceId::new)?;

    let run_id = state
        .service
        .trigger(workflow_id, org_id, device_id, body.event, None, Some(Box::new(EnvKeyResolver)))
        .await?;

    Ok((StatusCode::CREATED, Json(json!({ "id": run_id, "status": "pending" }))))
}

/// `POST /runs/:id/cancel`
pub async fn cancel_run(State(state): State<AppState>, Path(run_id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let run_id = parse_id::<RunId>(&run_id, "run id")?;
    state.service.cancel(run_id).await?;

    let status = match state.service.runs.get(run_id).await {
        Ok(Some(run)) => serde_json::to_value(run.status).unwrap_or_else(|_| json!("cancelled")),
        _ => json!("cancelled"),
    };
    Ok(Json(json!({ "status": status })))
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

/// `POST /runs/:id/actions`
pub async fn submit_action(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(body): Json<ActionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let run_id = parse_id::<RunId>(&run_id, "run id")?;

    let run = state
        .service
        .runs
        .get(run_id)
        .await
        .ok()
        .flatten()
        .ok_or_else(|| ApiError::new(ErrorCode::RunNotFound, "run not found"))?;
    if run.status != workforge_workflow::RunStatus::AwaitingAction {
        return Err(ApiError::new(ErrorCode::ValidationError, "run is not awaiting action"));
    }

    state.service.submit_action(run_id, body.payload).await?;
    Ok(Json(json!({ "status": "resumed" })))
}

/// `GET /runs/:id/live` — server-sent events: one `status` event with the
/// run's current snapshot on connect, a `step` event per step, and a
/// closing `done` event once the run reaches a terminal state (or
/// suspends awaiting an action).
pub async fn live(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let run_id = parse_id::<RunId>(&run_id, "run id")?;
    let run = state
        .service
        .runs
        .get(run_id)
        .await
        .ok()
        .flatten()
        .ok_or_else(|| ApiError::new(ErrorCode::RunNotFound, "run not found"))?;

    let initial: Result<Event, Infallible> = Ok(Event::default().event("status").json_data(&run).unwrap_or_else(|_| Event::default()));

    let receiver = state.service.broadcaster.subscribe(run_id).await;
    let tail = stream::unfold(receiver, |receiver| async move {
        let mut receiver = receiver?;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let sse: Result<Event, Infallible> = Ok(render_event(&event));
                    let keep_going = !is_terminal(&event);
                    return Some((sse, keep_going.then_some(receiver)));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    let body = stream::once(async move { initial }).chain(tail);
    Ok(Sse::new(body).keep_alive(KeepAlive::default()))
}

fn is_terminal(event: &RunEvent) -> bool {
    matches!(
        event,
        RunEvent::RunCompleted { .. } | RunEvent::RunFailed { .. } | RunEvent::RunCancelled { .. } | RunEvent::RunAwaitingAction { .. }
    )
}

fn render_event(event: &RunEvent) -> Event {
    let name = match event {
        RunEvent::RunStarted { .. } => "status",
        RunEvent::StepStarted { .. } | RunEvent::StepCompleted { .. } => "step",
        RunEvent::RunCompleted { .. } | RunEvent::RunFailed { .. } | RunEvent::RunCancelled { .. } | RunEvent::RunAwaitingAction { .. } => "done",
    };
    Event::default().event(name).json_data(event).unwrap_or_else(|_| Event::default())
}

#[derive(Debug, Deserialize)]
pub struct PublicTriggerRequest {
    #[serde(default)]
    pub event: Value,
}

/// `POST /w/:slug/run`
pub async fn trigger_public(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<PublicTriggerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ip_hash = hash_ip(&addr.ip().to_string());
    let run_id = state.service.trigger_public(&slug, body.event, &ip_hash).await?;
    Ok((StatusCode::CREATED, Json(json!({ "runId": run_id }))))
}

/// `POST /w/:slug/runs/:runId/actions` — public resume; the slug only
/// gates the trigger, the run id is already bound to a workflow the
/// allowlist already cleared.
pub async fn submit_action_public(
    State(state): State<AppState>,
    Path((_slug, run_id)): Path<(String, String)>,
    Json(body): Json<ActionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let run_id = parse_id::<RunId>(&run_id, "run id")?;
    state.service.submit_action(run_id, body.payload).await?;
    Ok(Json(json!({ "status": "resumed" })))
}

fn parse_id<T: FromStr>(raw: &str, label: &str) -> Result<T, ApiError> {
    raw.parse::<T>().map_err(|_| ApiError::new(ErrorCode::ValidationError, format!("invalid {label}: {raw}")))
}

fn parse_optional_id<T: FromStr>(raw: Option<&str>, default: impl FnOnce() -> T) -> Result<T, ApiError> {
    match raw {
        Some(raw) => parse_id(raw, "id"),
        None => Ok(default()),
    }
}

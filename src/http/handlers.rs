use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::controller::{CreateWorkspaceRequest, EventView, WorkspaceView};
use crate::error::{ApiError, Envelope};
use crate::registry::models::DEFAULT_EVENTS_LIMIT;

/// `GET /api/v1/health`: liveness, deliberately outside the `{data,error}`
/// envelope.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": state.version }))
}

pub async fn create_workspace(
    State(state): State<AppState>,
    Json(req): Json<CreateWorkspaceRequest>,
) -> Result<(StatusCode, Json<Envelope<WorkspaceView>>), ApiError> {
    let view = state.controller.create(req).await?;
    Ok((StatusCode::CREATED, Json(Envelope::ok(view))))
}

pub async fn list_workspaces(
    State(state): State<AppState>,
) -> Result<Json<Envelope<Vec<WorkspaceView>>>, ApiError> {
    let views = state.controller.list().await?;
    Ok(Json(Envelope::ok(views)))
}

pub async fn get_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<WorkspaceView>>, ApiError> {
    let view = state.controller.get(&id).await?;
    Ok(Json(Envelope::ok(view)))
}

pub async fn delete_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<serde_json::Value>>, ApiError> {
    state.controller.delete(&id).await?;
    Ok(Json(Envelope::ok(json!({
        "id": id,
        "message": format!("workspace {id} deleted"),
    }))))
}

pub async fn start_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<WorkspaceView>>, ApiError> {
    let view = state.controller.start(&id).await?;
    Ok(Json(Envelope::ok(view)))
}

pub async fn stop_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<WorkspaceView>>, ApiError> {
    let view = state.controller.stop(&id).await?;
    Ok(Json(Envelope::ok(view)))
}

/// `limit` is kept as a raw string so a non-numeric value can be reported
/// as a 400 Validation error instead of axum's generic query-rejection.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub limit: Option<String>,
}

pub async fn list_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Envelope<Vec<EventView>>>, ApiError> {
    let limit = match query.limit {
        Some(raw) => raw
            .parse::<i64>()
            .map_err(|_| ApiError::Validation(format!("event limit '{raw}' is not a number")))?,
        None => DEFAULT_EVENTS_LIMIT,
    };

    let events = state.controller.events(&id, limit).await?;
    Ok(Json(Envelope::ok(events)))
}

//! Thin HTTP adapter: binds/validates requests, dispatches to the
//! `WorkspaceController`, and formats the `{ data, error }` envelope. No
//! business logic lives here.

mod handlers;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::controller::WorkspaceController;

/// Shared, process-wide handle cloned cheaply per request: one Registry
/// handle and one orchestrator adapter instance, neither recreated per
/// request.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<WorkspaceController>,
    pub version: String,
}

/// Build the full `/api/v1` router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(handlers::health))
        .route("/api/v1/workspaces", get(handlers::list_workspaces))
        .route("/api/v1/workspaces", post(handlers::create_workspace))
        .route("/api/v1/workspaces/{id}", get(handlers::get_workspace))
        .route("/api/v1/workspaces/{id}", delete(handlers::delete_workspace))
        .route("/api/v1/workspaces/{id}/start", post(handlers::start_workspace))
        .route("/api/v1/workspaces/{id}/stop", post(handlers::stop_workspace))
        .route("/api/v1/workspaces/{id}/events", get(handlers::list_events))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()))
}

#[cfg(test)]
mod tests;

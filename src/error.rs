use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

use crate::orchestrator::OrchestratorError;
use crate::registry::RegistryError;

/// Error taxonomy surfaced to the HTTP edge. Each variant carries its own
/// client-facing message; the controller is the only place that decides
/// which variant a lower-layer failure becomes (per the classification
/// rule in the error handling design).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("workspace not found")]
    NotFound,

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::AlreadyExists(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Conflict(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Validation/NotFound are expected client mistakes, never logged as
        // errors. Everything else is an operator-facing failure.
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }

        let body = Json(Envelope::<Value>::err(self.to_string()));
        (status, body).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::AlreadyExists(id) => {
                ApiError::AlreadyExists(format!("workspace id '{}' already exists", id))
            }
            RegistryError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Conflict(msg) => {
                ApiError::Conflict(format!("{msg}; another operation is in progress, please retry"))
            }
            OrchestratorError::Unavailable(msg) => ApiError::Unavailable(msg),
            OrchestratorError::Failed(msg) => ApiError::Internal(msg),
        }
    }
}

/// The `{ data, error }` response envelope used by every HTTP endpoint.
/// Exactly one of the two fields is populated.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(message.into()),
        }
    }
}

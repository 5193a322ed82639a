//! Errors surfaced to callers of the router.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use adasplit_common::TaskClass;

use crate::forward::ForwardError;

/// Terminal outcome of a request that did not produce a backend response.
///
/// "No capacity right now" is not an error: it queues.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("{class} queue is full ({depth} waiting)")]
    Overloaded { class: TaskClass, depth: usize },

    #[error("Backend {backend} failed: {source}")]
    Forward {
        backend: usize,
        #[source]
        source: ForwardError,
    },

    #[error("Request was dropped before it could be dispatched")]
    Cancelled,
}

impl IntoResponse for RouterError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            RouterError::Overloaded { .. } => (StatusCode::SERVICE_UNAVAILABLE, "overloaded"),
            RouterError::Forward {
                source: ForwardError::Status { status, .. },
                ..
            } => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                "backend_error",
            ),
            RouterError::Forward { .. } => (StatusCode::BAD_GATEWAY, "forwarding_failed"),
            RouterError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string()
            }
        }));

        (status, body).into_response()
    }
}

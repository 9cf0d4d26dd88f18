//! Maps internal failures onto the dispatcher's HTTP surface. Malformed
//! JSON and wrong-method responses come for free from axum's own routing
//! and body extraction; this type only covers the cases a handler decides
//! for itself.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum DispatcherError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for DispatcherError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            DispatcherError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            DispatcherError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (
            status,
            Json(json!({
                "error": message,
                "timestamp": pinax_types::time::now_millis(),
            })),
        )
            .into_response()
    }
}

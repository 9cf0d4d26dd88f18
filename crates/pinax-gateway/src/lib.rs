//! The dispatcher: the HTTP surface in front of the chunk engine. Admits
//! chunks, proxies status polling to the durable store, and exposes the two
//! synchronous non-core helpers, with the same middleware stack the
//! teacher's own HTTP gateway applies.

pub mod error;
mod handlers;

#[cfg(test)]
mod tests;

use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use pinax_worker::Deps;
use std::sync::Arc;
use std::time::Duration;
use tower::{BoxError, ServiceBuilder};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

async fn map_middleware_error(err: BoxError) -> (StatusCode, String) {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, "request timed out".to_string())
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("unhandled error: {err}"),
        )
    }
}

/// Builds the dispatcher's `Router`, ready to serve once bound to a
/// listener by the binary crate.
pub fn build_router(deps: Deps) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/process", post(handlers::process))
        .route("/status/:chunk_id", get(handlers::status))
        .route("/extract-metadata", post(handlers::extract_metadata))
        .route("/validate-metadata", post(handlers::validate_metadata))
        .with_state(Arc::new(deps))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(map_middleware_error))
                .load_shed()
                .concurrency_limit(128)
                .timeout(Duration::from_secs(30)),
        )
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

use crate::error::DispatcherError;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use pinax_types::{ContextBundle, ContextFile, PinaxRecord, ProcessRequest, ProcessResponse};
use pinax_worker::Deps;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

impl IntoResponse for ProcessResponse {
    fn into_response(self) -> Response {
        match &self {
            ProcessResponse::Accepted { .. } => (StatusCode::ACCEPTED, Json(self)).into_response(),
            ProcessResponse::AlreadyProcessing { .. } => (StatusCode::OK, Json(self)).into_response(),
        }
    }
}

/// Admits a chunk and spawns its worker. The handler itself never blocks on
/// the worker's progress — admission is durable as soon as this returns.
pub async fn process(
    State(deps): State<Arc<Deps>>,
    Json(req): Json<ProcessRequest>,
) -> Result<ProcessResponse, DispatcherError> {
    let chunk_id = req.chunk_id.clone();
    let response = pinax_worker::admit_chunk(&deps, req)
        .map_err(|e| DispatcherError::Internal(e.to_string()))?;

    if matches!(response, ProcessResponse::Accepted { .. }) {
        pinax_worker::spawn_chunk_worker(chunk_id, (*deps).clone());
    }

    Ok(response)
}

pub async fn status(
    State(deps): State<Arc<Deps>>,
    Path(chunk_id): Path<String>,
) -> Result<Json<pinax_types::StatusResponse>, DispatcherError> {
    let status = pinax_worker::compute_progress(&deps, &chunk_id)
        .map_err(|e| DispatcherError::Internal(e.to_string()))?
        .ok_or_else(|| DispatcherError::NotFound(format!("no chunk {chunk_id}")))?;
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
pub struct ExtractMetadataRequest {
    directory_name: String,
    files: Vec<ContextFile>,
    #[serde(default)]
    existing_pinax: Option<serde_json::Value>,
    #[serde(default)]
    custom_prompt: Option<String>,
    #[serde(default)]
    institution: Option<String>,
    #[serde(default)]
    access_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExtractMetadataResponse {
    record: PinaxRecord,
    validation: pinax_types::ValidationReport,
}

/// Single-shot extraction over an inline bundle, bypassing the object store
/// and the chunk engine entirely — a synchronous helper, not part of the
/// core pipeline.
pub async fn extract_metadata(
    State(deps): State<Arc<Deps>>,
    Json(req): Json<ExtractMetadataRequest>,
) -> Result<Json<ExtractMetadataResponse>, DispatcherError> {
    let bundle = ContextBundle {
        directory_name: req.directory_name,
        files: req.files,
        existing_pinax: req.existing_pinax,
    };
    let overrides = req.institution.map(|inst| PinaxRecord {
        institution: Some(inst),
        ..Default::default()
    });

    let (record, validation) = deps
        .extractor
        .extract(
            &bundle,
            req.custom_prompt.as_deref(),
            overrides.as_ref(),
            req.access_url.as_deref(),
        )
        .await
        .map_err(|e| DispatcherError::Internal(e.to_string()))?;

    Ok(Json(ExtractMetadataResponse { record, validation }))
}

/// Pure validation, no model call and no state: the record is validated
/// exactly as given.
pub async fn validate_metadata(
    Json(record): Json<PinaxRecord>,
) -> Json<pinax_types::ValidationReport> {
    Json(pinax_extractor::validate(&record))
}

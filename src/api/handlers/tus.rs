//! Resumable chunked upload handlers (TUS-like semantics).
//!
//! The append/probe pair speaks through `Upload-Offset`/`Upload-Length`
//! headers the way TUS clients expect; create, verify and finalize are
//! plain JSON.

use super::AppState;
use crate::api::ApiError;
use crate::types::{UploadError, UploadOutcome};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};

const UPLOAD_OFFSET: &str = "Upload-Offset";
const UPLOAD_LENGTH: &str = "Upload-Length";

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub filename: String,
    pub size: u64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub location: String,
}

/// POST /tus/create
#[instrument(skip(state, req))]
pub async fn tus_create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    info!("Create session: {} ({} bytes)", req.filename, req.size);
    let session_id = state
        .orchestrator
        .create_session(&req.filename, req.size, req.metadata)
        .await?;
    let location = format!("/tus/{}", session_id);
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id,
            location,
        }),
    ))
}

/// PATCH /tus/{id} — append the body at the offset named by `Upload-Offset`.
/// Responds 204 with the new offset in the same header.
#[instrument(skip(state, headers, body))]
pub async fn tus_append(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let offset: u64 = headers
        .get(UPLOAD_OFFSET)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            ApiError(UploadError::InvalidInput(
                "missing or malformed Upload-Offset header".to_string(),
            ))
        })?;

    let new_offset = state.orchestrator.append_session(&id, offset, &body).await?;

    Ok((
        StatusCode::NO_CONTENT,
        [(UPLOAD_OFFSET, new_offset.to_string())],
    )
        .into_response())
}

/// HEAD /tus/{id} — offset probe for resuming clients.
#[instrument(skip(state))]
pub async fn tus_probe(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let info = state.orchestrator.session_status(&id).await?;
    Ok((
        StatusCode::OK,
        [
            (UPLOAD_OFFSET, info.offset.to_string()),
            (UPLOAD_LENGTH, info.declared_size.to_string()),
            ("Upload-Status", format!("{:?}", info.status).to_lowercase()),
            ("Cache-Control", "no-store".to_string()),
        ],
    )
        .into_response())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    #[serde(flatten)]
    pub info: crate::session::SessionInfo,
    pub percent: f64,
}

/// GET /tus/{id}/status — JSON session state for dashboards.
#[instrument(skip(state))]
pub async fn tus_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let info = state.orchestrator.session_status(&id).await?;
    let percent = if info.declared_size > 0 {
        info.offset as f64 * 100.0 / info.declared_size as f64
    } else {
        0.0
    };
    Ok(Json(SessionStatusResponse { info, percent }))
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub expected_hash: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub verified: bool,
    pub hash: String,
}

/// POST /tus/{id}/verify
#[instrument(skip(state, req))]
pub async fn tus_verify(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let hash = state
        .orchestrator
        .verify_session(&id, &req.expected_hash)
        .await?;
    Ok(Json(VerifyResponse {
        verified: true,
        hash,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub object_key: String,
    pub size: u64,
    pub file_hash: String,
}

/// POST /tus/{id}/finalize — promote the session bytes to a stored object.
#[instrument(skip(state))]
pub async fn tus_finalize(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<FinalizeResponse>, ApiError> {
    let UploadOutcome {
        object_key,
        size,
        file_hash,
    } = state.orchestrator.finalize_session(&id).await?;
    Ok(Json(FinalizeResponse {
        object_key,
        size,
        file_hash,
    }))
}

/// DELETE /tus/{id} — abort and clean up. Idempotent.
#[instrument(skip(state))]
pub async fn tus_cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.cancel_session(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

//! Presigned-upload handlers: single, batch, and completion.

use super::AppState;
use crate::api::ApiError;
use crate::orchestrator::{FileRequest, PresignOutcome};
use crate::storage::PartEtag;
use crate::types::{UploadError, UploadOutcome};
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignRequest {
    pub filename: String,
    pub file_size: u64,
    /// Optional pre-known content hash for the friendly duplicate check.
    #[serde(default)]
    pub file_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PresignBatchRequest {
    pub files: Vec<PresignRequest>,
}

/// Per-file presign result. `upload_url` is set for single PUTs; the
/// multipart fields for large files; `is_duplicate` when the content is
/// already stored.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part_urls: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_secs: Option<u64>,
    pub is_duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<PresignOutcome> for PresignResponse {
    fn from(outcome: PresignOutcome) -> Self {
        match outcome {
            PresignOutcome::Duplicate { existing_key } => PresignResponse {
                is_duplicate: true,
                message: Some(format!("Content already stored as {}", existing_key)),
                object_key: Some(existing_key),
                ..Default::default()
            },
            PresignOutcome::Single {
                object_key,
                upload_url,
                expires_in_secs,
            } => PresignResponse {
                upload_url: Some(upload_url),
                object_key: Some(object_key),
                expires_in_secs: Some(expires_in_secs),
                ..Default::default()
            },
            PresignOutcome::Multipart {
                object_key,
                upload_id,
                part_size,
                part_urls,
                expires_in_secs,
            } => PresignResponse {
                object_key: Some(object_key),
                upload_id: Some(upload_id),
                part_size: Some(part_size),
                part_urls: Some(part_urls),
                expires_in_secs: Some(expires_in_secs),
                ..Default::default()
            },
        }
    }
}

/// POST /upload/presigned
#[instrument(skip(state))]
pub async fn presign_single(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PresignRequest>,
) -> Result<Json<PresignResponse>, ApiError> {
    info!("Presign request: {} ({} bytes)", req.filename, req.file_size);
    let outcome = state
        .orchestrator
        .request_upload(&FileRequest {
            filename: req.filename,
            declared_size: req.file_size,
            declared_hash: req.file_hash,
        })
        .await?;
    Ok(Json(outcome.into()))
}

#[derive(Debug, Serialize)]
pub struct PresignBatchResponse {
    pub results: HashMap<String, PresignResponse>,
}

/// POST /upload/presigned/batch
///
/// Per-file failures land in the result map instead of failing the batch.
#[instrument(skip(state, req))]
pub async fn presign_batch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PresignBatchRequest>,
) -> Result<Json<PresignBatchResponse>, ApiError> {
    if req.files.is_empty() {
        return Err(ApiError(UploadError::InvalidInput(
            "batch must name at least one file".to_string(),
        )));
    }
    info!("Presign batch: {} files", req.files.len());

    let mut results = HashMap::new();
    for file in req.files {
        let filename = file.filename.clone();
        let response = match state
            .orchestrator
            .request_upload(&FileRequest {
                filename: file.filename,
                declared_size: file.file_size,
                declared_hash: file.file_hash,
            })
            .await
        {
            Ok(outcome) => outcome.into(),
            Err(e) => PresignResponse {
                message: Some(e.to_string()),
                ..Default::default()
            },
        };
        results.insert(filename, response);
    }
    Ok(Json(PresignBatchResponse { results }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePart {
    pub part_number: u32,
    pub etag: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    /// Absent for single-PUT uploads.
    #[serde(default)]
    pub upload_id: Option<String>,
    pub object_name: String,
    #[serde(default)]
    pub parts: Vec<CompletePart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    pub object_key: String,
    pub size: u64,
    pub file_hash: String,
}

impl From<UploadOutcome> for CompleteResponse {
    fn from(outcome: UploadOutcome) -> Self {
        CompleteResponse {
            object_key: outcome.object_key,
            size: outcome.size,
            file_hash: outcome.file_hash,
        }
    }
}

/// POST /upload/complete — finalize after the client's bytes landed.
/// With an `uploadId` this completes the multipart upload first; without
/// one it verifies and registers a single-PUT object.
#[instrument(skip(state, req))]
pub async fn complete_upload(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CompleteRequest>,
) -> Result<Json<CompleteResponse>, ApiError> {
    let outcome = match &req.upload_id {
        Some(upload_id) => {
            info!(
                "Complete multipart {} for {} ({} parts)",
                upload_id,
                req.object_name,
                req.parts.len()
            );
            let parts: Vec<PartEtag> = req
                .parts
                .iter()
                .map(|p| PartEtag {
                    number: p.part_number,
                    etag: p.etag.clone(),
                })
                .collect();
            state
                .orchestrator
                .complete_multipart(upload_id, &req.object_name, &parts)
                .await?
        }
        None => {
            info!("Complete single upload for {}", req.object_name);
            state.orchestrator.complete_single(&req.object_name).await?
        }
    };
    Ok(Json(outcome.into()))
}

//! Stored-object browsing.

use super::AppState;
use crate::api::ApiError;
use crate::orchestrator::FileEntry;
use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Serialize)]
pub struct FileListResponse {
    pub files: Vec<FileEntry>,
    pub count: usize,
}

/// GET /files — list stored audio with upload metadata.
#[instrument(skip(state))]
pub async fn list_files(
    State(state): State<Arc<AppState>>,
) -> Result<Json<FileListResponse>, ApiError> {
    let files = state.orchestrator.list_files().await?;
    let count = files.len();
    Ok(Json(FileListResponse { files, count }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadUrlResponse {
    pub download_url: String,
    pub expires_in_secs: u64,
}

/// GET /files/{key}/download — presigned GET URL for one object.
#[instrument(skip(state))]
pub async fn download_url(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<DownloadUrlResponse>, ApiError> {
    let download_url = state.orchestrator.download_url(&key).await?;
    Ok(Json(DownloadUrlResponse {
        download_url,
        expires_in_secs: state.orchestrator.presign_get_ttl().as_secs(),
    }))
}

//! API error type and JSON responses

use crate::types::UploadError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// HTTP-facing error. Wraps the core error kinds and renders them as a JSON
/// body with a stable `error` code.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub UploadError);

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    existing_key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_offset: Option<u64>,
}

impl ApiError {
    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            UploadError::StoreUnavailable(_) => StatusCode::BAD_GATEWAY,
            UploadError::NotFound(_) => StatusCode::NOT_FOUND,
            UploadError::AlreadyExists(_) => StatusCode::CONFLICT,
            UploadError::Duplicate { .. } => StatusCode::CONFLICT,
            UploadError::IntegrityMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            UploadError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            UploadError::OffsetMismatch { .. } => StatusCode::CONFLICT,
            UploadError::IncompleteUpload { .. } => StatusCode::PRECONDITION_FAILED,
            UploadError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            UploadError::SessionExpired(_) => StatusCode::GONE,
            UploadError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            UploadError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let existing_key = match &self.0 {
            UploadError::Duplicate { existing_key } => Some(existing_key.as_str()),
            _ => None,
        };
        let current_offset = match &self.0 {
            UploadError::OffsetMismatch { current, .. } => Some(*current),
            UploadError::IncompleteUpload { received, .. } => Some(*received),
            _ => None,
        };
        let body = ErrorBody {
            error: self.0.kind(),
            message: self.0.to_string(),
            existing_key,
            current_offset,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError(UploadError::NotFound("k".into())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError(UploadError::Duplicate {
                existing_key: "a_raw.wav".into()
            })
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError(UploadError::OffsetMismatch {
                current: 10,
                declared: 0
            })
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError(UploadError::IncompleteUpload {
                received: 1,
                expected: 2
            })
            .status_code(),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            ApiError(UploadError::InvalidInput("bad".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}

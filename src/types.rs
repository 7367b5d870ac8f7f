//! Core types for the sermon upload coordination service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Tool version identifier — uses crate name and version from Cargo.toml
pub const RELAY_TOOL: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Content-Type for stored audio. Forces the store to treat bytes as opaque;
/// no server-side transformation may occur.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// User-metadata key names attached to stored objects (ASCII, lowercase on
/// the wire as `x-amz-meta-{KEY}`). Written by the orchestrator at finalize
/// and read back by the index reconcile scan — keep the two sides on these
/// constants so they can never desync.
pub mod meta_keys {
    /// SHA-256 of the object bytes, hex-encoded. The deduplication identity.
    pub const FILE_HASH: &str = "file-hash";
    /// RFC3339 upload timestamp.
    pub const UPLOAD_DATE: &str = "upload-date";
    /// Filename as the operator workstation supplied it.
    pub const ORIGINAL_NAME: &str = "original-name";
    /// Optional quality tag (advisory, from WAV header inspection).
    pub const QUALITY: &str = "quality";
    /// Always the literal `none` — files are stored bit-perfect.
    pub const COMPRESSION: &str = "compression";
    /// Always the literal `identity`.
    pub const CONTENT_ENCODING: &str = "content-encoding";

    pub const COMPRESSION_NONE: &str = "none";
    pub const ENCODING_IDENTITY: &str = "identity";
}

/// Errors from validating user-provided filenames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameError(String);

impl fmt::Display for FilenameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for FilenameError {}

/// Validate a client-supplied filename for storage-key derivation.
/// Filenames are flat — path separators are rejected, not normalized.
pub fn validate_filename(name: &str) -> Result<(), FilenameError> {
    if name.is_empty() {
        return Err(FilenameError("Filename must not be empty".to_string()));
    }
    if name.contains('\0') {
        return Err(FilenameError(
            "Filename must not contain NUL bytes".to_string(),
        ));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(FilenameError(
            "Filename must not contain path separators".to_string(),
        ));
    }
    if name == "." || name == ".." {
        return Err(FilenameError("Invalid filename".to_string()));
    }
    Ok(())
}

/// Derive the canonical object key from an original filename by inserting
/// the configured suffix before the extension: `sermon.wav` + `_raw`
/// → `sermon_raw.wav`. A name without an extension gets the suffix appended.
pub fn derive_object_key(filename: &str, suffix: &str) -> Result<String, FilenameError> {
    validate_filename(filename)?;
    // rfind so "a.b.wav" keeps its inner dots; a leading dot (".hidden") is
    // part of the name, not an extension.
    match filename.rfind('.') {
        Some(idx) if idx > 0 => Ok(format!(
            "{}{}{}",
            &filename[..idx],
            suffix,
            &filename[idx..]
        )),
        _ => Ok(format!("{}{}", filename, suffix)),
    }
}

/// Invert `derive_object_key`: recover the original filename from a derived
/// key. Returns the key unchanged when the suffix is not present.
pub fn original_from_key(object_key: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        return object_key.to_string();
    }
    match object_key.rfind('.') {
        Some(idx) if idx > 0 => {
            let (stem, ext) = object_key.split_at(idx);
            match stem.strip_suffix(suffix) {
                Some(original_stem) => format!("{}{}", original_stem, ext),
                None => object_key.to_string(),
            }
        }
        _ => object_key
            .strip_suffix(suffix)
            .map(str::to_string)
            .unwrap_or_else(|| object_key.to_string()),
    }
}

/// Storage key of the advisory sidecar JSON for an object.
pub fn sidecar_key(object_key: &str) -> String {
    format!("metadata/{}.json", object_key)
}

/// True iff `s` is a well-formed content hash: 64 lowercase hex chars.
pub fn is_content_hash(s: &str) -> bool {
    s.len() == 64
        && s.bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Advisory sidecar written at `metadata/<key>.json` after finalize.
/// Best-effort: absence or corruption never invalidates the object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarMetadata {
    /// Tool version: "sermon-relay/0.3.2"
    pub tool: String,

    /// Canonical object key the sidecar describes
    pub object_key: String,

    /// Filename as uploaded
    pub original_name: String,

    /// Object size in bytes
    pub size: u64,

    /// SHA-256 of the object bytes, hex-encoded
    pub file_hash: String,

    /// Upload completion timestamp (UTC)
    pub uploaded_at: DateTime<Utc>,

    /// Downstream analysis status, if any pipeline has run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_status: Option<String>,
}

impl SidecarMetadata {
    pub fn new(object_key: String, original_name: String, size: u64, file_hash: String) -> Self {
        Self {
            tool: RELAY_TOOL.to_string(),
            object_key,
            original_name,
            size,
            file_hash,
            uploaded_at: Utc::now(),
            analysis_status: None,
        }
    }
}

/// Outcome of a successful finalize.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub object_key: String,
    pub size: u64,
    pub file_hash: String,
}

/// Error kinds surfaced by the upload core. The HTTP layer maps these to
/// status codes; the event bus mirrors terminal failures with the same kind.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Object store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Duplicate content, already stored as {existing_key}")]
    Duplicate { existing_key: String },

    #[error("Integrity mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Offset mismatch: session is at {current}, append declared {declared}")]
    OffsetMismatch { current: u64, declared: u64 },

    #[error("Incomplete upload: {received} of {expected} bytes received")]
    IncompleteUpload { received: u64, expected: u64 },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    /// Stable kind label, shared by the HTTP error body, the failure metric
    /// and the error events on the bus.
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::StoreUnavailable(_) => "store_unavailable",
            UploadError::NotFound(_) => "not_found",
            UploadError::AlreadyExists(_) => "already_exists",
            UploadError::Duplicate { .. } => "duplicate",
            UploadError::IntegrityMismatch { .. } => "integrity_mismatch",
            UploadError::InvalidInput(_) => "invalid_input",
            UploadError::OffsetMismatch { .. } => "offset_mismatch",
            UploadError::IncompleteUpload { .. } => "incomplete_upload",
            UploadError::SessionNotFound(_) => "session_not_found",
            UploadError::SessionExpired(_) => "session_expired",
            UploadError::Io(_) => "io_error",
            UploadError::Internal(_) => "internal",
        }
    }
}

impl From<FilenameError> for UploadError {
    fn from(err: FilenameError) -> Self {
        UploadError::InvalidInput(err.to_string())
    }
}

impl From<crate::storage::StorageError> for UploadError {
    fn from(err: crate::storage::StorageError) -> Self {
        use crate::storage::StorageError;
        match err {
            StorageError::NotFound(key) => UploadError::NotFound(key),
            StorageError::AlreadyExists(key) => UploadError::AlreadyExists(key),
            StorageError::Unavailable(msg) => UploadError::StoreUnavailable(msg),
            StorageError::InvalidArgument(msg) => UploadError::InvalidInput(msg),
            StorageError::Io(e) => UploadError::Io(e),
            other => UploadError::Internal(other.to_string()),
        }
    }
}

//! Object store gateway trait definitions

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncRead;

use async_trait::async_trait;

/// Errors that can occur during object store operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Storage error: {0}")]
    Other(String),
}

impl StorageError {
    /// Transient errors are worth retrying; the rest fail immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Unavailable(_) => true,
            StorageError::Other(msg) | StorageError::UploadFailed(msg) => {
                is_transient_message(msg)
            }
            _ => false,
        }
    }
}

/// Substring classification of store error text. The SDK does not expose a
/// stable error taxonomy for connection-level failures, so match the phrases
/// the transport layer actually produces.
pub fn is_transient_message(msg: &str) -> bool {
    const TRANSIENT: &[&str] = &[
        "connection reset",
        "connection refused",
        "connection closed",
        "broken pipe",
        "timed out",
        "timeout",
        "temporary failure",
        "deadline exceeded",
        "service unavailable",
        "slow down",
        "dispatch failure",
    ];
    let lower = msg.to_ascii_lowercase();
    TRANSIENT.iter().any(|needle| lower.contains(needle))
}

/// Result of a HEAD/stat call.
#[derive(Debug, Clone)]
pub struct ObjectStat {
    pub size: u64,
    pub etag: String,
    pub user_metadata: HashMap<String, String>,
    pub last_modified: DateTime<Utc>,
}

/// One entry from a bucket listing. `user_metadata` is populated only when
/// the listing was requested with metadata; a per-object stat failure leaves
/// it `None` and the listing continues.
#[derive(Debug, Clone)]
pub struct ListedObject {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub user_metadata: Option<HashMap<String, String>>,
}

/// A completed multipart part as reported by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartEtag {
    pub number: u32,
    pub etag: String,
}

/// Reader handed to `put_stream`. Boxed so the trait stays object-safe.
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// Streaming body returned by `get_stream`.
pub type ByteStream = BoxStream<'static, Result<Bytes, StorageError>>;

/// Minimal gateway to an S3-compatible object store, independent of the
/// underlying protocol. All bulk-transfer paths stream; nothing here loads a
/// full audio file into memory.
///
/// This trait is object-safe and is shared as `Arc<dyn ObjectStore>`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create the bucket if absent. Idempotent.
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError>;

    /// Put a small payload (index snapshots, sidecars). Callers with large
    /// bodies use `put_stream`.
    async fn put_bytes(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        metadata: &HashMap<String, String>,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Stream `size` bytes from `reader` into the object. Implementations
    /// switch to multipart above their configured threshold and never buffer
    /// more than one part at a time.
    async fn put_stream(
        &self,
        bucket: &str,
        key: &str,
        reader: ByteReader,
        size: u64,
        metadata: &HashMap<String, String>,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Fetch a small object fully into memory.
    async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError>;

    /// Stream an object's bytes.
    async fn get_stream(&self, bucket: &str, key: &str) -> Result<ByteStream, StorageError>;

    /// Size, ETag, user metadata and mtime for one object.
    async fn stat(&self, bucket: &str, key: &str) -> Result<ObjectStat, StorageError>;

    /// List objects under `prefix`. With `with_metadata`, each entry is
    /// stat-ed for user metadata; a failing stat leaves that entry's
    /// metadata empty rather than failing the listing.
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
        with_metadata: bool,
    ) -> Result<Vec<ListedObject>, StorageError>;

    /// Replace an object's user metadata in place (server-side copy onto
    /// itself with a metadata-replace directive). No byte re-upload.
    async fn copy_with_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &HashMap<String, String>,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Delete an object. Idempotent — removing an absent key succeeds.
    async fn remove(&self, bucket: &str, key: &str) -> Result<(), StorageError>;

    /// Mint a presigned PUT URL valid for `ttl`.
    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StorageError>;

    /// Mint a presigned GET URL valid for `ttl`.
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StorageError>;

    /// Begin a multipart upload; returns the store-issued upload id.
    async fn multipart_init(
        &self,
        bucket: &str,
        key: &str,
        metadata: &HashMap<String, String>,
        content_type: &str,
    ) -> Result<String, StorageError>;

    /// Mint a presigned URL for one part of an in-progress multipart upload.
    async fn presign_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        ttl: Duration,
    ) -> Result<String, StorageError>;

    /// Complete a multipart upload. `parts` must be sorted ascending by
    /// part number, with the ETags the store returned for each part.
    async fn multipart_complete(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[PartEtag],
    ) -> Result<String, StorageError>;

    /// Abort a multipart upload, releasing stored parts.
    async fn multipart_abort(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError>;
}

//! In-memory object store backend for tests and local development.
//!
//! Mirrors the S3 gateway contract closely enough that the orchestrator and
//! index are exercised unchanged: MD5 ETags, S3-style multipart completion
//! (`MD5(concat of part MD5s)-N`), ascending part-number validation.
//! Contents are ephemeral — lost on restart.

use super::traits::{
    ByteReader, ByteStream, ListedObject, ObjectStat, ObjectStore, PartEtag, StorageError,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream;
use md5::{Digest, Md5};
use parking_lot::RwLock;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// Chunk size for simulated streaming reads.
const STREAM_CHUNK: usize = 32 * 1024;

struct StoredObject {
    data: Bytes,
    metadata: HashMap<String, String>,
    content_type: String,
    etag: String,
    last_modified: DateTime<Utc>,
}

/// Data for a single uploaded part
struct PartData {
    data: Bytes,
    md5_hex: String,
    md5_raw: [u8; 16],
    size: u64,
}

/// State for an in-progress multipart upload
struct MultipartUpload {
    bucket: String,
    key: String,
    metadata: HashMap<String, String>,
    content_type: String,
    parts: HashMap<u32, PartData>,
}

/// Thread-safe in-memory object store.
pub struct MemoryStore {
    buckets: RwLock<HashMap<String, HashMap<String, StoredObject>>>,
    uploads: RwLock<HashMap<String, MultipartUpload>>,
    id_counter: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            uploads: RwLock::new(HashMap::new()),
            id_counter: AtomicU64::new(0),
        }
    }

    fn store_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        metadata: HashMap<String, String>,
        content_type: String,
        etag: String,
    ) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::NotFound(bucket.to_string()))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                data,
                metadata,
                content_type,
                etag,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    /// Simulate a client PUT against a presigned URL: bytes land with no
    /// user metadata, exactly as a browser upload would deliver them.
    pub fn client_put(&self, bucket: &str, key: &str, data: Bytes) -> Result<String, StorageError> {
        let etag = hex::encode(Md5::digest(&data));
        self.store_object(
            bucket,
            key,
            data,
            HashMap::new(),
            crate::types::OCTET_STREAM.to_string(),
            etag.clone(),
        )?;
        Ok(etag)
    }

    /// Simulate a client PUT of one part against a presigned part URL.
    /// Returns the part's ETag. Re-uploading a part number replaces it.
    pub fn client_put_part(
        &self,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, StorageError> {
        if !(1..=super::MAX_PARTS as u32).contains(&part_number) {
            return Err(StorageError::InvalidArgument(format!(
                "part number {} out of range",
                part_number
            )));
        }

        let md5_raw: [u8; 16] = Md5::digest(&data).into();
        let md5_hex = hex::encode(md5_raw);
        let size = data.len() as u64;

        let mut uploads = self.uploads.write();
        let upload = uploads
            .get_mut(upload_id)
            .ok_or_else(|| StorageError::NotFound(upload_id.to_string()))?;

        upload.parts.insert(
            part_number,
            PartData {
                data,
                md5_hex: md5_hex.clone(),
                md5_raw,
                size,
            },
        );

        Ok(md5_hex)
    }

    /// Direct byte access for test assertions.
    pub fn object_bytes(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.buckets
            .read()
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|o| o.data.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        self.buckets
            .write()
            .entry(bucket.to_string())
            .or_default();
        Ok(())
    }

    async fn put_bytes(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        metadata: &HashMap<String, String>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let etag = hex::encode(Md5::digest(&data));
        self.store_object(
            bucket,
            key,
            data,
            metadata.clone(),
            content_type.to_string(),
            etag,
        )
    }

    async fn put_stream(
        &self,
        bucket: &str,
        key: &str,
        mut reader: ByteReader,
        size: u64,
        metadata: &HashMap<String, String>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let mut buf = BytesMut::with_capacity(size.min(1024 * 1024) as usize);
        loop {
            let n = reader.read_buf(&mut buf).await?;
            if n == 0 {
                break;
            }
        }
        if buf.len() as u64 != size {
            return Err(StorageError::UploadFailed(format!(
                "reader yielded {} bytes, expected {}",
                buf.len(),
                size
            )));
        }
        self.put_bytes(bucket, key, buf.freeze(), metadata, content_type)
            .await
    }

    async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        self.object_bytes(bucket, key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn get_stream(&self, bucket: &str, key: &str) -> Result<ByteStream, StorageError> {
        let data = self.get_bytes(bucket, key).await?;
        let chunks: Vec<Result<Bytes, StorageError>> = data
            .chunks(STREAM_CHUNK)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn stat(&self, bucket: &str, key: &str) -> Result<ObjectStat, StorageError> {
        let buckets = self.buckets.read();
        let object = buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(ObjectStat {
            size: object.data.len() as u64,
            etag: object.etag.clone(),
            user_metadata: object.metadata.clone(),
            last_modified: object.last_modified,
        })
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
        with_metadata: bool,
    ) -> Result<Vec<ListedObject>, StorageError> {
        let buckets = self.buckets.read();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::NotFound(bucket.to_string()))?;

        let mut entries: Vec<ListedObject> = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| {
                // Without recursion, skip keys nested under a deeper "/".
                recursive || !key[prefix.len()..].contains('/')
            })
            .map(|(key, object)| ListedObject {
                key: key.clone(),
                size: object.data.len() as u64,
                last_modified: Some(object.last_modified),
                user_metadata: with_metadata.then(|| object.metadata.clone()),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn copy_with_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &HashMap<String, String>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write();
        let object = buckets
            .get_mut(bucket)
            .and_then(|objects| objects.get_mut(key))
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        object.metadata = metadata.clone();
        object.content_type = content_type.to_string();
        object.last_modified = Utc::now();
        Ok(())
    }

    async fn remove(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        if let Some(objects) = self.buckets.write().get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }

    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        Ok(format!(
            "memory://{}/{}?op=put&expires={}",
            bucket,
            key,
            ttl.as_secs()
        ))
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        Ok(format!(
            "memory://{}/{}?op=get&expires={}",
            bucket,
            key,
            ttl.as_secs()
        ))
    }

    async fn multipart_init(
        &self,
        bucket: &str,
        key: &str,
        metadata: &HashMap<String, String>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        if !self.buckets.read().contains_key(bucket) {
            return Err(StorageError::NotFound(bucket.to_string()));
        }

        // SHA256(counter + timestamp_nanos + bucket + key), first 32 hex chars
        let counter = self.id_counter.fetch_add(1, Ordering::SeqCst);
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or(0);
        let mut hasher = Sha256::new();
        hasher.update(counter.to_le_bytes());
        hasher.update(nanos.to_le_bytes());
        hasher.update(bucket.as_bytes());
        hasher.update(key.as_bytes());
        let hash = hasher.finalize();
        let upload_id = hex::encode(&hash[..16]);

        self.uploads.write().insert(
            upload_id.clone(),
            MultipartUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                metadata: metadata.clone(),
                content_type: content_type.to_string(),
                parts: HashMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn presign_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        Ok(format!(
            "memory://{}/{}?op=part&uploadId={}&partNumber={}&expires={}",
            bucket,
            key,
            upload_id,
            part_number,
            ttl.as_secs()
        ))
    }

    async fn multipart_complete(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[PartEtag],
    ) -> Result<String, StorageError> {
        if parts.is_empty() {
            return Err(StorageError::InvalidArgument(
                "multipart completion requires at least one part".to_string(),
            ));
        }

        // Validate ascending order
        for window in parts.windows(2) {
            if window[0].number >= window[1].number {
                return Err(StorageError::InvalidArgument(
                    "parts must be in ascending order".to_string(),
                ));
            }
        }

        let assembled = {
            let uploads = self.uploads.read();
            let upload = uploads
                .get(upload_id)
                .ok_or_else(|| StorageError::NotFound(upload_id.to_string()))?;

            if upload.bucket != bucket || upload.key != key {
                return Err(StorageError::NotFound(upload_id.to_string()));
            }

            // Validate each part exists and ETags match; assemble in order.
            let mut md5_concat = Vec::new();
            let mut data = BytesMut::new();
            let mut total: u64 = 0;

            for requested in parts {
                let part = upload.parts.get(&requested.number).ok_or_else(|| {
                    StorageError::InvalidArgument(format!(
                        "part {} has not been uploaded",
                        requested.number
                    ))
                })?;

                let requested_clean = requested.etag.trim_matches('"');
                if requested_clean != part.md5_hex {
                    return Err(StorageError::InvalidArgument(format!(
                        "etag mismatch for part {}",
                        requested.number
                    )));
                }

                md5_concat.extend_from_slice(&part.md5_raw);
                data.extend_from_slice(&part.data);
                total += part.size;
            }

            // S3-compatible multipart ETag: MD5(concat of part MD5 raw bytes)-N
            let final_md5 = Md5::digest(&md5_concat);
            let etag = format!("{}-{}", hex::encode(final_md5), parts.len());

            (data.freeze(), etag, upload.metadata.clone(), upload.content_type.clone(), total)
        };

        let (data, etag, metadata, content_type, _total) = assembled;
        self.store_object(bucket, key, data, metadata, content_type, etag.clone())?;
        self.uploads.write().remove(upload_id);
        Ok(etag)
    }

    async fn multipart_abort(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        let mut uploads = self.uploads.write();
        match uploads.get(upload_id) {
            Some(upload) if upload.bucket == bucket && upload.key == key => {
                uploads.remove(upload_id);
                Ok(())
            }
            _ => Err(StorageError::NotFound(upload_id.to_string())),
        }
    }
}

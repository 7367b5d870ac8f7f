//! S3 object store gateway implementation using the AWS SDK

use super::retry::with_retry;
use super::traits::{
    ByteReader, ByteStream, ListedObject, ObjectStat, ObjectStore, PartEtag, StorageError,
};
use crate::config::{Config, RetryConfig, StoreConfig};
use crate::metrics::Metrics;
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::{
    ChecksumAlgorithm, CompletedMultipartUpload, CompletedPart, MetadataDirective,
};
use aws_sdk_s3::Client;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument, warn};

/// Copy buffer for streaming reads.
const COPY_BUF: usize = 32 * 1024;

/// S3-compatible object store gateway. Holds two clients: one for server-side
/// operations and one for presigning, which may point at a different
/// (publicly reachable) endpoint.
pub struct S3Store {
    client: Client,
    presign_client: Client,
    retry: RetryConfig,
    multipart_threshold: u64,
    metrics: Option<Arc<Metrics>>,
}

impl S3Store {
    /// Create a new S3 gateway from configuration.
    pub fn new(config: &Config, metrics: Option<Arc<Metrics>>) -> Result<Self, StorageError> {
        let (endpoint, region, force_path_style, access_key_id, secret_access_key, public_endpoint) =
            match &config.store {
                StoreConfig::S3 {
                    endpoint,
                    region,
                    force_path_style,
                    access_key_id,
                    secret_access_key,
                    public_endpoint,
                } => (
                    endpoint.clone(),
                    region.clone(),
                    *force_path_style,
                    access_key_id.clone(),
                    secret_access_key.clone(),
                    public_endpoint.clone(),
                ),
                _ => {
                    return Err(StorageError::Other(
                        "S3Store requires S3 configuration".to_string(),
                    ))
                }
            };

        let build_client = |endpoint: Option<&String>| {
            let mut builder = S3ConfigBuilder::new()
                .region(Region::new(region.clone()))
                .force_path_style(force_path_style)
                .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest());

            if let Some(ep) = endpoint {
                builder = builder.endpoint_url(ep);
            }

            if let (Some(key_id), Some(secret)) = (&access_key_id, &secret_access_key) {
                let credentials =
                    Credentials::new(key_id, secret, None, None, "sermon-relay-config");
                builder = builder.credentials_provider(credentials);
            }

            Client::from_conf(builder.build())
        };

        let client = build_client(endpoint.as_ref());
        // Presigned URLs embed the host they were signed for; clients behind a
        // different hostname need URLs minted against the public endpoint.
        let presign_client = match &public_endpoint {
            Some(public) => build_client(Some(public)),
            None => build_client(endpoint.as_ref()),
        };

        debug!("S3Store initialized (public endpoint: {:?})", public_endpoint);

        Ok(Self {
            client,
            presign_client,
            retry: config.retry.clone(),
            multipart_threshold: config.multipart_threshold_bytes,
            metrics,
        })
    }

    fn classify<E, R>(op: &str, err: &SdkError<E, R>) -> StorageError
    where
        E: std::error::Error,
        R: std::fmt::Debug,
    {
        match err {
            SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
                StorageError::Unavailable(format!("{}: {}", op, err))
            }
            _ => StorageError::Other(format!("{} failed: {}", op, err)),
        }
    }

    /// Upload `size` bytes from `reader` as a multipart upload, one part
    /// buffered at a time.
    async fn put_multipart_stream(
        &self,
        bucket: &str,
        key: &str,
        mut reader: ByteReader,
        size: u64,
        metadata: &HashMap<String, String>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let part_size = super::adaptive_part_size(size, self.multipart_threshold)
            .unwrap_or(8 * 1024 * 1024);

        let upload_id = self.multipart_init(bucket, key, metadata, content_type).await?;

        let mut parts: Vec<PartEtag> = Vec::new();
        let mut remaining = size;
        let mut part_number: u32 = 1;

        while remaining > 0 {
            let this_part = remaining.min(part_size);
            // Bound the reader so a greedy read cannot cross the part boundary
            let mut part_reader = (&mut reader).take(this_part);
            let mut buf = BytesMut::with_capacity(this_part as usize);
            loop {
                let n = part_reader.read_buf(&mut buf).await?;
                if n == 0 {
                    break;
                }
            }
            if (buf.len() as u64) != this_part {
                // Reader ended early; abandon the upload so the store can
                // reclaim the parts.
                let _ = self.multipart_abort(bucket, key, &upload_id).await;
                return Err(StorageError::UploadFailed(format!(
                    "reader ended at part {} ({} of {} bytes)",
                    part_number,
                    size - remaining + buf.len() as u64,
                    size
                )));
            }

            let body = buf.freeze();
            let output = with_retry(
                &self.retry,
                self.metrics.as_ref(),
                "upload_part",
                || async {
                    self.client
                        .upload_part()
                        .bucket(bucket)
                        .key(key)
                        .upload_id(&upload_id)
                        .part_number(part_number as i32)
                        .checksum_algorithm(ChecksumAlgorithm::Sha256)
                        .body(aws_sdk_s3::primitives::ByteStream::from(body.clone()))
                        .send()
                        .await
                        .map_err(|e| Self::classify("upload_part", &e))
                },
            )
            .await?;

            parts.push(PartEtag {
                number: part_number,
                etag: output.e_tag().unwrap_or_default().to_string(),
            });

            remaining -= this_part;
            part_number += 1;
        }

        self.multipart_complete(bucket, key, &upload_id, &parts)
            .await?;
        debug!(
            "S3 multipart PUT {}/{} ({} bytes in {} parts)",
            bucket,
            key,
            size,
            parts.len()
        );
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    #[instrument(skip(self))]
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let head = self.client.head_bucket().bucket(bucket).send().await;
        if head.is_ok() {
            return Ok(());
        }

        let result = with_retry(&self.retry, self.metrics.as_ref(), "create_bucket", || async {
            self.client
                .create_bucket()
                .bucket(bucket)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| {
                    if let SdkError::ServiceError(service_error) = &e {
                        let err = service_error.err();
                        if err.is_bucket_already_owned_by_you() || err.is_bucket_already_exists() {
                            return StorageError::AlreadyExists(bucket.to_string());
                        }
                    }
                    Self::classify("create_bucket", &e)
                })
        })
        .await;

        match result {
            Ok(()) => {
                debug!("Created bucket {}", bucket);
                Ok(())
            }
            Err(StorageError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, data, metadata))]
    async fn put_bytes(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        metadata: &HashMap<String, String>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        with_retry(&self.retry, self.metrics.as_ref(), "put_object", || async {
            self.client
                .put_object()
                .bucket(bucket)
                .key(key)
                .set_metadata(Some(metadata.clone()))
                .content_type(content_type)
                .checksum_algorithm(ChecksumAlgorithm::Sha256)
                .body(aws_sdk_s3::primitives::ByteStream::from(data.clone()))
                .send()
                .await
                .map(|_| ())
                .map_err(|e| Self::classify("put_object", &e))
        })
        .await?;

        debug!("S3 PUT {}/{} ({} bytes)", bucket, key, data.len());
        Ok(())
    }

    #[instrument(skip(self, reader, metadata))]
    async fn put_stream(
        &self,
        bucket: &str,
        key: &str,
        mut reader: ByteReader,
        size: u64,
        metadata: &HashMap<String, String>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        if size >= self.multipart_threshold {
            return self
                .put_multipart_stream(bucket, key, reader, size, metadata, content_type)
                .await;
        }

        // Below the threshold a single PUT is cheaper than multipart setup.
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

    #[instrument(skip(self))]
    async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if let SdkError::ServiceError(service_error) = &e {
                    if service_error.err().is_no_such_key() {
                        return StorageError::NotFound(key.to_string());
                    }
                }
                Self::classify("get_object", &e)
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Other(format!("Failed to read response body: {}", e)))?
            .into_bytes();

        debug!("S3 GET {}/{} ({} bytes)", bucket, key, data.len());
        Ok(data)
    }

    #[instrument(skip(self))]
    async fn get_stream(&self, bucket: &str, key: &str) -> Result<ByteStream, StorageError> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if let SdkError::ServiceError(service_error) = &e {
                    if service_error.err().is_no_such_key() {
                        return StorageError::NotFound(key.to_string());
                    }
                }
                Self::classify("get_object", &e)
            })?;

        let reader = response.body.into_async_read();
        let stream = ReaderStream::with_capacity(reader, COPY_BUF)
            .map(|chunk| chunk.map_err(StorageError::Io));
        Ok(Box::pin(stream))
    }

    #[instrument(skip(self))]
    async fn stat(&self, bucket: &str, key: &str) -> Result<ObjectStat, StorageError> {
        let response = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if let SdkError::ServiceError(service_error) = &e {
                    if service_error.err().is_not_found() {
                        return StorageError::NotFound(key.to_string());
                    }
                }
                Self::classify("head_object", &e)
            })?;

        let last_modified = response
            .last_modified()
            .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
            .unwrap_or_else(Utc::now);

        Ok(ObjectStat {
            size: response.content_length().unwrap_or(0) as u64,
            etag: response
                .e_tag()
                .unwrap_or_default()
                .trim_matches('"')
                .to_string(),
            user_metadata: response.metadata().cloned().unwrap_or_default(),
            last_modified,
        })
    }

    #[instrument(skip(self))]
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
        with_metadata: bool,
    ) -> Result<Vec<ListedObject>, StorageError> {
        let mut entries = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix);

            if !recursive {
                request = request.delimiter("/");
            }

            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| {
                if let SdkError::ServiceError(service_error) = &e {
                    if service_error.err().is_no_such_bucket() {
                        return StorageError::NotFound(bucket.to_string());
                    }
                }
                Self::classify("list_objects_v2", &e)
            })?;

            for object in response.contents() {
                let key = match object.key() {
                    Some(k) => k.to_string(),
                    None => continue,
                };
                let last_modified = object
                    .last_modified()
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()));

                // Listings do not carry user metadata; stat each object when
                // asked. A failing stat leaves the entry without metadata.
                let user_metadata = if with_metadata {
                    match self.stat(bucket, &key).await {
                        Ok(stat) => Some(stat.user_metadata),
                        Err(e) => {
                            debug!("stat during list failed for {}/{}: {}", bucket, key, e);
                            None
                        }
                    }
                } else {
                    None
                };

                entries.push(ListedObject {
                    size: object.size().unwrap_or(0) as u64,
                    key,
                    last_modified,
                    user_metadata,
                });
            }

            if response.is_truncated().unwrap_or(false) {
                continuation_token = response.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        Ok(entries)
    }

    #[instrument(skip(self, metadata))]
    async fn copy_with_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &HashMap<String, String>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let copy_source = format!("{}/{}", bucket, urlencoding::encode(key));
        with_retry(&self.retry, self.metrics.as_ref(), "copy_object", || async {
            self.client
                .copy_object()
                .bucket(bucket)
                .key(key)
                .copy_source(&copy_source)
                .metadata_directive(MetadataDirective::Replace)
                .set_metadata(Some(metadata.clone()))
                .content_type(content_type)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| Self::classify("copy_object", &e))
        })
        .await?;

        debug!("S3 metadata rewrite {}/{}", bucket, key);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::classify("delete_object", &e))?;

        debug!("S3 DELETE {}/{}", bucket, key);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        let config = PresigningConfig::builder()
            .expires_in(ttl)
            .build()
            .map_err(|e| StorageError::Other(format!("presigning config: {}", e)))?;

        let presigned = self
            .presign_client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(crate::types::OCTET_STREAM)
            .presigned(config)
            .await
            .map_err(|e| Self::classify("presign_put", &e))?;

        Ok(presigned.uri().to_string())
    }

    #[instrument(skip(self))]
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        let config = PresigningConfig::builder()
            .expires_in(ttl)
            .build()
            .map_err(|e| StorageError::Other(format!("presigning config: {}", e)))?;

        let presigned = self
            .presign_client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| Self::classify("presign_get", &e))?;

        Ok(presigned.uri().to_string())
    }

    #[instrument(skip(self, metadata))]
    async fn multipart_init(
        &self,
        bucket: &str,
        key: &str,
        metadata: &HashMap<String, String>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let response = with_retry(
            &self.retry,
            self.metrics.as_ref(),
            "create_multipart_upload",
            || async {
                self.client
                    .create_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .set_metadata(Some(metadata.clone()))
                    .content_type(content_type)
                    .send()
                    .await
                    .map_err(|e| Self::classify("create_multipart_upload", &e))
            },
        )
        .await?;

        response
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StorageError::Other("store returned no upload id".to_string()))
    }

    #[instrument(skip(self))]
    async fn presign_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        let config = PresigningConfig::builder()
            .expires_in(ttl)
            .build()
            .map_err(|e| StorageError::Other(format!("presigning config: {}", e)))?;

        let presigned = self
            .presign_client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .presigned(config)
            .await
            .map_err(|e| Self::classify("presign_part", &e))?;

        Ok(presigned.uri().to_string())
    }

    #[instrument(skip(self, parts))]
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

        let completed: Vec<CompletedPart> = parts
            .iter()
            .map(|p| {
                CompletedPart::builder()
                    .part_number(p.number as i32)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect();

        let response = with_retry(
            &self.retry,
            self.metrics.as_ref(),
            "complete_multipart_upload",
            || async {
                self.client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(completed.clone()))
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|e| Self::classify("complete_multipart_upload", &e))
            },
        )
        .await?;

        debug!(
            "S3 multipart complete {}/{} ({} parts)",
            bucket,
            key,
            parts.len()
        );
        Ok(response
            .e_tag()
            .unwrap_or_default()
            .trim_matches('"')
            .to_string())
    }

    #[instrument(skip(self))]
    async fn multipart_abort(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| Self::classify("abort_multipart_upload", &e))?;

        warn!("Aborted multipart upload {} for {}/{}", upload_id, bucket, key);
        Ok(())
    }
}

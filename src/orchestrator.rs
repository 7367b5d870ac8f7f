//! Upload orchestration.
//!
//! The public face of the upload core. Two ingress shapes converge here:
//! presigned URLs (clients PUT bytes straight to the object store) and
//! in-band resumable sessions (the server receives chunks). Both end in the
//! same finalize sequence: hash, post-upload dedup, sidecar, index, events.

use crate::config::Config;
use crate::events::{now_ms, EventBus, ProgressEvent};
use crate::index::HashIndex;
use crate::integrity;
use crate::metrics::Metrics;
use crate::session::{SessionInfo, SessionStatus, SessionStore};
use crate::storage::{self, ListedObject, ObjectStore, PartEtag, StorageError};
use crate::types::{
    self, derive_object_key, meta_keys, sidecar_key, SidecarMetadata, UploadError, UploadOutcome,
    OCTET_STREAM,
};
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// One file in a presign request.
#[derive(Debug, Clone)]
pub struct FileRequest {
    pub filename: String,
    pub declared_size: u64,
    /// Optional client-asserted hash, used only for the friendly pre-check.
    /// The authoritative dedup decision happens after bytes land.
    pub declared_hash: Option<String>,
}

/// What the client gets back for one presign request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PresignOutcome {
    /// Content already stored under another key (pre-known hash matched).
    Duplicate { existing_key: String },
    /// Single presigned PUT.
    Single {
        object_key: String,
        upload_url: String,
        expires_in_secs: u64,
    },
    /// Multipart upload with one presigned URL per part.
    Multipart {
        object_key: String,
        upload_id: String,
        part_size: u64,
        part_urls: Vec<String>,
        expires_in_secs: u64,
    },
}

/// Server-side record of an in-flight multipart upload.
struct MultipartHandle {
    object_key: String,
    original_filename: String,
    declared_size: u64,
    initiated_at: DateTime<Utc>,
}

/// One entry in the file browser listing.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub object_key: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
}

/// Coordinates uploads across the gateway, index, sessions and event bus.
/// Exclusively owns session lifecycle mutation and multipart handles.
pub struct Orchestrator {
    store: Arc<dyn ObjectStore>,
    index: Arc<HashIndex>,
    sessions: Arc<SessionStore>,
    bus: Arc<EventBus>,
    config: Arc<Config>,
    metrics: Option<Arc<Metrics>>,
    /// In-flight multipart uploads, keyed by upload id. Also backs the
    /// same-key refusal check for keys whose bytes have not landed yet.
    multiparts: RwLock<HashMap<String, MultipartHandle>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        index: Arc<HashIndex>,
        sessions: Arc<SessionStore>,
        bus: Arc<EventBus>,
        config: Arc<Config>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            store,
            index,
            sessions,
            bus,
            config,
            metrics,
            multiparts: RwLock::new(HashMap::new()),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.count()
    }

    pub fn index_len(&self) -> usize {
        self.index.len()
    }

    pub fn presign_get_ttl(&self) -> std::time::Duration {
        self.config.presign_ttl.get
    }

    fn primary_bucket(&self) -> &str {
        &self.config.primary_bucket
    }

    /// Refuse a derived key that is already taken, either by a stored object
    /// or by a multipart upload still in flight. A window remains between
    /// this check and the client's PUT; the second finalize then fails here.
    async fn ensure_key_free(&self, object_key: &str) -> Result<(), UploadError> {
        if self
            .multiparts
            .read()
            .values()
            .any(|h| h.object_key == object_key)
        {
            return Err(UploadError::AlreadyExists(object_key.to_string()));
        }
        match self.store.stat(self.primary_bucket(), object_key).await {
            Ok(_) => Err(UploadError::AlreadyExists(object_key.to_string())),
            Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn emit_error(&self, context: &str, err: &UploadError) {
        if let Some(m) = &self.metrics {
            m.uploads_failed_total.with_label_values(&[err.kind()]).inc();
        }
        self.bus.publish(ProgressEvent::Error {
            context: context.to_string(),
            kind: err.kind().to_string(),
            message: err.to_string(),
            timestamp_ms: now_ms(),
        });
    }

    // === Presigned-URL path ===

    /// Issue upload URL(s) for one file. Large files get a multipart
    /// descriptor with per-part URLs; small ones a single presigned PUT.
    #[instrument(skip(self))]
    pub async fn request_upload(&self, req: &FileRequest) -> Result<PresignOutcome, UploadError> {
        if req.declared_size == 0 {
            return Err(UploadError::InvalidInput(
                "file size must be greater than zero".to_string(),
            ));
        }

        // Friendly pre-check: a client that already knows its hash can skip
        // the transfer entirely.
        if let Some(hash) = &req.declared_hash {
            if types::is_content_hash(hash) {
                if let Some(existing_key) = self.index.has_hash(hash) {
                    info!(
                        "Presign pre-check: {} already stored as {}",
                        req.filename, existing_key
                    );
                    return Ok(PresignOutcome::Duplicate { existing_key });
                }
            }
        }

        let object_key = derive_object_key(&req.filename, &self.config.filename_suffix)?;
        self.ensure_key_free(&object_key).await?;

        let outcome = match storage::adaptive_part_size(
            req.declared_size,
            self.config.multipart_threshold_bytes,
        ) {
            None => {
                let upload_url = self
                    .store
                    .presign_put(
                        self.primary_bucket(),
                        &object_key,
                        self.config.presign_ttl.put,
                    )
                    .await?;
                PresignOutcome::Single {
                    object_key: object_key.clone(),
                    upload_url,
                    expires_in_secs: self.config.presign_ttl.put.as_secs(),
                }
            }
            Some(part_size) => {
                let parts = storage::part_count(req.declared_size, part_size);
                if parts > storage::MAX_PARTS {
                    return Err(UploadError::InvalidInput(format!(
                        "file needs {} parts, store allows {}",
                        parts,
                        storage::MAX_PARTS
                    )));
                }

                // Metadata set at init rides through to the completed object;
                // the hash is attached at finalize once it is known.
                let mut metadata = HashMap::new();
                metadata.insert(
                    meta_keys::ORIGINAL_NAME.to_string(),
                    req.filename.clone(),
                );
                metadata.insert(
                    meta_keys::UPLOAD_DATE.to_string(),
                    Utc::now().to_rfc3339(),
                );
                metadata.insert(
                    meta_keys::COMPRESSION.to_string(),
                    meta_keys::COMPRESSION_NONE.to_string(),
                );

                let upload_id = self
                    .store
                    .multipart_init(
                        self.primary_bucket(),
                        &object_key,
                        &metadata,
                        OCTET_STREAM,
                    )
                    .await?;

                let mut part_urls = Vec::with_capacity(parts as usize);
                for part_number in 1..=parts as u32 {
                    let url = self
                        .store
                        .presign_part(
                            self.primary_bucket(),
                            &object_key,
                            &upload_id,
                            part_number,
                            self.config.presign_ttl.part,
                        )
                        .await?;
                    part_urls.push(url);
                }

                self.multiparts.write().insert(
                    upload_id.clone(),
                    MultipartHandle {
                        object_key: object_key.clone(),
                        original_filename: req.filename.clone(),
                        declared_size: req.declared_size,
                        initiated_at: Utc::now(),
                    },
                );

                PresignOutcome::Multipart {
                    object_key: object_key.clone(),
                    upload_id,
                    part_size,
                    part_urls,
                    expires_in_secs: self.config.presign_ttl.part.as_secs(),
                }
            }
        };

        self.bus.publish(ProgressEvent::UploadStart {
            filename: req.filename.clone(),
            object_key,
            total_size: req.declared_size,
            timestamp_ms: now_ms(),
        });

        Ok(outcome)
    }

    /// Complete a multipart upload after the client confirms all part ETags,
    /// then run finalize.
    #[instrument(skip(self, parts))]
    pub async fn complete_multipart(
        &self,
        upload_id: &str,
        object_key: &str,
        parts: &[PartEtag],
    ) -> Result<UploadOutcome, UploadError> {
        if parts.is_empty() {
            return Err(UploadError::InvalidInput(
                "at least one part is required".to_string(),
            ));
        }
        for window in parts.windows(2) {
            if window[0].number >= window[1].number {
                return Err(UploadError::InvalidInput(
                    "parts must be listed in ascending order".to_string(),
                ));
            }
        }

        let result = self
            .complete_multipart_inner(upload_id, object_key, parts)
            .await;
        if let Err(e) = &result {
            self.emit_error(object_key, e);
        }
        result
    }

    async fn complete_multipart_inner(
        &self,
        upload_id: &str,
        object_key: &str,
        parts: &[PartEtag],
    ) -> Result<UploadOutcome, UploadError> {
        self.store
            .multipart_complete(self.primary_bucket(), object_key, upload_id, parts)
            .await?;

        let (original_filename, declared_size) = {
            let mut multiparts = self.multiparts.write();
            match multiparts.remove(upload_id) {
                Some(handle) => (handle.original_filename, Some(handle.declared_size)),
                // Handle lost (restart between init and complete) — fall back
                // to the stored object's metadata or the key itself.
                None => (String::new(), None),
            }
        };

        info!(
            "Multipart upload {} completed for {} ({} parts, declared {:?} bytes)",
            upload_id,
            object_key,
            parts.len(),
            declared_size
        );
        self.finalize_object(object_key, &original_filename).await
    }

    /// Finalize a single-PUT upload after the client confirms the bytes
    /// landed. The presigned PUT carries no metadata, so the hash is always
    /// computed here.
    #[instrument(skip(self))]
    pub async fn complete_single(&self, object_key: &str) -> Result<UploadOutcome, UploadError> {
        let result = self.finalize_object(object_key, "").await;
        if let Err(e) = &result {
            self.emit_error(object_key, e);
        }
        result
    }

    /// Drop multipart handles whose presigned part URLs have long expired.
    /// The store's own lifecycle rules reclaim the orphaned parts.
    pub fn expire_multipart_handles(&self) {
        let ttl = chrono::Duration::from_std(self.config.presign_ttl.part * 2)
            .unwrap_or_else(|_| chrono::Duration::hours(2));
        let cutoff = Utc::now() - ttl;
        let mut multiparts = self.multiparts.write();
        let before = multiparts.len();
        multiparts.retain(|_, handle| handle.initiated_at > cutoff);
        let dropped = before - multiparts.len();
        if dropped > 0 {
            info!("Expired {} stale multipart handles", dropped);
        }
    }

    // === Finalize (both paths converge) ===

    /// Post-landing steps for an object already in the primary bucket:
    /// hash it, reject duplicates, attach metadata, write the sidecar,
    /// record the index entry and announce completion.
    #[instrument(skip(self))]
    pub async fn finalize_object(
        &self,
        object_key: &str,
        original_filename: &str,
    ) -> Result<UploadOutcome, UploadError> {
        let stat = self.store.stat(self.primary_bucket(), object_key).await?;

        // The hash is unknown unless a previous finalize attached it.
        let (file_hash, wav_header) = match stat
            .user_metadata
            .get(meta_keys::FILE_HASH)
            .filter(|h| types::is_content_hash(h))
        {
            Some(known) => (known.clone(), None),
            None => {
                let (hash, header) = self.hash_object(object_key, stat.size).await?;
                (hash, Some(header))
            }
        };

        let original_name = if original_filename.is_empty() {
            stat.user_metadata
                .get(meta_keys::ORIGINAL_NAME)
                .cloned()
                .unwrap_or_else(|| {
                    types::original_from_key(object_key, &self.config.filename_suffix)
                })
        } else {
            original_filename.to_string()
        };

        // Post-upload duplicate check: the prior object wins, the new
        // arrival is removed.
        if let Some(existing_key) = self.index.has_hash(&file_hash) {
            if existing_key != object_key {
                warn!(
                    "Duplicate content: {} matches existing {}, removing new upload",
                    object_key, existing_key
                );
                self.store.remove(self.primary_bucket(), object_key).await?;
                if let Some(m) = &self.metrics {
                    m.uploads_duplicate_total.inc();
                }
                return Err(UploadError::Duplicate { existing_key });
            }
        }

        // Advisory container check — a bad header is a warning, not a veto.
        let quality = wav_header.and_then(|header| self.wav_quality(object_key, &header));

        let metadata = self.object_metadata(&file_hash, &original_name, quality.as_deref());
        self.store
            .copy_with_metadata(self.primary_bucket(), object_key, &metadata, OCTET_STREAM)
            .await?;

        self.write_sidecar(object_key, &original_name, stat.size, &file_hash)
            .await;

        self.index.record(&file_hash, object_key);

        if let Some(m) = &self.metrics {
            m.uploads_completed_total.inc();
            m.upload_bytes_total.inc_by(stat.size);
            m.upload_size_bytes.observe(stat.size as f64);
        }
        self.bus.publish(ProgressEvent::Completion {
            object_key: object_key.to_string(),
            filename: original_name,
            size: stat.size,
            file_hash: file_hash.clone(),
            timestamp_ms: now_ms(),
        });

        info!("Finalized {} ({} bytes, {})", object_key, stat.size, file_hash);
        Ok(UploadOutcome {
            object_key: object_key.to_string(),
            size: stat.size,
            file_hash,
        })
    }

    /// Read the object once, hashing everything and capturing the header
    /// prefix for the advisory WAV check. Small objects are fetched in one
    /// buffer; anything past the streaming threshold goes chunk by chunk.
    async fn hash_object(
        &self,
        object_key: &str,
        size: u64,
    ) -> Result<(String, BytesMut), UploadError> {
        use sha2::{Digest, Sha256};

        if size < self.config.streaming_threshold_bytes {
            let data = self
                .store
                .get_bytes(self.primary_bucket(), object_key)
                .await?;
            let prefix = &data[..integrity::WAV_HEADER_LEN.min(data.len())];
            return Ok((integrity::hash_bytes(&data), BytesMut::from(prefix)));
        }

        let mut stream = self
            .store
            .get_stream(self.primary_bucket(), object_key)
            .await?;
        let mut hasher = Sha256::new();
        let mut header = BytesMut::with_capacity(integrity::WAV_HEADER_LEN);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if header.len() < integrity::WAV_HEADER_LEN {
                let want = integrity::WAV_HEADER_LEN - header.len();
                header.extend_from_slice(&chunk[..want.min(chunk.len())]);
            }
            hasher.update(&chunk);
        }
        Ok((hex::encode(hasher.finalize()), header))
    }

    /// Run the advisory WAV check over a header prefix. Returns the quality
    /// tag on success; publishes a quality alert on failure.
    fn wav_quality(&self, object_key: &str, header: &[u8]) -> Option<String> {
        match integrity::parse_wav_header(header) {
            Ok(info) => Some(info.quality_label()),
            Err(e) => {
                warn!("WAV header check failed for {}: {}", object_key, e);
                self.bus.publish(ProgressEvent::QualityAlert {
                    object_key: object_key.to_string(),
                    message: format!("WAV header check failed: {}", e),
                    timestamp_ms: now_ms(),
                });
                None
            }
        }
    }

    fn object_metadata(
        &self,
        file_hash: &str,
        original_name: &str,
        quality: Option<&str>,
    ) -> HashMap<String, String> {
        let mut metadata = HashMap::new();
        metadata.insert(meta_keys::FILE_HASH.to_string(), file_hash.to_string());
        metadata.insert(meta_keys::UPLOAD_DATE.to_string(), Utc::now().to_rfc3339());
        metadata.insert(
            meta_keys::ORIGINAL_NAME.to_string(),
            original_name.to_string(),
        );
        metadata.insert(
            meta_keys::COMPRESSION.to_string(),
            meta_keys::COMPRESSION_NONE.to_string(),
        );
        metadata.insert(
            meta_keys::CONTENT_ENCODING.to_string(),
            meta_keys::ENCODING_IDENTITY.to_string(),
        );
        if let Some(q) = quality {
            metadata.insert(meta_keys::QUALITY.to_string(), q.to_string());
        }
        metadata
    }

    /// Sidecar writes are best-effort: object user-metadata stays the
    /// authority, so a failure here is logged and swallowed.
    async fn write_sidecar(&self, object_key: &str, original_name: &str, size: u64, hash: &str) {
        let sidecar = SidecarMetadata::new(
            object_key.to_string(),
            original_name.to_string(),
            size,
            hash.to_string(),
        );
        let json = match serde_json::to_vec_pretty(&sidecar) {
            Ok(j) => j,
            Err(e) => {
                warn!("Sidecar serialization failed for {}: {}", object_key, e);
                return;
            }
        };
        if let Err(e) = self
            .store
            .put_bytes(
                self.primary_bucket(),
                &sidecar_key(object_key),
                json.into(),
                &HashMap::new(),
                "application/json",
            )
            .await
        {
            warn!("Sidecar write failed for {} (continuing): {}", object_key, e);
        }
    }

    // === Chunked (in-band) path ===

    /// Open a resumable session.
    #[instrument(skip(self, metadata))]
    pub async fn create_session(
        &self,
        filename: &str,
        declared_size: u64,
        metadata: HashMap<String, String>,
    ) -> Result<String, UploadError> {
        // Refuse up front rather than after gigabytes of appends.
        let object_key = derive_object_key(filename, &self.config.filename_suffix)?;
        self.ensure_key_free(&object_key).await?;

        let id = self
            .sessions
            .create(filename, declared_size, metadata)
            .await?;
        self.bus.publish(ProgressEvent::SessionProgress {
            session_id: id.clone(),
            filename: filename.to_string(),
            status: "created".to_string(),
            offset: 0,
            total_size: declared_size,
            timestamp_ms: now_ms(),
        });
        Ok(id)
    }

    /// Append a chunk at `offset`; returns the new offset.
    pub async fn append_session(
        &self,
        id: &str,
        offset: u64,
        data: &[u8],
    ) -> Result<u64, UploadError> {
        let new_offset = self.sessions.append(id, offset, data).await?;

        let info = self.sessions.status(id).await?;
        let elapsed = (Utc::now() - info.created_at)
            .to_std()
            .unwrap_or_default()
            .as_secs_f64()
            .max(0.001);
        let speed_bps = new_offset as f64 / elapsed;
        let remaining = info.declared_size.saturating_sub(new_offset) as f64;
        self.bus.publish(ProgressEvent::ChunkProgress {
            session_id: id.to_string(),
            filename: info.filename,
            bytes_transferred: new_offset,
            total_size: info.declared_size,
            percent: new_offset as f64 * 100.0 / info.declared_size as f64,
            speed_bps,
            eta_seconds: if speed_bps > 0.0 { remaining / speed_bps } else { 0.0 },
            timestamp_ms: now_ms(),
        });

        Ok(new_offset)
    }

    pub async fn session_status(&self, id: &str) -> Result<SessionInfo, UploadError> {
        self.sessions.status(id).await
    }

    /// Check the session's accumulated hash against the client's.
    pub async fn verify_session(&self, id: &str, expected: &str) -> Result<String, UploadError> {
        let result = self.sessions.verify(id, expected).await;
        let (passed, actual) = match &result {
            Ok(actual) => (true, actual.clone()),
            Err(UploadError::IntegrityMismatch { actual, .. }) => (false, actual.clone()),
            Err(_) => return result,
        };
        self.bus.publish(ProgressEvent::IntegrityResult {
            object_key: id.to_string(),
            expected: expected.to_string(),
            actual,
            passed,
            timestamp_ms: now_ms(),
        });
        result
    }

    /// Promote a verified session's bytes to a stored object, then finalize.
    #[instrument(skip(self))]
    pub async fn finalize_session(&self, id: &str) -> Result<UploadOutcome, UploadError> {
        let result = self.finalize_session_inner(id).await;
        if let Err(e) = &result {
            self.emit_error(id, e);
        }
        result
    }

    async fn finalize_session_inner(&self, id: &str) -> Result<UploadOutcome, UploadError> {
        let info = self.sessions.status(id).await?;
        if info.offset < info.declared_size {
            return Err(UploadError::IncompleteUpload {
                received: info.offset,
                expected: info.declared_size,
            });
        }
        let file_hash = match (&info.status, &info.final_hash) {
            (SessionStatus::Verified, Some(hash)) => hash.clone(),
            _ => {
                return Err(UploadError::InvalidInput(
                    "session must be verified before finalize".to_string(),
                ))
            }
        };

        let object_key = derive_object_key(&info.filename, &self.config.filename_suffix)?;

        // The hash here is server-computed from received bytes, so the
        // duplicate check can run before the promotion upload instead of
        // after it.
        if let Some(existing_key) = self.index.has_hash(&file_hash) {
            if existing_key != object_key {
                info!(
                    "Session {} is duplicate content of {}, skipping promotion",
                    id, existing_key
                );
                self.sessions.delete(id).await?;
                if let Some(m) = &self.metrics {
                    m.uploads_duplicate_total.inc();
                }
                return Err(UploadError::Duplicate { existing_key });
            }
        }

        self.ensure_key_free(&object_key).await?;

        // Advisory WAV check straight off the temp file.
        let quality = {
            let (file, _) = self.sessions.reader(id).await?;
            match integrity::verify_wav_header(file).await {
                Ok(wav_info) => Some(wav_info.quality_label()),
                Err(e) => {
                    warn!("WAV header check failed for session {}: {}", id, e);
                    self.bus.publish(ProgressEvent::QualityAlert {
                        object_key: object_key.clone(),
                        message: format!("WAV header check failed: {}", e),
                        timestamp_ms: now_ms(),
                    });
                    None
                }
            }
        };

        let metadata = self.object_metadata(&file_hash, &info.filename, quality.as_deref());
        let (file, size) = self.sessions.reader(id).await?;
        self.store
            .put_stream(
                self.primary_bucket(),
                &object_key,
                Box::new(file),
                size,
                &metadata,
                OCTET_STREAM,
            )
            .await?;
        self.sessions.mark_promoted(id).await?;

        self.write_sidecar(&object_key, &info.filename, size, &file_hash)
            .await;
        self.index.record(&file_hash, &object_key);

        if let Some(m) = &self.metrics {
            m.uploads_completed_total.inc();
            m.upload_bytes_total.inc_by(size);
            m.upload_size_bytes.observe(size as f64);
        }
        self.bus.publish(ProgressEvent::Completion {
            object_key: object_key.clone(),
            filename: info.filename.clone(),
            size,
            file_hash: file_hash.clone(),
            timestamp_ms: now_ms(),
        });

        self.sessions.delete(id).await?;

        info!(
            "Session {} promoted to {} ({} bytes, {})",
            id, object_key, size, file_hash
        );
        Ok(UploadOutcome {
            object_key,
            size,
            file_hash,
        })
    }

    /// Abort a session and clean up its temp file. Idempotent.
    pub async fn cancel_session(&self, id: &str) -> Result<(), UploadError> {
        self.sessions.delete(id).await?;
        self.bus.publish(ProgressEvent::SessionProgress {
            session_id: id.to_string(),
            filename: String::new(),
            status: "cancelled".to_string(),
            offset: 0,
            total_size: 0,
            timestamp_ms: now_ms(),
        });
        Ok(())
    }

    /// Reclaim sessions idle past the configured max age.
    pub async fn gc_sessions(&self) -> usize {
        self.sessions.gc(self.config.session_max_age).await
    }

    // === Browse ===

    /// Mint a time-bounded download URL for a stored object.
    pub async fn download_url(&self, object_key: &str) -> Result<String, UploadError> {
        // Confirm existence first so clients get 404 instead of a signed URL
        // to nothing.
        self.store.stat(self.primary_bucket(), object_key).await?;
        let url = self
            .store
            .presign_get(
                self.primary_bucket(),
                object_key,
                self.config.presign_ttl.get,
            )
            .await?;
        Ok(url)
    }

    /// List stored audio objects with their upload metadata. Sidecar objects
    /// are not listed; their contents ride on the object metadata already.
    pub async fn list_files(&self) -> Result<Vec<FileEntry>, UploadError> {
        let entries = self
            .store
            .list(self.primary_bucket(), "", false, true)
            .await?;
        Ok(entries.into_iter().map(Self::file_entry).collect())
    }

    fn file_entry(entry: ListedObject) -> FileEntry {
        let meta = entry.user_metadata.unwrap_or_default();
        FileEntry {
            object_key: entry.key,
            size: entry.size,
            last_modified: entry.last_modified,
            file_hash: meta.get(meta_keys::FILE_HASH).cloned(),
            original_name: meta.get(meta_keys::ORIGINAL_NAME).cloned(),
            upload_date: meta.get(meta_keys::UPLOAD_DATE).cloned(),
            quality: meta.get(meta_keys::QUALITY).cloned(),
        }
    }
}

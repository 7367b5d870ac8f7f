//! Resumable upload session store.
//!
//! Each session owns a temp file on local disk and a running SHA-256
//! accumulator. Appends are strictly sequential — an append is accepted only
//! at the session's current offset — so the accumulator always equals the
//! hash of the bytes on disk. Sessions are ephemeral: a host crash loses
//! them and clients restart from offset zero.

use crate::metrics::Metrics;
use crate::types::UploadError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Session lifecycle. `Complete` means all declared bytes have landed;
/// `Verified` additionally has a hash check on record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Open,
    Complete,
    Verified,
    Promoted,
}

/// Point-in-time view of a session, for probes and progress events.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub filename: String,
    pub declared_size: u64,
    pub offset: u64,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

struct SessionState {
    filename: String,
    declared_size: u64,
    offset: u64,
    metadata: HashMap<String, String>,
    temp_path: PathBuf,
    file: File,
    hasher: Sha256,
    status: SessionStatus,
    final_hash: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

struct Session {
    id: String,
    // Serializes append/verify per session; unrelated sessions run in parallel.
    state: tokio::sync::Mutex<SessionState>,
}

/// Thread-safe store of in-progress resumable sessions.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    temp_dir: PathBuf,
    metrics: Option<Arc<Metrics>>,
}

impl SessionStore {
    /// Create the store. The temp directory is created if absent.
    pub fn new(temp_dir: impl Into<PathBuf>, metrics: Option<Arc<Metrics>>) -> std::io::Result<Self> {
        let temp_dir = temp_dir.into();
        std::fs::create_dir_all(&temp_dir)?;
        Ok(Self {
            sessions: RwLock::new(HashMap::new()),
            temp_dir,
            metrics,
        })
    }

    fn new_session_id() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill(&mut bytes);
        hex::encode(bytes)
    }

    fn get(&self, id: &str) -> Result<Arc<Session>, UploadError> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| UploadError::SessionNotFound(id.to_string()))
    }

    /// Number of sessions currently tracked.
    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Allocate a session and its empty temp file. Returns the session id
    /// (64-char hex string, unguessable).
    pub async fn create(
        &self,
        filename: &str,
        declared_size: u64,
        metadata: HashMap<String, String>,
    ) -> Result<String, UploadError> {
        crate::types::validate_filename(filename)?;
        if declared_size == 0 {
            return Err(UploadError::InvalidInput(
                "declared size must be greater than zero".to_string(),
            ));
        }

        let id = Self::new_session_id();
        let temp_path = self.temp_dir.join(&id);
        let file = File::create(&temp_path).await?;

        let now = Utc::now();
        let session = Arc::new(Session {
            id: id.clone(),
            state: tokio::sync::Mutex::new(SessionState {
                filename: filename.to_string(),
                declared_size,
                offset: 0,
                metadata,
                temp_path,
                file,
                hasher: Sha256::new(),
                status: SessionStatus::Open,
                final_hash: None,
                created_at: now,
                updated_at: now,
            }),
        });

        self.sessions.write().insert(id.clone(), session);
        debug!("Created session {} for {} ({} bytes)", id, filename, declared_size);
        Ok(id)
    }

    /// Append `data` at `offset`. The offset must equal the session's
    /// current offset exactly; anything else is rejected without touching
    /// the temp file. Returns the new offset.
    pub async fn append(&self, id: &str, offset: u64, data: &[u8]) -> Result<u64, UploadError> {
        let session = self.get(id)?;
        let mut state = session.state.lock().await;

        if state.status != SessionStatus::Open {
            return Err(UploadError::InvalidInput(format!(
                "session {} no longer accepts appends",
                id
            )));
        }
        if offset != state.offset {
            return Err(UploadError::OffsetMismatch {
                current: state.offset,
                declared: offset,
            });
        }
        let new_offset = state.offset + data.len() as u64;
        if new_offset > state.declared_size {
            return Err(UploadError::InvalidInput(format!(
                "append would exceed declared size ({} > {})",
                new_offset, state.declared_size
            )));
        }

        state.file.write_all(data).await?;
        state.file.flush().await?;
        state.hasher.update(data);
        state.offset = new_offset;
        state.updated_at = Utc::now();
        if state.offset == state.declared_size {
            state.status = SessionStatus::Complete;
            debug!("Session {} complete at {} bytes", id, state.offset);
        }

        Ok(state.offset)
    }

    /// Current session state for probes.
    pub async fn status(&self, id: &str) -> Result<SessionInfo, UploadError> {
        let session = self.get(id)?;
        let state = session.state.lock().await;
        Ok(SessionInfo {
            id: session.id.clone(),
            filename: state.filename.clone(),
            declared_size: state.declared_size,
            offset: state.offset,
            status: state.status,
            final_hash: state.final_hash.clone(),
            created_at: state.created_at,
            updated_at: state.updated_at,
        })
    }

    /// User metadata captured at create time.
    pub async fn metadata(&self, id: &str) -> Result<HashMap<String, String>, UploadError> {
        let session = self.get(id)?;
        let state = session.state.lock().await;
        Ok(state.metadata.clone())
    }

    /// Check the accumulated hash against `expected`. Requires all bytes to
    /// have landed; on match the session transitions to Verified and the
    /// hash is recorded. Returns the actual hash.
    pub async fn verify(&self, id: &str, expected: &str) -> Result<String, UploadError> {
        let session = self.get(id)?;
        let mut state = session.state.lock().await;

        if state.offset < state.declared_size {
            return Err(UploadError::IncompleteUpload {
                received: state.offset,
                expected: state.declared_size,
            });
        }

        // Clone so a failed verify can be retried with a corrected hash.
        let actual = hex::encode(state.hasher.clone().finalize());
        if actual != expected.to_ascii_lowercase() {
            return Err(UploadError::IntegrityMismatch {
                expected: expected.to_string(),
                actual,
            });
        }

        state.final_hash = Some(actual.clone());
        state.status = SessionStatus::Verified;
        state.updated_at = Utc::now();
        debug!("Session {} verified: {}", id, actual);
        Ok(actual)
    }

    /// Open a fresh read handle over the session's bytes, for promotion to
    /// the object store. The session must hold all declared bytes.
    pub async fn reader(&self, id: &str) -> Result<(File, u64), UploadError> {
        let session = self.get(id)?;
        let state = session.state.lock().await;
        if state.offset < state.declared_size {
            return Err(UploadError::IncompleteUpload {
                received: state.offset,
                expected: state.declared_size,
            });
        }
        let file = OpenOptions::new().read(true).open(&state.temp_path).await?;
        Ok((file, state.declared_size))
    }

    /// Mark a session's bytes as promoted to the object store.
    pub async fn mark_promoted(&self, id: &str) -> Result<(), UploadError> {
        let session = self.get(id)?;
        let mut state = session.state.lock().await;
        state.status = SessionStatus::Promoted;
        state.updated_at = Utc::now();
        Ok(())
    }

    /// Remove the session record and its temp file. Idempotent — deleting an
    /// unknown id succeeds.
    pub async fn delete(&self, id: &str) -> Result<(), UploadError> {
        let session = match self.sessions.write().remove(id) {
            Some(s) => s,
            None => return Ok(()),
        };
        let state = session.state.lock().await;
        if let Err(e) = tokio::fs::remove_file(&state.temp_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove temp file {:?}: {}", state.temp_path, e);
            }
        }
        debug!("Deleted session {}", id);
        Ok(())
    }

    /// Remove all sessions whose last activity is older than `max_age`,
    /// deleting their temp files.
    pub async fn gc(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::hours(24));

        // Collect candidates under the read lock; delete without holding it.
        let mut expired = Vec::new();
        {
            let sessions = self.sessions.read();
            for (id, session) in sessions.iter() {
                if let Ok(state) = session.state.try_lock() {
                    if state.updated_at < cutoff {
                        expired.push(id.clone());
                    }
                }
                // A session mid-append is active; skip it this tick.
            }
        }

        let count = expired.len();
        for id in expired {
            if let Err(e) = self.delete(&id).await {
                warn!("GC failed to delete session {}: {}", id, e);
            }
        }
        if count > 0 {
            info!("Session GC reclaimed {} expired sessions", count);
            if let Some(m) = &self.metrics {
                m.sessions_expired_total.inc_by(count as u64);
            }
        }
        count
    }

    /// Temp directory the store writes into.
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path(), None).unwrap();
        (dir, store)
    }

    fn sha256_hex(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    #[tokio::test]
    async fn test_create_returns_unguessable_id() {
        let (_dir, store) = store();
        let id = store
            .create("a.wav", 10, HashMap::new())
            .await
            .unwrap();
        assert_eq!(id.len(), 64);
        assert!(id.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_create_rejects_zero_size() {
        let (_dir, store) = store();
        let err = store.create("a.wav", 0, HashMap::new()).await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_sequential_appends_and_completion() {
        let (_dir, store) = store();
        let id = store.create("a.wav", 6, HashMap::new()).await.unwrap();

        assert_eq!(store.append(&id, 0, b"abc").await.unwrap(), 3);
        assert_eq!(store.append(&id, 3, b"def").await.unwrap(), 6);

        let info = store.status(&id).await.unwrap();
        assert_eq!(info.offset, 6);
        assert_eq!(info.status, SessionStatus::Complete);
    }

    #[tokio::test]
    async fn test_out_of_order_append_rejected_without_state_change() {
        let (_dir, store) = store();
        let id = store.create("a.wav", 6, HashMap::new()).await.unwrap();
        store.append(&id, 0, b"abc").await.unwrap();

        // Replay of the first chunk
        let err = store.append(&id, 0, b"abc").await.unwrap_err();
        assert!(matches!(
            err,
            UploadError::OffsetMismatch { current: 3, declared: 0 }
        ));

        // Offset unchanged; no bytes duplicated
        let info = store.status(&id).await.unwrap();
        assert_eq!(info.offset, 3);
        store.append(&id, 3, b"def").await.unwrap();
        store.verify(&id, &sha256_hex(b"abcdef")).await.unwrap();
    }

    #[tokio::test]
    async fn test_append_beyond_declared_size_rejected() {
        let (_dir, store) = store();
        let id = store.create("a.wav", 4, HashMap::new()).await.unwrap();
        let err = store.append(&id, 0, b"abcdef").await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidInput(_)));
        assert_eq!(store.status(&id).await.unwrap().offset, 0);
    }

    #[tokio::test]
    async fn test_verify_before_complete() {
        let (_dir, store) = store();
        let id = store.create("a.wav", 6, HashMap::new()).await.unwrap();
        store.append(&id, 0, b"abc").await.unwrap();

        let err = store.verify(&id, &sha256_hex(b"abcdef")).await.unwrap_err();
        assert!(matches!(
            err,
            UploadError::IncompleteUpload { received: 3, expected: 6 }
        ));
        // Offset unchanged
        assert_eq!(store.status(&id).await.unwrap().offset, 3);
    }

    #[tokio::test]
    async fn test_verify_hash_mismatch_is_retryable() {
        let (_dir, store) = store();
        let id = store.create("a.wav", 3, HashMap::new()).await.unwrap();
        store.append(&id, 0, b"abc").await.unwrap();

        let err = store.verify(&id, &"0".repeat(64)).await.unwrap_err();
        assert!(matches!(err, UploadError::IntegrityMismatch { .. }));

        // The accumulator survives a failed verify
        let actual = store.verify(&id, &sha256_hex(b"abc")).await.unwrap();
        assert_eq!(actual, sha256_hex(b"abc"));
        assert_eq!(
            store.status(&id).await.unwrap().status,
            SessionStatus::Verified
        );
    }

    #[tokio::test]
    async fn test_reader_yields_exact_bytes() {
        use tokio::io::AsyncReadExt;

        let (_dir, store) = store();
        let id = store.create("a.wav", 6, HashMap::new()).await.unwrap();
        store.append(&id, 0, b"abc").await.unwrap();
        store.append(&id, 3, b"def").await.unwrap();

        let (mut file, size) = store.reader(&id).await.unwrap();
        assert_eq!(size, 6);
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"abcdef");
    }

    #[tokio::test]
    async fn test_delete_idempotent_and_removes_temp_file() {
        let (dir, store) = store();
        let id = store.create("a.wav", 3, HashMap::new()).await.unwrap();
        let temp_path = dir.path().join(&id);
        assert!(temp_path.exists());

        store.delete(&id).await.unwrap();
        assert!(!temp_path.exists());
        assert!(matches!(
            store.status(&id).await,
            Err(UploadError::SessionNotFound(_))
        ));

        // Second delete succeeds
        store.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_gc_reclaims_only_stale_sessions() {
        let (_dir, store) = store();
        let stale = store.create("old.wav", 3, HashMap::new()).await.unwrap();
        let fresh = store.create("new.wav", 3, HashMap::new()).await.unwrap();

        // Backdate the stale session
        {
            let session = store.get(&stale).unwrap();
            let mut state = session.state.lock().await;
            state.updated_at = Utc::now() - chrono::Duration::hours(48);
        }

        let reclaimed = store.gc(Duration::from_secs(24 * 3600)).await;
        assert_eq!(reclaimed, 1);
        assert!(store.get(&stale).is_err());
        assert!(store.get(&fresh).is_ok());
    }

    #[tokio::test]
    async fn test_parallel_sessions_do_not_interfere() {
        let (_dir, store) = store();
        let store = Arc::new(store);
        let a = store.create("a.wav", 4096, HashMap::new()).await.unwrap();
        let b = store.create("b.wav", 4096, HashMap::new()).await.unwrap();

        let store_a = store.clone();
        let id_a = a.clone();
        let task_a = tokio::spawn(async move {
            for i in 0..4u64 {
                store_a
                    .append(&id_a, i * 1024, &[0xAA; 1024])
                    .await
                    .unwrap();
            }
        });
        let store_b = store.clone();
        let id_b = b.clone();
        let task_b = tokio::spawn(async move {
            for i in 0..4u64 {
                store_b
                    .append(&id_b, i * 1024, &[0xBB; 1024])
                    .await
                    .unwrap();
            }
        });
        task_a.await.unwrap();
        task_b.await.unwrap();

        store.verify(&a, &sha256_hex(&[0xAA; 4096])).await.unwrap();
        store.verify(&b, &sha256_hex(&[0xBB; 4096])).await.unwrap();
    }
}

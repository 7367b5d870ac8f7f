//! Content-hash deduplication index.
//!
//! The authoritative in-memory answer to "does this content hash already
//! exist as an object, and under what key?". Persisted out-of-band as a JSON
//! snapshot in the system bucket and reconciled at startup from object user
//! metadata, so the index can always be rebuilt after a crash or a snapshot
//! loss. Between a crash and the next reconcile the index may be missing
//! entries, but it must never name an object that does not exist.

use crate::metrics::Metrics;
use crate::storage::{ObjectStore, StorageError};
use crate::types::meta_keys;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Well-known key of the snapshot object in the system bucket.
pub const INDEX_OBJECT_KEY: &str = "sermon-hashes.json";

const SNAPSHOT_VERSION: u32 = 1;

/// Persisted snapshot schema. The two maps are mutual inverses.
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub version: u32,
    pub last_updated: DateTime<Utc>,
    /// content hash → object key
    pub hashes: HashMap<String, String>,
    /// object key → content hash
    pub file_hashes: HashMap<String, String>,
}

#[derive(Default)]
struct Maps {
    hashes: HashMap<String, String>,
    file_hashes: HashMap<String, String>,
}

/// Bidirectional content-hash ↔ object-key index.
pub struct HashIndex {
    store: Arc<dyn ObjectStore>,
    primary_bucket: String,
    system_bucket: String,
    maps: RwLock<Maps>,
    /// Set on mutation, cleared on save — unchanged snapshots are not rewritten.
    dirty: AtomicBool,
    metrics: Option<Arc<Metrics>>,
}

impl HashIndex {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        primary_bucket: impl Into<String>,
        system_bucket: impl Into<String>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            store,
            primary_bucket: primary_bucket.into(),
            system_bucket: system_bucket.into(),
            maps: RwLock::new(Maps::default()),
            dirty: AtomicBool::new(false),
            metrics,
        }
    }

    /// O(1): the object key holding this content, if any.
    pub fn has_hash(&self, hash: &str) -> Option<String> {
        self.maps.read().hashes.get(hash).cloned()
    }

    /// O(1) reverse lookup: the content hash recorded for this key, if any.
    pub fn hash_for_key(&self, key: &str) -> Option<String> {
        self.maps.read().file_hashes.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.maps.read().hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.read().hashes.is_empty()
    }

    /// Upsert both directions atomically. Stale inverse entries from an
    /// earlier mapping of either side are removed so the maps stay mutual
    /// inverses.
    pub fn record(&self, hash: &str, key: &str) {
        let mut maps = self.maps.write();
        if let Some(old_key) = maps.hashes.insert(hash.to_string(), key.to_string()) {
            if old_key != key {
                maps.file_hashes.remove(&old_key);
            }
        }
        if let Some(old_hash) = maps.file_hashes.insert(key.to_string(), hash.to_string()) {
            if old_hash != hash {
                maps.hashes.remove(&old_hash);
            }
        }
        drop(maps);
        self.dirty.store(true, Ordering::Release);
    }

    /// Remove both directions for an object key. No-op if unknown.
    pub fn remove_by_key(&self, key: &str) {
        let mut maps = self.maps.write();
        if let Some(hash) = maps.file_hashes.remove(key) {
            maps.hashes.remove(&hash);
            drop(maps);
            self.dirty.store(true, Ordering::Release);
        }
    }

    /// Write the snapshot to the system bucket. Copies the maps under the
    /// read lock and serializes after releasing it, so uploads never block
    /// index readers or writers.
    pub async fn snapshot_to_store(&self) -> Result<(), StorageError> {
        let snapshot = {
            let maps = self.maps.read();
            IndexSnapshot {
                version: SNAPSHOT_VERSION,
                last_updated: Utc::now(),
                hashes: maps.hashes.clone(),
                file_hashes: maps.file_hashes.clone(),
            }
        };

        let json = serde_json::to_vec_pretty(&snapshot)?;
        self.store
            .put_bytes(
                &self.system_bucket,
                INDEX_OBJECT_KEY,
                Bytes::from(json),
                &HashMap::new(),
                "application/json",
            )
            .await?;

        self.dirty.store(false, Ordering::Release);
        if let Some(m) = &self.metrics {
            m.index_saves_total.inc();
        }
        debug!(
            "Saved hash index snapshot ({} entries)",
            snapshot.hashes.len()
        );
        Ok(())
    }

    /// Save only if something changed since the last successful save.
    pub async fn save_if_dirty(&self) {
        if !self.dirty.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = self.snapshot_to_store().await {
            if let Some(m) = &self.metrics {
                m.index_save_failures_total.inc();
            }
            warn!("Hash index snapshot save failed (will retry next tick): {}", e);
        }
    }

    /// Load the snapshot from the system bucket, replacing in-memory maps.
    /// A missing snapshot initializes empty maps; a malformed one is logged
    /// and discarded — reconcile rebuilds the contents either way.
    pub async fn load_from_store(&self) -> Result<(), StorageError> {
        let data = match self
            .store
            .get_bytes(&self.system_bucket, INDEX_OBJECT_KEY)
            .await
        {
            Ok(data) => data,
            Err(StorageError::NotFound(_)) => {
                info!("No hash index snapshot found, starting empty");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let snapshot: IndexSnapshot = match serde_json::from_slice(&data) {
            Ok(s) => s,
            Err(e) => {
                error!("Hash index snapshot is malformed, starting empty: {}", e);
                return Ok(());
            }
        };

        let entries = snapshot.hashes.len();
        let mut maps = self.maps.write();
        maps.hashes = snapshot.hashes;
        maps.file_hashes = snapshot.file_hashes;
        drop(maps);

        info!(
            "Loaded hash index snapshot: {} entries (saved {})",
            entries, snapshot.last_updated
        );
        Ok(())
    }

    /// Scan the primary bucket's user metadata for `file-hash` tags and
    /// insert any mapping the index does not know. Never downloads object
    /// bytes; sidecar objects under `metadata/` are skipped. Returns the
    /// number of entries added.
    pub async fn reconcile(&self) -> Result<usize, StorageError> {
        let entries = self
            .store
            .list(&self.primary_bucket, "", true, true)
            .await?;

        let mut added = 0;
        for entry in entries {
            if entry.key.starts_with("metadata/") {
                continue;
            }
            let hash = match entry
                .user_metadata
                .as_ref()
                .and_then(|m| m.get(meta_keys::FILE_HASH))
            {
                Some(h) => h.clone(),
                // A stat failure or an object uploaded without metadata —
                // skip and keep scanning.
                None => continue,
            };

            if self.has_hash(&hash).is_none() {
                debug!("Reconcile: adding {} -> {}", &hash[..16.min(hash.len())], entry.key);
                self.record(&hash, &entry.key);
                added += 1;
            }
        }

        if added > 0 {
            info!("Reconcile added {} hash index entries", added);
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn index_over(store: Arc<MemoryStore>) -> HashIndex {
        HashIndex::new(store, "sermons", "system-cache", None)
    }

    async fn memory_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.ensure_bucket("sermons").await.unwrap();
        store.ensure_bucket("system-cache").await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_record_and_lookup() {
        let index = index_over(memory_store().await);
        assert!(index.has_hash("h1").is_none());

        index.record("h1", "a_raw.wav");
        assert_eq!(index.has_hash("h1"), Some("a_raw.wav".to_string()));
        assert_eq!(index.hash_for_key("a_raw.wav"), Some("h1".to_string()));
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_record_keeps_maps_inverse() {
        let index = index_over(memory_store().await);
        index.record("h1", "a_raw.wav");
        // Re-pointing the hash at a new key drops the stale reverse entry
        index.record("h1", "b_raw.wav");
        assert_eq!(index.has_hash("h1"), Some("b_raw.wav".to_string()));
        assert!(index.hash_for_key("a_raw.wav").is_none());

        // Re-pointing the key at a new hash drops the stale forward entry
        index.record("h2", "b_raw.wav");
        assert!(index.has_hash("h1").is_none());
        assert_eq!(index.has_hash("h2"), Some("b_raw.wav".to_string()));
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_by_key() {
        let index = index_over(memory_store().await);
        index.record("h1", "a_raw.wav");
        index.remove_by_key("a_raw.wav");
        assert!(index.has_hash("h1").is_none());
        assert!(index.hash_for_key("a_raw.wav").is_none());
        // Idempotent
        index.remove_by_key("a_raw.wav");
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let store = memory_store().await;
        let index = index_over(store.clone());
        index.record("h1", "a_raw.wav");
        index.record("h2", "b_raw.wav");
        index.snapshot_to_store().await.unwrap();

        let reloaded = index_over(store);
        reloaded.load_from_store().await.unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.has_hash("h1"), Some("a_raw.wav".to_string()));
        assert_eq!(reloaded.hash_for_key("b_raw.wav"), Some("h2".to_string()));
    }

    #[tokio::test]
    async fn test_load_missing_snapshot_starts_empty() {
        let index = index_over(memory_store().await);
        index.load_from_store().await.unwrap();
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_load_malformed_snapshot_starts_empty() {
        let store = memory_store().await;
        store
            .put_bytes(
                "system-cache",
                INDEX_OBJECT_KEY,
                Bytes::from_static(b"not json {"),
                &HashMap::new(),
                "application/json",
            )
            .await
            .unwrap();

        let index = index_over(store);
        index.load_from_store().await.unwrap();
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_picks_up_tagged_objects() {
        let store = memory_store().await;

        let mut meta = HashMap::new();
        meta.insert(meta_keys::FILE_HASH.to_string(), "a1".repeat(32));
        store
            .put_bytes("sermons", "ext_raw.wav", Bytes::from_static(b"x"), &meta, "application/octet-stream")
            .await
            .unwrap();
        // Object without a file-hash tag is ignored
        store
            .put_bytes("sermons", "untagged.wav", Bytes::from_static(b"y"), &HashMap::new(), "application/octet-stream")
            .await
            .unwrap();
        // Sidecar objects are ignored
        store
            .put_bytes("sermons", "metadata/ext_raw.wav.json", Bytes::from_static(b"{}"), &meta, "application/json")
            .await
            .unwrap();

        let index = index_over(store);
        let added = index.reconcile().await.unwrap();
        assert_eq!(added, 1);
        assert_eq!(index.has_hash(&"a1".repeat(32)), Some("ext_raw.wav".to_string()));

        // Second reconcile adds nothing
        assert_eq!(index.reconcile().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_save_if_dirty_skips_clean() {
        let store = memory_store().await;
        let index = index_over(store.clone());
        index.record("h1", "a_raw.wav");
        index.save_if_dirty().await;
        assert!(store.get_bytes("system-cache", INDEX_OBJECT_KEY).await.is_ok());

        // Clean save is a no-op: remove the snapshot and confirm it stays gone
        store.remove("system-cache", INDEX_OBJECT_KEY).await.unwrap();
        index.save_if_dirty().await;
        assert!(store.get_bytes("system-cache", INDEX_OBJECT_KEY).await.is_err());
    }
}

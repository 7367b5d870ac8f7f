//! Shared test infrastructure for integration tests
//!
//! Builds the upload core (orchestrator, index, sessions, event bus) over
//! the in-memory object store, plus deterministic WAV data generators.

#![allow(dead_code)]

use rand::{Rng, SeedableRng};
use sermon_relay::config::{Config, StoreConfig};
use sermon_relay::events::EventBus;
use sermon_relay::index::HashIndex;
use sermon_relay::orchestrator::Orchestrator;
use sermon_relay::session::SessionStore;
use sermon_relay::storage::{MemoryStore, ObjectStore};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tempfile::TempDir;

pub const PRIMARY_BUCKET: &str = "sermons";
pub const SYSTEM_BUCKET: &str = "system-cache";

/// Multipart threshold for tests — small enough that a 24 MiB payload
/// exercises the multipart path with several parts.
pub const TEST_MULTIPART_THRESHOLD: u64 = 8 * 1024 * 1024;

/// The assembled upload core over an in-memory store.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub index: Arc<HashIndex>,
    pub bus: Arc<EventBus>,
    pub orchestrator: Arc<Orchestrator>,
    pub config: Arc<Config>,
    _temp: TempDir,
}

pub async fn harness() -> Harness {
    let temp = TempDir::new().expect("Failed to create temp dir");

    let mut config = Config::default();
    config.store = StoreConfig::Memory;
    config.multipart_threshold_bytes = TEST_MULTIPART_THRESHOLD;
    config.session_temp_dir = temp.path().to_path_buf();
    let config = Arc::new(config);

    let store = Arc::new(MemoryStore::new());
    store.ensure_bucket(PRIMARY_BUCKET).await.unwrap();
    store.ensure_bucket(SYSTEM_BUCKET).await.unwrap();

    let index = Arc::new(HashIndex::new(
        store.clone() as Arc<dyn ObjectStore>,
        PRIMARY_BUCKET,
        SYSTEM_BUCKET,
        None,
    ));
    let sessions = Arc::new(SessionStore::new(temp.path(), None).unwrap());
    let bus = Arc::new(EventBus::new(
        config.event_bus.max_subscribers,
        config.event_bus.buffer_size,
        None,
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone() as Arc<dyn ObjectStore>,
        index.clone(),
        sessions,
        bus.clone(),
        config.clone(),
        None,
    ));

    Harness {
        store,
        index,
        bus,
        orchestrator,
        config,
        _temp: temp,
    }
}

// === Data generators ===

/// Deterministic WAV file of exactly `total_size` bytes: a canonical 44-byte
/// PCM header followed by a seeded payload. Same seed, same bytes.
pub fn generate_wav(total_size: usize, seed: u64) -> Vec<u8> {
    assert!(total_size > 44, "WAV needs room for the header");
    let data_size = (total_size - 44) as u32;

    let mut bytes = Vec::with_capacity(total_size);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_size).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&2u16.to_le_bytes()); // stereo
    bytes.extend_from_slice(&44100u32.to_le_bytes());
    bytes.extend_from_slice(&(44100u32 * 2 * 2).to_le_bytes());
    bytes.extend_from_slice(&4u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_size.to_le_bytes());

    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut payload = vec![0u8; data_size as usize];
    rng.fill(&mut payload[..]);
    bytes.extend_from_slice(&payload);
    bytes
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

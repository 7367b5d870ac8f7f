//! End-to-end resumable session flows over the in-memory store.

mod common;

use bytes::Bytes;
use common::{generate_wav, harness, sha256_hex, PRIMARY_BUCKET};
use sermon_relay::session::SessionStatus;
use sermon_relay::storage::ObjectStore;
use sermon_relay::types::{meta_keys, UploadError};
use std::collections::HashMap;

const MIB: usize = 1024 * 1024;

#[tokio::test]
async fn test_session_three_chunks_bit_perfect() {
    let h = harness().await;
    let data = generate_wav(3 * MIB, 21);
    let hash = sha256_hex(&data);

    let id = h
        .orchestrator
        .create_session("a.wav", data.len() as u64, HashMap::new())
        .await
        .unwrap();

    // Three sequential 1 MiB appends
    for i in 0..3 {
        let offset = i * MIB;
        let new_offset = h
            .orchestrator
            .append_session(&id, offset as u64, &data[offset..offset + MIB])
            .await
            .unwrap();
        assert_eq!(new_offset, (offset + MIB) as u64);
    }

    let actual = h.orchestrator.verify_session(&id, &hash).await.unwrap();
    assert_eq!(actual, hash);

    let outcome = h.orchestrator.finalize_session(&id).await.unwrap();
    assert_eq!(outcome.object_key, "a_raw.wav");
    assert_eq!(outcome.size, data.len() as u64);
    assert_eq!(outcome.file_hash, hash);

    // Bit-perfect in the store, hash in metadata, index updated
    let stored = h.store.object_bytes(PRIMARY_BUCKET, "a_raw.wav").unwrap();
    assert_eq!(sha256_hex(&stored), hash);
    let stat = h.store.stat(PRIMARY_BUCKET, "a_raw.wav").await.unwrap();
    assert_eq!(stat.user_metadata.get(meta_keys::FILE_HASH), Some(&hash));
    assert_eq!(
        stat.user_metadata.get(meta_keys::ORIGINAL_NAME),
        Some(&"a.wav".to_string())
    );
    assert_eq!(h.index.has_hash(&hash), Some("a_raw.wav".to_string()));

    // Session cleaned up after promotion
    assert!(matches!(
        h.orchestrator.session_status(&id).await,
        Err(UploadError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_out_of_order_append_rejected_and_recoverable() {
    let h = harness().await;
    let data = generate_wav(2 * MIB, 22);

    let id = h
        .orchestrator
        .create_session("b.wav", data.len() as u64, HashMap::new())
        .await
        .unwrap();
    h.orchestrator
        .append_session(&id, 0, &data[..MIB])
        .await
        .unwrap();

    // Replaying the first chunk is refused and changes nothing
    let err = h
        .orchestrator
        .append_session(&id, 0, &data[..MIB])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        UploadError::OffsetMismatch {
            current,
            declared: 0
        } if current == MIB as u64
    ));
    let info = h.orchestrator.session_status(&id).await.unwrap();
    assert_eq!(info.offset, MIB as u64);

    // The client resyncs from the probe offset and completes cleanly
    h.orchestrator
        .append_session(&id, MIB as u64, &data[MIB..])
        .await
        .unwrap();
    h.orchestrator
        .verify_session(&id, &sha256_hex(&data))
        .await
        .unwrap();
    h.orchestrator.finalize_session(&id).await.unwrap();

    let stored = h.store.object_bytes(PRIMARY_BUCKET, "b_raw.wav").unwrap();
    assert_eq!(stored.len(), data.len());
    assert_eq!(sha256_hex(&stored), sha256_hex(&data));
}

#[tokio::test]
async fn test_verify_before_all_bytes() {
    let h = harness().await;
    let data = generate_wav(MIB, 23);

    let id = h
        .orchestrator
        .create_session("c.wav", data.len() as u64, HashMap::new())
        .await
        .unwrap();
    h.orchestrator
        .append_session(&id, 0, &data[..MIB / 2])
        .await
        .unwrap();

    let err = h
        .orchestrator
        .verify_session(&id, &sha256_hex(&data))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::IncompleteUpload { .. }));
}

#[tokio::test]
async fn test_finalize_requires_verify() {
    let h = harness().await;
    let data = generate_wav(MIB, 24);

    let id = h
        .orchestrator
        .create_session("d.wav", data.len() as u64, HashMap::new())
        .await
        .unwrap();
    h.orchestrator.append_session(&id, 0, &data).await.unwrap();

    let info = h.orchestrator.session_status(&id).await.unwrap();
    assert_eq!(info.status, SessionStatus::Complete);

    let err = h.orchestrator.finalize_session(&id).await.unwrap_err();
    assert!(matches!(err, UploadError::InvalidInput(_)));
}

#[tokio::test]
async fn test_session_duplicate_content_skips_promotion() {
    let h = harness().await;
    let data = generate_wav(MIB, 25);
    let hash = sha256_hex(&data);

    // Land the content once via the presigned path
    h.orchestrator
        .request_upload(&sermon_relay::orchestrator::FileRequest {
            filename: "first.wav".to_string(),
            declared_size: data.len() as u64,
            declared_hash: None,
        })
        .await
        .unwrap();
    h.store
        .client_put(PRIMARY_BUCKET, "first_raw.wav", Bytes::from(data.clone()))
        .unwrap();
    h.orchestrator.complete_single("first_raw.wav").await.unwrap();

    // Same bytes through a session: refused at finalize, session removed
    let id = h
        .orchestrator
        .create_session("second.wav", data.len() as u64, HashMap::new())
        .await
        .unwrap();
    h.orchestrator.append_session(&id, 0, &data).await.unwrap();
    h.orchestrator.verify_session(&id, &hash).await.unwrap();

    let err = h.orchestrator.finalize_session(&id).await.unwrap_err();
    match err {
        UploadError::Duplicate { existing_key } => assert_eq!(existing_key, "first_raw.wav"),
        other => panic!("expected duplicate, got {:?}", other),
    }
    assert!(h
        .store
        .object_bytes(PRIMARY_BUCKET, "second_raw.wav")
        .is_none());
    assert!(matches!(
        h.orchestrator.session_status(&id).await,
        Err(UploadError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_session_for_taken_key_refused_at_create() {
    let h = harness().await;
    let data = generate_wav(MIB, 26);

    h.orchestrator
        .request_upload(&sermon_relay::orchestrator::FileRequest {
            filename: "taken.wav".to_string(),
            declared_size: data.len() as u64,
            declared_hash: None,
        })
        .await
        .unwrap();
    h.store
        .client_put(PRIMARY_BUCKET, "taken_raw.wav", Bytes::from(data.clone()))
        .unwrap();
    h.orchestrator.complete_single("taken_raw.wav").await.unwrap();

    let err = h
        .orchestrator
        .create_session("taken.wav", data.len() as u64, HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::AlreadyExists(_)));
}

#[tokio::test]
async fn test_cancel_session_is_idempotent() {
    let h = harness().await;
    let id = h
        .orchestrator
        .create_session("e.wav", 1024, HashMap::new())
        .await
        .unwrap();

    h.orchestrator.cancel_session(&id).await.unwrap();
    assert!(matches!(
        h.orchestrator.session_status(&id).await,
        Err(UploadError::SessionNotFound(_))
    ));
    // Second cancel still succeeds
    h.orchestrator.cancel_session(&id).await.unwrap();
}

#[tokio::test]
async fn test_wrong_hash_fails_verify_then_correct_hash_passes() {
    let h = harness().await;
    let data = generate_wav(MIB, 27);

    let id = h
        .orchestrator
        .create_session("f.wav", data.len() as u64, HashMap::new())
        .await
        .unwrap();
    h.orchestrator.append_session(&id, 0, &data).await.unwrap();

    let err = h
        .orchestrator
        .verify_session(&id, &"0".repeat(64))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::IntegrityMismatch { .. }));

    h.orchestrator
        .verify_session(&id, &sha256_hex(&data))
        .await
        .unwrap();
    h.orchestrator.finalize_session(&id).await.unwrap();
}

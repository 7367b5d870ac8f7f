//! End-to-end presigned upload flows over the in-memory store.

mod common;

use bytes::Bytes;
use common::{generate_wav, harness, sha256_hex, PRIMARY_BUCKET};
use sermon_relay::events::ProgressEvent;
use sermon_relay::orchestrator::{FileRequest, PresignOutcome};
use sermon_relay::storage::{ObjectStore, PartEtag};
use sermon_relay::types::{meta_keys, UploadError};

fn file_request(filename: &str, size: u64) -> FileRequest {
    FileRequest {
        filename: filename.to_string(),
        declared_size: size,
        declared_hash: None,
    }
}

#[tokio::test]
async fn test_small_upload_bit_perfect() {
    let h = harness().await;
    let data = generate_wav(1024 * 1024, 1);
    let hash = sha256_hex(&data);

    // Request a presigned URL; below the threshold this is a single PUT.
    let outcome = h
        .orchestrator
        .request_upload(&file_request("a.wav", data.len() as u64))
        .await
        .unwrap();
    let object_key = match outcome {
        PresignOutcome::Single {
            object_key,
            upload_url,
            ..
        } => {
            assert_eq!(object_key, "a_raw.wav");
            assert!(upload_url.contains("a_raw.wav"));
            object_key
        }
        other => panic!("expected single PUT, got {:?}", other),
    };

    // Client PUTs the bytes directly to the store, then confirms.
    h.store
        .client_put(PRIMARY_BUCKET, &object_key, Bytes::from(data.clone()))
        .unwrap();
    let result = h.orchestrator.complete_single(&object_key).await.unwrap();
    assert_eq!(result.object_key, "a_raw.wav");
    assert_eq!(result.size, data.len() as u64);
    assert_eq!(result.file_hash, hash);

    // Bit-perfect round trip
    let stored = h.store.object_bytes(PRIMARY_BUCKET, &object_key).unwrap();
    assert_eq!(sha256_hex(&stored), hash);

    // Object metadata carries the hash and quality tag
    let stat = h.store.stat(PRIMARY_BUCKET, &object_key).await.unwrap();
    assert_eq!(stat.user_metadata.get(meta_keys::FILE_HASH), Some(&hash));
    assert_eq!(
        stat.user_metadata.get(meta_keys::COMPRESSION),
        Some(&"none".to_string())
    );
    assert_eq!(
        stat.user_metadata.get(meta_keys::QUALITY),
        Some(&"44kHz/16bit/2ch".to_string())
    );

    // Index knows the hash; sidecar exists; listing shows the file
    assert_eq!(h.index.has_hash(&hash), Some(object_key.clone()));
    assert!(h
        .store
        .object_bytes(PRIMARY_BUCKET, "metadata/a_raw.wav.json")
        .is_some());

    let files = h.orchestrator.list_files().await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].object_key, "a_raw.wav");
    assert_eq!(files[0].file_hash.as_ref(), Some(&hash));
}

#[tokio::test]
async fn test_second_upload_same_content_is_duplicate() {
    let h = harness().await;
    let data = generate_wav(512 * 1024, 7);
    let hash = sha256_hex(&data);

    // First upload succeeds
    h.orchestrator
        .request_upload(&file_request("a.wav", data.len() as u64))
        .await
        .unwrap();
    h.store
        .client_put(PRIMARY_BUCKET, "a_raw.wav", Bytes::from(data.clone()))
        .unwrap();
    h.orchestrator.complete_single("a_raw.wav").await.unwrap();

    // Identical bytes under a different filename land, then lose at finalize
    h.orchestrator
        .request_upload(&file_request("b.wav", data.len() as u64))
        .await
        .unwrap();
    h.store
        .client_put(PRIMARY_BUCKET, "b_raw.wav", Bytes::from(data.clone()))
        .unwrap();
    let err = h
        .orchestrator
        .complete_single("b_raw.wav")
        .await
        .unwrap_err();
    match err {
        UploadError::Duplicate { existing_key } => assert_eq!(existing_key, "a_raw.wav"),
        other => panic!("expected duplicate, got {:?}", other),
    }

    // The new object was removed; the index still has exactly the prior entry
    assert!(h.store.object_bytes(PRIMARY_BUCKET, "b_raw.wav").is_none());
    assert_eq!(h.index.has_hash(&hash), Some("a_raw.wav".to_string()));
    assert_eq!(h.index.len(), 1);
}

#[tokio::test]
async fn test_declared_hash_precheck_short_circuits() {
    let h = harness().await;
    let data = generate_wav(256 * 1024, 3);
    let hash = sha256_hex(&data);

    h.orchestrator
        .request_upload(&file_request("a.wav", data.len() as u64))
        .await
        .unwrap();
    h.store
        .client_put(PRIMARY_BUCKET, "a_raw.wav", Bytes::from(data.clone()))
        .unwrap();
    h.orchestrator.complete_single("a_raw.wav").await.unwrap();

    // A client that pre-declares the hash skips the transfer entirely
    let outcome = h
        .orchestrator
        .request_upload(&FileRequest {
            filename: "copy.wav".to_string(),
            declared_size: data.len() as u64,
            declared_hash: Some(hash),
        })
        .await
        .unwrap();
    match outcome {
        PresignOutcome::Duplicate { existing_key } => assert_eq!(existing_key, "a_raw.wav"),
        other => panic!("expected duplicate pre-check, got {:?}", other),
    }
}

#[tokio::test]
async fn test_same_filename_refused_while_key_taken() {
    let h = harness().await;
    let data = generate_wav(128 * 1024, 9);

    h.orchestrator
        .request_upload(&file_request("sermon.wav", data.len() as u64))
        .await
        .unwrap();
    h.store
        .client_put(PRIMARY_BUCKET, "sermon_raw.wav", Bytes::from(data.clone()))
        .unwrap();
    h.orchestrator
        .complete_single("sermon_raw.wav")
        .await
        .unwrap();

    // Same filename derives the same key; refused rather than overwritten
    let err = h
        .orchestrator
        .request_upload(&file_request("sermon.wav", data.len() as u64))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::AlreadyExists(_)));
}

#[tokio::test]
async fn test_download_url_requires_existing_object() {
    let h = harness().await;
    let err = h.orchestrator.download_url("missing_raw.wav").await.unwrap_err();
    assert!(matches!(err, UploadError::NotFound(_)));

    let data = generate_wav(64 * 1024, 13);
    h.orchestrator
        .request_upload(&file_request("dl.wav", data.len() as u64))
        .await
        .unwrap();
    h.store
        .client_put(PRIMARY_BUCKET, "dl_raw.wav", Bytes::from(data))
        .unwrap();
    h.orchestrator.complete_single("dl_raw.wav").await.unwrap();

    let url = h.orchestrator.download_url("dl_raw.wav").await.unwrap();
    assert!(url.contains("dl_raw.wav"));
    assert!(url.contains("op=get"));
}

#[tokio::test]
async fn test_zero_size_rejected() {
    let h = harness().await;
    let err = h
        .orchestrator
        .request_upload(&file_request("a.wav", 0))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::InvalidInput(_)));
}

#[tokio::test]
async fn test_bad_filename_rejected() {
    let h = harness().await;
    let err = h
        .orchestrator
        .request_upload(&file_request("../escape.wav", 100))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::InvalidInput(_)));
}

#[tokio::test]
async fn test_multipart_upload_out_of_order_parts() {
    let h = harness().await;
    // 24 MiB over an 8 MiB threshold: multipart with 8 MiB parts, 3 parts.
    let data = generate_wav(24 * 1024 * 1024, 42);
    let hash = sha256_hex(&data);

    let outcome = h
        .orchestrator
        .request_upload(&file_request("big.wav", data.len() as u64))
        .await
        .unwrap();
    let (object_key, upload_id, part_size, part_urls) = match outcome {
        PresignOutcome::Multipart {
            object_key,
            upload_id,
            part_size,
            part_urls,
            ..
        } => (object_key, upload_id, part_size, part_urls),
        other => panic!("expected multipart, got {:?}", other),
    };
    assert_eq!(object_key, "big_raw.wav");
    assert_eq!(part_size, 8 * 1024 * 1024);
    assert_eq!(part_urls.len(), 3);

    // Client uploads parts in whatever order the network finishes them
    let mut etags = Vec::new();
    for number in [3u32, 1, 2] {
        let start = (number as usize - 1) * part_size as usize;
        let end = (start + part_size as usize).min(data.len());
        let etag = h
            .store
            .client_put_part(&upload_id, number, Bytes::copy_from_slice(&data[start..end]))
            .unwrap();
        etags.push(PartEtag { number, etag });
    }
    etags.sort_by_key(|p| p.number);

    let result = h
        .orchestrator
        .complete_multipart(&upload_id, &object_key, &etags)
        .await
        .unwrap();
    assert_eq!(result.size, data.len() as u64);
    assert_eq!(result.file_hash, hash);

    // Exactly the source bytes, one object
    let stored = h.store.object_bytes(PRIMARY_BUCKET, &object_key).unwrap();
    assert_eq!(stored.len(), data.len());
    assert_eq!(sha256_hex(&stored), hash);
    assert_eq!(h.index.has_hash(&hash), Some(object_key));
}

#[tokio::test]
async fn test_multipart_complete_rejects_unordered_list() {
    let h = harness().await;
    let err = h
        .orchestrator
        .complete_multipart(
            "upload-id",
            "big_raw.wav",
            &[
                PartEtag { number: 2, etag: "b".into() },
                PartEtag { number: 1, etag: "a".into() },
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::InvalidInput(_)));
}

#[tokio::test]
async fn test_multipart_complete_rejects_empty_parts() {
    let h = harness().await;
    let err = h
        .orchestrator
        .complete_multipart("upload-id", "big_raw.wav", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::InvalidInput(_)));
}

#[tokio::test]
async fn test_upload_exactly_at_threshold_uses_multipart() {
    let h = harness().await;
    let size = common::TEST_MULTIPART_THRESHOLD;

    let outcome = h
        .orchestrator
        .request_upload(&file_request("edge.wav", size))
        .await
        .unwrap();
    match outcome {
        PresignOutcome::Multipart { part_urls, .. } => {
            // Minimum part count at the boundary
            assert_eq!(part_urls.len(), 1);
        }
        other => panic!("expected multipart at threshold, got {:?}", other),
    }
}

#[tokio::test]
async fn test_events_emitted_for_completed_upload() {
    let h = harness().await;
    let mut sub = h.bus.subscribe().unwrap();

    let data = generate_wav(100 * 1024, 5);
    h.orchestrator
        .request_upload(&file_request("a.wav", data.len() as u64))
        .await
        .unwrap();
    h.store
        .client_put(PRIMARY_BUCKET, "a_raw.wav", Bytes::from(data.clone()))
        .unwrap();
    h.orchestrator.complete_single("a_raw.wav").await.unwrap();

    match sub.receiver.recv().await.unwrap() {
        ProgressEvent::UploadStart {
            filename,
            object_key,
            total_size,
            ..
        } => {
            assert_eq!(filename, "a.wav");
            assert_eq!(object_key, "a_raw.wav");
            assert_eq!(total_size, data.len() as u64);
        }
        other => panic!("expected upload_start, got {:?}", other),
    }
    match sub.receiver.recv().await.unwrap() {
        ProgressEvent::Completion {
            object_key,
            size,
            file_hash,
            ..
        } => {
            assert_eq!(object_key, "a_raw.wav");
            assert_eq!(size, data.len() as u64);
            assert_eq!(file_hash, sha256_hex(&data));
        }
        other => panic!("expected completion, got {:?}", other),
    }
}

#[tokio::test]
async fn test_duplicate_emits_error_event() {
    let h = harness().await;
    let data = generate_wav(64 * 1024, 11);

    h.orchestrator
        .request_upload(&file_request("a.wav", data.len() as u64))
        .await
        .unwrap();
    h.store
        .client_put(PRIMARY_BUCKET, "a_raw.wav", Bytes::from(data.clone()))
        .unwrap();
    h.orchestrator.complete_single("a_raw.wav").await.unwrap();

    let mut sub = h.bus.subscribe().unwrap();
    h.orchestrator
        .request_upload(&file_request("b.wav", data.len() as u64))
        .await
        .unwrap();
    h.store
        .client_put(PRIMARY_BUCKET, "b_raw.wav", Bytes::from(data.clone()))
        .unwrap();
    let _ = h.orchestrator.complete_single("b_raw.wav").await;

    // upload_start for b.wav, then the terminal duplicate error
    let mut saw_duplicate = false;
    while let Ok(event) = sub.receiver.try_recv() {
        if let ProgressEvent::Error { kind, .. } = event {
            assert_eq!(kind, "duplicate");
            saw_duplicate = true;
        }
    }
    assert!(saw_duplicate);
}

#[tokio::test]
async fn test_non_wav_payload_still_stored_with_quality_alert() {
    let h = harness().await;
    // Valid upload, but the bytes are not a WAV container
    let data = vec![0x42u8; 200 * 1024];
    let hash = sha256_hex(&data);

    let mut sub = h.bus.subscribe().unwrap();
    h.orchestrator
        .request_upload(&file_request("notes.wav", data.len() as u64))
        .await
        .unwrap();
    h.store
        .client_put(PRIMARY_BUCKET, "notes_raw.wav", Bytes::from(data.clone()))
        .unwrap();

    // Header check is advisory: the upload still succeeds
    let result = h
        .orchestrator
        .complete_single("notes_raw.wav")
        .await
        .unwrap();
    assert_eq!(result.file_hash, hash);

    let mut saw_alert = false;
    while let Ok(event) = sub.receiver.try_recv() {
        if matches!(event, ProgressEvent::QualityAlert { .. }) {
            saw_alert = true;
        }
    }
    assert!(saw_alert);

    // No quality tag on the metadata
    let stat = h.store.stat(PRIMARY_BUCKET, "notes_raw.wav").await.unwrap();
    assert!(stat.user_metadata.get(meta_keys::QUALITY).is_none());
    assert_eq!(stat.user_metadata.get(meta_keys::FILE_HASH), Some(&hash));
}

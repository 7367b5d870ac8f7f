//! sermon-relay — upload coordination for lossless sermon audio
//!
//! This library provides the core functionality for the sermon-relay server:
//! presigned and resumable upload orchestration against an S3-compatible
//! object store, with content-hash deduplication and bit-perfect integrity
//! verification.

pub mod api;
pub mod config;
pub mod events;
pub mod index;
pub mod integrity;
pub mod metrics;
pub mod orchestrator;
pub mod session;
pub mod storage;
pub mod types;

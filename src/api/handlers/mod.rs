//! API request handlers
//!
//! Split into submodules by domain:
//! - `presigned` — presigned-URL issuance and upload completion
//! - `tus` — resumable chunked upload sessions
//! - `files` — stored-object browsing
//! - `events` — progress WebSocket
//! - `status` — health check

mod events;
mod files;
mod presigned;
mod status;
mod tus;

use crate::metrics::Metrics;
use crate::orchestrator::Orchestrator;
use std::sync::Arc;

// Re-export all public handlers so the router assembly reads flat.
pub use events::events_ws;
pub use files::{download_url, list_files};
pub use presigned::{complete_upload, presign_batch, presign_single};
pub use status::{health_check, HealthResponse};
pub use tus::{
    tus_append, tus_cancel, tus_create, tus_finalize, tus_probe, tus_status, tus_verify,
};

/// Application state shared across handlers
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub metrics: Arc<Metrics>,
}

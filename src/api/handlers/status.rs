//! Health-check handler.

use super::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub open_sessions: usize,
    pub index_entries: usize,
    pub event_subscribers: usize,
}

/// Health check handler
/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        open_sessions: state.orchestrator.open_sessions(),
        index_entries: state.orchestrator.index_len(),
        event_subscribers: state.orchestrator.bus().subscriber_count(),
    })
}

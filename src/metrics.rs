//! Prometheus metrics for sermon-relay.
//!
//! All metric types use atomics internally (no locks on the hot path).
//! The `Metrics` struct is `Clone`-cheap (Arc-based registry + Arc-based collectors).

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::{
    Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    Opts, Registry, TextEncoder, TEXT_FORMAT,
};
use std::sync::Arc;
use std::time::Instant;

use crate::api::handlers::AppState;

/// All Prometheus metrics for sermon-relay.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // -- Process & Build --
    pub process_start_time_seconds: Gauge,
    pub build_info: GaugeVec,

    // -- HTTP Requests --
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
    pub http_request_size_bytes: HistogramVec,

    // -- Object store gateway --
    pub store_retries_total: IntCounter,
    pub store_connection_errors_total: IntCounter,

    // -- Uploads --
    pub uploads_completed_total: IntCounter,
    pub uploads_duplicate_total: IntCounter,
    pub uploads_failed_total: IntCounterVec,
    pub upload_bytes_total: IntCounter,
    pub upload_size_bytes: Histogram,

    // -- Sessions --
    pub sessions_active: Gauge,
    pub sessions_expired_total: IntCounter,

    // -- Hash index --
    pub index_entries: Gauge,
    pub index_saves_total: IntCounter,
    pub index_save_failures_total: IntCounter,

    // -- Event bus --
    pub event_subscribers: Gauge,
    pub events_dropped_total: IntCounter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        // -- Process & Build --
        let process_start_time_seconds =
            Gauge::new("process_start_time_seconds", "Start time of the process").unwrap();
        registry
            .register(Box::new(process_start_time_seconds.clone()))
            .unwrap();

        let build_info = GaugeVec::new(
            Opts::new("sermon_relay_build_info", "Build information"),
            &["version", "store_type"],
        )
        .unwrap();
        registry.register(Box::new(build_info.clone())).unwrap();

        // Register standard process metrics (RSS, CPU, open FDs on Linux)
        #[cfg(target_os = "linux")]
        {
            let pc = prometheus::process_collector::ProcessCollector::for_self();
            let _ = registry.register(Box::new(pc));
        }

        // -- HTTP Requests --
        let http_requests_total = IntCounterVec::new(
            Opts::new(
                "sermon_relay_http_requests_total",
                "Total HTTP requests by method, status, and operation",
            ),
            &["method", "status", "operation"],
        )
        .unwrap();
        registry
            .register(Box::new(http_requests_total.clone()))
            .unwrap();

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "sermon_relay_http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "operation"],
        )
        .unwrap();
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .unwrap();

        let body_size_buckets = prometheus::exponential_buckets(1024.0, 10.0, 7).unwrap();
        // [1KB, 10KB, 100KB, 1MB, 10MB, 100MB, 1GB]

        let http_request_size_bytes = HistogramVec::new(
            HistogramOpts::new(
                "sermon_relay_http_request_size_bytes",
                "HTTP request body size in bytes",
            )
            .buckets(body_size_buckets.clone()),
            &["method"],
        )
        .unwrap();
        registry
            .register(Box::new(http_request_size_bytes.clone()))
            .unwrap();

        // -- Object store gateway --
        let store_retries_total = IntCounter::new(
            "sermon_relay_store_retries_total",
            "Store operations retried after a transient failure",
        )
        .unwrap();
        registry
            .register(Box::new(store_retries_total.clone()))
            .unwrap();

        let store_connection_errors_total = IntCounter::new(
            "sermon_relay_store_connection_errors_total",
            "Connection-level failures against the object store",
        )
        .unwrap();
        registry
            .register(Box::new(store_connection_errors_total.clone()))
            .unwrap();

        // -- Uploads --
        let uploads_completed_total = IntCounter::new(
            "sermon_relay_uploads_completed_total",
            "Uploads finalized successfully",
        )
        .unwrap();
        registry
            .register(Box::new(uploads_completed_total.clone()))
            .unwrap();

        let uploads_duplicate_total = IntCounter::new(
            "sermon_relay_uploads_duplicate_total",
            "Uploads rejected as duplicates at finalize",
        )
        .unwrap();
        registry
            .register(Box::new(uploads_duplicate_total.clone()))
            .unwrap();

        let uploads_failed_total = IntCounterVec::new(
            Opts::new(
                "sermon_relay_uploads_failed_total",
                "Failed uploads by error kind",
            ),
            &["kind"],
        )
        .unwrap();
        registry
            .register(Box::new(uploads_failed_total.clone()))
            .unwrap();

        let upload_bytes_total = IntCounter::new(
            "sermon_relay_upload_bytes_total",
            "Total bytes accepted into finalized objects",
        )
        .unwrap();
        registry
            .register(Box::new(upload_bytes_total.clone()))
            .unwrap();

        let upload_size_bytes = Histogram::with_opts(
            HistogramOpts::new(
                "sermon_relay_upload_size_bytes",
                "Finalized object size distribution",
            )
            .buckets(body_size_buckets),
        )
        .unwrap();
        registry
            .register(Box::new(upload_size_bytes.clone()))
            .unwrap();

        // -- Sessions --
        let sessions_active = Gauge::new(
            "sermon_relay_sessions_active",
            "Resumable sessions currently open",
        )
        .unwrap();
        registry
            .register(Box::new(sessions_active.clone()))
            .unwrap();

        let sessions_expired_total = IntCounter::new(
            "sermon_relay_sessions_expired_total",
            "Resumable sessions reclaimed by TTL garbage collection",
        )
        .unwrap();
        registry
            .register(Box::new(sessions_expired_total.clone()))
            .unwrap();

        // -- Hash index --
        let index_entries = Gauge::new(
            "sermon_relay_index_entries",
            "Entries in the in-memory hash index",
        )
        .unwrap();
        registry.register(Box::new(index_entries.clone())).unwrap();

        let index_saves_total = IntCounter::new(
            "sermon_relay_index_saves_total",
            "Hash index snapshots written to the system bucket",
        )
        .unwrap();
        registry
            .register(Box::new(index_saves_total.clone()))
            .unwrap();

        let index_save_failures_total = IntCounter::new(
            "sermon_relay_index_save_failures_total",
            "Hash index snapshot writes that failed",
        )
        .unwrap();
        registry
            .register(Box::new(index_save_failures_total.clone()))
            .unwrap();

        // -- Event bus --
        let event_subscribers = Gauge::new(
            "sermon_relay_event_subscribers",
            "Connected progress event subscribers",
        )
        .unwrap();
        registry
            .register(Box::new(event_subscribers.clone()))
            .unwrap();

        let events_dropped_total = IntCounter::new(
            "sermon_relay_events_dropped_total",
            "Progress events dropped on full subscriber buffers",
        )
        .unwrap();
        registry
            .register(Box::new(events_dropped_total.clone()))
            .unwrap();

        Metrics {
            registry,
            process_start_time_seconds,
            build_info,
            http_requests_total,
            http_request_duration_seconds,
            http_request_size_bytes,
            store_retries_total,
            store_connection_errors_total,
            uploads_completed_total,
            uploads_duplicate_total,
            uploads_failed_total,
            upload_bytes_total,
            upload_size_bytes,
            sessions_active,
            sessions_expired_total,
            index_entries,
            index_saves_total,
            index_save_failures_total,
            event_subscribers,
            events_dropped_total,
        }
    }
}

/// Classify a request path into a bounded operation label.
pub fn classify_operation(method: &str, path: &str) -> &'static str {
    match path {
        "/health" => return "health",
        "/metrics" => return "metrics",
        "/files" => return "list_files",
        "/events" => return "events",
        "/upload/presigned" => return "presign",
        "/upload/presigned/batch" => return "presign_batch",
        "/upload/complete" => return "complete_multipart",
        "/tus/create" => return "session_create",
        _ => {}
    }

    if path.starts_with("/files/") && path.ends_with("/download") {
        return "download_url";
    }

    if path.starts_with("/tus/") {
        return match method {
            "PATCH" => "session_append",
            "HEAD" => "session_probe",
            "DELETE" => "session_cancel",
            "POST" if path.ends_with("/verify") => "session_verify",
            "POST" if path.ends_with("/finalize") => "session_finalize",
            "GET" => "session_status",
            _ => "session_other",
        };
    }

    "unknown"
}

/// Axum middleware that records HTTP request metrics.
pub async fn http_metrics_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let metrics = state.metrics.clone();

    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let operation = classify_operation(&method, &path);

    // Record request size from Content-Length if available
    if let Some(cl) = request
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<f64>().ok())
    {
        metrics
            .http_request_size_bytes
            .with_label_values(&[&method])
            .observe(cl);
    }

    let start = Instant::now();
    let response = next.run(request).await;
    let duration = start.elapsed().as_secs_f64();

    let status = response.status().as_u16().to_string();

    metrics
        .http_requests_total
        .with_label_values(&[&method, &status, operation])
        .inc();
    metrics
        .http_request_duration_seconds
        .with_label_values(&[&method, operation])
        .observe(duration);

    response
}

/// Handler for GET /metrics — returns Prometheus text format.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let metrics = &state.metrics;

    // Update on-demand gauges (all O(1) atomic reads)
    metrics
        .sessions_active
        .set(state.orchestrator.open_sessions() as f64);
    metrics
        .index_entries
        .set(state.orchestrator.index_len() as f64);
    metrics
        .event_subscribers
        .set(state.orchestrator.bus().subscriber_count() as f64);

    let encoder = TextEncoder::new();
    let metric_families = metrics.registry.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response();
    }

    (StatusCode::OK, [("content-type", TEXT_FORMAT)], buffer).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_operation() {
        assert_eq!(classify_operation("GET", "/health"), "health");
        assert_eq!(classify_operation("GET", "/metrics"), "metrics");
        assert_eq!(classify_operation("GET", "/files"), "list_files");
        assert_eq!(
            classify_operation("GET", "/files/a_raw.wav/download"),
            "download_url"
        );
        assert_eq!(classify_operation("POST", "/upload/presigned"), "presign");
        assert_eq!(
            classify_operation("POST", "/upload/presigned/batch"),
            "presign_batch"
        );
        assert_eq!(
            classify_operation("POST", "/upload/complete"),
            "complete_multipart"
        );
        assert_eq!(classify_operation("POST", "/tus/create"), "session_create");
        assert_eq!(classify_operation("PATCH", "/tus/abc123"), "session_append");
        assert_eq!(classify_operation("HEAD", "/tus/abc123"), "session_probe");
        assert_eq!(
            classify_operation("POST", "/tus/abc123/verify"),
            "session_verify"
        );
        assert_eq!(
            classify_operation("POST", "/tus/abc123/finalize"),
            "session_finalize"
        );
        assert_eq!(
            classify_operation("DELETE", "/tus/abc123"),
            "session_cancel"
        );
        assert_eq!(classify_operation("GET", "/elsewhere"), "unknown");
    }

    #[test]
    fn test_metrics_register_once() {
        // Constructing must not panic (no duplicate registration).
        let m = Metrics::new();
        m.uploads_completed_total.inc();
        m.store_retries_total.inc_by(3);
        assert_eq!(m.uploads_completed_total.get(), 1);
        assert_eq!(m.store_retries_total.get(), 3);
    }
}

//! sermon-relay — upload coordination for lossless sermon audio

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
    Router,
};
use clap::Parser;
use sermon_relay::api::handlers::{
    complete_upload, download_url, events_ws, health_check, list_files, presign_batch,
    presign_single, tus_append, tus_cancel, tus_create, tus_finalize, tus_probe, tus_status,
    tus_verify, AppState,
};
use sermon_relay::config::{Config, StoreConfig};
use sermon_relay::events::EventBus;
use sermon_relay::index::HashIndex;
use sermon_relay::metrics::Metrics;
use sermon_relay::orchestrator::Orchestrator;
use sermon_relay::session::SessionStore;
use sermon_relay::storage::{MemoryStore, ObjectStore, S3Store};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Largest accepted in-band request body: one session chunk, not a whole
/// file. Clients with bigger files use the presigned path.
const MAX_CHUNK_BODY: usize = 64 * 1024 * 1024;

/// Ceiling for any single request, sized for a large chunk append over a
/// slow WAN link. WebSocket traffic runs on the upgraded connection and is
/// not affected.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// sermon-relay — upload coordination for lossless sermon audio
#[derive(Parser, Debug)]
#[command(name = "sermon-relay")]
#[command(version, author, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Priority: RUST_LOG > SERMON_RELAY_LOG_LEVEL > --verbose > default
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| std::env::var("SERMON_RELAY_LOG_LEVEL").map(EnvFilter::new))
        .unwrap_or_else(|_| {
            if cli.verbose {
                EnvFilter::new("sermon_relay=trace,tower_http=trace")
            } else {
                EnvFilter::new("sermon_relay=debug,tower_http=info")
            }
        });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Load configuration from file if specified, otherwise use default loading
    let mut config = if let Some(ref path) = cli.config {
        Config::from_file(path)?
    } else {
        Config::load()
    };
    if let Some(ref addr) = cli.listen {
        config.listen_addr = addr.parse()?;
    }
    let config = Arc::new(config);

    info!("Starting sermon-relay v{}", env!("CARGO_PKG_VERSION"));
    info!("  Listen address: {}", config.listen_addr);
    info!("  Primary bucket: {}", config.primary_bucket);
    info!("  System bucket: {}", config.system_bucket);
    info!(
        "  Multipart threshold: {} MiB",
        config.multipart_threshold_bytes / 1024 / 1024
    );
    info!("  Session temp dir: {:?}", config.session_temp_dir);

    let metrics = Arc::new(Metrics::new());
    metrics.process_start_time_seconds.set(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64(),
    );

    // Object store gateway
    let store: Arc<dyn ObjectStore> = match &config.store {
        StoreConfig::S3 { endpoint, region, .. } => {
            info!("  Store: S3 (region {})", region);
            if let Some(ep) = endpoint {
                info!("  Endpoint: {}", ep);
            }
            Arc::new(S3Store::new(&config, Some(metrics.clone()))?)
        }
        StoreConfig::Memory => {
            warn!("  Store: in-memory (contents are lost on restart)");
            Arc::new(MemoryStore::new())
        }
    };
    let store_type = match &config.store {
        StoreConfig::S3 { .. } => "s3",
        StoreConfig::Memory => "memory",
    };
    metrics
        .build_info
        .with_label_values(&[env!("CARGO_PKG_VERSION"), store_type])
        .set(1.0);

    store.ensure_bucket(&config.primary_bucket).await?;
    store.ensure_bucket(&config.system_bucket).await?;

    // Hash index: load the snapshot, then reconcile for objects created
    // outside this process.
    let index = Arc::new(HashIndex::new(
        store.clone(),
        config.primary_bucket.clone(),
        config.system_bucket.clone(),
        Some(metrics.clone()),
    ));
    index.load_from_store().await?;
    match index.reconcile().await {
        Ok(added) => info!(
            "Hash index ready: {} entries ({} from reconcile)",
            index.len(),
            added
        ),
        Err(e) => warn!("Startup reconcile failed (index may lag): {}", e),
    }

    let sessions = Arc::new(SessionStore::new(
        config.session_temp_dir.clone(),
        Some(metrics.clone()),
    )?);
    let bus = Arc::new(EventBus::new(
        config.event_bus.max_subscribers,
        config.event_bus.buffer_size,
        Some(metrics.clone()),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        store,
        index.clone(),
        sessions,
        bus,
        config.clone(),
        Some(metrics.clone()),
    ));

    // Background tickers, all stopped via one token at shutdown.
    let shutdown = CancellationToken::new();

    spawn_periodic(config.index_autosave_interval, shutdown.clone(), {
        let index = index.clone();
        move || {
            let index = index.clone();
            async move { index.save_if_dirty().await }
        }
    });

    spawn_periodic(Duration::from_secs(300), shutdown.clone(), {
        let orchestrator = orchestrator.clone();
        move || {
            let orchestrator = orchestrator.clone();
            async move {
                orchestrator.gc_sessions().await;
                orchestrator.expire_multipart_handles();
            }
        }
    });

    let state = Arc::new(AppState {
        orchestrator,
        metrics: metrics.clone(),
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(sermon_relay::metrics::metrics_handler))
        .route("/files", get(list_files))
        .route("/files/:key/download", get(download_url))
        .route("/events", get(events_ws))
        // Presigned path
        .route("/upload/presigned", post(presign_single))
        .route("/upload/presigned/batch", post(presign_batch))
        .route("/upload/complete", post(complete_upload))
        // Resumable chunked path
        .route("/tus/create", post(tus_create))
        .route(
            "/tus/:id",
            patch(tus_append).head(tus_probe).delete(tus_cancel),
        )
        .route("/tus/:id/status", get(tus_status))
        .route("/tus/:id/verify", post(tus_verify))
        .route("/tus/:id/finalize", post(tus_finalize))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            sermon_relay::metrics::http_metrics_middleware,
        ))
        .layer(DefaultBodyLimit::max(MAX_CHUNK_BODY))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        // CORS must be outermost so OPTIONS preflight is answered first
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("sermon-relay listening on http://{}", config.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop tickers, then take a final snapshot so restarts come up warm.
    shutdown.cancel();
    index.save_if_dirty().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Spawn a background task that runs `f` every `interval` until the token
/// is cancelled.
fn spawn_periodic<F, Fut>(interval: Duration, shutdown: CancellationToken, f: F)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        // The first tick fires immediately; skip it.
        tick.tick().await;
        loop {
            tokio::select! {
                _ = tick.tick() => f().await,
                _ = shutdown.cancelled() => break,
            }
        }
    });
}

/// Handle shutdown signals (SIGINT, SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

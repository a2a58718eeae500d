//! Track Fetch Service
//!
//! Single-binary Rust service that:
//! 1. Loads a pool of API client ids and a request budget
//! 2. Resolves public track and playlist links through the rotating gateway
//! 3. Downloads the audio into a local directory
//! 4. Exposes pool health and Prometheus metrics

mod api;
mod config;
mod error;
mod media;
mod metrics;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_client::{Gateway, RateLimiter, USER_AGENT};
use client_pool::Pool;

use crate::api::AppState;
use crate::config::Config;
use crate::media::MediaStore;

/// In-flight requests get this long to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the axum router with all routes and shared state.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/v1/resolve", get(api::resolve_handler))
        .route("/v1/downloads", post(api::download_handler))
        .fallback(api::not_found_handler)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Wire the pool, limiter, gateway and media store from configuration.
fn build_state(
    config: &Config,
    prometheus: metrics_exporter_prometheus::PrometheusHandle,
) -> Result<AppState> {
    let http = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .context("failed to build HTTP client")?;

    let pool = Pool::new(
        config.credentials.resolved.clone(),
        config.credentials.strategy,
        config.credentials.cooldown(),
    )
    .context("failed to build credential pool")?;
    let limiter = RateLimiter::new(config.api.requests_per_minute);

    let gateway = Gateway::new(
        http.clone(),
        &config.api.base_url,
        Arc::new(pool),
        Arc::new(limiter),
        Duration::from_secs(config.api.timeout_secs),
    )
    .context("invalid API base URL")?;

    let media = MediaStore::from_config(http, &config.downloads).with_context(|| {
        format!(
            "failed to prepare download directory {}",
            config.downloads.directory.display()
        )
    })?;

    Ok(AppState {
        gateway: Arc::new(gateway),
        media: Arc::new(media),
        prometheus,
        started_at: Instant::now(),
        max_playlist_size: config.downloads.max_playlist_size,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs; LOG_LEVEL wins over RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting track-fetch-service");

    // Install before anything emits metrics
    let prometheus_handle = metrics::install_recorder();

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        base_url = %config.api.base_url,
        credentials = config.credentials.resolved.len(),
        strategy = %config.credentials.strategy,
        requests_per_minute = config.api.requests_per_minute,
        download_dir = %config.downloads.directory.display(),
        "configuration loaded"
    );

    let state = build_state(&config, prometheus_handle)?;
    let app = build_router(state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    // Drain timer starts at signal receipt
    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!("shutdown complete");
    Ok(())
}

/// Pool health: 200 while any credential is active, 503 otherwise.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.gateway.pool().stats().await;
    let health = stats.health();
    let limiter = state.gateway.limiter();

    let status_code = if health == "unhealthy" {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    } else {
        axum::http::StatusCode::OK
    };

    let body = serde_json::json!({
        "status": health,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "rate_limit": {
            "limit_per_minute": limiter.limit(),
            "in_window": limiter.in_window().await,
        },
        "pool": stats,
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus text exposition.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

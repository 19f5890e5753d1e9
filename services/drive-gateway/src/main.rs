//! Drive Gateway
//!
//! Single-binary Rust service that:
//! 1. Walks a browser through the provider's OAuth2 consent flow
//! 2. Persists the resulting credential pair on disk
//! 3. Refreshes the access token on demand (single-flight)
//! 4. Uploads files to the resource API on behalf of the user

mod auth;
mod config;
mod drive;
mod metrics;
mod middleware;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusHandle;

use drive_auth::{CredentialStore, ProviderClient, TokenManager};

use crate::config::Config;
use crate::middleware::RateLimiter;

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<CredentialStore>,
    pub manager: Arc<TokenManager>,
    pub provider: ProviderClient,
    /// Client for the downstream resource API (same bounded timeout)
    pub http: reqwest::Client,
    pub limiter: Arc<RateLimiter>,
    pub requests_total: Arc<AtomicU64>,
    pub started_at: Instant,
    pub prometheus: PrometheusHandle,
}

/// Build the axum router.
///
/// The rate limiter guards the core routes only; `/health` and `/metrics`
/// stay reachable for probes. Request logging and the concurrency limit
/// wrap everything.
fn build_router(state: AppState, max_connections: usize) -> Router {
    let core = Router::new()
        .route("/auth/login", get(auth::login))
        .route("/auth/callback", get(auth::callback))
        .route("/drive/upload", post(drive::upload))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ));

    Router::new()
        .merge(core)
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::request_log,
        ))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting drive-gateway");

    // Install the Prometheus recorder before any metrics are emitted
    let prometheus = metrics::install_recorder();

    // CLI: simple --config flag parsing
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
        auth_url = %config.provider.auth_url,
        credential_file = %config.storage.credential_file.display(),
        "configuration loaded"
    );

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.server.timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let store = Arc::new(CredentialStore::load(config.storage.credential_file.clone()).await);
    let provider = ProviderClient::new(http.clone(), config.provider_config());
    let manager = Arc::new(TokenManager::new(store.clone(), provider.clone()));
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit.max_requests,
        Duration::from_secs(config.rate_limit.window_secs),
    ));

    let listen_addr = config.server.listen_addr;
    let max_connections = config.server.max_connections;

    let state = AppState {
        config: Arc::new(config),
        store,
        manager,
        provider,
        http,
        limiter,
        requests_total: Arc::new(AtomicU64::new(0)),
        started_at: Instant::now(),
        prometheus,
    };

    let app = build_router(state, max_connections);

    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;

    info!(addr = %listen_addr, "accepting requests");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: JSON with status, whether a credential is stored
/// (never the tokens themselves), uptime, and requests served.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "authenticated": state.store.is_authenticated().await,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "requests_served": state.requests_total.load(Ordering::Relaxed),
    });

    (
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint — text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
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

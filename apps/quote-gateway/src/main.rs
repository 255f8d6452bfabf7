//! Quote Gateway Binary
//!
//! Starts the quote distribution gateway.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin quote-gateway
//! ```
//!
//! # Environment Variables
//!
//! ## Optional
//! - `ALPHAVANTAGE_API_KEY`: Upstream API key; without it every quote
//!   request fails with `not_configured` (the gateway still boots)
//! - `QUOTE_GATEWAY_PORT`: HTTP port for REST + WebSocket + health + metrics (default: 3001)
//! - `QUOTE_GATEWAY_CACHE_TTL_SECS`: Quote freshness window (default: 300)
//! - `QUOTE_GATEWAY_MIN_INTERVAL_MS`: Spacing between upstream calls (default: 12000)
//! - `QUOTE_GATEWAY_FETCH_TIMEOUT_SECS`: Per-fetch deadline (default: 10)
//! - `QUOTE_GATEWAY_BATCH_LIMIT`: Max symbols per batch request (default: 20)
//! - `QUOTE_GATEWAY_BATCH_STAGGER_MS`: Delay between batch misses (default: 250)
//! - `QUOTE_GATEWAY_SERVE_STALE_ON_ERROR`: Serve stale quotes on transient upstream failure (default: false)
//! - `QUOTE_GATEWAY_BROADCAST_CAPACITY`: Per-subscriber update buffer (default: 1024)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: quote-gateway)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use quote_gateway::infrastructure::telemetry;
use quote_gateway::{
    AlphaVantageClient, ApiServer, BatchPlanner, FetchCoordinator, GatewayConfig, GatewayState,
    QuoteBroadcastHub, QuoteCache, RateLimiter, SubscriptionRegistry, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Quote Gateway");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = GatewayConfig::from_env();
    log_config(&config);

    if !config.is_upstream_configured() {
        tracing::warn!(
            "ALPHAVANTAGE_API_KEY is not set; every quote request will fail with 'not_configured'"
        );
    }

    let shutdown_token = CancellationToken::new();

    // Core components, leaf-first
    let cache = Arc::new(QuoteCache::new(config.cache.ttl));
    let rate_limiter = Arc::new(RateLimiter::new(config.upstream.min_interval));
    let fetcher = Arc::new(AlphaVantageClient::new(
        config.api_key.clone(),
        Arc::clone(&rate_limiter),
        config.upstream.fetch_timeout,
    )?);
    let hub = Arc::new(QuoteBroadcastHub::new(config.push.broadcast_capacity));
    let registry = Arc::new(SubscriptionRegistry::new());

    let coordinator = Arc::new(FetchCoordinator::new(
        Arc::clone(&cache),
        fetcher,
        Arc::clone(&hub) as _,
        config.upstream.serve_stale_on_error,
    ));
    let batch = Arc::new(BatchPlanner::new(
        Arc::clone(&coordinator),
        Arc::clone(&cache),
        config.batch.limit,
        config.batch.stagger,
    ));

    // HTTP server (REST + WebSocket push channel + health + metrics)
    let state = Arc::new(GatewayState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        coordinator,
        batch,
        cache,
        hub,
        registry,
        config.is_upstream_configured(),
    ));
    let server = ApiServer::new(config.server.port, state, shutdown_token.clone());

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!(error = %e, "Gateway server error");
        }
    });

    tracing::info!("Quote gateway ready");

    await_shutdown(shutdown_token).await;

    // Let the server drain in-flight requests before exiting
    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, server_handle).await;

    tracing::info!("Quote gateway stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &GatewayConfig) {
    tracing::info!(
        port = config.server.port,
        cache_ttl_secs = config.cache.ttl.as_secs(),
        min_interval_ms = config.upstream.min_interval.as_millis(),
        fetch_timeout_secs = config.upstream.fetch_timeout.as_secs(),
        batch_limit = config.batch.limit,
        batch_stagger_ms = config.batch.stagger.as_millis(),
        serve_stale_on_error = config.upstream.serve_stale_on_error,
        upstream_configured = config.is_upstream_configured(),
        "Configuration loaded"
    );
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv_from_ancestors() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}

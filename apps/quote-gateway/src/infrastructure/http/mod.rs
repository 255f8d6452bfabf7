//! Gateway HTTP Server
//!
//! One axum server carries the whole external surface: the REST quote
//! API, the WebSocket push channel, health probes, and Prometheus
//! metrics.
//!
//! # Endpoints
//!
//! - `GET /quotes/{symbol}` - single quote, cache-first
//! - `GET /quotes/batch?symbols=A,B,C` - per-symbol result-or-error array
//! - `GET /cache/status` - cached symbols with age and staleness
//! - `GET /ws` - push channel (see [`ws`])
//! - `GET /health` - JSON health status
//! - `GET /healthz` - liveness probe (simple OK)
//! - `GET /readyz` - readiness probe
//! - `GET /metrics` - Prometheus metrics in text format

pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::application::services::batch::{BatchEntry, BatchPlanner};
use crate::application::services::coordinator::FetchCoordinator;
use crate::domain::cache::QuoteCache;
use crate::domain::quote::{CachedQuote, QuoteError, Symbol};
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::broadcast::SharedQuoteBroadcastHub;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Gateway State
// =============================================================================

/// Shared state injected into every handler.
pub struct GatewayState {
    /// Service version string.
    pub version: String,
    /// Instant the server came up.
    pub started_at: Instant,
    /// Per-symbol fetch coalescing.
    pub coordinator: Arc<FetchCoordinator>,
    /// Batch request planning.
    pub batch: Arc<BatchPlanner>,
    /// The quote cache (diagnostics).
    pub cache: Arc<QuoteCache>,
    /// Quote fan-out hub.
    pub hub: SharedQuoteBroadcastHub,
    /// Push-channel interest sets.
    pub registry: Arc<SubscriptionRegistry>,
    /// Whether an upstream API key is configured.
    pub upstream_configured: bool,
    /// Connected push-channel clients.
    pub ws_clients: AtomicUsize,
}

impl GatewayState {
    /// Create the shared handler state.
    #[must_use]
    pub fn new(
        version: String,
        coordinator: Arc<FetchCoordinator>,
        batch: Arc<BatchPlanner>,
        cache: Arc<QuoteCache>,
        hub: SharedQuoteBroadcastHub,
        registry: Arc<SubscriptionRegistry>,
        upstream_configured: bool,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            coordinator,
            batch,
            cache,
            hub,
            registry,
            upstream_configured,
            ws_clients: AtomicUsize::new(0),
        }
    }
}

// =============================================================================
// API Server
// =============================================================================

/// The gateway HTTP server.
pub struct ApiServer {
    port: u16,
    state: Arc<GatewayState>,
    cancel: CancellationToken,
}

impl ApiServer {
    /// Create a server bound to `port` at run time.
    #[must_use]
    pub const fn new(port: u16, state: Arc<GatewayState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ApiServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), ApiServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ApiServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "gateway listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ApiServerError::ServerFailed(e.to_string()))?;

        tracing::info!("gateway stopped");
        Ok(())
    }
}

/// Build the gateway router over shared state.
///
/// Exposed separately so integration tests can serve it on an ephemeral
/// port.
#[must_use]
pub fn router(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/quotes/batch", get(batch_handler))
        .route("/quotes/{symbol}", get(quote_handler))
        .route("/cache/status", get(cache_status_handler))
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Quote Handlers
// =============================================================================

async fn quote_handler(
    State(state): State<Arc<GatewayState>>,
    Path(raw_symbol): Path<String>,
) -> impl IntoResponse {
    let symbol = match Symbol::parse(&raw_symbol) {
        Ok(symbol) => symbol,
        Err(err) => return error_response(&err).into_response(),
    };

    match state.coordinator.get(&symbol).await {
        Ok(quote) => (StatusCode::OK, Json(quote)).into_response(),
        Err(err) => error_response(&err).into_response(),
    }
}

/// Query parameters for the batch endpoint.
#[derive(Debug, Deserialize)]
struct BatchParams {
    symbols: Option<String>,
}

async fn batch_handler(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<BatchParams>,
) -> impl IntoResponse {
    let symbols: Vec<String> = params
        .symbols
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect();

    match state.batch.get_batch(&symbols).await {
        Ok(entries) => {
            let body: Vec<BatchEntryBody> = entries.into_iter().map(Into::into).collect();
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => error_response(&err).into_response(),
    }
}

async fn cache_status_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(state.cache.status(tokio::time::Instant::now()))
}

// =============================================================================
// Health Handlers
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy" or "degraded".
    pub status: HealthStatus,
    /// Gateway version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream provider status.
    pub upstream: UpstreamStatus,
    /// Cache status summary.
    pub cache: CacheSummary,
    /// Push channel status.
    pub push: PushStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Serving, but the upstream provider is not configured.
    Degraded,
}

/// Upstream provider health detail.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamStatus {
    /// Whether an API key is configured.
    pub configured: bool,
    /// Fetches currently in flight.
    pub in_flight: usize,
}

/// Cache health detail.
#[derive(Debug, Clone, Serialize)]
pub struct CacheSummary {
    /// Number of cached symbols.
    pub symbols: usize,
}

/// Push channel health detail.
#[derive(Debug, Clone, Serialize)]
pub struct PushStatus {
    /// Connected WebSocket clients.
    pub clients: usize,
    /// Connections with at least one subscription.
    pub subscribed_connections: usize,
    /// Symbols with at least one subscriber.
    pub subscribed_symbols: usize,
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    (StatusCode::OK, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    // The gateway serves cached data and classified errors even without
    // an upstream key, so it is ready as soon as it is listening.
    let _ = state;
    (StatusCode::OK, "READY")
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &GatewayState) -> HealthResponse {
    let subscription_stats = state.registry.stats();
    let status = if state.upstream_configured {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        upstream: UpstreamStatus {
            configured: state.upstream_configured,
            in_flight: state.coordinator.in_flight_count(),
        },
        cache: CacheSummary {
            symbols: state.cache.len(),
        },
        push: PushStatus {
            clients: state.ws_clients.load(std::sync::atomic::Ordering::Relaxed),
            subscribed_connections: subscription_stats.connection_count,
            subscribed_symbols: subscription_stats.symbol_count,
        },
    }
}

// =============================================================================
// Error Mapping
// =============================================================================

/// JSON error envelope returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// The error detail.
    pub error: ErrorDetail,
}

/// Stable error code plus human-readable message.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Provider-suggested retry delay, present on `rate_limited` only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl From<&QuoteError> for ErrorDetail {
    fn from(err: &QuoteError) -> Self {
        let retry_after_secs = match err {
            QuoteError::UpstreamRateLimited {
                retry_after: Some(delay),
            } => Some(delay.as_secs()),
            _ => None,
        };

        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            retry_after_secs,
        }
    }
}

/// Map an error onto its HTTP status code.
const fn status_for(err: &QuoteError) -> StatusCode {
    match err {
        QuoteError::NotFound(_) => StatusCode::NOT_FOUND,
        QuoteError::UpstreamRateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        QuoteError::Timeout => StatusCode::REQUEST_TIMEOUT,
        QuoteError::Validation(_) => StatusCode::BAD_REQUEST,
        QuoteError::NotConfigured | QuoteError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &QuoteError) -> (StatusCode, Json<ErrorBody>) {
    (
        status_for(err),
        Json(ErrorBody {
            error: ErrorDetail::from(err),
        }),
    )
}

// =============================================================================
// Batch Response Body
// =============================================================================

/// One per-symbol entry in a batch response.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchEntryBody {
    /// The requested symbol.
    pub symbol: String,
    /// The quote, on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote: Option<CachedQuote>,
    /// The per-symbol error, on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl From<BatchEntry> for BatchEntryBody {
    fn from(entry: BatchEntry) -> Self {
        match entry.result {
            Ok(quote) => Self {
                symbol: entry.symbol,
                quote: Some(quote),
                error: None,
            },
            Err(err) => Self {
                symbol: entry.symbol,
                quote: None,
                error: Some(ErrorDetail::from(&err)),
            },
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Gateway server errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

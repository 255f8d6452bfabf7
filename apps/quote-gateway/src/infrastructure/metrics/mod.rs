//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Cache**: hit/miss counts, cached symbol gauge
//! - **Upstream**: request counts by result, request latency
//! - **Coalescing**: callers folded onto an existing in-flight fetch
//! - **Push channel**: connected clients, published quote counts
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the gateway HTTP port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            #[allow(clippy::expect_used)]
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Cache counters
    describe_counter!(
        "quote_gateway_cache_hits_total",
        "Quote requests answered from a fresh cache entry"
    );
    describe_counter!(
        "quote_gateway_cache_misses_total",
        "Quote requests that found no fresh cache entry"
    );
    describe_gauge!(
        "quote_gateway_cached_symbols",
        "Number of symbols currently held in the cache"
    );

    // Coalescing counter
    describe_counter!(
        "quote_gateway_coalesced_waiters_total",
        "Callers that joined an already in-flight fetch"
    );

    // Upstream counters and latency
    describe_counter!(
        "quote_gateway_upstream_requests_total",
        "Upstream fetches by classified result"
    );
    describe_histogram!(
        "quote_gateway_upstream_request_seconds",
        "Upstream fetch latency"
    );

    // Push channel
    describe_counter!(
        "quote_gateway_quotes_published_total",
        "Quotes committed and handed to the broadcaster"
    );
    describe_counter!(
        "quote_gateway_push_lagged_total",
        "Push-channel receivers that lagged and dropped updates"
    );
    describe_gauge!(
        "quote_gateway_ws_clients",
        "Connected push-channel clients"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a quote request answered from cache.
pub fn record_cache_hit() {
    counter!("quote_gateway_cache_hits_total").increment(1);
}

/// Record a quote request that missed the cache.
pub fn record_cache_miss() {
    counter!("quote_gateway_cache_misses_total").increment(1);
}

/// Update the cached symbol count.
pub fn set_cached_symbols(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("quote_gateway_cached_symbols").set(count as f64);
}

/// Record a caller coalesced onto an in-flight fetch.
pub fn record_coalesced_waiter() {
    counter!("quote_gateway_coalesced_waiters_total").increment(1);
}

/// Record a completed upstream fetch by classified result
/// (`ok`, `not_found`, `rate_limited`, `timeout`, ...).
pub fn record_upstream_result(result: &'static str) {
    counter!(
        "quote_gateway_upstream_requests_total",
        "result" => result
    )
    .increment(1);
}

/// Record upstream fetch latency.
pub fn record_upstream_duration(duration: Duration) {
    histogram!("quote_gateway_upstream_request_seconds").record(duration.as_secs_f64());
}

/// Record quotes handed to the broadcaster.
pub fn record_quotes_published(count: u64) {
    counter!("quote_gateway_quotes_published_total").increment(count);
}

/// Record a push-channel receiver lagging.
pub fn record_push_lagged() {
    counter!("quote_gateway_push_lagged_total").increment(1);
}

/// Update the connected push-channel client count.
pub fn set_ws_clients(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("quote_gateway_ws_clients").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================

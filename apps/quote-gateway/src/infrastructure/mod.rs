//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Alpha Vantage upstream quote client.
pub mod alphavantage;

/// Upstream call pacing.
pub mod ratelimit;

/// Broadcast channel adapter for quote fan-out.
pub mod broadcast;

/// HTTP server: REST API, push channel, health, metrics.
pub mod http;

/// Configuration loading.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;

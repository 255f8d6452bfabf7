#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Quote Gateway - Real-Time Quote Distribution Core
//!
//! An HTTP/WebSocket service that fetches stock quotes from a
//! rate-limited upstream provider, caches them with a TTL, coalesces
//! concurrent requests for the same symbol into a single upstream call,
//! and fans out every fresh quote to subscribed clients.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Core quote types and state
//!   - `quote`: Symbol, quote snapshot, error taxonomy
//!   - `cache`: TTL cache with start-ordered commits
//!   - `subscription`: Subscriber interest tracking
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Interfaces for the upstream fetcher and quote publisher
//!   - `services`: Fetch coalescing, batch planning
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `alphavantage`: Rate-limited upstream HTTP client
//!   - `ratelimit`: Minimum-interval call pacing
//!   - `broadcast`: Channel-based quote distribution
//!   - `http`: REST API, WebSocket push channel, health, metrics
//!   - `config`: Configuration loading
//!
//! # Data Flow
//!
//! ```text
//! REST caller ──► BatchPlanner ──► FetchCoordinator ──► QuoteCache (hit)
//!                                        │
//!                                        │ miss: at most one fetch per symbol
//!                                        ▼
//!                      RateLimiter ──► AlphaVantageClient
//!                                        │
//!                                        │ commit (start-ordered)
//!                                        ▼
//!                       QuoteCache ──► BroadcastHub ──► WS client 1..N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core quote types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::cache::{CacheEntry, CacheStatus, QuoteCache};
pub use domain::quote::{CachedQuote, QuoteError, Symbol};
pub use domain::subscription::{ConnectionId, SubscriptionRegistry, SubscriptionStats};

// Application services and ports
pub use application::ports::{QuoteFetcher, QuotePublisher};
pub use application::services::batch::{BatchEntry, BatchPlanner};
pub use application::services::coordinator::FetchCoordinator;

// Infrastructure config
pub use infrastructure::config::{ApiKey, GatewayConfig};

// Upstream client and pacing
pub use infrastructure::alphavantage::AlphaVantageClient;
pub use infrastructure::ratelimit::RateLimiter;

// Broadcast hub (for integration tests)
pub use infrastructure::broadcast::{QuoteBroadcastHub, QuoteUpdate, SharedQuoteBroadcastHub};

// HTTP server (for integration tests)
pub use infrastructure::http::{ApiServer, ApiServerError, BatchEntryBody, ErrorBody, GatewayState, router};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};

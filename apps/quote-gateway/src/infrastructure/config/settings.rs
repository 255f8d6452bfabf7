//! Gateway Configuration Settings
//!
//! Configuration types for the quote gateway, loaded from environment
//! variables. A missing upstream API key is deliberately not a startup
//! error: the gateway boots and answers every quote request with a
//! `not_configured` error instead of crashing.

use std::time::Duration;

// =============================================================================
// Credentials
// =============================================================================

/// Upstream provider API key.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a raw key. Returns `None` for empty input so a blank
    /// environment variable behaves like an absent one.
    #[must_use]
    pub fn new(raw: String) -> Option<Self> {
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// Get the raw key for use in a request.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ApiKey").field(&"[REDACTED]").finish()
    }
}

// =============================================================================
// Settings Groups
// =============================================================================

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Port serving REST, the WebSocket push channel, health, and metrics.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: 3001 }
    }
}

/// Quote cache settings.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// How long a fetched quote stays servable.
    pub ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
        }
    }
}

/// Upstream provider settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Minimum spacing between outbound provider calls.
    pub min_interval: Duration,
    /// Per-fetch request deadline.
    pub fetch_timeout: Duration,
    /// Serve the last cached snapshot when a refresh fails transiently.
    pub serve_stale_on_error: bool,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            // Alpha Vantage free tier: 5 calls per minute
            min_interval: Duration::from_millis(12_000),
            fetch_timeout: Duration::from_secs(10),
            serve_stale_on_error: false,
        }
    }
}

/// Batch endpoint settings.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Maximum symbols per batch request.
    pub limit: usize,
    /// Delay between upstream-bound misses within one batch.
    pub stagger: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            limit: 20,
            stagger: Duration::from_millis(250),
        }
    }
}

/// Push channel settings.
#[derive(Debug, Clone)]
pub struct PushSettings {
    /// Broadcast buffer per subscriber before it lags.
    pub broadcast_capacity: usize,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            broadcast_capacity: 1_024,
        }
    }
}

// =============================================================================
// Gateway Configuration
// =============================================================================

/// Complete gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Upstream API key, if configured.
    pub api_key: Option<ApiKey>,
    /// HTTP server settings.
    pub server: ServerSettings,
    /// Quote cache settings.
    pub cache: CacheSettings,
    /// Upstream provider settings.
    pub upstream: UpstreamSettings,
    /// Batch endpoint settings.
    pub batch: BatchSettings,
    /// Push channel settings.
    pub push: PushSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            server: ServerSettings::default(),
            cache: CacheSettings::default(),
            upstream: UpstreamSettings::default(),
            batch: BatchSettings::default(),
            push: PushSettings::default(),
        }
    }
}

impl GatewayConfig {
    /// Build configuration from environment variables.
    ///
    /// Unset or unparseable values fall back to their defaults; only the
    /// API key is semantically optional.
    #[must_use]
    pub fn from_env() -> Self {
        let api_key = std::env::var("ALPHAVANTAGE_API_KEY")
            .ok()
            .and_then(ApiKey::new);

        let server = ServerSettings {
            port: parse_env_u16("QUOTE_GATEWAY_PORT", ServerSettings::default().port),
        };

        let cache = CacheSettings {
            ttl: parse_env_duration_secs(
                "QUOTE_GATEWAY_CACHE_TTL_SECS",
                CacheSettings::default().ttl,
            ),
        };

        let upstream = UpstreamSettings {
            min_interval: parse_env_duration_millis(
                "QUOTE_GATEWAY_MIN_INTERVAL_MS",
                UpstreamSettings::default().min_interval,
            ),
            fetch_timeout: parse_env_duration_secs(
                "QUOTE_GATEWAY_FETCH_TIMEOUT_SECS",
                UpstreamSettings::default().fetch_timeout,
            ),
            serve_stale_on_error: parse_env_bool(
                "QUOTE_GATEWAY_SERVE_STALE_ON_ERROR",
                UpstreamSettings::default().serve_stale_on_error,
            ),
        };

        let batch = BatchSettings {
            limit: parse_env_usize("QUOTE_GATEWAY_BATCH_LIMIT", BatchSettings::default().limit),
            stagger: parse_env_duration_millis(
                "QUOTE_GATEWAY_BATCH_STAGGER_MS",
                BatchSettings::default().stagger,
            ),
        };

        let push = PushSettings {
            broadcast_capacity: parse_env_usize(
                "QUOTE_GATEWAY_BROADCAST_CAPACITY",
                PushSettings::default().broadcast_capacity,
            ),
        };

        Self {
            api_key,
            server,
            cache,
            upstream,
            batch,
            push,
        }
    }

    /// Whether the upstream provider can be called at all.
    #[must_use]
    pub const fn is_upstream_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map_or(default, |v| {
            matches!(v.to_lowercase().as_str(), "1" | "true" | "yes")
        })
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_rejects_blank_values() {
        assert!(ApiKey::new(String::new()).is_none());
        assert!(ApiKey::new("   ".to_string()).is_none());
        assert!(ApiKey::new("demo".to_string()).is_some());
    }

    #[test]
    fn api_key_redacted_debug() {
        let key = ApiKey::new("super-secret".to_string()).unwrap();
        let debug = format!("{key:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn defaults_match_provider_budget() {
        let config = GatewayConfig::default();

        assert_eq!(config.server.port, 3001);
        assert_eq!(config.cache.ttl, Duration::from_secs(300));
        assert_eq!(config.upstream.min_interval, Duration::from_millis(12_000));
        assert_eq!(config.upstream.fetch_timeout, Duration::from_secs(10));
        assert!(!config.upstream.serve_stale_on_error);
        assert_eq!(config.batch.limit, 20);
        assert_eq!(config.batch.stagger, Duration::from_millis(250));
        assert_eq!(config.push.broadcast_capacity, 1_024);
        assert!(!config.is_upstream_configured());
    }
}

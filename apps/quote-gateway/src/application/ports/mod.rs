//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`QuoteFetcher`]: one quote fetch against the upstream provider
//! - [`QuotePublisher`]: fan-out of committed quotes to subscribers

use async_trait::async_trait;

use crate::domain::quote::{CachedQuote, QuoteError, Symbol};

/// Performs one quote fetch for one symbol against the external provider.
///
/// Implementations are responsible for local pacing (rate limiting), the
/// bounded request timeout, and error classification. They must NOT write
/// to the cache: the fetch coordinator is the single cache writer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteFetcher: Send + Sync {
    /// Fetch a fresh snapshot for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns a classified [`QuoteError`]: `NotConfigured`, `NotFound`,
    /// `UpstreamRateLimited`, `Timeout`, or `Upstream`.
    async fn fetch(&self, symbol: &Symbol) -> Result<CachedQuote, QuoteError>;
}

/// Delivers a committed quote to every interested subscriber.
///
/// Delivery is best-effort and non-blocking: a slow or disconnected
/// subscriber must never delay the publisher.
#[cfg_attr(test, mockall::automock)]
pub trait QuotePublisher: Send + Sync {
    /// Publish a quote; returns the number of receivers it reached.
    fn publish(&self, quote: &CachedQuote) -> usize;
}

//! Batch Planning
//!
//! Splits a batch quote request into cache hits (served instantly) and a
//! bounded, staggered sequence of coordinator calls for misses.
//!
//! # Design
//!
//! - Input is validated before any upstream work: empty and over-limit
//!   batches are rejected wholesale.
//! - Per-symbol failures are isolated. Every requested symbol produces
//!   exactly one entry in the result, in input order; one symbol's
//!   failure never aborts the rest of the batch.
//! - Upstream-bound misses are resolved sequentially with a small stagger
//!   delay. The rate limiter already serializes upstream calls; the
//!   stagger keeps a batch from presenting as a burst.

use std::sync::Arc;

use tokio::time::{Duration, Instant};

use crate::application::services::coordinator::FetchCoordinator;
use crate::domain::cache::QuoteCache;
use crate::domain::quote::{CachedQuote, QuoteError, Symbol};

// =============================================================================
// Batch Results
// =============================================================================

/// The outcome for one requested symbol within a batch.
#[derive(Debug, Clone)]
pub struct BatchEntry {
    /// The symbol as requested (normalized when parseable).
    pub symbol: String,
    /// Quote or the classified per-symbol error.
    pub result: Result<CachedQuote, QuoteError>,
}

// =============================================================================
// Batch Planner
// =============================================================================

/// Resolves a batch of symbols through the cache and fetch coordinator.
#[derive(Debug)]
pub struct BatchPlanner {
    coordinator: Arc<FetchCoordinator>,
    cache: Arc<QuoteCache>,
    limit: usize,
    stagger: Duration,
}

impl BatchPlanner {
    /// Create a planner that rejects batches larger than `limit` and
    /// spaces upstream-bound misses by `stagger`.
    #[must_use]
    pub const fn new(
        coordinator: Arc<FetchCoordinator>,
        cache: Arc<QuoteCache>,
        limit: usize,
        stagger: Duration,
    ) -> Self {
        Self {
            coordinator,
            cache,
            limit,
            stagger,
        }
    }

    /// The configured batch size limit.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Resolve a batch of raw symbol strings.
    ///
    /// Returns one [`BatchEntry`] per input, in input order.
    ///
    /// # Errors
    ///
    /// Returns [`QuoteError::Validation`] when the batch as a whole is
    /// invalid (empty, or more symbols than the configured limit) —
    /// before any upstream call is attempted.
    pub async fn get_batch(&self, symbols: &[String]) -> Result<Vec<BatchEntry>, QuoteError> {
        if symbols.is_empty() {
            return Err(QuoteError::Validation("no symbols provided".to_string()));
        }

        if symbols.len() > self.limit {
            return Err(QuoteError::Validation(format!(
                "batch of {} symbols exceeds the limit of {}",
                symbols.len(),
                self.limit
            )));
        }

        let mut entries = Vec::with_capacity(symbols.len());
        let mut upstream_bound = 0usize;

        for raw in symbols {
            let symbol = match Symbol::parse(raw) {
                Ok(symbol) => symbol,
                Err(err) => {
                    entries.push(BatchEntry {
                        symbol: raw.trim().to_string(),
                        result: Err(err),
                    });
                    continue;
                }
            };

            if let Some(quote) = self.cache.fresh(&symbol, Instant::now()) {
                entries.push(BatchEntry {
                    symbol: symbol.to_string(),
                    result: Ok(quote),
                });
                continue;
            }

            if upstream_bound > 0 && !self.stagger.is_zero() {
                tokio::time::sleep(self.stagger).await;
            }
            upstream_bound += 1;

            let result = self.coordinator.get(&symbol).await;
            entries.push(BatchEntry {
                symbol: symbol.to_string(),
                result,
            });
        }

        tracing::debug!(
            requested = symbols.len(),
            upstream_bound,
            "batch resolved"
        );

        Ok(entries)
    }
}

// =============================================================================
// Tests
// =============================================================================

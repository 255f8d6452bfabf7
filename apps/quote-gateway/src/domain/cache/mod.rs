//! Quote Cache
//!
//! Keyed store of `symbol -> CacheEntry` with per-entry freshness. The
//! cache is the single source of truth for "is this symbol fresh enough
//! to serve without a new fetch".
//!
//! # Design
//!
//! - Freshness is a pure function of the current instant vs the entry's
//!   deadline; there is no background eviction. Stale entries are simply
//!   overwritten by the next successful fetch, which bounds memory by the
//!   number of distinct symbols ever requested (tens to low hundreds in
//!   this domain).
//! - Writes carry the instant their fetch *started* and are rejected when
//!   a fetch that started later has already committed. This is what keeps
//!   a slow, stale fetch from clobbering a fresher concurrent one.
//! - The lock is held only for the O(1) map operation, never across a
//!   network call.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::Instant;

use crate::domain::quote::{CachedQuote, Symbol};

// =============================================================================
// Cache Entry
// =============================================================================

/// A cached quote together with its freshness bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached snapshot.
    pub quote: CachedQuote,
    /// Instant the producing fetch started (ordering key).
    started_at: Instant,
    /// Instant this entry stops being servable.
    expires_at: Instant,
}

impl CacheEntry {
    /// Whether this entry may still be served at `now`.
    #[must_use]
    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    /// Age of the entry at `now`.
    #[must_use]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    /// Instant the producing fetch started.
    #[must_use]
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }
}

// =============================================================================
// Quote Cache
// =============================================================================

/// Thread-safe TTL cache of quote snapshots.
#[derive(Debug)]
pub struct QuoteCache {
    ttl: Duration,
    entries: RwLock<HashMap<Symbol, CacheEntry>>,
}

impl QuoteCache {
    /// Create a cache where entries stay fresh for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The configured time-to-live.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Read the entry for a symbol, fresh or stale.
    #[must_use]
    pub fn read(&self, symbol: &Symbol) -> Option<CacheEntry> {
        self.entries.read().get(symbol).cloned()
    }

    /// Read the quote for a symbol only if it is fresh at `now`.
    #[must_use]
    pub fn fresh(&self, symbol: &Symbol, now: Instant) -> Option<CachedQuote> {
        self.entries
            .read()
            .get(symbol)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.quote.clone())
    }

    /// Commit a snapshot produced by a fetch that started at `started_at`.
    ///
    /// Returns `false` (and leaves the cache untouched) when an entry from
    /// a later-started fetch is already committed; result delivery must
    /// never regress to an older snapshot.
    pub fn write(&self, quote: CachedQuote, started_at: Instant) -> bool {
        let mut entries = self.entries.write();

        if let Some(existing) = entries.get(&quote.symbol)
            && existing.started_at > started_at
        {
            return false;
        }

        let symbol = quote.symbol.clone();
        entries.insert(
            symbol,
            CacheEntry {
                quote,
                started_at,
                expires_at: started_at + self.ttl,
            },
        );
        true
    }

    /// Number of cached symbols (fresh and stale).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Diagnostic snapshot of every entry, sorted by symbol.
    #[must_use]
    pub fn status(&self, now: Instant) -> CacheStatus {
        let entries = self.entries.read();

        let mut statuses: Vec<_> = entries
            .values()
            .map(|entry| CacheEntryStatus {
                symbol: entry.quote.symbol.clone(),
                age_secs: entry.age(now).as_secs(),
                stale: !entry.is_fresh(now),
            })
            .collect();
        statuses.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        CacheStatus {
            count: statuses.len(),
            entries: statuses,
        }
    }
}

// =============================================================================
// Status Reporting
// =============================================================================

/// Diagnostic view of the cache for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    /// Number of cached symbols.
    pub count: usize,
    /// Per-entry detail, sorted by symbol.
    pub entries: Vec<CacheEntryStatus>,
}

/// Diagnostic view of a single cache entry.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryStatus {
    /// The cached symbol.
    pub symbol: Symbol,
    /// Seconds since the entry was fetched.
    pub age_secs: u64,
    /// Whether the entry has aged past the TTL.
    pub stale: bool,
}

// =============================================================================
// Tests
// =============================================================================

//! Fetch Coordination
//!
//! The core algorithm of the gateway: given a request for a symbol,
//! serve the cached value if fresh, otherwise ensure **exactly one**
//! in-flight upstream fetch for that symbol no matter how many callers
//! ask concurrently, and let all of them observe the same result.
//!
//! # Design
//!
//! - An in-flight registry maps each symbol to the fetch currently
//!   executing for it. The first caller to miss registers the fetch and
//!   spawns it as a detached task; later callers subscribe to its result
//!   channel. A caller that abandons its request (client disconnect)
//!   stops waiting without cancelling the fetch other waiters need.
//! - Commits compare fetch start instants: a result from a fetch that
//!   started earlier never overwrites one from a fetch that started
//!   later, and only a still-registered fetch may commit.
//! - A provider `retry-after` hint parks the symbol: until the deadline
//!   elapses, requests fail fast with the remaining delay instead of
//!   burning an upstream call.
//! - The registry lock is held only for map operations, never across the
//!   network call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::application::ports::{QuoteFetcher, QuotePublisher};
use crate::domain::cache::QuoteCache;
use crate::domain::quote::{CachedQuote, QuoteError, Symbol};
use crate::infrastructure::metrics;

// =============================================================================
// In-Flight Registry
// =============================================================================

/// Result shared by every caller coalesced onto one fetch.
type FetchOutcome = Result<CachedQuote, QuoteError>;

/// A fetch currently executing for a symbol.
#[derive(Debug)]
struct InFlightFetch {
    /// Instant the fetch started; the ordering key for commits.
    started_at: Instant,
    /// Wakes every waiter with the eventual outcome.
    tx: broadcast::Sender<FetchOutcome>,
}

/// How a caller participates in a fetch.
enum Role {
    /// First caller in: registered the fetch and must start it.
    Owner {
        started_at: Instant,
        tx: broadcast::Sender<FetchOutcome>,
    },
    /// A fetch is already running: wait for its outcome.
    Waiter(broadcast::Receiver<FetchOutcome>),
}

// =============================================================================
// Fetch Coordinator
// =============================================================================

/// Coalesces concurrent quote requests into at most one upstream fetch
/// per symbol.
pub struct FetchCoordinator {
    inner: Arc<Inner>,
}

/// Shared coordinator state, owned by callers and detached fetch tasks
/// alike.
struct Inner {
    cache: Arc<QuoteCache>,
    fetcher: Arc<dyn QuoteFetcher>,
    publisher: Arc<dyn QuotePublisher>,
    serve_stale_on_error: bool,
    in_flight: Mutex<HashMap<Symbol, InFlightFetch>>,
    retry_after: Mutex<HashMap<Symbol, Instant>>,
}

impl FetchCoordinator {
    /// Create a coordinator over the given cache, fetcher, and publisher.
    ///
    /// `serve_stale_on_error` opts in to answering transient upstream
    /// failures with the last cached snapshot instead of the error.
    #[must_use]
    pub fn new(
        cache: Arc<QuoteCache>,
        fetcher: Arc<dyn QuoteFetcher>,
        publisher: Arc<dyn QuotePublisher>,
        serve_stale_on_error: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                fetcher,
                publisher,
                serve_stale_on_error,
                in_flight: Mutex::new(HashMap::new()),
                retry_after: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Get a quote for `symbol`, from cache or upstream.
    ///
    /// Suspends when another caller's fetch is in flight (bounded by that
    /// fetch's own timeout) or while this caller's own fetch runs.
    ///
    /// # Errors
    ///
    /// Propagates the classified upstream error identically to every
    /// coalesced caller.
    pub async fn get(&self, symbol: &Symbol) -> Result<CachedQuote, QuoteError> {
        let now = Instant::now();

        if let Some(quote) = self.inner.cache.fresh(symbol, now) {
            metrics::record_cache_hit();
            return Ok(quote);
        }
        metrics::record_cache_miss();

        if let Some(remaining) = self.inner.retry_after_remaining(symbol, now) {
            tracing::debug!(
                symbol = %symbol,
                remaining_secs = remaining.as_secs(),
                "symbol parked by provider retry-after"
            );
            return Err(QuoteError::UpstreamRateLimited {
                retry_after: Some(remaining),
            });
        }

        let mut rx = match self.inner.join_or_register(symbol) {
            Role::Waiter(rx) => {
                metrics::record_coalesced_waiter();
                tracing::debug!(symbol = %symbol, "joining in-flight fetch");
                rx
            }
            Role::Owner { started_at, tx } => {
                let rx = tx.subscribe();
                let inner = Arc::clone(&self.inner);
                let symbol = symbol.clone();
                // Detached so waiters still get a result if this caller
                // goes away mid-fetch.
                tokio::spawn(async move {
                    let outcome = inner.run_fetch(&symbol, started_at).await;
                    let _ = tx.send(outcome);
                });
                rx
            }
        };

        match rx.recv().await {
            Ok(outcome) => outcome,
            Err(_) => Err(QuoteError::Upstream(
                "in-flight fetch was abandoned".to_string(),
            )),
        }
    }

    /// Number of fetches currently in flight (diagnostics).
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().len()
    }
}

impl Inner {
    /// Join an existing fetch for `symbol` or register a new one.
    ///
    /// Re-checks the cache under the registry lock: a fetch that committed
    /// between the caller's freshness check and here must not trigger a
    /// redundant upstream call.
    fn join_or_register(&self, symbol: &Symbol) -> Role {
        let mut in_flight = self.in_flight.lock();

        if let Some(existing) = in_flight.get(symbol) {
            return Role::Waiter(existing.tx.subscribe());
        }

        if let Some(quote) = self.cache.fresh(symbol, Instant::now()) {
            let (tx, rx) = broadcast::channel(1);
            // A fetch committed while we were between checks; hand the
            // fresh value straight back through the waiter path.
            let _ = tx.send(Ok(quote));
            return Role::Waiter(rx);
        }

        let (tx, _rx) = broadcast::channel(1);
        let started_at = Instant::now();
        in_flight.insert(
            symbol.clone(),
            InFlightFetch {
                started_at,
                tx: tx.clone(),
            },
        );

        Role::Owner { started_at, tx }
    }

    /// Drive one upstream fetch to completion and resolve its outcome.
    async fn run_fetch(&self, symbol: &Symbol, started_at: Instant) -> FetchOutcome {
        let result = self.fetcher.fetch(symbol).await;
        metrics::record_upstream_duration(started_at.elapsed());

        match result {
            Ok(quote) => {
                metrics::record_upstream_result("ok");

                if self.commit(symbol, quote.clone(), started_at) {
                    let delivered = self.publisher.publish(&quote);
                    metrics::record_quotes_published(1);
                    metrics::set_cached_symbols(self.cache.len());
                    tracing::info!(
                        symbol = %symbol,
                        price = %quote.price,
                        subscribers = delivered,
                        "quote committed"
                    );
                } else {
                    tracing::warn!(
                        symbol = %symbol,
                        "discarding fetch result superseded by a later fetch"
                    );
                }

                Ok(quote)
            }
            Err(err) => {
                self.deregister(symbol, started_at);
                metrics::record_upstream_result(err.code());

                if let QuoteError::UpstreamRateLimited {
                    retry_after: Some(delay),
                } = &err
                {
                    self.retry_after
                        .lock()
                        .insert(symbol.clone(), Instant::now() + *delay);
                }

                if self.serve_stale_on_error
                    && err.is_transient()
                    && let Some(entry) = self.cache.read(symbol)
                {
                    tracing::warn!(
                        symbol = %symbol,
                        error = %err,
                        "serving stale quote after transient upstream failure"
                    );
                    return Ok(entry.quote);
                }

                tracing::warn!(symbol = %symbol, error = %err, "upstream fetch failed");
                Err(err)
            }
        }
    }

    /// Commit a successful fetch: deregister it and write the cache,
    /// subject to the start-ordering rule.
    fn commit(&self, symbol: &Symbol, quote: CachedQuote, started_at: Instant) -> bool {
        let mut in_flight = self.in_flight.lock();

        let still_registered = in_flight
            .get(symbol)
            .is_some_and(|fetch| fetch.started_at == started_at);
        if still_registered {
            in_flight.remove(symbol);
        }

        still_registered && self.cache.write(quote, started_at)
    }

    /// Remove a failed fetch's registration without touching the cache.
    fn deregister(&self, symbol: &Symbol, started_at: Instant) {
        let mut in_flight = self.in_flight.lock();
        if in_flight
            .get(symbol)
            .is_some_and(|fetch| fetch.started_at == started_at)
        {
            in_flight.remove(symbol);
        }
    }

    /// Remaining provider-imposed wait for `symbol`, pruning elapsed
    /// deadlines.
    fn retry_after_remaining(&self, symbol: &Symbol, now: Instant) -> Option<Duration> {
        let mut parked = self.retry_after.lock();
        match parked.get(symbol) {
            Some(deadline) if *deadline > now => Some(*deadline - now),
            Some(_) => {
                parked.remove(symbol);
                None
            }
            None => None,
        }
    }
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("serve_stale_on_error", &self.inner.serve_stale_on_error)
            .field("in_flight", &self.in_flight_count())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

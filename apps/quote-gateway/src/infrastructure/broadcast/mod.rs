//! Quote Broadcast Adapter
//!
//! Implements quote fan-out using a tokio broadcast channel. Every quote
//! the coordinator commits is sent once; each push-channel connection
//! holds its own receiver and filters by its interest set, so a slow or
//! dead subscriber lags on its own buffer without delaying anyone else.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::application::ports::QuotePublisher;
use crate::domain::quote::CachedQuote;

// =============================================================================
// Broadcast Messages
// =============================================================================

/// A committed quote on its way to subscribers.
#[derive(Debug, Clone)]
pub struct QuoteUpdate {
    /// The freshly committed snapshot.
    pub quote: CachedQuote,
}

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Central fan-out channel for committed quotes.
///
/// # Example
///
/// ```rust
/// use quote_gateway::infrastructure::broadcast::QuoteBroadcastHub;
///
/// let hub = QuoteBroadcastHub::new(1024);
///
/// // Each connection takes its own receiver
/// let mut rx = hub.updates_rx();
///
/// // In another task, committed quotes are published
/// // hub.publish(&quote);
/// ```
#[derive(Debug)]
pub struct QuoteBroadcastHub {
    updates_tx: broadcast::Sender<QuoteUpdate>,
}

impl QuoteBroadcastHub {
    /// Create a hub whose channel buffers up to `capacity` updates per
    /// receiver before lagging.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            updates_tx: broadcast::channel(capacity).0,
        }
    }

    /// Get a new receiver for quote updates.
    #[must_use]
    pub fn updates_rx(&self) -> broadcast::Receiver<QuoteUpdate> {
        self.updates_tx.subscribe()
    }

    /// Number of live receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.updates_tx.receiver_count()
    }
}

impl QuotePublisher for QuoteBroadcastHub {
    fn publish(&self, quote: &CachedQuote) -> usize {
        self.updates_tx
            .send(QuoteUpdate {
                quote: quote.clone(),
            })
            .unwrap_or(0)
    }
}

/// Shared hub reference.
pub type SharedQuoteBroadcastHub = Arc<QuoteBroadcastHub>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::quote::Symbol;

    fn make_quote(symbol: &str) -> CachedQuote {
        let price = Decimal::from_str("150.00").unwrap();
        let previous_close = Decimal::from_str("148.00").unwrap();
        let (change, change_percent) = CachedQuote::compute_change(price, previous_close);

        CachedQuote {
            symbol: Symbol::parse(symbol).unwrap(),
            price,
            open: Decimal::from_str("149.00").unwrap(),
            high: Decimal::from_str("151.00").unwrap(),
            low: Decimal::from_str("148.50").unwrap(),
            previous_close,
            volume: 1_000_000,
            change,
            change_percent,
            latest_trading_day: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn publish_with_no_receivers_reaches_nobody() {
        let hub = QuoteBroadcastHub::new(16);

        assert_eq!(hub.publish(&make_quote("AAPL")), 0);
    }

    #[tokio::test]
    async fn publish_reaches_every_receiver() {
        let hub = QuoteBroadcastHub::new(16);
        let mut rx1 = hub.updates_rx();
        let mut rx2 = hub.updates_rx();

        assert_eq!(hub.publish(&make_quote("AAPL")), 2);

        let a = rx1.recv().await.unwrap();
        let b = rx2.recv().await.unwrap();
        assert_eq!(a.quote.symbol.as_str(), "AAPL");
        assert_eq!(b.quote.symbol.as_str(), "AAPL");
    }

    #[test]
    fn receiver_count_tracks_drops() {
        let hub = QuoteBroadcastHub::new(16);
        assert_eq!(hub.receiver_count(), 0);

        let rx = hub.updates_rx();
        assert_eq!(hub.receiver_count(), 1);

        drop(rx);
        assert_eq!(hub.receiver_count(), 0);
    }
}

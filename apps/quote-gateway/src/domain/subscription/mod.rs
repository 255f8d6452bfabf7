//! Subscriber Interest Tracking
//!
//! Domain types for tracking which push-channel connections are interested
//! in which symbols.
//!
//! # Design
//!
//! The registry tracks interest in both directions:
//! - symbol -> set of connections, consulted on every publish
//! - connection -> set of symbols, consulted on disconnect
//!
//! Subscriptions are cumulative: a connection may subscribe to more
//! symbols across multiple calls. Disconnecting removes the connection
//! from every symbol's set, so no publish ever targets a closed channel.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use uuid::Uuid;

use crate::domain::quote::Symbol;

// =============================================================================
// Types
// =============================================================================

/// Opaque identifier for a push-channel connection.
pub type ConnectionId = Uuid;

// =============================================================================
// Interest State
// =============================================================================

/// Bidirectional interest maps, mutated under one lock so the two sides
/// never drift apart.
#[derive(Debug, Default)]
struct InterestState {
    connection_symbols: HashMap<ConnectionId, HashSet<Symbol>>,
    symbol_connections: HashMap<Symbol, HashSet<ConnectionId>>,
}

impl InterestState {
    /// Add interest; returns the symbols newly added for this connection.
    fn subscribe(&mut self, connection: ConnectionId, symbols: &[Symbol]) -> Vec<Symbol> {
        let connection_set = self.connection_symbols.entry(connection).or_default();
        let mut added = Vec::new();

        for symbol in symbols {
            if !connection_set.insert(symbol.clone()) {
                continue;
            }

            self.symbol_connections
                .entry(symbol.clone())
                .or_default()
                .insert(connection);
            added.push(symbol.clone());
        }

        added
    }

    /// Remove interest; returns the symbols actually removed.
    fn unsubscribe(&mut self, connection: ConnectionId, symbols: &[Symbol]) -> Vec<Symbol> {
        let Some(connection_set) = self.connection_symbols.get_mut(&connection) else {
            return vec![];
        };

        let mut removed = Vec::new();

        for symbol in symbols {
            if !connection_set.remove(symbol) {
                continue;
            }

            if let Some(subscribers) = self.symbol_connections.get_mut(symbol) {
                subscribers.remove(&connection);
                if subscribers.is_empty() {
                    self.symbol_connections.remove(symbol);
                }
            }
            removed.push(symbol.clone());
        }

        if connection_set.is_empty() {
            self.connection_symbols.remove(&connection);
        }

        removed
    }

    /// Drop every interest entry for a connection.
    fn disconnect(&mut self, connection: ConnectionId) {
        let Some(symbols) = self.connection_symbols.remove(&connection) else {
            return;
        };

        for symbol in &symbols {
            if let Some(subscribers) = self.symbol_connections.get_mut(symbol) {
                subscribers.remove(&connection);
                if subscribers.is_empty() {
                    self.symbol_connections.remove(symbol);
                }
            }
        }
    }

    fn is_subscribed(&self, connection: ConnectionId, symbol: &Symbol) -> bool {
        self.connection_symbols
            .get(&connection)
            .is_some_and(|set| set.contains(symbol))
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe registry of push-channel interest sets.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: RwLock<InterestState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `symbols` for a connection (cumulative).
    ///
    /// Returns the symbols that were newly added for this connection.
    pub fn subscribe(&self, connection: ConnectionId, symbols: &[Symbol]) -> Vec<Symbol> {
        self.state.write().subscribe(connection, symbols)
    }

    /// Remove interest in `symbols` for a connection.
    ///
    /// Returns the symbols that were actually removed.
    pub fn unsubscribe(&self, connection: ConnectionId, symbols: &[Symbol]) -> Vec<Symbol> {
        self.state.write().unsubscribe(connection, symbols)
    }

    /// Remove every interest entry for a disconnected connection.
    pub fn disconnect(&self, connection: ConnectionId) {
        self.state.write().disconnect(connection);
    }

    /// Whether a connection is currently interested in a symbol.
    #[must_use]
    pub fn is_subscribed(&self, connection: ConnectionId, symbol: &Symbol) -> bool {
        self.state.read().is_subscribed(connection, symbol)
    }

    /// Number of connections currently interested in a symbol.
    #[must_use]
    pub fn subscriber_count(&self, symbol: &Symbol) -> usize {
        self.state
            .read()
            .symbol_connections
            .get(symbol)
            .map_or(0, HashSet::len)
    }

    /// The symbols a connection is currently interested in, sorted.
    #[must_use]
    pub fn symbols_for(&self, connection: ConnectionId) -> Vec<Symbol> {
        let state = self.state.read();
        let mut symbols: Vec<_> = state
            .connection_symbols
            .get(&connection)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        symbols.sort();
        symbols
    }

    /// Aggregate statistics over all interest sets.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let state = self.state.read();
        SubscriptionStats {
            connection_count: state.connection_symbols.len(),
            symbol_count: state.symbol_connections.len(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Aggregate view of the registry for health reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Connections with at least one subscription.
    pub connection_count: usize,
    /// Symbols with at least one subscriber.
    pub symbol_count: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    #[test]
    fn subscribe_registers_interest() {
        let registry = SubscriptionRegistry::new();
        let conn = Uuid::new_v4();

        let added = registry.subscribe(conn, &[sym("AAPL")]);

        assert_eq!(added, vec![sym("AAPL")]);
        assert!(registry.is_subscribed(conn, &sym("AAPL")));
        assert!(!registry.is_subscribed(conn, &sym("GOOGL")));
    }

    #[test]
    fn subscribe_is_cumulative_across_calls() {
        let registry = SubscriptionRegistry::new();
        let conn = Uuid::new_v4();

        registry.subscribe(conn, &[sym("AAPL")]);
        registry.subscribe(conn, &[sym("MSFT"), sym("GOOGL")]);

        assert_eq!(
            registry.symbols_for(conn),
            vec![sym("AAPL"), sym("GOOGL"), sym("MSFT")]
        );
    }

    #[test]
    fn duplicate_subscribe_adds_nothing() {
        let registry = SubscriptionRegistry::new();
        let conn = Uuid::new_v4();

        registry.subscribe(conn, &[sym("AAPL")]);
        let added = registry.subscribe(conn, &[sym("AAPL")]);

        assert!(added.is_empty());
        assert_eq!(registry.subscriber_count(&sym("AAPL")), 1);
    }

    #[test]
    fn unsubscribe_removes_only_named_symbols() {
        let registry = SubscriptionRegistry::new();
        let conn = Uuid::new_v4();

        registry.subscribe(conn, &[sym("AAPL"), sym("MSFT")]);
        let removed = registry.unsubscribe(conn, &[sym("AAPL")]);

        assert_eq!(removed, vec![sym("AAPL")]);
        assert!(!registry.is_subscribed(conn, &sym("AAPL")));
        assert!(registry.is_subscribed(conn, &sym("MSFT")));
    }

    #[test]
    fn unsubscribe_unknown_connection_is_noop() {
        let registry = SubscriptionRegistry::new();

        let removed = registry.unsubscribe(Uuid::new_v4(), &[sym("AAPL")]);

        assert!(removed.is_empty());
    }

    #[test]
    fn disconnect_cleans_every_symbol_set() {
        let registry = SubscriptionRegistry::new();
        let conn = Uuid::new_v4();

        registry.subscribe(conn, &[sym("AAPL"), sym("MSFT"), sym("GOOGL")]);
        registry.disconnect(conn);

        assert_eq!(registry.subscriber_count(&sym("AAPL")), 0);
        assert_eq!(registry.subscriber_count(&sym("MSFT")), 0);
        assert_eq!(registry.subscriber_count(&sym("GOOGL")), 0);
        assert_eq!(registry.stats(), SubscriptionStats::default());
    }

    #[test]
    fn disconnect_preserves_other_connections() {
        let registry = SubscriptionRegistry::new();
        let conn_a = Uuid::new_v4();
        let conn_b = Uuid::new_v4();

        registry.subscribe(conn_a, &[sym("AAPL")]);
        registry.subscribe(conn_b, &[sym("AAPL")]);
        registry.disconnect(conn_a);

        assert!(registry.is_subscribed(conn_b, &sym("AAPL")));
        assert_eq!(registry.subscriber_count(&sym("AAPL")), 1);
    }

    #[test]
    fn stats_count_connections_and_symbols() {
        let registry = SubscriptionRegistry::new();
        let conn_a = Uuid::new_v4();
        let conn_b = Uuid::new_v4();

        registry.subscribe(conn_a, &[sym("AAPL"), sym("MSFT")]);
        registry.subscribe(conn_b, &[sym("AAPL")]);

        let stats = registry.stats();
        assert_eq!(stats.connection_count, 2);
        assert_eq!(stats.symbol_count, 2);
    }

    #[test]
    fn thread_safety_concurrent_subscribe_and_disconnect() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(SubscriptionRegistry::new());
        let connections: Vec<_> = (0..10).map(|_| Uuid::new_v4()).collect();

        let mut handles = vec![];
        for (i, conn) in connections.iter().copied().enumerate() {
            let r = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                r.subscribe(conn, &[sym(&format!("SYM{i}")), sym("SHARED")]);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.subscriber_count(&sym("SHARED")), 10);

        let mut handles = vec![];
        for conn in connections.iter().copied() {
            let r = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                r.disconnect(conn);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = registry.stats();
        assert_eq!(stats.connection_count, 0);
        assert_eq!(stats.symbol_count, 0);
    }
}

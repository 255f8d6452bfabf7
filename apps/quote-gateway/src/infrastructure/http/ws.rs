//! WebSocket Push Channel
//!
//! Streams quote updates to connected clients. A client subscribes to
//! symbols with JSON commands; every quote the coordinator commits for a
//! subscribed symbol is pushed as a `quote-update` event.
//!
//! # Protocol
//!
//! Client -> server:
//!
//! ```json
//! {"action": "subscribe", "symbols": ["AAPL", "MSFT"]}
//! {"action": "unsubscribe", "symbols": ["AAPL"]}
//! ```
//!
//! Subscriptions are cumulative across `subscribe` calls.
//!
//! Server -> client:
//!
//! ```json
//! {"event": "subscribed", "symbols": ["AAPL", "MSFT"]}
//! {"event": "unsubscribed", "symbols": ["AAPL"]}
//! {"event": "quote-update", "quote": {...}}
//! {"event": "error", "message": "..."}
//! ```
//!
//! Each connection filters the shared broadcast stream by its own
//! interest set; a connection that falls behind lags on its own buffer
//! and never delays delivery to others. Disconnecting removes every
//! interest entry for the connection.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use super::GatewayState;
use crate::domain::quote::{CachedQuote, Symbol};
use crate::domain::subscription::ConnectionId;
use crate::infrastructure::metrics;

// =============================================================================
// Wire Protocol
// =============================================================================

/// Commands a client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum ClientCommand {
    /// Register interest in symbols (cumulative).
    Subscribe {
        /// Raw symbol strings to add.
        symbols: Vec<String>,
    },
    /// Remove interest in symbols.
    Unsubscribe {
        /// Raw symbol strings to remove.
        symbols: Vec<String>,
    },
}

/// Events the server pushes.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
enum ServerEvent<'a> {
    /// A fresh quote for a subscribed symbol.
    QuoteUpdate {
        /// The committed snapshot.
        quote: &'a CachedQuote,
    },
    /// Acknowledgement carrying the connection's full interest set.
    Subscribed {
        /// Every symbol the connection is now subscribed to.
        symbols: Vec<Symbol>,
    },
    /// Acknowledgement carrying the symbols that were removed.
    Unsubscribed {
        /// Symbols removed by the command.
        symbols: Vec<Symbol>,
    },
    /// The last command could not be honored.
    Error {
        /// What went wrong.
        message: String,
    },
}

// =============================================================================
// Handler
// =============================================================================

/// Upgrade a connection onto the push channel.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    ws.on_upgrade(move |socket| client_session(socket, state))
}

/// Drive one client connection until it closes.
async fn client_session(socket: WebSocket, state: Arc<GatewayState>) {
    let connection: ConnectionId = Uuid::new_v4();
    let clients = state.ws_clients.fetch_add(1, Ordering::Relaxed) + 1;
    metrics::set_ws_clients(clients);
    tracing::info!(connection = %connection, clients, "push channel client connected");

    let mut updates = state.hub.updates_rx();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if handle_command(connection, text.as_str(), &state, &mut sink)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // ping/pong/binary: nothing to do
                Some(Err(e)) => {
                    tracing::debug!(connection = %connection, error = %e, "push channel receive error");
                    break;
                }
            },
            update = updates.recv() => match update {
                Ok(update) => {
                    if state.registry.is_subscribed(connection, &update.quote.symbol)
                        && send_event(&mut sink, &ServerEvent::QuoteUpdate { quote: &update.quote })
                            .await
                            .is_err()
                    {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    metrics::record_push_lagged();
                    tracing::warn!(connection = %connection, skipped, "push channel client lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    state.registry.disconnect(connection);
    let clients = state.ws_clients.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
    metrics::set_ws_clients(clients);
    tracing::info!(connection = %connection, clients, "push channel client disconnected");
}

/// Apply one client command and acknowledge it.
async fn handle_command(
    connection: ConnectionId,
    text: &str,
    state: &GatewayState,
    sink: &mut SplitSink<WebSocket, Message>,
) -> Result<(), axum::Error> {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            return send_event(
                sink,
                &ServerEvent::Error {
                    message: format!("unrecognized message: {e}"),
                },
            )
            .await;
        }
    };

    match command {
        ClientCommand::Subscribe { symbols } => {
            let (parsed, rejected) = partition_symbols(&symbols);

            let added = state.registry.subscribe(connection, &parsed);
            tracing::debug!(
                connection = %connection,
                added = added.len(),
                "push channel subscribe"
            );

            send_event(
                sink,
                &ServerEvent::Subscribed {
                    symbols: state.registry.symbols_for(connection),
                },
            )
            .await?;

            if !rejected.is_empty() {
                send_event(
                    sink,
                    &ServerEvent::Error {
                        message: format!("invalid symbols: {}", rejected.join(", ")),
                    },
                )
                .await?;
            }
        }
        ClientCommand::Unsubscribe { symbols } => {
            let (parsed, _rejected) = partition_symbols(&symbols);

            let removed = state.registry.unsubscribe(connection, &parsed);
            tracing::debug!(
                connection = %connection,
                removed = removed.len(),
                "push channel unsubscribe"
            );

            send_event(sink, &ServerEvent::Unsubscribed { symbols: removed }).await?;
        }
    }

    Ok(())
}

/// Split raw inputs into parseable symbols and rejected strings.
fn partition_symbols(raw: &[String]) -> (Vec<Symbol>, Vec<String>) {
    let mut parsed = Vec::with_capacity(raw.len());
    let mut rejected = Vec::new();

    for input in raw {
        match Symbol::parse(input) {
            Ok(symbol) => parsed.push(symbol),
            Err(_) => rejected.push(input.trim().to_string()),
        }
    }

    (parsed, rejected)
}

/// Serialize and send one event; an error means the socket is gone.
async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent<'_>,
) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(event).map_err(axum::Error::new)?;
    sink.send(Message::Text(payload.into())).await
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_command_parses() {
        let command: ClientCommand =
            serde_json::from_str(r#"{"action":"subscribe","symbols":["AAPL","MSFT"]}"#).unwrap();

        match command {
            ClientCommand::Subscribe { symbols } => {
                assert_eq!(symbols, vec!["AAPL".to_string(), "MSFT".to_string()]);
            }
            ClientCommand::Unsubscribe { .. } => panic!("expected subscribe"),
        }
    }

    #[test]
    fn unknown_action_is_rejected() {
        let result: Result<ClientCommand, _> =
            serde_json::from_str(r#"{"action":"shout","symbols":[]}"#);

        assert!(result.is_err());
    }

    #[test]
    fn events_serialize_with_kebab_case_tags() {
        let subscribed = ServerEvent::Subscribed {
            symbols: vec![Symbol::parse("AAPL").unwrap()],
        };
        let json = serde_json::to_value(&subscribed).unwrap();
        assert_eq!(json["event"], "subscribed");
        assert_eq!(json["symbols"][0], "AAPL");

        let error = ServerEvent::Error {
            message: "nope".to_string(),
        };
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["event"], "error");
    }

    #[test]
    fn partition_keeps_valid_and_reports_invalid() {
        let (parsed, rejected) = partition_symbols(&[
            "aapl".to_string(),
            "NOT OK!".to_string(),
            "MSFT".to_string(),
        ]);

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].as_str(), "AAPL");
        assert_eq!(rejected, vec!["NOT OK!".to_string()]);
    }
}

//! Push Channel Integration Tests
//!
//! Drives the WebSocket surface against a real server on an ephemeral
//! port: subscribe acknowledgements, per-symbol filtering, unsubscribe,
//! disconnect cleanup, and the REST-fetch-to-push pipeline.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use quote_gateway::{
    BatchPlanner, CachedQuote, FetchCoordinator, GatewayState, QuoteBroadcastHub, QuoteCache,
    QuoteError, QuoteFetcher, QuotePublisher, Symbol, SubscriptionRegistry, router,
};

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

// =============================================================================
// Test Harness
// =============================================================================

struct ScriptedFetcher {
    outcomes: HashMap<String, Result<CachedQuote, QuoteError>>,
}

#[async_trait]
impl QuoteFetcher for ScriptedFetcher {
    async fn fetch(&self, symbol: &Symbol) -> Result<CachedQuote, QuoteError> {
        self.outcomes
            .get(symbol.as_str())
            .cloned()
            .unwrap_or_else(|| Err(QuoteError::NotFound(symbol.to_string())))
    }
}

fn make_quote(symbol: &str, price: &str) -> CachedQuote {
    let price = Decimal::from_str(price).unwrap();
    let previous_close = Decimal::from_str("100.00").unwrap();
    let (change, change_percent) = CachedQuote::compute_change(price, previous_close);

    CachedQuote {
        symbol: Symbol::parse(symbol).unwrap(),
        price,
        open: Decimal::from_str("100.50").unwrap(),
        high: Decimal::from_str("103.00").unwrap(),
        low: Decimal::from_str("99.75").unwrap(),
        previous_close,
        volume: 1_000_000,
        change,
        change_percent,
        latest_trading_day: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
        fetched_at: Utc::now(),
    }
}

async fn spawn_gateway(
    outcomes: &[(&str, Result<CachedQuote, QuoteError>)],
) -> (SocketAddr, Arc<GatewayState>) {
    let fetcher = Arc::new(ScriptedFetcher {
        outcomes: outcomes
            .iter()
            .map(|(symbol, outcome)| ((*symbol).to_string(), outcome.clone()))
            .collect(),
    });

    let cache = Arc::new(QuoteCache::new(Duration::from_secs(300)));
    let hub = Arc::new(QuoteBroadcastHub::new(64));
    let registry = Arc::new(SubscriptionRegistry::new());

    let coordinator = Arc::new(FetchCoordinator::new(
        Arc::clone(&cache),
        fetcher,
        Arc::clone(&hub) as _,
        false,
    ));
    let batch = Arc::new(BatchPlanner::new(
        Arc::clone(&coordinator),
        Arc::clone(&cache),
        20,
        Duration::ZERO,
    ));

    let state = Arc::new(GatewayState::new(
        "test-0.0.1".to_string(),
        coordinator,
        batch,
        cache,
        hub,
        registry,
        true,
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let app = router(Arc::clone(&state));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

async fn connect(addr: SocketAddr) -> WsClient {
    let (ws, _response) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    ws
}

async fn send_json(ws: &mut WsClient, payload: &str) {
    ws.send(Message::Text(payload.into())).await.unwrap();
}

async fn next_event(ws: &mut WsClient) -> serde_json::Value {
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for push event")
        .unwrap()
        .unwrap();
    serde_json::from_str(msg.into_text().unwrap().as_str()).unwrap()
}

async fn expect_silence(ws: &mut WsClient, wait: Duration) {
    let outcome = tokio::time::timeout(wait, ws.next()).await;
    assert!(
        outcome.is_err(),
        "expected no push event, got {outcome:?}"
    );
}

// =============================================================================
// Subscription Protocol
// =============================================================================

#[tokio::test]
async fn subscribe_is_acknowledged_with_interest_set() {
    let (addr, state) = spawn_gateway(&[]).await;
    let mut ws = connect(addr).await;

    send_json(&mut ws, r#"{"action":"subscribe","symbols":["msft","AAPL"]}"#).await;

    let ack = next_event(&mut ws).await;
    assert_eq!(ack["event"], "subscribed");
    assert_eq!(ack["symbols"][0], "AAPL");
    assert_eq!(ack["symbols"][1], "MSFT");

    assert_eq!(state.registry.subscriber_count(&Symbol::parse("AAPL").unwrap()), 1);
}

#[tokio::test]
async fn subscribe_is_cumulative_across_messages() {
    let (addr, _state) = spawn_gateway(&[]).await;
    let mut ws = connect(addr).await;

    send_json(&mut ws, r#"{"action":"subscribe","symbols":["AAPL"]}"#).await;
    next_event(&mut ws).await;

    send_json(&mut ws, r#"{"action":"subscribe","symbols":["MSFT"]}"#).await;
    let ack = next_event(&mut ws).await;

    assert_eq!(ack["event"], "subscribed");
    assert_eq!(ack["symbols"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn invalid_symbols_are_reported_not_fatal() {
    let (addr, _state) = spawn_gateway(&[]).await;
    let mut ws = connect(addr).await;

    send_json(
        &mut ws,
        r#"{"action":"subscribe","symbols":["AAPL","NOT OK!"]}"#,
    )
    .await;

    let ack = next_event(&mut ws).await;
    assert_eq!(ack["event"], "subscribed");
    assert_eq!(ack["symbols"].as_array().unwrap().len(), 1);

    let error = next_event(&mut ws).await;
    assert_eq!(error["event"], "error");
    assert!(error["message"].as_str().unwrap().contains("NOT OK!"));
}

#[tokio::test]
async fn malformed_message_yields_error_event() {
    let (addr, _state) = spawn_gateway(&[]).await;
    let mut ws = connect(addr).await;

    send_json(&mut ws, r#"{"action":"shout"}"#).await;

    let error = next_event(&mut ws).await;
    assert_eq!(error["event"], "error");
}

// =============================================================================
// Delivery and Filtering
// =============================================================================

#[tokio::test]
async fn subscriber_receives_only_its_symbols() {
    let (addr, state) = spawn_gateway(&[]).await;
    let mut ws = connect(addr).await;

    send_json(&mut ws, r#"{"action":"subscribe","symbols":["AAPL"]}"#).await;
    next_event(&mut ws).await;

    // A quote for a different symbol must not reach this client
    state.hub.publish(&make_quote("GOOGL", "2800.00"));
    // The subscribed symbol must
    state.hub.publish(&make_quote("AAPL", "150.00"));

    let update = next_event(&mut ws).await;
    assert_eq!(update["event"], "quote-update");
    assert_eq!(update["quote"]["symbol"], "AAPL");
    assert_eq!(update["quote"]["price"], "150.00");

    expect_silence(&mut ws, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn every_subscriber_of_a_symbol_receives_the_update() {
    let (addr, state) = spawn_gateway(&[]).await;
    let mut first = connect(addr).await;
    let mut second = connect(addr).await;

    send_json(&mut first, r#"{"action":"subscribe","symbols":["AAPL"]}"#).await;
    next_event(&mut first).await;
    send_json(&mut second, r#"{"action":"subscribe","symbols":["AAPL"]}"#).await;
    next_event(&mut second).await;

    state.hub.publish(&make_quote("AAPL", "151.00"));

    let a = next_event(&mut first).await;
    let b = next_event(&mut second).await;
    assert_eq!(a["quote"]["price"], "151.00");
    assert_eq!(b["quote"]["price"], "151.00");
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let (addr, state) = spawn_gateway(&[]).await;
    let mut ws = connect(addr).await;

    send_json(&mut ws, r#"{"action":"subscribe","symbols":["AAPL"]}"#).await;
    next_event(&mut ws).await;

    send_json(&mut ws, r#"{"action":"unsubscribe","symbols":["AAPL"]}"#).await;
    let ack = next_event(&mut ws).await;
    assert_eq!(ack["event"], "unsubscribed");
    assert_eq!(ack["symbols"][0], "AAPL");

    state.hub.publish(&make_quote("AAPL", "150.00"));
    expect_silence(&mut ws, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn rest_fetch_pushes_to_subscribers() {
    let (addr, _state) = spawn_gateway(&[("AAPL", Ok(make_quote("AAPL", "150.00")))]).await;
    let mut ws = connect(addr).await;

    send_json(&mut ws, r#"{"action":"subscribe","symbols":["AAPL"]}"#).await;
    next_event(&mut ws).await;

    // A REST caller triggers the fetch; the commit fans out to the push channel
    let response = reqwest::get(format!("http://{addr}/quotes/AAPL"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let update = next_event(&mut ws).await;
    assert_eq!(update["event"], "quote-update");
    assert_eq!(update["quote"]["symbol"], "AAPL");
}

// =============================================================================
// Disconnect Cleanup
// =============================================================================

#[tokio::test]
async fn disconnect_prunes_every_interest_entry() {
    let (addr, state) = spawn_gateway(&[]).await;
    let mut ws = connect(addr).await;

    send_json(
        &mut ws,
        r#"{"action":"subscribe","symbols":["AAPL","MSFT","GOOGL"]}"#,
    )
    .await;
    next_event(&mut ws).await;
    assert_eq!(state.registry.stats().connection_count, 1);

    ws.close(None).await.unwrap();
    drop(ws);

    // The session task observes the close asynchronously
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if state.registry.stats().connection_count == 0 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "interest entries were not pruned after disconnect"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(state.registry.stats().symbol_count, 0);
}

//! Alpha Vantage Upstream Client
//!
//! Performs one quote fetch for one symbol against the Alpha Vantage
//! `GLOBAL_QUOTE` endpoint, subject to the local rate limiter, and
//! classifies provider failures.
//!
//! Note: the Alpha Vantage free tier is limited to 5 API calls per minute.
//! Throttling is reported as HTTP 429 *or* as an HTTP 200 whose body
//! carries a `Note`/`Information` field instead of quote data — both are
//! classified as [`QuoteError::UpstreamRateLimited`].
//!
//! The client never writes to the cache; committing results is the fetch
//! coordinator's job.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::application::ports::QuoteFetcher;
use crate::domain::quote::{CachedQuote, QuoteError, Symbol};
use crate::infrastructure::config::ApiKey;
use crate::infrastructure::ratelimit::RateLimiter;

// =============================================================================
// Constants
// =============================================================================

/// Alpha Vantage query endpoint.
const BASE_URL: &str = "https://www.alphavantage.co/query";

/// Fallback retry hint when the provider throttles without naming a delay.
/// The free-tier budget resets per minute.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

// =============================================================================
// Response Structures
// =============================================================================

/// Envelope of a `GLOBAL_QUOTE` response.
///
/// Alpha Vantage reports errors inside an HTTP 200 body: `Note` and
/// `Information` signal throttling, `Error Message` signals a rejected
/// call, and an unknown symbol yields an empty `Global Quote` object.
#[derive(Debug, Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    global_quote: Option<GlobalQuotePayload>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

/// Quote fields as the provider ships them: position-prefixed string
/// values, all optional because an unknown symbol returns `{}`.
#[derive(Debug, Default, Deserialize)]
struct GlobalQuotePayload {
    #[serde(rename = "02. open")]
    open: Option<String>,
    #[serde(rename = "03. high")]
    high: Option<String>,
    #[serde(rename = "04. low")]
    low: Option<String>,
    #[serde(rename = "05. price")]
    price: Option<String>,
    #[serde(rename = "06. volume")]
    volume: Option<String>,
    #[serde(rename = "07. latest trading day")]
    latest_trading_day: Option<String>,
    #[serde(rename = "08. previous close")]
    previous_close: Option<String>,
}

// =============================================================================
// Client
// =============================================================================

/// Alpha Vantage quote client.
pub struct AlphaVantageClient {
    http: reqwest::Client,
    api_key: Option<ApiKey>,
    base_url: String,
    rate_limiter: Arc<RateLimiter>,
}

impl AlphaVantageClient {
    /// Create a client with a bounded request timeout.
    ///
    /// A missing `api_key` is not an error here: every fetch degrades to
    /// [`QuoteError::NotConfigured`] instead.
    ///
    /// # Errors
    ///
    /// Returns [`QuoteError::Upstream`] if the underlying HTTP client
    /// cannot be constructed.
    pub fn new(
        api_key: Option<ApiKey>,
        rate_limiter: Arc<RateLimiter>,
        timeout: Duration,
    ) -> Result<Self, QuoteError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QuoteError::Upstream(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_key,
            base_url: BASE_URL.to_string(),
            rate_limiter,
        })
    }

    /// Override the provider endpoint (tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Whether an API key is configured.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl QuoteFetcher for AlphaVantageClient {
    async fn fetch(&self, symbol: &Symbol) -> Result<CachedQuote, QuoteError> {
        let api_key = self.api_key.as_ref().ok_or(QuoteError::NotConfigured)?;

        self.rate_limiter.acquire().await;
        tracing::debug!(symbol = %symbol, "fetching quote from provider");

        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", symbol.as_str()),
                ("apikey", api_key.expose()),
            ])
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok())
                .map_or(DEFAULT_RETRY_AFTER, Duration::from_secs);
            return Err(QuoteError::UpstreamRateLimited {
                retry_after: Some(retry_after),
            });
        }
        if !status.is_success() {
            return Err(QuoteError::Upstream(format!(
                "provider returned HTTP {status}"
            )));
        }

        let body = response.text().await.map_err(classify_transport)?;
        parse_global_quote(symbol, &body, Utc::now())
    }
}

/// Map a transport failure onto the error taxonomy.
fn classify_transport(err: reqwest::Error) -> QuoteError {
    if err.is_timeout() {
        QuoteError::Timeout
    } else {
        QuoteError::Upstream(err.to_string())
    }
}

// =============================================================================
// Response Parsing
// =============================================================================

/// Parse a `GLOBAL_QUOTE` body into a quote snapshot.
fn parse_global_quote(
    symbol: &Symbol,
    body: &str,
    fetched_at: DateTime<Utc>,
) -> Result<CachedQuote, QuoteError> {
    let envelope: GlobalQuoteResponse = serde_json::from_str(body)
        .map_err(|e| QuoteError::Upstream(format!("unexpected provider payload: {e}")))?;

    if let Some(note) = envelope.note.or(envelope.information) {
        tracing::warn!(symbol = %symbol, note = %note, "provider throttled the request");
        return Err(QuoteError::UpstreamRateLimited {
            retry_after: Some(DEFAULT_RETRY_AFTER),
        });
    }

    if envelope.error_message.is_some() {
        return Err(QuoteError::NotFound(symbol.to_string()));
    }

    let payload = envelope.global_quote.unwrap_or_default();
    let Some(raw_price) = payload.price else {
        // Unknown symbols come back as an empty "Global Quote" object
        return Err(QuoteError::NotFound(symbol.to_string()));
    };

    let price = parse_decimal("price", &raw_price)?;
    let open = parse_decimal("open", &required(payload.open, "open")?)?;
    let high = parse_decimal("high", &required(payload.high, "high")?)?;
    let low = parse_decimal("low", &required(payload.low, "low")?)?;
    let previous_close = parse_decimal(
        "previous close",
        &required(payload.previous_close, "previous close")?,
    )?;

    let raw_volume = required(payload.volume, "volume")?;
    let volume = raw_volume
        .parse::<u64>()
        .map_err(|_| QuoteError::Upstream(format!("provider sent bad volume '{raw_volume}'")))?;

    let raw_day = required(payload.latest_trading_day, "latest trading day")?;
    let latest_trading_day = NaiveDate::from_str(&raw_day)
        .map_err(|_| QuoteError::Upstream(format!("provider sent bad trading day '{raw_day}'")))?;

    let (change, change_percent) = CachedQuote::compute_change(price, previous_close);

    Ok(CachedQuote {
        symbol: symbol.clone(),
        price,
        open,
        high,
        low,
        previous_close,
        volume,
        change,
        change_percent,
        latest_trading_day,
        fetched_at,
    })
}

fn required(field: Option<String>, name: &str) -> Result<String, QuoteError> {
    field.ok_or_else(|| QuoteError::Upstream(format!("provider omitted '{name}'")))
}

fn parse_decimal(name: &str, raw: &str) -> Result<Decimal, QuoteError> {
    Decimal::from_str(raw)
        .map_err(|_| QuoteError::Upstream(format!("provider sent bad {name} '{raw}'")))
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

    const FULL_PAYLOAD: &str = r#"{
        "Global Quote": {
            "01. symbol": "AAPL",
            "02. open": "149.00",
            "03. high": "151.00",
            "04. low": "148.50",
            "05. price": "150.00",
            "06. volume": "1234567",
            "07. latest trading day": "2024-01-05",
            "08. previous close": "148.00",
            "09. change": "2.0000",
            "10. change percent": "1.3514%"
        }
    }"#;

    #[test]
    fn parses_full_payload() {
        let quote = parse_global_quote(&sym("AAPL"), FULL_PAYLOAD, Utc::now()).unwrap();

        assert_eq!(quote.symbol.as_str(), "AAPL");
        assert_eq!(quote.price, Decimal::from_str("150.00").unwrap());
        assert_eq!(quote.open, Decimal::from_str("149.00").unwrap());
        assert_eq!(quote.volume, 1_234_567);
        assert_eq!(
            quote.latest_trading_day,
            NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()
        );
        // Change is computed, not parroted from the provider
        assert_eq!(quote.change, Decimal::from_str("2.00").unwrap());
        assert_eq!(quote.change_percent, Decimal::from_str("1.3514").unwrap());
    }

    #[test]
    fn empty_global_quote_is_not_found() {
        let body = r#"{"Global Quote": {}}"#;

        let err = parse_global_quote(&sym("ZZZZ"), body, Utc::now()).unwrap_err();

        assert_eq!(err, QuoteError::NotFound("ZZZZ".to_string()));
    }

    #[test]
    fn missing_global_quote_is_not_found() {
        let body = "{}";

        let err = parse_global_quote(&sym("ZZZZ"), body, Utc::now()).unwrap_err();

        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn note_is_rate_limited() {
        let body = r#"{"Note": "Thank you for using Alpha Vantage! Our standard API rate limit is 5 requests per minute."}"#;

        let err = parse_global_quote(&sym("AAPL"), body, Utc::now()).unwrap_err();

        assert_eq!(
            err,
            QuoteError::UpstreamRateLimited {
                retry_after: Some(DEFAULT_RETRY_AFTER)
            }
        );
    }

    #[test]
    fn information_is_rate_limited() {
        let body = r#"{"Information": "API rate limit exceeded"}"#;

        let err = parse_global_quote(&sym("AAPL"), body, Utc::now()).unwrap_err();

        assert_eq!(err.code(), "rate_limited");
    }

    #[test]
    fn error_message_is_not_found() {
        let body = r#"{"Error Message": "Invalid API call."}"#;

        let err = parse_global_quote(&sym("AAPL"), body, Utc::now()).unwrap_err();

        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn malformed_number_is_upstream_error() {
        let body = r#"{
            "Global Quote": {
                "02. open": "149.00",
                "03. high": "151.00",
                "04. low": "148.50",
                "05. price": "not-a-number",
                "06. volume": "1234567",
                "07. latest trading day": "2024-01-05",
                "08. previous close": "148.00"
            }
        }"#;

        let err = parse_global_quote(&sym("AAPL"), body, Utc::now()).unwrap_err();

        assert_eq!(err.code(), "upstream_error");
    }

    #[test]
    fn non_json_body_is_upstream_error() {
        let err = parse_global_quote(&sym("AAPL"), "<html>oops</html>", Utc::now()).unwrap_err();

        assert_eq!(err.code(), "upstream_error");
    }

    #[tokio::test]
    async fn missing_api_key_degrades_to_not_configured() {
        let limiter = Arc::new(RateLimiter::new(Duration::ZERO));
        let client =
            AlphaVantageClient::new(None, limiter, Duration::from_secs(10)).unwrap();

        let err = client.fetch(&sym("AAPL")).await.unwrap_err();

        assert_eq!(err, QuoteError::NotConfigured);
    }
}

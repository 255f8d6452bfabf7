//! Quote Domain Types
//!
//! Core types for stock quotes: validated ticker symbols, the immutable
//! quote snapshot served to callers, and the error taxonomy shared by
//! every layer of the gateway.
//!
//! # Design
//!
//! A [`CachedQuote`] is a wholesale snapshot: it is created once by the
//! upstream client and replaced atomically on the next successful fetch,
//! never mutated field by field. Change and change-percent are computed
//! from price and previous close rather than trusted from the provider's
//! pre-formatted strings.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Symbol
// =============================================================================

/// Maximum accepted ticker length.
const MAX_SYMBOL_LEN: usize = 12;

/// A validated, normalized (uppercase) ticker symbol.
///
/// Accepts ASCII letters, digits, `.`, `_`, and `-` after trimming.
/// The permissive shape is intentional: whether a ticker actually exists
/// is the upstream provider's call, not ours.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Parse and normalize a raw ticker string.
    ///
    /// # Errors
    ///
    /// Returns [`QuoteError::Validation`] if the input is empty after
    /// trimming, longer than 12 characters, or contains characters outside
    /// `[A-Za-z0-9._-]`.
    pub fn parse(raw: &str) -> Result<Self, QuoteError> {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(QuoteError::Validation("symbol is empty".to_string()));
        }

        if trimmed.len() > MAX_SYMBOL_LEN {
            return Err(QuoteError::Validation(format!(
                "symbol '{trimmed}' exceeds {MAX_SYMBOL_LEN} characters"
            )));
        }

        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(QuoteError::Validation(format!(
                "symbol '{trimmed}' contains invalid characters"
            )));
        }

        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// Get the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Cached Quote
// =============================================================================

/// An immutable snapshot of a symbol's trading data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedQuote {
    /// Normalized ticker symbol.
    pub symbol: Symbol,
    /// Last traded price.
    pub price: Decimal,
    /// Opening price for the trading day.
    pub open: Decimal,
    /// Intraday high.
    pub high: Decimal,
    /// Intraday low.
    pub low: Decimal,
    /// Previous session's closing price.
    pub previous_close: Decimal,
    /// Traded volume.
    pub volume: u64,
    /// Absolute change vs previous close.
    pub change: Decimal,
    /// Percentage change vs previous close.
    pub change_percent: Decimal,
    /// Trading day the provider reported the data for.
    pub latest_trading_day: NaiveDate,
    /// Instant this snapshot was fetched from the provider.
    pub fetched_at: DateTime<Utc>,
}

impl CachedQuote {
    /// Compute change and change-percent from price and previous close.
    ///
    /// A zero previous close yields zero for both values rather than a
    /// division error (freshly listed symbols report no previous close).
    #[must_use]
    pub fn compute_change(price: Decimal, previous_close: Decimal) -> (Decimal, Decimal) {
        let change = price - previous_close;

        let change_percent = if previous_close.is_zero() {
            Decimal::ZERO
        } else {
            (change * Decimal::ONE_HUNDRED / previous_close).round_dp(4)
        };

        (change, change_percent)
    }
}

// =============================================================================
// Error Taxonomy
// =============================================================================

/// Errors produced by the quote distribution core.
///
/// Variants carry owned data so a single classified error can be cloned
/// to every waiter coalesced onto the same fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuoteError {
    /// No upstream API key is configured. Fatal per request, never
    /// process-fatal.
    #[error("upstream provider is not configured")]
    NotConfigured,

    /// The provider reports no data for the symbol.
    #[error("no data found for symbol '{0}'")]
    NotFound(String),

    /// The provider is throttling us (distinct from local pacing).
    #[error("upstream provider rate limited the request")]
    UpstreamRateLimited {
        /// Provider-suggested wait before retrying, if any.
        retry_after: Option<Duration>,
    },

    /// The upstream request exceeded its deadline.
    #[error("upstream request timed out")]
    Timeout,

    /// Any other transport or parse failure talking to the provider.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The caller's input was rejected before any upstream work.
    #[error("validation error: {0}")]
    Validation(String),
}

impl QuoteError {
    /// Stable machine-readable error code, distinct from the display
    /// message.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotConfigured => "not_configured",
            Self::NotFound(_) => "not_found",
            Self::UpstreamRateLimited { .. } => "rate_limited",
            Self::Timeout => "timeout",
            Self::Upstream(_) => "upstream_error",
            Self::Validation(_) => "validation",
        }
    }

    /// Whether the failure is transient from the caller's perspective.
    ///
    /// Only transient failures are eligible for the stale-on-error
    /// fallback; a definitive miss or bad input never is.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::UpstreamRateLimited { .. } | Self::Timeout | Self::Upstream(_)
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

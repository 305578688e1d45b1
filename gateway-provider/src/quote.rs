//! Remote-path quote structure (§6, §4.7): what an external marketplace
//! hands back for one unit of dispatchable work. Fetching the quote is the
//! marketplace's job (out of scope per §1 — "remote marketplace supply
//! selection happens outside the gateway; the gateway only consumes a
//! signed quote"), modelled here as a capability trait so a real client can
//! be plugged in without touching the remote provider itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// A signed, time-bounded authorisation to dispatch to one upstream
/// endpoint (§6, GLOSSARY: "Quote").
#[derive(Debug, Clone)]
pub struct SupplyQuote {
    pub quote_id: String,
    pub supply_id: String,
    pub endpoint: String,
    pub signed_token: String,
    pub price_per_mtoken: f64,
    pub supplier_price_per_mtoken: f64,
    pub commission_rate: f64,
    pub region: String,
    pub p99_latency_ms: u64,
    pub throughput_tps: f64,
    /// `[0, 1]`.
    pub availability: f64,
    /// Startup window: dispatch MUST begin before this instant.
    pub expires_at: DateTime<Utc>,
    /// Execution window, independent of `expires_at` (§4.7: "execution is
    /// bounded by `exec_timeout` independent of the quote window").
    pub exec_timeout_sec: u64,
}

impl SupplyQuote {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_sec)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuoteError {
    Unavailable(String),
    NoSupply,
}

impl std::fmt::Display for QuoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuoteError::Unavailable(reason) => write!(f, "quote source unavailable: {reason}"),
            QuoteError::NoSupply => write!(f, "no remote supply available for model"),
        }
    }
}

impl std::error::Error for QuoteError {}

/// Capability trait for the external marketplace; a real implementation
/// would speak whatever protocol the marketplace exposes (out of scope).
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn quote(&self, model: &str) -> Result<SupplyQuote, QuoteError>;
}

/// A cached list of suppliers for tests and for `cached` degradation mode
/// (§4.7: "a cached supplier list may be served with a staleness
/// indicator").
pub struct StaticQuoteSource {
    quotes: std::sync::Mutex<std::collections::HashMap<String, SupplyQuote>>,
}

impl StaticQuoteSource {
    pub fn new() -> Self {
        Self {
            quotes: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn set(&self, model: &str, quote: SupplyQuote) {
        self.quotes.lock().unwrap().insert(model.to_string(), quote);
    }
}

impl Default for StaticQuoteSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuoteSource for StaticQuoteSource {
    async fn quote(&self, model: &str) -> Result<SupplyQuote, QuoteError> {
        self.quotes
            .lock()
            .unwrap()
            .get(model)
            .cloned()
            .ok_or(QuoteError::NoSupply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_quote(expires_in_secs: i64) -> SupplyQuote {
        SupplyQuote {
            quote_id: "q1".into(),
            supply_id: "s1".into(),
            endpoint: "https://supplier.example/v1".into(),
            signed_token: "signed".into(),
            price_per_mtoken: 2.0,
            supplier_price_per_mtoken: 1.5,
            commission_rate: 0.25,
            region: "us-east".into(),
            p99_latency_ms: 400,
            throughput_tps: 120.0,
            availability: 0.995,
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
            exec_timeout_sec: 60,
        }
    }

    #[test]
    fn expired_quote_is_detected() {
        let quote = sample_quote(-1);
        assert!(quote.is_expired(Utc::now()));
    }

    #[test]
    fn unexpired_quote_is_not_expired() {
        let quote = sample_quote(60);
        assert!(!quote.is_expired(Utc::now()));
    }

    #[tokio::test]
    async fn static_source_returns_no_supply_for_unknown_model() {
        let source = StaticQuoteSource::new();
        let err = source.quote("gpt-x").await.unwrap_err();
        assert_eq!(err, QuoteError::NoSupply);
    }

    #[tokio::test]
    async fn static_source_returns_configured_quote() {
        let source = StaticQuoteSource::new();
        source.set("gpt-x", sample_quote(60));
        let quote = source.quote("gpt-x").await.unwrap();
        assert_eq!(quote.quote_id, "q1");
    }
}

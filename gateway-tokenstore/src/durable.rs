//! Durable (system-of-record) token store capability.
//!
//! The real backing store (a Postgres accounts/tokens table, per §6's
//! "Persisted state") is external and out of scope; this defines the
//! capability set plus an in-memory reference implementation for tests.
//! `status` is deliberately absent from [`TokenRecord`] — §4.1 requires it
//! be *computed* from `revoked_at`/`expires_at` at fetch time, never stored.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use gateway_core::model::{AccountType, PriorityTier};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurableError {
    Unavailable(String),
}

impl std::fmt::Display for DurableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DurableError::Unavailable(msg) => write!(f, "durable store unavailable: {msg}"),
        }
    }
}

impl std::error::Error for DurableError {}

/// Raw row shape as read from the durable store, before status derivation.
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub token_id: String,
    pub account_id: String,
    pub account_type: AccountType,
    pub priority_tier: PriorityTier,
    pub environment: String,
    pub workload_tag: Option<String>,
    pub priority_override: Option<u8>,
    pub weight_override: Option<f64>,
    pub quota_tokens_per_period: u64,
    pub quota_tokens_per_second: u64,
    pub revoked_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait DurableTokenStore: Send + Sync + 'static {
    async fn fetch(&self, token_hash: &str) -> Result<Option<TokenRecord>, DurableError>;
    /// All currently-active tokens, for the snapshot refresh task (§4.1).
    async fn fetch_all_active(&self) -> Result<Vec<(String, TokenRecord)>, DurableError>;
}

/// In-memory durable store for tests: a plain map keyed by token hash.
pub struct InMemoryDurableStore {
    rows: DashMap<String, TokenRecord>,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }

    pub fn insert(&self, token_hash: impl Into<String>, record: TokenRecord) {
        self.rows.insert(token_hash.into(), record);
    }
}

impl Default for InMemoryDurableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableTokenStore for InMemoryDurableStore {
    async fn fetch(&self, token_hash: &str) -> Result<Option<TokenRecord>, DurableError> {
        Ok(self.rows.get(token_hash).map(|e| e.value().clone()))
    }

    async fn fetch_all_active(&self) -> Result<Vec<(String, TokenRecord)>, DurableError> {
        let now = Utc::now();
        Ok(self
            .rows
            .iter()
            .filter(|e| {
                let r = e.value();
                r.revoked_at.is_none() && r.expires_at.map(|exp| exp > now).unwrap_or(true)
            })
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect())
    }
}

pub type DurableHandle = Arc<dyn DurableTokenStore>;

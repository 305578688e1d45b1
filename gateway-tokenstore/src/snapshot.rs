//! Read-only snapshot of all active tokens, refreshed atomically (§4.1).
//!
//! The swap itself is pointer-atomic via `arc_swap::ArcSwap`: readers either
//! see the old map in full or the new map in full, never a partial update,
//! and never take a lock on the read path — the same lock-free publication
//! pattern called out in §9 for the rule list.

use crate::durable::{DurableHandle, TokenRecord};
use crate::status::compute_status;
use arc_swap::ArcSwap;
use gateway_core::model::RouteSource;
use gateway_core::RoutingMetadata;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn record_to_metadata(token_hash: &str, record: &TokenRecord) -> RoutingMetadata {
    RoutingMetadata {
        token_id: if record.token_id.is_empty() {
            token_hash.to_string()
        } else {
            record.token_id.clone()
        },
        account_id: record.account_id.clone(),
        account_type: record.account_type,
        priority_tier: record.priority_tier,
        environment: record.environment.clone(),
        workload_tag: record.workload_tag.clone(),
        priority_override: record.priority_override,
        weight_override: record.weight_override,
        quota_tokens_per_period: record.quota_tokens_per_period,
        quota_tokens_per_second: record.quota_tokens_per_second,
        status: compute_status(record.revoked_at, record.expires_at),
        route_source: RouteSource::Token,
    }
}

/// Atomically-swapped map of hashed-token → metadata, plus refresh
/// bookkeeping (§4.1: "snapshot staleness is exposed as a metric and
/// alerted").
pub struct SnapshotCache {
    map: ArcSwap<HashMap<String, RoutingMetadata>>,
    last_success: Arc<std::sync::Mutex<Option<Instant>>>,
    refresh_errors: Arc<AtomicU64>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self {
            map: ArcSwap::from_pointee(HashMap::new()),
            last_success: Arc::new(std::sync::Mutex::new(None)),
            refresh_errors: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn get(&self, key: &str) -> Option<RoutingMetadata> {
        self.map.load().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.map.load().len()
    }

    pub fn refresh_error_count(&self) -> u64 {
        self.refresh_errors.load(Ordering::Relaxed)
    }

    /// Staleness in seconds since the last successful refresh, or `None` if
    /// a refresh has never succeeded.
    pub fn staleness(&self) -> Option<Duration> {
        self.last_success.lock().unwrap().map(|t| t.elapsed())
    }

    /// Pull the full active-token set from the durable store and swap it
    /// in. Failure leaves the previous snapshot in place and bumps the
    /// error counter (§4.1: "Refresh failure leaves the previous snapshot
    /// in place").
    pub async fn refresh(&self, durable: &dyn crate::durable::DurableTokenStore) {
        match durable.fetch_all_active().await {
            Ok(rows) => {
                let mut next = HashMap::with_capacity(rows.len());
                for (hash, record) in &rows {
                    next.insert(hash.clone(), record_to_metadata(hash, record));
                }
                self.map.store(Arc::new(next));
                *self.last_success.lock().unwrap() = Some(Instant::now());
                gateway_core::metrics::metrics()
                    .token_store_snapshot_staleness_seconds
                    .set(0);
                tracing::debug!(count = rows.len(), "snapshot cache refreshed");
            }
            Err(err) => {
                self.refresh_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%err, "snapshot cache refresh failed, retaining previous snapshot");
            }
        }
    }

    /// Spawn the periodic background refresh task. Returns a handle the
    /// caller can abort, though normal shutdown should cancel `token`
    /// instead.
    pub fn spawn_refresh_task(
        self: &Arc<Self>,
        durable: DurableHandle,
        interval: Duration,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        this.refresh(durable.as_ref()).await;
                    }
                }
            }
        })
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::{InMemoryDurableStore, TokenRecord};
    use gateway_core::model::{AccountType, PriorityTier};

    fn sample(token_id: &str) -> TokenRecord {
        TokenRecord {
            token_id: token_id.into(),
            account_id: "acct".into(),
            account_type: AccountType::External,
            priority_tier: PriorityTier::External,
            environment: "production".into(),
            workload_tag: None,
            priority_override: None,
            weight_override: None,
            quota_tokens_per_period: 1000,
            quota_tokens_per_second: 0,
            revoked_at: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn refresh_populates_map_and_clears_staleness() {
        let durable = InMemoryDurableStore::new();
        durable.insert("h1", sample("t1"));
        let cache = SnapshotCache::new();
        assert!(cache.get("h1").is_none());
        cache.refresh(&durable).await;
        assert!(cache.get("h1").is_some());
        assert!(cache.staleness().unwrap() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot() {
        struct FailingStore;
        #[async_trait::async_trait]
        impl crate::durable::DurableTokenStore for FailingStore {
            async fn fetch(
                &self,
                _token_hash: &str,
            ) -> Result<Option<TokenRecord>, crate::durable::DurableError> {
                Err(crate::durable::DurableError::Unavailable("down".into()))
            }
            async fn fetch_all_active(
                &self,
            ) -> Result<Vec<(String, TokenRecord)>, crate::durable::DurableError> {
                Err(crate::durable::DurableError::Unavailable("down".into()))
            }
        }

        let durable = InMemoryDurableStore::new();
        durable.insert("h1", sample("t1"));
        let cache = SnapshotCache::new();
        cache.refresh(&durable).await;
        assert!(cache.get("h1").is_some());

        let failing = FailingStore;
        cache.refresh(&failing).await;
        assert!(cache.get("h1").is_some());
        assert_eq!(cache.refresh_error_count(), 1);
    }
}

//! The layered lookup itself (C1, §4.1): local LRU → shared KV → snapshot →
//! durable store → degradation path.

use crate::durable::{DurableError, DurableHandle};
use crate::lru::LocalLru;
use crate::shared_kv::{SharedKvError, SharedKvHandle};
use crate::snapshot::SnapshotCache;
use crate::status::compute_status;
use gateway_core::config::FailMode;
use gateway_core::model::{RouteSource, StoreLayer};
use gateway_core::{hash_token, RoutingMetadata};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStoreError {
    NotFound,
    Revoked,
    Expired,
    AllStoresUnavailable,
}

impl std::fmt::Display for TokenStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenStoreError::NotFound => write!(f, "token not found"),
            TokenStoreError::Revoked => write!(f, "token revoked"),
            TokenStoreError::Expired => write!(f, "token expired"),
            TokenStoreError::AllStoresUnavailable => write!(f, "all token stores unavailable"),
        }
    }
}

impl std::error::Error for TokenStoreError {}

pub struct TokenStoreSettings {
    pub shared_kv_ttl: Duration,
    pub fail_mode: FailMode,
    pub fail_open_quota: u64,
}

/// The full C1 capability: layered lookup, invalidation, and an
/// invalidation-subscription background task.
pub struct TokenMetadataStore {
    local: LocalLru,
    shared: SharedKvHandle,
    snapshot: Arc<SnapshotCache>,
    durable: DurableHandle,
    settings: TokenStoreSettings,
}

impl TokenMetadataStore {
    pub fn new(
        local_capacity: usize,
        shared: SharedKvHandle,
        snapshot: Arc<SnapshotCache>,
        durable: DurableHandle,
        settings: TokenStoreSettings,
    ) -> Self {
        Self {
            local: LocalLru::new(local_capacity),
            shared,
            snapshot,
            durable,
            settings,
        }
    }

    /// §4.1's `lookup`. On success, populates any upper layer it
    /// traversed through (so a durable hit warms the shared KV and the
    /// local LRU).
    pub async fn lookup(&self, raw_token: &str) -> Result<(RoutingMetadata, StoreLayer), TokenStoreError> {
        let key = hash_token(raw_token);
        let metrics = gateway_core::metrics::metrics();

        if let Some(meta) = self.local.get(&key) {
            metrics
                .token_store_lookups_total
                .with_label_values(&["local_lru", "hit"])
                .inc();
            return self.finish(meta, StoreLayer::LocalLru);
        }

        match self.shared.get(&key).await {
            Ok(Some(meta)) => {
                metrics
                    .token_store_lookups_total
                    .with_label_values(&["shared_kv", "hit"])
                    .inc();
                self.local.insert(key.clone(), meta.clone());
                return self.finish(meta, StoreLayer::SharedKv);
            }
            Ok(None) => {
                metrics
                    .token_store_lookups_total
                    .with_label_values(&["shared_kv", "miss"])
                    .inc();
            }
            Err(SharedKvError::Unavailable(reason)) => {
                tracing::debug!(%reason, "shared KV unavailable, falling through");
                metrics
                    .token_store_lookups_total
                    .with_label_values(&["shared_kv", "error"])
                    .inc();
            }
        }

        if let Some(meta) = self.snapshot.get(&key) {
            metrics
                .token_store_lookups_total
                .with_label_values(&["snapshot", "hit"])
                .inc();
            self.warm_upper_layers(&key, &meta).await;
            return self.finish(meta, StoreLayer::Snapshot);
        }

        match self.durable.fetch(&key).await {
            Ok(Some(record)) => {
                metrics
                    .token_store_lookups_total
                    .with_label_values(&["durable", "hit"])
                    .inc();
                let meta = RoutingMetadata {
                    token_id: key.clone(),
                    account_id: record.account_id,
                    account_type: record.account_type,
                    priority_tier: record.priority_tier,
                    environment: record.environment,
                    workload_tag: record.workload_tag,
                    priority_override: record.priority_override,
                    weight_override: record.weight_override,
                    quota_tokens_per_period: record.quota_tokens_per_period,
                    quota_tokens_per_second: record.quota_tokens_per_second,
                    status: compute_status(record.revoked_at, record.expires_at),
                    route_source: RouteSource::Token,
                };
                self.warm_upper_layers(&key, &meta).await;
                self.finish(meta, StoreLayer::Durable)
            }
            Ok(None) => {
                metrics
                    .token_store_lookups_total
                    .with_label_values(&["durable", "miss"])
                    .inc();
                Err(TokenStoreError::NotFound)
            }
            Err(DurableError::Unavailable(reason)) => {
                metrics
                    .token_store_lookups_total
                    .with_label_values(&["durable", "error"])
                    .inc();
                tracing::warn!(%reason, "durable token store unavailable");
                self.degraded_outcome(&key)
            }
        }
    }

    async fn warm_upper_layers(&self, key: &str, meta: &RoutingMetadata) {
        self.local.insert(key.to_string(), meta.clone());
        let _ = self.shared.set(key, meta.clone(), self.settings.shared_kv_ttl).await;
    }

    fn finish(&self, meta: RoutingMetadata, layer: StoreLayer) -> Result<(RoutingMetadata, StoreLayer), TokenStoreError> {
        match meta.status {
            gateway_core::TokenStatus::Revoked => Err(TokenStoreError::Revoked),
            gateway_core::TokenStatus::Expired => Err(TokenStoreError::Expired),
            _ => Ok((meta, layer)),
        }
    }

    fn degraded_outcome(&self, key: &str) -> Result<(RoutingMetadata, StoreLayer), TokenStoreError> {
        match self.settings.fail_mode {
            FailMode::FailOpen => {
                let meta = RoutingMetadata::degraded(key, self.settings.fail_open_quota);
                tracing::info!(token_hash = %key, "fail-open degraded metadata synthesised");
                Ok((meta, StoreLayer::Degraded))
            }
            FailMode::FailClosed => Err(TokenStoreError::AllStoresUnavailable),
        }
    }

    /// §4.1 `invalidate`: best-effort removal from local + shared layers.
    pub async fn invalidate(&self, raw_token: &str) {
        let key = hash_token(raw_token);
        self.local.remove(&key);
        let _ = self.shared.invalidate(&key).await;
    }

    /// §4.1 `subscribe_invalidations`: drain the shared KV's invalidation
    /// broadcast and apply to the local LRU, so a revoke issued against one
    /// gateway instance clears cached metadata on all of them.
    pub fn spawn_invalidation_subscriber(
        local: LocalLru,
        shared: SharedKvHandle,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let mut rx = shared.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = rx.recv() => {
                        match received {
                            Ok(key) => local.remove(&key),
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                                tracing::warn!(skipped = n, "invalidation subscriber lagged");
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        })
    }

    pub fn local_lru(&self) -> LocalLru {
        self.local.clone()
    }

    pub fn snapshot(&self) -> Arc<SnapshotCache> {
        Arc::clone(&self.snapshot)
    }
}

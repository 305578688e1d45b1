//! End-to-end coverage of the C1 layered lookup, cross-instance
//! invalidation propagation, and the periodic snapshot refresh task.

use gateway_core::config::FailMode;
use gateway_core::model::{AccountType, PriorityTier, StoreLayer};
use gateway_tokenstore::{
    DurableHandle, InMemoryDurableStore, InMemorySharedKv, SnapshotCache, TokenMetadataStore,
    TokenRecord, TokenStoreError, TokenStoreSettings,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn sample_record() -> TokenRecord {
    TokenRecord {
        token_id: "tok-1".into(),
        account_id: "acct-1".into(),
        account_type: AccountType::External,
        priority_tier: PriorityTier::Premium,
        environment: "production".into(),
        workload_tag: Some("chat".into()),
        priority_override: None,
        weight_override: None,
        quota_tokens_per_period: 20_000,
        quota_tokens_per_second: 0,
        revoked_at: None,
        expires_at: None,
    }
}

#[tokio::test]
async fn invalidation_published_on_one_handle_clears_subscriber_local_lru() {
    use gateway_tokenstore::SharedKvStore;

    let shared = Arc::new(InMemorySharedKv::new());
    let durable: DurableHandle = Arc::new(InMemoryDurableStore::new());
    let store = TokenMetadataStore::new(
        16,
        shared.clone(),
        Arc::new(SnapshotCache::new()),
        durable,
        TokenStoreSettings {
            shared_kv_ttl: Duration::from_secs(60),
            fail_mode: FailMode::FailClosed,
            fail_open_quota: 1000,
        },
    );

    let token = CancellationToken::new();
    let subscriber_lru = store.local_lru();
    let handle = TokenMetadataStore::spawn_invalidation_subscriber(subscriber_lru.clone(), shared.clone(), token.clone());

    subscriber_lru.insert("h1".into(), gateway_core::RoutingMetadata::default_policy());
    assert_eq!(subscriber_lru.len(), 1);

    shared.invalidate("h1").await.unwrap();

    // give the background task a turn to process the broadcast
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(subscriber_lru.len(), 0);

    token.cancel();
    let _ = handle.await;
}

#[tokio::test]
async fn snapshot_refresh_task_populates_cache_until_cancelled() {
    let durable_impl = InMemoryDurableStore::new();
    durable_impl.insert("h2", sample_record());
    let durable: DurableHandle = Arc::new(durable_impl);

    let cache = Arc::new(SnapshotCache::new());
    let token = CancellationToken::new();
    let handle = cache.clone().spawn_refresh_task(durable.clone(), Duration::from_millis(20), token.clone());

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(cache.get("h2").is_some());

    token.cancel();
    let _ = handle.await;
}

#[tokio::test]
async fn full_store_lookup_falls_through_every_layer_in_order() {
    let durable_impl = InMemoryDurableStore::new();
    durable_impl.insert(gateway_core::hash_token("raw-token"), sample_record());
    let durable: DurableHandle = Arc::new(durable_impl);

    let store = TokenMetadataStore::new(
        16,
        Arc::new(InMemorySharedKv::new()),
        Arc::new(SnapshotCache::new()),
        durable,
        TokenStoreSettings {
            shared_kv_ttl: Duration::from_secs(60),
            fail_mode: FailMode::FailClosed,
            fail_open_quota: 1000,
        },
    );

    let (meta, layer) = store.lookup("raw-token").await.unwrap();
    assert_eq!(layer, StoreLayer::Durable);
    assert_eq!(meta.priority_tier, PriorityTier::Premium);

    let (_, layer_again) = store.lookup("raw-token").await.unwrap();
    assert_eq!(layer_again, StoreLayer::LocalLru);

    store.invalidate("raw-token").await;
    let err = store.lookup("raw-token").await;
    // durable row is still present, so after invalidation it falls through
    // the now-empty upper layers straight back to the durable hit.
    assert!(matches!(err, Ok((_, StoreLayer::Durable))));
}

#[tokio::test]
async fn not_found_is_distinct_from_unavailable() {
    let durable: DurableHandle = Arc::new(InMemoryDurableStore::new());
    let store = TokenMetadataStore::new(
        16,
        Arc::new(InMemorySharedKv::new()),
        Arc::new(SnapshotCache::new()),
        durable,
        TokenStoreSettings {
            shared_kv_ttl: Duration::from_secs(60),
            fail_mode: FailMode::FailOpen,
            fail_open_quota: 1000,
        },
    );

    let err = store.lookup("never-issued").await.unwrap_err();
    assert_eq!(err, TokenStoreError::NotFound);
}

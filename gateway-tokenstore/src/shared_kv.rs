//! Shared (cross-process) KV layer capability.
//!
//! A real deployment backs this with Redis or similar; that client is out
//! of scope for this core (§1: "consume the interfaces they present"). This
//! module defines the capability set as an `async_trait` trait and ships
//! one thin in-memory implementation used by tests and single-instance
//! deployments.

use async_trait::async_trait;
use dashmap::DashMap;
use gateway_core::RoutingMetadata;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SharedKvError {
    Unavailable(String),
}

impl std::fmt::Display for SharedKvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SharedKvError::Unavailable(msg) => write!(f, "shared KV unavailable: {msg}"),
        }
    }
}

impl std::error::Error for SharedKvError {}

/// Pluggable shared-cache backend consulted after the local LRU misses.
#[async_trait]
pub trait SharedKvStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<RoutingMetadata>, SharedKvError>;
    async fn set(&self, key: &str, value: RoutingMetadata, ttl: Duration) -> Result<(), SharedKvError>;
    async fn invalidate(&self, key: &str) -> Result<(), SharedKvError>;
    /// Subscribe to invalidation events published by any writer (including
    /// other gateway instances sharing this KV). Used to drive C1's
    /// `subscribe_invalidations()`.
    fn subscribe(&self) -> broadcast::Receiver<String>;
}

/// In-memory shared KV store with TTL, for tests and single-instance
/// deployments where "shared" just means "the other local layer".
pub struct InMemorySharedKv {
    entries: DashMap<String, (RoutingMetadata, Instant, Duration)>,
    invalidations: broadcast::Sender<String>,
}

impl InMemorySharedKv {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self {
            entries: DashMap::new(),
            invalidations: tx,
        }
    }
}

impl Default for InMemorySharedKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedKvStore for InMemorySharedKv {
    async fn get(&self, key: &str) -> Result<Option<RoutingMetadata>, SharedKvError> {
        if let Some(entry) = self.entries.get(key) {
            let (value, inserted, ttl) = entry.value();
            if inserted.elapsed() < *ttl {
                return Ok(Some(value.clone()));
            }
            drop(entry);
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: RoutingMetadata, ttl: Duration) -> Result<(), SharedKvError> {
        self.entries.insert(key.to_string(), (value, Instant::now(), ttl));
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<(), SharedKvError> {
        self.entries.remove(key);
        let _ = self.invalidations.send(key.to_string());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.invalidations.subscribe()
    }
}

/// Wraps a `SharedKvStore` so it can be shared between the store and a
/// background invalidation-subscription task.
pub type SharedKvHandle = Arc<dyn SharedKvStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn set_then_get_within_ttl() {
        let kv = InMemorySharedKv::new();
        let meta = RoutingMetadata::default_policy();
        kv.set("k", meta.clone(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some(meta));
    }

    #[tokio::test]
    async fn invalidate_publishes_event() {
        let kv = InMemorySharedKv::new();
        let mut rx = kv.subscribe();
        kv.set("k", RoutingMetadata::default_policy(), Duration::from_secs(60))
            .await
            .unwrap();
        kv.invalidate("k").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "k");
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entry_is_not_returned() {
        let kv = InMemorySharedKv::new();
        kv.set("k", RoutingMetadata::default_policy(), Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
    }
}

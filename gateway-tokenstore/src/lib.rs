//! Token Metadata Store (C1): the layered lookup path — local LRU → shared
//! KV → periodically-refreshed snapshot → durable store — plus the
//! degradation synthesis fallback when every backing layer is unreachable.

pub mod durable;
pub mod lru;
pub mod shared_kv;
pub mod snapshot;
pub mod status;
pub mod store;

pub use durable::{DurableError, DurableHandle, DurableTokenStore, InMemoryDurableStore, TokenRecord};
pub use lru::LocalLru;
pub use shared_kv::{InMemorySharedKv, SharedKvError, SharedKvHandle, SharedKvStore};
pub use snapshot::SnapshotCache;
pub use status::compute_status;
pub use store::{TokenMetadataStore, TokenStoreError, TokenStoreSettings};

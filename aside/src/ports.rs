#![deny(clippy::all)]

use crate::domain::CacheEntry;
use async_trait::async_trait;
use shared::{Result, Ttl};

// Ports are the pluggable extension points for the backing key-value store

/// Port for the key-value store the cache-aside layer reads and invalidates.
///
/// The store is typed by value so one logical cache cannot read back a value of a
/// different type. Transport failures are reported as `Error::StoreUnavailable`.
#[async_trait]
pub trait KeyValueStore<V>: Send + Sync + 'static {
    async fn has_key(&self, key: &str) -> Result<bool>;
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>>;
    async fn set(&self, key: &str, entry: CacheEntry<V>, ttl: Ttl) -> Result<()>;
    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;
}

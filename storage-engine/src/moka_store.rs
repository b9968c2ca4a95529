use aside::{CacheEntry, KeyValueStore};
use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use shared::{Result, Ttl};
use std::time::{Duration, Instant};
use tracing::trace;

/// Stored entry together with the expiry it was written with.
#[derive(Clone)]
struct Slot<V> {
    entry: CacheEntry<V>,
    ttl: Option<Duration>,
}

/// Per-entry expiry: each write sets the entry's lifetime from its own TTL.
struct SlotExpiry;

impl<V> Expiry<String, Slot<V>> for SlotExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Slot<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Slot<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// Moka-based in-process store with per-entry TTL.
/// Lock-free and concurrent, optionally bounded by entry count.
pub struct MokaStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    cache: Cache<String, Slot<V>>,
}

impl<V> MokaStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a store with a name and optional capacity bound
    pub fn new(name: &str, max_entries: Option<u64>) -> Self {
        let mut builder = Cache::builder().name(name).expire_after(SlotExpiry);

        if let Some(capacity) = max_entries {
            builder = builder.max_capacity(capacity);
        }

        Self {
            cache: builder.build(),
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait]
impl<V> KeyValueStore<V> for MokaStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.cache.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>> {
        // None when the key is absent or its TTL elapsed
        Ok(self.cache.get(key).await.map(|slot| slot.entry))
    }

    async fn set(&self, key: &str, entry: CacheEntry<V>, ttl: Ttl) -> Result<()> {
        let ttl = ttl.as_duration();
        trace!("set {key} (ttl: {ttl:?})");
        self.cache.insert(key.to_string(), Slot { entry, ttl }).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.cache.remove(key).await.is_some())
    }
}

impl<V> std::fmt::Debug for MokaStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaStore")
            .field("entry_count", &self.cache.entry_count())
            .field("weighted_size", &self.cache.weighted_size())
            .finish()
    }
}

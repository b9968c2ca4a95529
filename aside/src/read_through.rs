use crate::domain::CacheEntry;
use crate::events::{CacheEvent, EventPublisher, KeyEvent, LoadedEvent, now_timestamp_ms};
use crate::ports::KeyValueStore;
use shared::config::ReadThroughConfig;
use shared::{Error, Result, Ttl};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Shortest lifetime an empty marker may have. A zero TTL reads as "never
/// expires" at the store.
const MIN_EMPTY_TTL: Duration = Duration::from_millis(1);

/// Cache-aside reads with empty-value marking.
///
/// On a miss the caller's fallback loads the value from the authoritative source
/// and the result is written back. A fallback that finds nothing leaves an empty
/// marker behind for `empty_ttl`, so repeated lookups of a key that has no data
/// do not keep reaching the source.
///
/// Concurrent misses on the same key each run their own fallback; there is no
/// single-flight between callers.
#[derive(Clone)]
pub struct ReadThroughCache<V> {
    store: Arc<dyn KeyValueStore<V>>,
    config: ReadThroughConfig,
    events: EventPublisher,
}

impl<V> ReadThroughCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn KeyValueStore<V>>) -> Self {
        Self::with_config(store, ReadThroughConfig::default())
    }

    pub fn with_config(store: Arc<dyn KeyValueStore<V>>, mut config: ReadThroughConfig) -> Self {
        if config.empty_ttl < MIN_EMPTY_TTL {
            warn!(
                "empty marker ttl {:?} is too short, using {MIN_EMPTY_TTL:?}",
                config.empty_ttl
            );
            config.empty_ttl = MIN_EMPTY_TTL;
        }
        Self {
            store,
            config,
            events: EventPublisher::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &ReadThroughConfig {
        &self.config
    }

    /// Reads `key`, loading it with `fallback` on a miss and caching it for the
    /// configured default TTL.
    pub async fn get<F, Fut, E>(&self, key: &str, fallback: F) -> std::result::Result<Option<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<V>, E>>,
        E: From<Error>,
    {
        self.get_with_ttl(key, self.config.default_ttl, fallback)
            .await
    }

    /// Like [`get`](Self::get) but the loaded value never expires.
    pub async fn get_not_timeout<F, Fut, E>(
        &self,
        key: &str,
        fallback: F,
    ) -> std::result::Result<Option<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<V>, E>>,
        E: From<Error>,
    {
        self.get_with_ttl(key, Ttl::Never, fallback).await
    }

    pub async fn get_with_ttl<F, Fut, E>(
        &self,
        key: &str,
        ttl: Ttl,
        fallback: F,
    ) -> std::result::Result<Option<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<V>, E>>,
        E: From<Error>,
    {
        // A single read both checks presence and fetches, so an entry expiring
        // in between is just a miss.
        match self.store.get(key).await? {
            Some(CacheEntry::Empty) => {
                info!("{key}: empty marker hit");
                self.events.publish(CacheEvent::EmptyHit(KeyEvent::new(key)));
                return Ok(None);
            }
            Some(CacheEntry::Value(value)) => {
                debug!("{key}: cache hit");
                return Ok(Some(value));
            }
            None => debug!("{key}: cache miss, loading from source"),
        }

        match fallback().await? {
            None => {
                self.store
                    .set(key, CacheEntry::Empty, Ttl::After(self.config.empty_ttl))
                    .await?;
                info!("{key}: no data at source, empty marker set");
                self.events
                    .publish(CacheEvent::EmptyMarked(KeyEvent::new(key)));
                Ok(None)
            }
            Some(value) => {
                self.store
                    .set(key, CacheEntry::Value(value.clone()), ttl)
                    .await?;
                debug!("{key}: loaded and cached (ttl: {ttl:?})");
                self.events.publish(CacheEvent::Loaded(LoadedEvent {
                    key: key.to_string(),
                    ttl_ms: ttl.as_millis(),
                    timestamp: now_timestamp_ms(),
                }));
                Ok(Some(value))
            }
        }
    }

    /// Whether the store currently holds anything for `key`, empty markers included.
    pub async fn contains(&self, key: &str) -> Result<bool> {
        self.store.has_key(key).await
    }
}

impl<V> std::fmt::Debug for ReadThroughCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadThroughCache")
            .field("config", &self.config)
            .finish()
    }
}

use crate::events::EventPublisher;
use crate::invalidation::DelayedInvalidator;
use crate::ports::KeyValueStore;
use crate::read_through::ReadThroughCache;
use crate::worker_pool::WorkerPool;
use shared::config::Config;
use shared::{Error, Result, Ttl};
use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

/// One logical cache: a single value type, an optional key namespace, and the
/// read and invalidation paths sharing one store and one worker pool.
#[derive(Clone, Debug)]
pub struct CacheAside<V> {
    namespace: Option<String>,
    reader: ReadThroughCache<V>,
    invalidator: DelayedInvalidator<V>,
}

impl<V> CacheAside<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn KeyValueStore<V>>, pool: WorkerPool, config: &Config) -> Self {
        Self {
            namespace: None,
            reader: ReadThroughCache::with_config(Arc::clone(&store), config.read_through),
            invalidator: DelayedInvalidator::with_config(store, pool, config.invalidation),
        }
    }

    /// Prefixes every key with `"{namespace}:"`.
    pub fn namespaced(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_event_broadcaster(mut self, sender: broadcast::Sender<crate::CacheEvent>) -> Self {
        let events = EventPublisher::new(sender);
        self.reader = self.reader.with_events(events.clone());
        self.invalidator = self.invalidator.with_events(events);
        self
    }

    /// The key as stored.
    pub fn store_key<'a>(&self, key: &'a str) -> Cow<'a, str> {
        match &self.namespace {
            Some(ns) => Cow::Owned(format!("{ns}:{key}")),
            None => Cow::Borrowed(key),
        }
    }

    pub async fn get<F, Fut, E>(&self, key: &str, fallback: F) -> std::result::Result<Option<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<V>, E>>,
        E: From<Error>,
    {
        self.reader.get(&self.store_key(key), fallback).await
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
        self.reader
            .get_with_ttl(&self.store_key(key), ttl, fallback)
            .await
    }

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
        self.reader
            .get_not_timeout(&self.store_key(key), fallback)
            .await
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        self.invalidator.remove(&self.store_key(key)).await
    }

    pub async fn remove_with<F, Fut, T, E>(&self, key: &str, mutate: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error>,
    {
        self.invalidator
            .remove_with(&self.store_key(key), mutate)
            .await
    }

    pub async fn contains(&self, key: &str) -> Result<bool> {
        self.reader.contains(&self.store_key(key)).await
    }
}

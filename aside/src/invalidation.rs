use crate::events::{
    CacheEvent, EventPublisher, InvalidatedEvent, RetryFailedEvent, RetryStoppedEvent,
    StopReason, now_timestamp_ms,
};
use crate::ports::KeyValueStore;
use crate::worker_pool::WorkerPool;
use shared::config::InvalidationConfig;
use shared::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Delayed double-delete.
///
/// `remove` deletes the key right away, runs the caller's write, then hands a
/// retry loop to the worker pool that deletes the key again `attempts` times,
/// `delay` apart. The re-deletes clear values that a concurrent reader loaded
/// from the source before the write became visible and cached afterwards.
#[derive(Clone)]
pub struct DelayedInvalidator<V> {
    store: Arc<dyn KeyValueStore<V>>,
    pool: WorkerPool,
    config: InvalidationConfig,
    events: EventPublisher,
}

impl<V> DelayedInvalidator<V>
where
    V: Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn KeyValueStore<V>>, pool: WorkerPool) -> Self {
        Self::with_config(store, pool, InvalidationConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn KeyValueStore<V>>,
        pool: WorkerPool,
        config: InvalidationConfig,
    ) -> Self {
        Self {
            store,
            pool,
            config,
            events: EventPublisher::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &InvalidationConfig {
        &self.config
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        self.remove_with(key, || async { Ok::<_, Error>(()) }).await
    }

    /// Deletes `key`, runs `mutate` and schedules the delayed re-deletes.
    ///
    /// Returns `mutate`'s result as soon as the retry loop is queued. An error from
    /// the first delete or from `mutate` is returned as is and nothing is scheduled.
    pub async fn remove_with<F, Fut, T, E>(&self, key: &str, mutate: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error>,
    {
        let existed = self.store.delete(key).await?;
        self.events.publish(CacheEvent::Invalidated(InvalidatedEvent {
            key: key.to_string(),
            attempt: 0,
            existed,
            timestamp: now_timestamp_ms(),
        }));

        let result = mutate().await?;
        self.schedule_retries(key).await;
        Ok(result)
    }

    async fn schedule_retries(&self, key: &str) {
        let retry = RetryLoop {
            store: Arc::clone(&self.store),
            key: key.to_string(),
            config: self.config,
            events: self.events.clone(),
        };

        match self.pool.submit(move |token| retry.run(token)).await {
            Ok(()) => debug!("{key}: delayed invalidation scheduled"),
            Err(err) => {
                warn!("{key}: delayed invalidation not scheduled: {err}");
                self.events.publish(CacheEvent::RetryStopped(RetryStoppedEvent {
                    key: key.to_string(),
                    completed_attempts: 0,
                    reason: StopReason::Rejected,
                    timestamp: now_timestamp_ms(),
                }));
            }
        }
    }
}

struct RetryLoop<V> {
    store: Arc<dyn KeyValueStore<V>>,
    key: String,
    config: InvalidationConfig,
    events: EventPublisher,
}

impl<V> RetryLoop<V>
where
    V: Send + Sync + 'static,
{
    async fn run(self, token: CancellationToken) {
        let key = &self.key;
        let mut consecutive_failures = 0;

        for attempt in 1..=self.config.attempts {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("{key}: delayed invalidation cancelled before attempt {attempt}");
                    self.stopped(attempt - 1, StopReason::Cancelled);
                    return;
                }
                _ = tokio::time::sleep(self.config.delay) => {}
            }

            match self.store.delete(key).await {
                Ok(existed) => {
                    consecutive_failures = 0;
                    if existed {
                        debug!("{key}: stale entry removed on attempt {attempt}");
                    }
                    self.events.publish(CacheEvent::Invalidated(InvalidatedEvent {
                        key: key.clone(),
                        attempt,
                        existed,
                        timestamp: now_timestamp_ms(),
                    }));
                }
                Err(err) => {
                    consecutive_failures += 1;
                    warn!(
                        "{key}: delayed delete attempt {attempt}/{} failed: {err}",
                        self.config.attempts
                    );
                    self.events.publish(CacheEvent::RetryFailed(RetryFailedEvent {
                        key: key.clone(),
                        attempt,
                        error: err.to_string(),
                        timestamp: now_timestamp_ms(),
                    }));

                    if self
                        .config
                        .max_consecutive_failures
                        .is_some_and(|limit| consecutive_failures >= limit)
                    {
                        error!(
                            "{key}: giving up delayed invalidation after {consecutive_failures} consecutive failures"
                        );
                        self.stopped(attempt, StopReason::TooManyFailures);
                        return;
                    }
                }
            }
        }
    }

    fn stopped(&self, completed_attempts: u32, reason: StopReason) {
        self.events.publish(CacheEvent::RetryStopped(RetryStoppedEvent {
            key: self.key.clone(),
            completed_attempts,
            reason,
            timestamp: now_timestamp_ms(),
        }));
    }
}

impl<V> std::fmt::Debug for DelayedInvalidator<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayedInvalidator")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish()
    }
}

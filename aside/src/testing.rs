// In-memory KeyValueStore double for unit tests.
//
// Expiry runs on tokio's clock so tests can use a paused runtime as a fake clock.
// Every call is recorded with its timestamp, and deletes/reads can be made to fail.

use crate::domain::CacheEntry;
use crate::ports::KeyValueStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use shared::{Error, Result, Ttl};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    HasKey(String),
    Get(String),
    Set(String, Option<Duration>),
    Delete(String),
    FailedDelete(String),
    Mark(&'static str),
}

pub struct RecordingStore<V> {
    entries: Mutex<HashMap<String, (CacheEntry<V>, Option<Instant>)>>,
    log: Mutex<Vec<(Op, Instant)>>,
    fail_reads: AtomicBool,
    failing_deletes: AtomicUsize,
}

impl<V> Default for RecordingStore<V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            fail_reads: AtomicBool::new(false),
            failing_deletes: AtomicUsize::new(0),
        }
    }
}

impl<V: Clone> RecordingStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an entry without recording an operation.
    pub fn seed(&self, key: &str, entry: CacheEntry<V>) {
        self.entries.lock().insert(key.to_string(), (entry, None));
    }

    pub fn peek(&self, key: &str) -> Option<CacheEntry<V>> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .filter(|(_, expires)| expires.is_none_or(|at| at > now))
            .map(|(entry, _)| entry.clone())
    }

    /// Records a caller-side step so it can be ordered against store calls.
    pub fn mark(&self, label: &'static str) {
        self.record(Op::Mark(label));
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `count` deletes fail.
    pub fn fail_next_deletes(&self, count: usize) {
        self.failing_deletes.store(count, Ordering::SeqCst);
    }

    pub fn ops(&self) -> Vec<Op> {
        self.log.lock().iter().map(|(op, _)| op.clone()).collect()
    }

    /// Timestamps of successful deletes of `key`.
    pub fn delete_times(&self, key: &str) -> Vec<Instant> {
        self.log
            .lock()
            .iter()
            .filter(|(op, _)| matches!(op, Op::Delete(k) if k == key))
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn count(&self, wanted: impl Fn(&Op) -> bool) -> usize {
        self.log.lock().iter().filter(|(op, _)| wanted(op)).count()
    }

    fn record(&self, op: Op) {
        self.log.lock().push((op, Instant::now()));
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl<V> KeyValueStore<V> for RecordingStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn has_key(&self, key: &str) -> Result<bool> {
        self.record(Op::HasKey(key.to_string()));
        self.check_reads()?;
        Ok(self.peek(key).is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>> {
        self.record(Op::Get(key.to_string()));
        self.check_reads()?;
        Ok(self.peek(key))
    }

    async fn set(&self, key: &str, entry: CacheEntry<V>, ttl: Ttl) -> Result<()> {
        self.record(Op::Set(key.to_string(), ttl.as_duration()));
        self.check_reads()?;
        let expires = ttl.as_duration().map(|d| Instant::now() + d);
        self.entries.lock().insert(key.to_string(), (entry, expires));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let should_fail = self
            .failing_deletes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            self.record(Op::FailedDelete(key.to_string()));
            return Err(Error::StoreUnavailable("delete timed out".into()));
        }
        self.record(Op::Delete(key.to_string()));
        Ok(self.entries.lock().remove(key).is_some())
    }
}

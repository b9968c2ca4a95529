use crate::{Error, Result, Ttl};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// What `WorkerPool::submit` does when every worker is busy and the queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Fail the submission with `Error::PoolSaturated`.
    Reject,
    /// Wait for queue space.
    Block,
}

impl FromStr for OverflowPolicy {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(OverflowPolicy::Reject),
            "block" => Ok(OverflowPolicy::Block),
            other => Err(Error::Config(format!("unknown overflow policy '{other}'"))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub core_workers: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
    pub keep_alive: Duration,
    pub overflow: OverflowPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_workers: 5,
            max_workers: 10,
            queue_capacity: 100,
            keep_alive: Duration::from_secs(60),
            overflow: OverflowPolicy::Reject,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::Config("max_workers must be at least 1".into()));
        }
        if self.core_workers > self.max_workers {
            return Err(Error::Config(format!(
                "core_workers ({}) exceeds max_workers ({})",
                self.core_workers, self.max_workers
            )));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct InvalidationConfig {
    pub attempts: u32,
    pub delay: Duration,
    /// Stop a retry loop after this many consecutive delete failures. `None` keeps going.
    pub max_consecutive_failures: Option<u32>,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(1),
            max_consecutive_failures: None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ReadThroughConfig {
    pub default_ttl: Ttl,
    pub empty_ttl: Duration,
}

impl Default for ReadThroughConfig {
    fn default() -> Self {
        Self {
            default_ttl: Ttl::minutes(30),
            empty_ttl: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Config {
    pub pool: PoolConfig,
    pub invalidation: InvalidationConfig,
    pub read_through: ReadThroughConfig,
    pub store_max_entries: Option<u64>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from any variable source, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let pool = PoolConfig {
            core_workers: parse_or(&read, "ASIDE_POOL_CORE_WORKERS", defaults.pool.core_workers),
            max_workers: parse_or(&read, "ASIDE_POOL_MAX_WORKERS", defaults.pool.max_workers),
            queue_capacity: parse_or(
                &read,
                "ASIDE_POOL_QUEUE_CAPACITY",
                defaults.pool.queue_capacity,
            ),
            keep_alive: Duration::from_millis(parse_or(
                &read,
                "ASIDE_POOL_KEEP_ALIVE_MS",
                defaults.pool.keep_alive.as_millis() as u64,
            )),
            overflow: parse_or(&read, "ASIDE_POOL_OVERFLOW", defaults.pool.overflow),
        };

        let invalidation = InvalidationConfig {
            attempts: parse_or(&read, "ASIDE_RETRY_ATTEMPTS", defaults.invalidation.attempts),
            delay: Duration::from_millis(parse_or(
                &read,
                "ASIDE_RETRY_DELAY_MS",
                defaults.invalidation.delay.as_millis() as u64,
            )),
            max_consecutive_failures: read("ASIDE_RETRY_MAX_CONSECUTIVE_FAILURES")
                .and_then(|raw| parse_value(&raw, "ASIDE_RETRY_MAX_CONSECUTIVE_FAILURES")),
        };

        let read_through = ReadThroughConfig {
            default_ttl: read("ASIDE_DATA_TTL_SECS")
                .and_then(|raw| parse_value::<i64>(&raw, "ASIDE_DATA_TTL_SECS"))
                .map(|secs| Ttl::new(secs, crate::TimeUnit::Seconds))
                .unwrap_or(defaults.read_through.default_ttl),
            empty_ttl: Duration::from_secs(parse_or(
                &read,
                "ASIDE_EMPTY_TTL_SECS",
                defaults.read_through.empty_ttl.as_secs(),
            )),
        };

        Self {
            pool,
            invalidation,
            read_through,
            store_max_entries: read("ASIDE_STORE_MAX_ENTRIES")
                .and_then(|raw| parse_value(&raw, "ASIDE_STORE_MAX_ENTRIES")),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;
        if self.invalidation.attempts == 0 {
            return Err(Error::Config("retry attempts must be at least 1".into()));
        }
        if self.read_through.empty_ttl.is_zero() {
            return Err(Error::Config("empty marker ttl must be positive".into()));
        }
        Ok(())
    }
}

fn parse_or<T, F>(read: &F, name: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    read(name)
        .and_then(|raw| parse_value(&raw, name))
        .unwrap_or(default)
}

fn parse_value<T: FromStr>(raw: &str, name: &str) -> Option<T> {
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("{name}={raw:?} is not valid, using default");
            None
        }
    }
}

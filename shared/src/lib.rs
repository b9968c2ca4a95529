// shared/src/lib.rs

use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("worker pool saturated: {queued} tasks queued, {workers} workers busy")]
    PoolSaturated { queued: usize, workers: usize },
    #[error("worker pool is shut down")]
    PoolClosed,
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    pub fn to_duration(self, amount: u64) -> Duration {
        match self {
            TimeUnit::Milliseconds => Duration::from_millis(amount),
            TimeUnit::Seconds => Duration::from_secs(amount),
            TimeUnit::Minutes => Duration::from_secs(amount.saturating_mul(60)),
            TimeUnit::Hours => Duration::from_secs(amount.saturating_mul(3_600)),
            TimeUnit::Days => Duration::from_secs(amount.saturating_mul(86_400)),
        }
    }
}

/// Expiry policy for a stored entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ttl {
    Never,
    After(Duration),
}

impl Ttl {
    /// A non-positive timeout means the entry never expires.
    pub fn new(timeout: i64, unit: TimeUnit) -> Self {
        if timeout <= 0 {
            Ttl::Never
        } else {
            Ttl::After(unit.to_duration(timeout as u64))
        }
    }

    pub fn minutes(timeout: i64) -> Self {
        Self::new(timeout, TimeUnit::Minutes)
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Ttl::Never => None,
            Ttl::After(d) if d.is_zero() => None,
            Ttl::After(d) => Some(*d),
        }
    }

    pub fn as_millis(&self) -> Option<u64> {
        self.as_duration().map(|d| d.as_millis() as u64)
    }
}

pub mod config;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_positive_timeout_never_expires() {
        assert_eq!(Ttl::new(0, TimeUnit::Minutes), Ttl::Never);
        assert_eq!(Ttl::new(-3, TimeUnit::Seconds), Ttl::Never);
        assert_eq!(Ttl::new(0, TimeUnit::Days).as_duration(), None);
    }

    #[test]
    fn test_positive_timeout_uses_unit() {
        assert_eq!(
            Ttl::new(5, TimeUnit::Seconds).as_duration(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(Ttl::minutes(30).as_millis(), Some(30 * 60 * 1000));
        assert_eq!(
            Ttl::new(2, TimeUnit::Hours),
            Ttl::After(Duration::from_secs(7_200))
        );
    }

    #[test]
    fn test_zero_duration_is_treated_as_never() {
        assert_eq!(Ttl::After(Duration::ZERO).as_duration(), None);
    }
}

//! Cache-aside reads with empty-value marking, and delayed double-delete
//! invalidation executed on a bounded worker pool.

pub mod domain;
pub mod events;
pub mod facade;
pub mod invalidation;
pub mod ports;
pub mod read_through;
pub mod worker_pool;

#[cfg(test)]
pub(crate) mod testing;

pub use domain::CacheEntry;
pub use events::{CacheEvent, EventPublisher, StopReason};
pub use facade::CacheAside;
pub use invalidation::DelayedInvalidator;
pub use ports::KeyValueStore;
pub use read_through::ReadThroughCache;
pub use worker_pool::WorkerPool;

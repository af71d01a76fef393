//! # tagscout-cache
//!
//! Durable key/value cache with optional per-entry expiry, backing every
//! expensive registry call.
//!
//! Entries live in SQLite, split over two partitions that are always updated
//! in the same transaction:
//!
//! - `cache_values`: payload bytes and bookkeeping
//! - `cache_expiry`: absolute expiry for entries that have one
//!
//! Reads check expiry themselves, so an expired entry is absent the moment
//! its deadline passes. A background sweeper periodically deletes expired
//! rows from both partitions to keep the database small; correctness never
//! depends on it having run.
//!
//! The database runs in WAL mode. Reads use a pool of read-only connections
//! and do not block each other; writes are serialized through a single
//! writer connection.

mod error;
mod store;
mod sweeper;

pub use error::CacheError;
pub use store::{Cache, CacheConfig, CacheStat, CacheStats};

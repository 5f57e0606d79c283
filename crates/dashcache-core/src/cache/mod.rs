//! In-memory TTL cache backing the prefetch layer.
//!
//! This module provides the `TtlCache` store, keyed by resource identifier.
//! Entries are considered fresh while younger than their own TTL; there is
//! no global staleness window. Nothing here is persisted: the cache is
//! rebuilt from fetches on every process start.

pub mod entry;
pub mod store;

pub use entry::{format_age, CacheEntry};
pub use store::TtlCache;

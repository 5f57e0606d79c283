//! Prefetch layer: coalesced fetching over the TTL cache.
//!
//! This module provides:
//! - `FetchCoordinator`: cache-first resolution, one in-flight fetch per key
//! - `PrefetchRegistry`: resource key -> loader directory
//! - `HoverScheduler`: cancellable delayed prefetch for hover/idle triggers
//! - `Query`: the per-screen consumption binding

pub mod coordinator;
pub mod fetch;
pub mod query;
pub mod registry;
pub mod scheduler;

pub use coordinator::{FetchCoordinator, FetchResult, Resolution, ResolveOptions};
pub use fetch::{fetch_fn, FetchFn, FetchFuture};
pub use query::{Query, QueryState};
pub use registry::PrefetchRegistry;
pub use scheduler::{HoverScheduler, ScheduledPrefetch};

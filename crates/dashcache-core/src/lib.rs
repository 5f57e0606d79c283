//! dashcache core - client-side data access for dashboard views.
//!
//! This crate provides:
//! - `cache`: a keyed store of fetched values with per-entry TTL
//! - `prefetch`: fetch coalescing, a registry of named loaders, hover
//!   prefetch scheduling and a watchable query adapter
//! - `session`: several concurrently held sessions, one active at a time,
//!   persisted across restarts
//! - `api`: an HTTP fetcher authorized by the active session
//!
//! Frontends (the `dashcache` CLI) wire these together and own all IO
//! beyond session storage.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod prefetch;
pub mod session;

pub use api::{ApiClient, ApiError, CredentialSource};
pub use cache::{CacheEntry, TtlCache};
pub use config::{Config, PrefetchConfig, StorageBackend, APP_NAME};
pub use error::{FetchError, PrefetchError, SessionError, StorageError};
pub use events::{CacheEvent, EventBus, SessionEvent};
pub use prefetch::{
    fetch_fn, FetchCoordinator, FetchFn, FetchResult, HoverScheduler, PrefetchRegistry, Query,
    QueryState, Resolution, ResolveOptions, ScheduledPrefetch,
};
pub use session::{
    Account, Credential, IdentityClass, JsonFileStorage, KeyringStorage, MemoryStorage, Session,
    SessionKey, SessionStorage, SessionStore, Switchboard,
};

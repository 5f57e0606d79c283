//! Fetch coordination: cache-first resolution with in-flight coalescing.
//!
//! For a given key at most one fetch runs at a time. Every caller that
//! arrives while it runs attaches to the same `Shared` handle and receives
//! the same value or the same error. The fetch itself runs on a spawned
//! task, so it completes and populates the cache even if every caller has
//! gone away.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::fetch::FetchFn;
use crate::cache::TtlCache;
use crate::error::FetchError;
use crate::events::CacheEvent;

pub type FetchResult<V> = Result<Arc<V>, FetchError>;

pub type SharedFetch<V> = Shared<BoxFuture<'static, FetchResult<V>>>;

struct InFlight<V> {
    id: u64,
    handle: SharedFetch<V>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Skip the freshness check and go to the network.
    pub force: bool,
}

impl ResolveOptions {
    pub fn forced() -> Self {
        Self { force: true }
    }
}

/// What a resolve found before any awaiting happened.
pub enum Resolution<V> {
    Cached(Arc<V>),
    Pending(SharedFetch<V>),
}

impl<V: Send + Sync + 'static> Resolution<V> {
    pub async fn wait(self) -> FetchResult<V> {
        match self {
            Resolution::Cached(value) => Ok(value),
            Resolution::Pending(handle) => handle.await,
        }
    }
}

pub struct FetchCoordinator<V> {
    cache: TtlCache<V>,
    in_flight: Arc<Mutex<HashMap<String, InFlight<V>>>>,
    next_id: Arc<AtomicU64>,
}

impl<V> Clone for FetchCoordinator<V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            in_flight: Arc::clone(&self.in_flight),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<V: Send + Sync + 'static> FetchCoordinator<V> {
    pub fn new(cache: TtlCache<V>) -> Self {
        Self {
            cache,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn cache(&self) -> &TtlCache<V> {
        &self.cache
    }

    /// Return the cached value for `key`, or fetch it once for all callers.
    pub async fn resolve(
        &self,
        key: &str,
        fetch: &FetchFn<V>,
        ttl: Duration,
        options: ResolveOptions,
    ) -> FetchResult<V> {
        self.begin(key, fetch, ttl, options).wait().await
    }

    /// Synchronous half of [`resolve`](Self::resolve): answer from the cache,
    /// attach to the running fetch, or start one. Must be called from within
    /// a tokio runtime.
    pub fn begin(
        &self,
        key: &str,
        fetch: &FetchFn<V>,
        ttl: Duration,
        options: ResolveOptions,
    ) -> Resolution<V> {
        let mut in_flight = self.in_flight.lock();

        if !options.force {
            if let Some(value) = self.cache.get(key) {
                debug!(key = %key, "Cache hit");
                return Resolution::Cached(value);
            }
        }

        if let Some(running) = in_flight.get(key) {
            debug!(key = %key, forced = options.force, "Attaching to in-flight fetch");
            return Resolution::Pending(running.handle.clone());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = self.spawn_fetch(key, id, fetch, ttl);
        in_flight.insert(
            key.to_string(),
            InFlight {
                id,
                handle: handle.clone(),
            },
        );
        debug!(key = %key, forced = options.force, "Fetch started");
        Resolution::Pending(handle)
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.lock().contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Drop the cached entry for `key`. A fetch already running is unaffected.
    pub fn invalidate(&self, key: &str) -> bool {
        self.cache.invalidate(key)
    }

    fn spawn_fetch(&self, key: &str, id: u64, fetch: &FetchFn<V>, ttl: Duration) -> SharedFetch<V> {
        let fetch = fetch.clone();
        let cache = self.cache.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let task_key = key.to_string();

        let task = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(fetch.call()).catch_unwind().await;

            // Settle under the in-flight lock so a caller can never see
            // "no marker" together with "no fresh value" for a fetch that
            // just succeeded.
            let mut guard = in_flight.lock();
            let result = match outcome {
                Ok(Ok(value)) => Ok(cache.put(&task_key, value, ttl)),
                Ok(Err(e)) => {
                    warn!(key = %task_key, error = %e, "Fetch failed, keeping previous cache state");
                    Err(FetchError::failed(&task_key, e))
                }
                Err(_) => {
                    warn!(key = %task_key, "Fetch panicked");
                    Err(FetchError::Aborted {
                        key: task_key.clone(),
                    })
                }
            };
            if guard.get(&task_key).map(|f| f.id) == Some(id) {
                guard.remove(&task_key);
            }
            drop(guard);

            if result.is_ok() {
                cache.events().publish(CacheEvent::Populated {
                    key: task_key.clone(),
                });
            }
            result
        });

        let join_key = key.to_string();
        let in_flight = Arc::clone(&self.in_flight);
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(key = %join_key, error = %e, "Fetch task did not complete");
                    let mut guard = in_flight.lock();
                    if guard.get(&join_key).map(|f| f.id) == Some(id) {
                        guard.remove(&join_key);
                    }
                    drop(guard);
                    Err(FetchError::Aborted { key: join_key })
                }
            }
        }
        .boxed()
        .shared()
    }
}

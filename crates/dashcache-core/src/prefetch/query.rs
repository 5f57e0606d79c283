//! Per-screen binding over the coordinator.
//!
//! A screen mounts a `Query` for its resource and renders from
//! [`Query::state`]. Cached data is served on the spot; otherwise the query
//! reports `loading` until the foreground fetch settles. State changes are
//! published on a `watch` channel so the view can re-render on completion.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::coordinator::{FetchCoordinator, FetchResult, ResolveOptions};
use super::fetch::FetchFn;
use super::registry::PrefetchRegistry;
use crate::error::FetchError;

pub struct QueryState<V> {
    pub data: Option<Arc<V>>,
    /// No data yet and a foreground fetch is running.
    pub loading: bool,
    /// A refresh is running behind data already on screen.
    pub refreshing: bool,
    pub error: Option<FetchError>,
    pub updated_at: Option<Instant>,
}

impl<V> Clone for QueryState<V> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            loading: self.loading,
            refreshing: self.refreshing,
            error: self.error.clone(),
            updated_at: self.updated_at,
        }
    }
}

impl<V> Default for QueryState<V> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            refreshing: false,
            error: None,
            updated_at: None,
        }
    }
}

impl<V> fmt::Debug for QueryState<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryState")
            .field("has_data", &self.data.is_some())
            .field("loading", &self.loading)
            .field("refreshing", &self.refreshing)
            .field("error", &self.error)
            .finish()
    }
}

impl<V> QueryState<V> {
    /// Neither loading nor refreshing.
    pub fn is_settled(&self) -> bool {
        !self.loading && !self.refreshing
    }
}

pub struct Query<V> {
    key: String,
    fetch: FetchFn<V>,
    ttl: Duration,
    coordinator: FetchCoordinator<V>,
    state: Arc<watch::Sender<QueryState<V>>>,
}

impl<V: Send + Sync + 'static> Query<V> {
    /// Bind a screen to `key`. Must be called from within a tokio runtime.
    pub fn mount(
        coordinator: FetchCoordinator<V>,
        key: impl Into<String>,
        fetch: FetchFn<V>,
        ttl: Duration,
    ) -> Self {
        let key = key.into();
        let cached = coordinator.cache().get(&key);
        let background = cached.is_some();

        let initial = QueryState {
            loading: !background,
            refreshing: background,
            updated_at: cached.as_ref().map(|_| Instant::now()),
            data: cached,
            error: None,
        };
        let (tx, _) = watch::channel(initial);

        let query = Self {
            key,
            fetch,
            ttl,
            coordinator,
            state: Arc::new(tx),
        };
        debug!(key = %query.key, cached = background, "Query mounted");
        query.spawn_reconcile(background);
        query
    }

    /// Bind to a key whose loader lives in `registry`. `None` if unregistered.
    pub fn mount_registered(registry: &PrefetchRegistry<V>, key: &str) -> Option<Self> {
        let Some((fetch, ttl)) = registry.lookup(key) else {
            warn!(key = %key, "Cannot mount query, no loader registered");
            return None;
        };
        Some(Self::mount(registry.coordinator().clone(), key, fetch, ttl))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> QueryState<V> {
        self.state.borrow().clone()
    }

    pub fn data(&self) -> Option<Arc<V>> {
        self.state.borrow().data.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueryState<V>> {
        self.state.subscribe()
    }

    /// Force a network call and update state with the outcome.
    pub async fn refetch(&self) -> FetchResult<V> {
        self.state.send_modify(|s| {
            if s.data.is_some() {
                s.refreshing = true;
            } else {
                s.loading = true;
            }
        });

        let result = self
            .coordinator
            .resolve(&self.key, &self.fetch, self.ttl, ResolveOptions::forced())
            .await;
        Self::apply(&self.state, &result, false);
        result
    }

    /// Drop the cached entry for this key without fetching. What is on
    /// screen stays until the next fetch.
    pub fn invalidate(&self) -> bool {
        self.coordinator.invalidate(&self.key)
    }

    fn spawn_reconcile(&self, background: bool) {
        let coordinator = self.coordinator.clone();
        let fetch = self.fetch.clone();
        let key = self.key.clone();
        let ttl = self.ttl;
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let result = coordinator
                .resolve(&key, &fetch, ttl, ResolveOptions::default())
                .await;
            if let Err(ref e) = result {
                if background {
                    warn!(key = %key, error = %e, "Background refresh failed, keeping rendered data");
                }
            }
            Self::apply(&state, &result, background);
        });
    }

    fn apply(state: &watch::Sender<QueryState<V>>, result: &FetchResult<V>, background: bool) {
        state.send_modify(|s| {
            s.loading = false;
            s.refreshing = false;
            match result {
                Ok(value) => {
                    s.data = Some(Arc::clone(value));
                    s.error = None;
                    s.updated_at = Some(Instant::now());
                }
                // Background failures never disturb what is rendered
                Err(_) if background => {}
                Err(e) => s.error = Some(e.clone()),
            }
        });
    }
}

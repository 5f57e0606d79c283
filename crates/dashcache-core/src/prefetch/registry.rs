use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::coordinator::{FetchCoordinator, ResolveOptions};
use super::fetch::FetchFn;
use crate::config::PrefetchConfig;
use crate::error::PrefetchError;

struct RegistryEntry<V> {
    fetch: FetchFn<V>,
    ttl: Option<Duration>,
}

/// Directory of "what can be prefetched", keyed by resource identifier.
///
/// Screens register their loaders once; hover handlers and idle tasks
/// elsewhere only need the key. Clone is cheap and clones share entries.
pub struct PrefetchRegistry<V> {
    coordinator: FetchCoordinator<V>,
    entries: Arc<RwLock<HashMap<String, RegistryEntry<V>>>>,
    config: Arc<PrefetchConfig>,
}

impl<V> Clone for PrefetchRegistry<V> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            entries: Arc::clone(&self.entries),
            config: Arc::clone(&self.config),
        }
    }
}

impl<V: Send + Sync + 'static> PrefetchRegistry<V> {
    pub fn new(coordinator: FetchCoordinator<V>, config: PrefetchConfig) -> Self {
        Self {
            coordinator,
            entries: Arc::new(RwLock::new(HashMap::new())),
            config: Arc::new(config),
        }
    }

    pub fn coordinator(&self) -> &FetchCoordinator<V> {
        &self.coordinator
    }

    pub fn config(&self) -> &PrefetchConfig {
        &self.config
    }

    /// Register (or replace) the loader for `key`, using the configured TTL.
    pub fn register(&self, key: impl Into<String>, fetch: FetchFn<V>) {
        self.insert(key.into(), RegistryEntry { fetch, ttl: None });
    }

    /// Register (or replace) the loader for `key` with an explicit TTL.
    pub fn register_with_ttl(&self, key: impl Into<String>, fetch: FetchFn<V>, ttl: Duration) {
        self.insert(
            key.into(),
            RegistryEntry {
                fetch,
                ttl: Some(ttl),
            },
        );
    }

    fn insert(&self, key: String, entry: RegistryEntry<V>) {
        let replaced = self.entries.write().insert(key.clone(), entry).is_some();
        debug!(key = %key, replaced, "Prefetch loader registered");
    }

    pub fn unregister(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    pub fn is_registered(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Loader and effective TTL for `key`.
    pub fn lookup(&self, key: &str) -> Option<(FetchFn<V>, Duration)> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        let ttl = entry.ttl.unwrap_or_else(|| self.config.ttl_for(key));
        Some((entry.fetch.clone(), ttl))
    }

    /// Best-effort warm-up of `key`. Never fails: a missing loader or a
    /// failed fetch is logged and reported as `None`.
    pub async fn prefetch(&self, key: &str) -> Option<Arc<V>> {
        match self.try_prefetch(key).await {
            Ok(value) => Some(value),
            Err(PrefetchError::Unregistered(_)) => {
                warn!(key = %key, "No prefetch loader registered, skipping");
                None
            }
            Err(PrefetchError::Fetch(e)) => {
                warn!(key = %key, error = %e, "Prefetch failed");
                None
            }
        }
    }

    /// Like [`prefetch`](Self::prefetch), surfacing why nothing came back.
    pub async fn try_prefetch(&self, key: &str) -> Result<Arc<V>, PrefetchError> {
        let (fetch, ttl) = self
            .lookup(key)
            .ok_or_else(|| PrefetchError::Unregistered(key.to_string()))?;
        let value = self
            .coordinator
            .resolve(key, &fetch, ttl, ResolveOptions::default())
            .await?;
        Ok(value)
    }

    /// Prefetch several keys concurrently, in input order.
    pub async fn prefetch_many<I, S>(&self, keys: I) -> Vec<(String, Option<Arc<V>>)>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        let futures = keys.iter().map(|key| self.prefetch(key));
        let results = futures::future::join_all(futures).await;
        keys.into_iter().zip(results).collect()
    }
}

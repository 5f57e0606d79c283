use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use super::entry::CacheEntry;
use crate::events::{CacheEvent, EventBus};

struct Slot<V> {
    entry: CacheEntry<V>,
    generation: u64,
    expiry: Option<AbortHandle>,
}

impl<V> Slot<V> {
    fn disarm(&mut self) {
        if let Some(handle) = self.expiry.take() {
            handle.abort();
        }
    }
}

struct Inner<V> {
    slots: HashMap<String, Slot<V>>,
    next_generation: u64,
}

/// In-memory key/value store with per-entry time-to-live.
///
/// Clone is cheap; clones share the same entries. Expired entries are
/// dropped lazily on read, and also by a timer armed at `stored_at + ttl`
/// whenever a tokio runtime is available to run it. A TTL too large to
/// add to the clock gets no timer and never expires.
pub struct TtlCache<V> {
    inner: Arc<Mutex<Inner<V>>>,
    events: EventBus<CacheEvent>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            events: self.events.clone(),
        }
    }
}

impl<V: Send + Sync + 'static> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Send + Sync + 'static> TtlCache<V> {
    pub fn new() -> Self {
        Self::with_events(EventBus::new())
    }

    pub fn with_events(events: EventBus<CacheEvent>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                slots: HashMap::new(),
                next_generation: 0,
            })),
            events,
        }
    }

    pub fn events(&self) -> &EventBus<CacheEvent> {
        &self.events
    }

    /// Store or replace `key`, re-arming its expiry.
    pub fn put(&self, key: &str, value: V, ttl: Duration) -> Arc<V> {
        self.put_shared(key, Arc::new(value), ttl)
    }

    /// Like [`put`](Self::put) for a value that is already shared.
    pub fn put_shared(&self, key: &str, value: Arc<V>, ttl: Duration) -> Arc<V> {
        let entry = CacheEntry::new(key, Arc::clone(&value), ttl);
        let expires_at = entry.expires_at();

        let mut inner = self.inner.lock();
        inner.next_generation += 1;
        let generation = inner.next_generation;

        let handle = Handle::try_current().ok();
        let expiry = handle.zip(expires_at).map(|(handle, expires_at)| {
            let weak = Arc::downgrade(&self.inner);
            let events = self.events.clone();
            let key = key.to_string();
            handle
                .spawn(async move {
                    tokio::time::sleep_until(expires_at).await;
                    Self::expire(weak, &key, generation, &events);
                })
                .abort_handle()
        });

        let slot = Slot {
            entry,
            generation,
            expiry,
        };
        if let Some(mut previous) = inner.slots.insert(key.to_string(), slot) {
            previous.disarm();
        }
        drop(inner);

        debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "Cache entry stored");
        value
    }

    /// Fresh value for `key`, evicting the entry if it has gone stale.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        self.entry(key).map(|entry| entry.value)
    }

    /// Fresh entry snapshot for `key` (value plus timing metadata).
    pub fn entry(&self, key: &str) -> Option<CacheEntry<V>> {
        let mut inner = self.inner.lock();
        let fresh = inner.slots.get(key).map(|slot| slot.entry.is_fresh())?;
        if fresh {
            return inner.slots.get(key).map(|slot| slot.entry.clone());
        }

        if let Some(mut slot) = inner.slots.remove(key) {
            slot.disarm();
        }
        drop(inner);
        trace!(key = %key, "Evicted stale cache entry on read");
        self.events.publish(CacheEvent::Expired {
            key: key.to_string(),
        });
        None
    }

    pub fn is_fresh(&self, key: &str) -> bool {
        self.inner
            .lock()
            .slots
            .get(key)
            .map(|slot| slot.entry.is_fresh())
            .unwrap_or(false)
    }

    /// Remove `key` regardless of freshness. Returns whether an entry existed.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.inner.lock().slots.remove(key);
        match removed {
            Some(mut slot) => {
                slot.disarm();
                debug!(key = %key, "Cache entry invalidated");
                self.events.publish(CacheEvent::Invalidated {
                    key: key.to_string(),
                });
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let drained: Vec<Slot<V>> = {
            let mut inner = self.inner.lock();
            inner.slots.drain().map(|(_, slot)| slot).collect()
        };
        for mut slot in drained {
            slot.disarm();
            self.events.publish(CacheEvent::Invalidated {
                key: slot.entry.key,
            });
        }
    }

    /// Drop every stale entry now. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let stale: Vec<Slot<V>> = {
            let mut inner = self.inner.lock();
            let keys: Vec<String> = inner
                .slots
                .iter()
                .filter(|(_, slot)| !slot.entry.is_fresh())
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter()
                .filter_map(|key| inner.slots.remove(key))
                .collect()
        };
        let count = stale.len();
        for mut slot in stale {
            slot.disarm();
            self.events.publish(CacheEvent::Expired {
                key: slot.entry.key,
            });
        }
        count
    }

    /// Number of entries currently held, fresh or not yet evicted.
    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.lock().slots.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn expire(
        inner: Weak<Mutex<Inner<V>>>,
        key: &str,
        generation: u64,
        events: &EventBus<CacheEvent>,
    ) {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let mut guard = inner.lock();
        // A newer put owns the slot now
        let current = guard.slots.get(key).map(|slot| slot.generation);
        if current != Some(generation) {
            return;
        }
        guard.slots.remove(key);
        drop(guard);

        trace!(key = %key, "Cache entry expired");
        events.publish(CacheEvent::Expired {
            key: key.to_string(),
        });
    }
}

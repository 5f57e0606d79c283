//! Change notifications published to interested UI code.
//!
//! Both subsystems publish over `tokio::sync::broadcast`. A slow subscriber
//! only loses old notifications (`RecvError::Lagged`), it never blocks a
//! publisher.

use tokio::sync::broadcast;
use tracing::trace;

/// Buffer size for notification channels
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A fetch completed and its value was stored.
    Populated { key: String },
    /// An entry was removed on request.
    Invalidated { key: String },
    /// An entry reached its TTL and was evicted.
    Expired { key: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { key: String },
    Switched { key: String },
    LoggedOut { key: String },
    LoggedOutAll,
    /// The persisted table was loaded at boot.
    Restored { count: usize },
}

/// Thin wrapper over a broadcast sender that tolerates having no listeners.
#[derive(Debug, Clone)]
pub struct EventBus<E> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: E) {
        // No receivers is the common case outside the UI
        if self.tx.send(event).is_err() {
            trace!("Event published with no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

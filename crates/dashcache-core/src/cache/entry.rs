use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// A cached value and the moment it was stored.
///
/// The value is shared behind an `Arc` and never mutated; a newer fetch
/// replaces the whole entry.
#[derive(Debug)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: Arc<V>,
    pub stored_at: Instant,
    pub ttl: Duration,
}

impl<V> Clone for CacheEntry<V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            value: Arc::clone(&self.value),
            stored_at: self.stored_at,
            ttl: self.ttl,
        }
    }
}

impl<V> CacheEntry<V> {
    pub fn new(key: impl Into<String>, value: Arc<V>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value,
            stored_at: Instant::now(),
            ttl,
        }
    }

    pub fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }

    pub fn is_fresh(&self) -> bool {
        self.age() < self.ttl
    }

    /// `None` when the TTL reaches past what the clock can represent; such
    /// an entry never goes stale.
    pub fn expires_at(&self) -> Option<Instant> {
        self.stored_at.checked_add(self.ttl)
    }

    /// Time left before the entry goes stale, zero once it has.
    pub fn remaining(&self) -> Duration {
        self.ttl.saturating_sub(self.age())
    }

    pub fn age_display(&self) -> String {
        format_age(self.age())
    }
}

/// Render an age for status lines: "just now", "5m ago", "2h ago", "3d ago".
pub fn format_age(age: Duration) -> String {
    let minutes = age.as_secs() / 60;
    if minutes < 1 {
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        let remaining_mins = minutes % 60;
        if remaining_mins >= 30 {
            // Round up: 1h 30m+ becomes 2h
            format!("{}h ago", hours + 1)
        } else {
            format!("{}h ago", hours)
        }
    } else {
        let days = minutes / 1440;
        let remaining_hours = (minutes % 1440) / 60;
        if remaining_hours >= 12 {
            format!("{}d ago", days + 1)
        } else {
            format!("{}d ago", days)
        }
    }
}

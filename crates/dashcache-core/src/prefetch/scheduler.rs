use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::coordinator::ResolveOptions;
use super::fetch::FetchFn;
use super::registry::PrefetchRegistry;

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// Handle to one delayed prefetch.
///
/// Dropping the handle does not cancel the timer; only [`cancel`](Self::cancel)
/// does.
pub struct ScheduledPrefetch {
    key: String,
    state: Arc<AtomicU8>,
    wake: Mutex<Option<oneshot::Sender<()>>>,
    task: JoinHandle<()>,
}

impl ScheduledPrefetch {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stop the timer. Returns false (and does nothing) once it has fired
    /// or was already cancelled.
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if cancelled {
            if let Some(wake) = self.wake.lock().take() {
                let _ = wake.send(());
            }
            debug!(key = %self.key, "Scheduled prefetch cancelled");
        }
        cancelled
    }

    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// Wait until the timer was cancelled, or fired and its fetch settled.
    pub async fn finished(self) {
        let _ = self.task.await;
    }
}

/// Turns hover/focus dwell into background prefetches.
pub struct HoverScheduler<V> {
    registry: PrefetchRegistry<V>,
}

impl<V> Clone for HoverScheduler<V> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<V: Send + Sync + 'static> HoverScheduler<V> {
    pub fn new(registry: PrefetchRegistry<V>) -> Self {
        Self { registry }
    }

    /// Configured dwell time before a hover turns into a prefetch.
    pub fn hover_delay(&self) -> Duration {
        self.registry.config().hover_delay()
    }

    /// After `delay`, fetch `key` with `fetch` unless cancelled first.
    pub fn schedule(&self, key: &str, fetch: FetchFn<V>, delay: Duration) -> ScheduledPrefetch {
        let coordinator = self.registry.coordinator().clone();
        let ttl = self.registry.config().ttl_for(key);
        let task_key = key.to_string();
        self.arm(key, delay, async move {
            if let Err(e) = coordinator
                .resolve(&task_key, &fetch, ttl, ResolveOptions::default())
                .await
            {
                debug!(key = %task_key, error = %e, "Background prefetch failed");
            }
        })
    }

    /// After `delay`, prefetch `key` through its registered loader. The
    /// loader is looked up when the timer fires, not now.
    pub fn schedule_registered(&self, key: &str, delay: Duration) -> ScheduledPrefetch {
        let registry = self.registry.clone();
        let task_key = key.to_string();
        self.arm(key, delay, async move {
            registry.prefetch(&task_key).await;
        })
    }

    fn arm<F>(&self, key: &str, delay: Duration, on_fire: F) -> ScheduledPrefetch
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(PENDING));
        let (wake_tx, wake_rx) = oneshot::channel();
        let task_state = Arc::clone(&state);
        let task_key = key.to_string();

        let task = tokio::spawn(async move {
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);

            tokio::select! {
                _ = &mut sleep => {}
                woken = wake_rx => {
                    if woken.is_ok() {
                        return;
                    }
                    // Handle dropped without cancelling: keep waiting
                    sleep.await;
                }
            }

            if task_state
                .compare_exchange(PENDING, FIRED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            trace!(key = %task_key, "Scheduled prefetch firing");
            on_fire.await;
        });

        debug!(key = %key, delay_ms = delay.as_millis() as u64, "Prefetch scheduled");
        ScheduledPrefetch {
            key: key.to_string(),
            state,
            wake: Mutex::new(Some(wake_tx)),
            task,
        }
    }
}

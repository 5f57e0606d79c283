use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

pub type FetchFuture<V> = BoxFuture<'static, anyhow::Result<V>>;

/// A zero-argument async data loader for one resource.
///
/// Fetch functions must be pure data retrieval: calling one twice in a row
/// is expected to yield equivalent values. Clone is cheap.
pub struct FetchFn<V> {
    inner: Arc<dyn Fn() -> FetchFuture<V> + Send + Sync>,
}

impl<V> Clone for FetchFn<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for FetchFn<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchFn")
            .field("ptr", &Arc::as_ptr(&self.inner))
            .finish()
    }
}

impl<V> FetchFn<V> {
    pub fn call(&self) -> FetchFuture<V> {
        (self.inner)()
    }

    /// True when both handles wrap the same registered closure.
    pub fn same_as(&self, other: &FetchFn<V>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Wrap an async closure as a [`FetchFn`].
///
/// ```ignore
/// let dashboard = fetch_fn(|| async { Ok(serde_json::json!({ "count": 1 })) });
/// ```
pub fn fetch_fn<V, F, Fut>(f: F) -> FetchFn<V>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
{
    FetchFn {
        inner: Arc::new(move || f().boxed()),
    }
}

//! Cache policies and the builder.

use std::sync::Arc;
use std::time::Duration;

use cachesync_core::{EntityKey, EntityValue};
use serde::{Deserialize, Serialize};

use crate::cache::LoadingCache;
use crate::error::{ErrorSink, TracingErrorSink};
use crate::listener::{RemovalCause, RemovalListener};
use crate::weigher::Weigher;
use crate::loader::Loader;

/// How `refresh` runs the reload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    /// Spawn the reload and return immediately.
    #[default]
    Background,
    /// Await the reload before returning.
    Inline,
}

/// Eviction and expiry policy. Every limit is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOptions {
    /// Maximum number of ready entries, least recently used evicted first.
    pub max_capacity: Option<usize>,
    /// Maximum total weight of ready entries, see [`CacheBuilder::weigher`].
    pub max_weight: Option<u64>,
    pub expire_after_write: Option<Duration>,
    pub expire_after_access: Option<Duration>,
    /// A hit on an entry older than this schedules a background refresh.
    pub refresh_after_write: Option<Duration>,
    /// Lifetime of negative (absent) results.
    pub negative_ttl: Option<Duration>,
    /// Bound on every load unless the caller supplies its own.
    pub load_timeout: Option<Duration>,
    pub refresh_mode: RefreshMode,
}

/// Builder for [`LoadingCache`].
///
/// ```ignore
/// let cache = LoadingCache::builder()
///     .max_capacity(1_000)
///     .expire_after_write(Duration::from_secs(300))
///     .negative_ttl(Duration::from_secs(5))
///     .build(StoreLoader::new(store));
/// ```
pub struct CacheBuilder<K, V> {
    options: CacheOptions,
    listener: Option<Arc<dyn RemovalListener<K, V>>>,
    weigher: Option<Arc<dyn Weigher<K, V>>>,
    error_sink: Arc<dyn ErrorSink>,
}

impl<K: EntityKey, V: EntityValue> CacheBuilder<K, V> {
    pub fn new() -> Self {
        Self::from_options(CacheOptions::default())
    }

    /// Start from an existing policy, typically built from configuration.
    pub fn from_options(options: CacheOptions) -> Self {
        Self {
            options,
            listener: None,
            weigher: None,
            error_sink: Arc::new(TracingErrorSink),
        }
    }

    pub fn max_capacity(mut self, capacity: usize) -> Self {
        self.options.max_capacity = Some(capacity);
        self
    }

    /// Bound the summed weight of cached entries. Without a
    /// [`weigher`](Self::weigher) every entry weighs 1.
    pub fn max_weight(mut self, weight: u64) -> Self {
        self.options.max_weight = Some(weight);
        self
    }

    pub fn weigher<F>(mut self, weigher: F) -> Self
    where
        F: Fn(&K, &V) -> u32 + Send + Sync + 'static,
    {
        self.weigher = Some(Arc::new(weigher));
        self
    }

    pub fn expire_after_write(mut self, ttl: Duration) -> Self {
        self.options.expire_after_write = Some(ttl);
        self
    }

    pub fn expire_after_access(mut self, ttl: Duration) -> Self {
        self.options.expire_after_access = Some(ttl);
        self
    }

    pub fn refresh_after_write(mut self, after: Duration) -> Self {
        self.options.refresh_after_write = Some(after);
        self
    }

    pub fn negative_ttl(mut self, ttl: Duration) -> Self {
        self.options.negative_ttl = Some(ttl);
        self
    }

    pub fn load_timeout(mut self, timeout: Duration) -> Self {
        self.options.load_timeout = Some(timeout);
        self
    }

    pub fn refresh_mode(mut self, mode: RefreshMode) -> Self {
        self.options.refresh_mode = mode;
        self
    }

    pub fn removal_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&K, Option<&V>, RemovalCause) + Send + Sync + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Replace the default sink, which logs refresh failures.
    pub fn error_sink<S: ErrorSink + 'static>(mut self, sink: S) -> Self {
        self.error_sink = Arc::new(sink);
        self
    }

    pub fn build<L: Loader<K, V> + 'static>(self, loader: L) -> LoadingCache<K, V> {
        self.build_with(Arc::new(loader))
    }

    pub fn build_with(self, loader: Arc<dyn Loader<K, V>>) -> LoadingCache<K, V> {
        LoadingCache::from_parts(
            loader,
            self.options,
            self.listener,
            self.weigher,
            self.error_sink,
        )
    }
}

impl<K: EntityKey, V: EntityValue> Default for CacheBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

//! The loading cache.
//!
//! Each key maps to one [`Slot`] in a sharded [`DashMap`]. A slot carries
//! the current value (if any) and at most one in-flight load. Concurrent
//! misses for the same key join that load instead of starting their own.
//!
//! Every load is stamped with a generation number when it starts and is
//! spawned as its own task. The result is stored only if the slot's pending
//! load still carries the same generation, so `invalidate`, `put` and
//! `refresh` outdate loads that started before them. Callers already
//! waiting on an outdated load still receive its result.

use std::any::Any;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cachesync_core::{EntityKey, EntityValue};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tracing::{debug, trace};

use crate::error::{ErrorSink, LoadError, RefreshError};
use crate::listener::{RemovalCause, RemovalListener};
use crate::loader::Loader;
use crate::options::{CacheBuilder, CacheOptions, RefreshMode};
use crate::stats::{CacheStatistics, CacheStatsSnapshot};
use crate::weigher::Weigher;

type LoadResult<V> = Result<Option<V>, LoadError>;
type LoadFuture<V> = Shared<BoxFuture<'static, LoadResult<V>>>;

/// Observable state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// A load is running and no live value exists.
    Loading,
    /// A live value or negative result is cached.
    Ready,
    /// Nothing usable is cached; the next read loads.
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadKind {
    Get,
    Refresh,
}

struct Stored<V> {
    /// `None` is a negative result.
    value: Option<V>,
    loaded_at: Instant,
    weight: u64,
}

struct InFlight<V> {
    generation: u64,
    future: LoadFuture<V>,
}

struct Slot<V> {
    value: Option<Stored<V>>,
    pending: Option<InFlight<V>>,
    /// Nanoseconds since the cache epoch.
    accessed_at: AtomicU64,
    /// Logical access clock, orders entries for LRU eviction.
    recency: AtomicU64,
}

enum Admission<V> {
    Hit(Option<V>),
    Lead(LoadFuture<V>),
    Join(LoadFuture<V>),
}

struct Inner<K, V> {
    slots: DashMap<K, Slot<V>>,
    loader: Arc<dyn Loader<K, V>>,
    options: CacheOptions,
    stats: CacheStatistics,
    listener: Option<Arc<dyn RemovalListener<K, V>>>,
    weigher: Option<Arc<dyn Weigher<K, V>>>,
    error_sink: Arc<dyn ErrorSink>,
    /// Stored values and negative results, expired ones included.
    entries: AtomicUsize,
    weight: AtomicU64,
    generations: AtomicU64,
    clock: AtomicU64,
    epoch: Instant,
}

/// A bounded, concurrent, loading cache.
///
/// Cloning is cheap and every clone shares the same entries.
pub struct LoadingCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for LoadingCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: EntityKey, V: EntityValue> LoadingCache<K, V> {
    /// Unbounded cache without expiry.
    pub fn new<L: Loader<K, V> + 'static>(loader: L) -> Self {
        CacheBuilder::new().build(loader)
    }

    pub fn builder() -> CacheBuilder<K, V> {
        CacheBuilder::new()
    }

    pub(crate) fn from_parts(
        loader: Arc<dyn Loader<K, V>>,
        options: CacheOptions,
        listener: Option<Arc<dyn RemovalListener<K, V>>>,
        weigher: Option<Arc<dyn Weigher<K, V>>>,
        error_sink: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: DashMap::new(),
                loader,
                options,
                stats: CacheStatistics::default(),
                listener,
                weigher,
                error_sink,
                entries: AtomicUsize::new(0),
                weight: AtomicU64::new(0),
                generations: AtomicU64::new(0),
                clock: AtomicU64::new(0),
                epoch: Instant::now(),
            }),
        }
    }

    /// Get the value for `key`, loading it on a miss.
    ///
    /// `Ok(None)` means the loader reported the entity as absent. Errors are
    /// never cached: the next call retries.
    pub async fn get(&self, key: &K) -> Result<Option<V>, LoadError> {
        self.get_inner(key, self.inner.options.load_timeout).await
    }

    /// Like [`get`](Self::get), but this caller waits at most `timeout`.
    ///
    /// If this call starts the load, the load itself is abandoned after
    /// `timeout` and nothing is cached.
    pub async fn get_with_timeout(
        &self,
        key: &K,
        timeout: Duration,
    ) -> Result<Option<V>, LoadError> {
        self.get_inner(key, Some(timeout)).await
    }

    async fn get_inner(&self, key: &K, timeout: Option<Duration>) -> LoadResult<V> {
        let inner = &self.inner;
        if let Some(value) = inner.lookup(key, Instant::now(), true) {
            inner.stats.record_hit();
            return Ok(value);
        }

        match inner.admit(key, timeout) {
            Admission::Hit(value) => {
                inner.stats.record_hit();
                Ok(value)
            }
            Admission::Lead(future) => {
                inner.stats.record_miss();
                future.await
            }
            Admission::Join(future) => {
                inner.stats.record_miss();
                match timeout {
                    Some(limit) => tokio::time::timeout(limit, future)
                        .await
                        .unwrap_or(Err(LoadError::Timeout { timeout: limit })),
                    None => future.await,
                }
            }
        }
    }

    /// Cached value without loading. Never triggers a refresh.
    pub fn get_if_present(&self, key: &K) -> Option<Option<V>> {
        let hit = self.inner.lookup(key, Instant::now(), false);
        if hit.is_some() {
            self.inner.stats.record_hit();
        } else {
            self.inner.stats.record_miss();
        }
        hit
    }

    /// Cached values for `keys`, without loading. Keys with nothing cached
    /// are left out.
    pub fn get_all_present(&self, keys: &[K]) -> HashMap<K, Option<V>> {
        keys.iter()
            .filter_map(|key| self.get_if_present(key).map(|value| (key.clone(), value)))
            .collect()
    }

    /// Store a value directly, outdating any in-flight load for the key.
    pub fn put(&self, key: K, value: V) {
        self.inner.store(key, Some(value));
    }

    pub fn put_all<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in entries {
            self.inner.store(key, Some(value));
        }
    }

    /// Store a negative result directly.
    pub fn put_absent(&self, key: K) {
        self.inner.store(key, None);
    }

    /// Remove the entry. An in-flight load for the key will not store its
    /// result. Returns whether anything was cached or loading.
    pub fn invalidate(&self, key: &K) -> bool {
        match self.inner.slots.remove(key) {
            Some((key, slot)) => {
                if let Some(stored) = slot.value {
                    self.inner.removed(&key, stored, RemovalCause::Explicit);
                }
                debug!(key = ?key, "Invalidated cache entry");
                true
            }
            None => false,
        }
    }

    /// Remove the entry unless it holds a live value: drops a cached
    /// negative result and outdates a first load still in flight, which may
    /// already have read "absent".
    pub fn invalidate_negative(&self, key: &K) -> bool {
        let removed = self.inner.slots.remove_if(key, |_, slot| {
            slot.value.as_ref().is_none_or(|stored| stored.value.is_none())
        });
        match removed {
            Some((key, slot)) => {
                if let Some(stored) = slot.value {
                    self.inner.removed(&key, stored, RemovalCause::Explicit);
                }
                debug!(key = ?key, "Dropped absent result for cache entry");
                true
            }
            None => false,
        }
    }

    pub fn invalidate_all(&self) {
        let keys: Vec<K> = self.inner.slots.iter().map(|e| e.key().clone()).collect();
        for key in &keys {
            self.invalidate(key);
        }
    }

    /// Reload `key`. Readers keep seeing the current value until the new
    /// one is stored. A failed reload keeps the current value and is
    /// reported to the error sink.
    ///
    /// Waits for the reload only in [`RefreshMode::Inline`].
    pub async fn refresh(&self, key: &K) {
        let future = self.inner.begin_refresh(key);
        if self.inner.options.refresh_mode == RefreshMode::Inline {
            // Failures were already handed to the error sink.
            let _ = future.await;
        }
    }

    /// Drop every expired entry that has no load in flight. Returns the
    /// number of entries removed.
    pub fn cleanup(&self) -> usize {
        let inner = &self.inner;
        let now = Instant::now();
        let expired: Vec<K> = inner
            .slots
            .iter()
            .filter(|e| inner.is_stale(e.value(), now))
            .map(|e| e.key().clone())
            .collect();

        let mut purged = 0;
        for key in expired {
            let removed = inner
                .slots
                .remove_if(&key, |_, slot| slot.pending.is_none() && inner.is_stale(slot, now));
            if let Some((key, Slot {
                value: Some(stored),
                ..
            })) = removed
            {
                inner.removed(&key, stored, RemovalCause::Expired);
                purged += 1;
            }
        }
        if purged > 0 {
            debug!(purged, "Purged expired cache entries");
        }
        purged
    }

    pub fn state(&self, key: &K) -> EntryState {
        let now = Instant::now();
        let Some(slot) = self.inner.slots.get(key) else {
            return EntryState::Invalid;
        };
        match &slot.value {
            Some(stored) if !self.inner.is_expired(&slot, stored, now) => EntryState::Ready,
            _ if slot.pending.is_some() => EntryState::Loading,
            _ => EntryState::Invalid,
        }
    }

    /// True if a live value or negative result is cached.
    pub fn contains_key(&self, key: &K) -> bool {
        self.state(key) == EntryState::Ready
    }

    /// Number of cached values and negative results.
    pub fn size(&self) -> usize {
        self.inner.entries.load(Ordering::Relaxed)
    }

    /// Summed weight of cached entries; equals `size()` without a weigher.
    pub fn weighted_size(&self) -> u64 {
        self.inner.weight.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> Option<usize> {
        self.inner.options.max_capacity
    }

    pub fn max_weight(&self) -> Option<u64> {
        self.inner.options.max_weight
    }

    pub fn options(&self) -> &CacheOptions {
        &self.inner.options
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.inner.stats.snapshot()
    }
}

impl<K: EntityKey, V: EntityValue> fmt::Debug for LoadingCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadingCache")
            .field("size", &self.size())
            .field("weighted_size", &self.weighted_size())
            .field("options", &self.inner.options)
            .field("stats", &self.inner.stats.snapshot())
            .finish()
    }
}

impl<K: EntityKey, V: EntityValue> Inner<K, V> {
    fn nanos(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch).as_nanos() as u64
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// A new stored entry, counted towards size and weight. Must be placed
    /// into its slot right away.
    fn stored(&self, key: &K, value: Option<V>, now: Instant) -> Stored<V> {
        let weight = match (&self.weigher, &value) {
            (Some(weigher), Some(value)) => u64::from(weigher.weigh(key, value)),
            _ => 1,
        };
        self.entries.fetch_add(1, Ordering::Relaxed);
        self.weight.fetch_add(weight, Ordering::Relaxed);
        Stored {
            value,
            loaded_at: now,
            weight,
        }
    }

    fn touch(&self, slot: &Slot<V>, now: Instant) {
        slot.accessed_at.store(self.nanos(now), Ordering::Relaxed);
        let tick = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        slot.recency.store(tick, Ordering::Relaxed);
    }

    fn new_slot(&self, value: Option<Stored<V>>, pending: Option<InFlight<V>>, now: Instant) -> Slot<V> {
        let slot = Slot {
            value,
            pending,
            accessed_at: AtomicU64::new(0),
            recency: AtomicU64::new(0),
        };
        self.touch(&slot, now);
        slot
    }

    fn is_expired(&self, slot: &Slot<V>, stored: &Stored<V>, now: Instant) -> bool {
        let age = now.saturating_duration_since(stored.loaded_at);
        if stored.value.is_none() && self.options.negative_ttl.is_some_and(|ttl| age >= ttl) {
            return true;
        }
        if self.options.expire_after_write.is_some_and(|ttl| age >= ttl) {
            return true;
        }
        if let Some(ttl) = self.options.expire_after_access {
            let idle = self
                .nanos(now)
                .saturating_sub(slot.accessed_at.load(Ordering::Relaxed));
            if Duration::from_nanos(idle) >= ttl {
                return true;
            }
        }
        false
    }

    /// True if the slot holds a value that has expired.
    fn is_stale(&self, slot: &Slot<V>, now: Instant) -> bool {
        slot.value
            .as_ref()
            .is_some_and(|stored| self.is_expired(slot, stored, now))
    }

    fn needs_refresh(&self, stored: &Stored<V>, now: Instant) -> bool {
        self.options
            .refresh_after_write
            .is_some_and(|after| now.saturating_duration_since(stored.loaded_at) >= after)
    }

    /// Read path under a shard read lock.
    fn lookup(self: &Arc<Self>, key: &K, now: Instant, allow_refresh: bool) -> Option<Option<V>> {
        let (value, refresh) = {
            let slot = self.slots.get(key)?;
            let stored = slot.value.as_ref()?;
            if self.is_expired(&slot, stored, now) {
                return None;
            }
            self.touch(&slot, now);
            let refresh =
                allow_refresh && slot.pending.is_none() && self.needs_refresh(stored, now);
            (stored.value.clone(), refresh)
        };

        if refresh {
            debug!(key = ?key, "Entry due for refresh, reloading in background");
            // The reload runs on its own task; nobody waits for it here.
            let _refresh = self.begin_refresh(key);
        }
        Some(value)
    }

    /// Miss path: hit, join the running load, or start one, atomically
    /// for the key.
    fn admit(self: &Arc<Self>, key: &K, timeout: Option<Duration>) -> Admission<V> {
        let now = Instant::now();
        let mut expired = None;

        let admission = match self.slots.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                match slot.value.take() {
                    Some(stored) if !self.is_expired(slot, &stored, now) => {
                        let value = stored.value.clone();
                        slot.value = Some(stored);
                        self.touch(slot, now);
                        Admission::Hit(value)
                    }
                    stale => {
                        expired = stale;
                        match slot.pending.as_ref().map(|p| p.future.clone()) {
                            Some(future) => Admission::Join(future),
                            None => {
                                let generation = self.next_generation();
                                let future =
                                    self.spawn_load(key.clone(), generation, LoadKind::Get, timeout);
                                slot.pending = Some(InFlight {
                                    generation,
                                    future: future.clone(),
                                });
                                Admission::Lead(future)
                            }
                        }
                    }
                }
            }
            Entry::Vacant(vacant) => {
                let generation = self.next_generation();
                let future = self.spawn_load(key.clone(), generation, LoadKind::Get, timeout);
                let in_flight = InFlight {
                    generation,
                    future: future.clone(),
                };
                vacant.insert(self.new_slot(None, Some(in_flight), now));
                Admission::Lead(future)
            }
        };

        if let Some(stored) = expired {
            self.removed(key, stored, RemovalCause::Expired);
        }
        admission
    }

    /// Start a new-generation load that keeps the current value visible.
    fn begin_refresh(self: &Arc<Self>, key: &K) -> LoadFuture<V> {
        let generation = self.next_generation();
        let timeout = self.options.load_timeout;

        match self.slots.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let future = self.spawn_load(key.clone(), generation, LoadKind::Refresh, timeout);
                occupied.get_mut().pending = Some(InFlight {
                    generation,
                    future: future.clone(),
                });
                future
            }
            Entry::Vacant(vacant) => {
                let future = self.spawn_load(key.clone(), generation, LoadKind::Refresh, timeout);
                let in_flight = InFlight {
                    generation,
                    future: future.clone(),
                };
                vacant.insert(self.new_slot(None, Some(in_flight), Instant::now()));
                future
            }
        }
    }

    /// Spawn the loader. The task outlives its callers, so a load whose
    /// waiters all went away still completes and stores its result.
    fn spawn_load(
        self: &Arc<Self>,
        key: K,
        generation: u64,
        kind: LoadKind,
        timeout: Option<Duration>,
    ) -> LoadFuture<V> {
        trace!(key = ?key, generation, kind = ?kind, "Starting load");
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            let result = inner.run_loader(&key, timeout).await;
            inner.complete(&key, generation, kind, &result);
            result
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(LoadError::Panicked {
                    message: e.to_string(),
                })
            })
        }
        .boxed()
        .shared()
    }

    async fn run_loader(&self, key: &K, timeout: Option<Duration>) -> LoadResult<V> {
        let load = AssertUnwindSafe(self.loader.load(key)).catch_unwind();
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, load).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(LoadError::Timeout { timeout: limit }),
            },
            None => load.await,
        };

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(LoadError::Failed {
                message: format!("{e:#}"),
            }),
            Err(panic) => Err(LoadError::Panicked {
                message: panic_message(panic.as_ref()),
            }),
        }
    }

    /// Store a finished load if it is still the key's current one.
    fn complete(&self, key: &K, generation: u64, kind: LoadKind, result: &LoadResult<V>) {
        self.stats.record_load(result.is_ok());
        let now = Instant::now();
        let mut current = false;
        let mut replaced = None;

        if let Entry::Occupied(mut occupied) = self.slots.entry(key.clone()) {
            let slot = occupied.get_mut();
            if slot.pending.as_ref().is_some_and(|p| p.generation == generation) {
                current = true;
                slot.pending = None;
                let mut discard = false;
                match result {
                    Ok(value) => {
                        replaced = slot.value.replace(self.stored(key, value.clone(), now));
                        if kind == LoadKind::Get {
                            self.touch(slot, now);
                        }
                    }
                    // A failed first load leaves nothing behind.
                    Err(_) => discard = slot.value.is_none(),
                }
                if discard {
                    occupied.remove();
                }
            }
        }

        if !current {
            debug!(key = ?key, generation, "Discarding outdated load result");
        }
        if let Some(previous) = replaced {
            self.removed(key, previous, RemovalCause::Replaced);
        }
        if let (LoadKind::Refresh, Err(e)) = (kind, result) {
            self.error_sink.refresh_failed(RefreshError {
                key: format!("{key:?}"),
                source: e.clone(),
            });
        }
        if current && result.is_ok() {
            self.enforce_capacity();
        }
    }

    fn store(&self, key: K, value: Option<V>) {
        let now = Instant::now();

        let previous = match self.slots.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                slot.pending = None;
                self.touch(slot, now);
                slot.value.replace(self.stored(&key, value, now))
            }
            Entry::Vacant(vacant) => {
                let stored = self.stored(&key, value, now);
                vacant.insert(self.new_slot(Some(stored), None, now));
                None
            }
        };

        if let Some(previous) = previous {
            self.removed(&key, previous, RemovalCause::Replaced);
        }
        self.enforce_capacity();
    }

    fn over_capacity(&self) -> bool {
        self.options
            .max_capacity
            .is_some_and(|max| self.entries.load(Ordering::Relaxed) > max)
            || self
                .options
                .max_weight
                .is_some_and(|max| self.weight.load(Ordering::Relaxed) > max)
    }

    /// Evict least recently used values until within capacity and weight.
    ///
    /// Costs one pass over the entries plus a heap pop per victim, and
    /// nothing while the cache is within bounds.
    fn enforce_capacity(&self) {
        if !self.over_capacity() {
            return;
        }

        let keys: Vec<(K, u64)> = self
            .slots
            .iter()
            .filter(|e| e.value().value.is_some())
            .map(|e| (e.key().clone(), e.value().recency.load(Ordering::Relaxed)))
            .collect();
        let mut oldest: BinaryHeap<Reverse<(u64, usize)>> = keys
            .iter()
            .enumerate()
            .map(|(index, (_, recency))| Reverse((*recency, index)))
            .collect();

        let mut evicted = 0usize;
        while self.over_capacity() {
            let Some(Reverse((_, index))) = oldest.pop() else {
                break;
            };
            if let Some((key, Slot {
                value: Some(stored),
                ..
            })) = self.slots.remove_if(&keys[index].0, |_, slot| slot.value.is_some())
            {
                self.removed(&key, stored, RemovalCause::Size);
                evicted += 1;
            }
        }
        if evicted > 0 {
            trace!(evicted, size = self.entries.load(Ordering::Relaxed), "Evicted entries over capacity");
        }
    }

    /// Bookkeeping for a removed entry. Must not be called under a slot lock.
    fn removed(&self, key: &K, stored: Stored<V>, cause: RemovalCause) {
        self.entries.fetch_sub(1, Ordering::Relaxed);
        self.weight.fetch_sub(stored.weight, Ordering::Relaxed);
        if cause.was_evicted() {
            self.stats.record_eviction();
        }
        trace!(key = ?key, cause = %cause, "Cache entry removed");
        if let Some(listener) = &self.listener {
            listener.on_removal(key, stored.value.as_ref(), cause);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

//! Keeps a [`LoadingCache`] consistent with entity change events.
//!
//! | Event     | Action                                                       |
//! |-----------|--------------------------------------------------------------|
//! | `Updated` | `refresh`: readers see the old value until the reload lands  |
//! | `Deleted` | `invalidate`: the next read goes to the store                |
//! | `Created` | `put` the payload when prepopulating, else drop any cached   |
//! |           | negative result or first load still running for the id      |
//!
//! Every action is idempotent, so duplicate events are harmless.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use cachesync_cache::LoadingCache;
use cachesync_core::events::{
    Event, EventBus, EventHandler, EventKind, HandlerError, SubscriptionHandle,
};
use cachesync_core::{EntityKey, EntityValue};
use serde::Serialize;
use tracing::{debug, info};

/// What the coordinator did with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorAction {
    Refreshed,
    Invalidated,
    Prepopulated,
    Ignored,
}

#[derive(Debug, Default)]
struct Counters {
    refreshed: AtomicU64,
    invalidated: AtomicU64,
    prepopulated: AtomicU64,
    ignored: AtomicU64,
}

/// Snapshot of applied actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub refreshed: u64,
    pub invalidated: u64,
    pub prepopulated: u64,
    pub ignored: u64,
}

pub struct CacheInvalidationCoordinator<K, V> {
    cache: LoadingCache<K, V>,
    prepopulate_on_create: bool,
    counters: Counters,
}

impl<K: EntityKey, V: EntityValue> CacheInvalidationCoordinator<K, V> {
    pub fn new(cache: LoadingCache<K, V>, prepopulate_on_create: bool) -> Self {
        Self {
            cache,
            prepopulate_on_create,
            counters: Counters::default(),
        }
    }

    pub fn cache(&self) -> &LoadingCache<K, V> {
        &self.cache
    }

    /// Apply one event to the cache.
    pub async fn apply(&self, event: &Event<K, V>) -> CoordinatorAction {
        let id = &event.entity_id;
        let action = match event.kind {
            EventKind::Updated => {
                self.cache.refresh(id).await;
                CoordinatorAction::Refreshed
            }
            EventKind::Deleted => {
                self.cache.invalidate(id);
                CoordinatorAction::Invalidated
            }
            EventKind::Created => match &event.payload {
                Some(payload) if self.prepopulate_on_create => {
                    self.cache.put(id.clone(), payload.clone());
                    CoordinatorAction::Prepopulated
                }
                _ if self.cache.invalidate_negative(id) => CoordinatorAction::Invalidated,
                _ => CoordinatorAction::Ignored,
            },
        };

        let counter = match action {
            CoordinatorAction::Refreshed => &self.counters.refreshed,
            CoordinatorAction::Invalidated => &self.counters.invalidated,
            CoordinatorAction::Prepopulated => &self.counters.prepopulated,
            CoordinatorAction::Ignored => &self.counters.ignored,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        debug!(
            kind = %event.kind,
            entity_id = ?id,
            event_id = %event.event_id,
            action = ?action,
            "Applied entity event to cache"
        );
        action
    }

    /// Subscribe to every event kind on `bus`.
    pub async fn attach(self: &Arc<Self>, bus: &EventBus<K, V>) -> SubscriptionHandle {
        let handle = bus.subscribe(&EventKind::ALL, self.clone()).await;
        info!(bus = %bus.name(), subscription = %handle.id(), "Cache invalidation coordinator attached");
        handle
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            refreshed: self.counters.refreshed.load(Ordering::Relaxed),
            invalidated: self.counters.invalidated.load(Ordering::Relaxed),
            prepopulated: self.counters.prepopulated.load(Ordering::Relaxed),
            ignored: self.counters.ignored.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl<K: EntityKey, V: EntityValue> EventHandler<K, V> for CacheInvalidationCoordinator<K, V> {
    fn name(&self) -> &str {
        "cache-invalidation-coordinator"
    }

    async fn handle(&self, event: &Event<K, V>) -> Result<(), HandlerError> {
        // Refresh failures go to the cache's error sink; nothing here fails.
        self.apply(event).await;
        Ok(())
    }

    async fn on_shutdown(&self) -> Result<(), HandlerError> {
        info!(stats = ?self.stats(), "Cache invalidation coordinator detached");
        Ok(())
    }
}

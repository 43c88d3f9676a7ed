//! Composition root: builds the store, bus, cache and coordinator from
//! configuration and connects them.

use std::sync::Arc;

use cachesync_cache::{CacheBuilder, LoadingCache};
use cachesync_core::events::{BusRegistry, EventBus, RegistryError, SubscriptionHandle};
use cachesync_core::{EntityKey, EntityValue};
use cachesync_storage::{EntityStore, EventedStore};
use tracing::info;

use crate::config::AppConfig;
use crate::coordinator::CacheInvalidationCoordinator;
use crate::store_loader::StoreLoader;

/// Everything `build` wires together.
pub struct CacheSystem<S, K, V> {
    /// Store that publishes change events on `bus`.
    pub store: Arc<EventedStore<S, K, V>>,
    pub bus: Arc<EventBus<K, V>>,
    /// Cache loading through `store`.
    pub cache: LoadingCache<K, V>,
    pub coordinator: Arc<CacheInvalidationCoordinator<K, V>>,
    pub subscription: SubscriptionHandle,
}

/// Build a cache system over `backend` and register its bus in `registry`.
///
/// Fails if `registry` already holds a bus with the configured name.
pub async fn build<S, K, V>(
    config: &AppConfig,
    backend: S,
    registry: &BusRegistry<K, V>,
) -> Result<CacheSystem<S, K, V>, RegistryError>
where
    S: EntityStore<K, V> + 'static,
    K: EntityKey,
    V: EntityValue,
{
    let bus = registry.register(
        EventBus::builder(config.bus.name.clone())
            .mode(config.bus.mode)
            .handler_timeout(config.bus.handler_timeout())
            .build(),
    )?;

    let store = Arc::new(EventedStore::new(backend, bus.clone()));
    let cache = CacheBuilder::from_options(config.cache.to_options())
        .build(StoreLoader::new(store.clone()));

    let coordinator = Arc::new(CacheInvalidationCoordinator::new(
        cache.clone(),
        config.coordinator.prepopulate_on_create,
    ));
    let subscription = coordinator.attach(&bus).await;

    info!(
        bus = %bus.name(),
        mode = ?bus.mode(),
        backend = store.backend_name(),
        capacity = ?cache.capacity(),
        "Cache system ready"
    );

    Ok(CacheSystem {
        store,
        bus,
        cache,
        coordinator,
        subscription,
    })
}

impl<S, K, V> CacheSystem<S, K, V>
where
    S: EntityStore<K, V> + 'static,
    K: EntityKey,
    V: EntityValue,
{
    /// Detach the coordinator and drain the bus.
    pub async fn shutdown(&self) {
        self.bus.unsubscribe(&self.subscription).await;
        self.bus.shutdown().await;
    }
}

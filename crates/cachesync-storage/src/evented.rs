//! EventedStore - a store wrapper that publishes events after mutations.
//!
//! # Example
//!
//! ```ignore
//! let bus = Arc::new(EventBus::new("users"));
//! let store = EventedStore::new(MemoryStore::new(), bus.clone());
//!
//! // Subscribers of `bus` see an `Updated` event once this returns.
//! store.update(1, user).await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use cachesync_core::events::{Event, EventBus};
use cachesync_core::{EntityKey, EntityValue};
use tracing::debug;

use crate::error::StoreError;
use crate::traits::EntityStore;

/// Delegates to an inner store and publishes an [`Event`] after each
/// successful mutation.
///
/// Events are published only **after** the inner operation succeeds, so
/// every event corresponds to a real change. Failed operations and
/// deletes of missing entities publish nothing.
pub struct EventedStore<S, K, V> {
    inner: S,
    bus: Arc<EventBus<K, V>>,
}

impl<S, K, V> EventedStore<S, K, V>
where
    S: EntityStore<K, V>,
    K: EntityKey,
    V: EntityValue,
{
    pub fn new(inner: S, bus: Arc<EventBus<K, V>>) -> Self {
        Self { inner, bus }
    }

    /// Get a reference to the inner store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn bus(&self) -> &Arc<EventBus<K, V>> {
        &self.bus
    }

    async fn emit(&self, event: Event<K, V>) {
        let kind = event.kind;
        let entity_id = format!("{:?}", event.entity_id);
        let subscribers = self.bus.publish(event).await;
        debug!(
            bus = %self.bus.name(),
            kind = %kind,
            entity_id = %entity_id,
            subscribers,
            "Published entity event"
        );
    }
}

#[async_trait]
impl<S, K, V> EntityStore<K, V> for EventedStore<S, K, V>
where
    S: EntityStore<K, V>,
    K: EntityKey,
    V: EntityValue,
{
    async fn find(&self, id: &K) -> Result<Option<V>, StoreError> {
        // Reads don't publish
        self.inner.find(id).await
    }

    async fn insert(&self, id: K, entity: V) -> Result<(), StoreError> {
        self.inner.insert(id.clone(), entity.clone()).await?;
        self.emit(Event::created(id, entity)).await;
        Ok(())
    }

    async fn update(&self, id: K, entity: V) -> Result<(), StoreError> {
        self.inner.update(id.clone(), entity.clone()).await?;
        self.emit(Event::updated(id, entity)).await;
        Ok(())
    }

    async fn delete(&self, id: &K) -> Result<Option<V>, StoreError> {
        let removed = self.inner.delete(id).await?;
        if removed.is_some() {
            self.emit(Event::deleted(id.clone())).await;
        }
        Ok(removed)
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use cachesync_core::events::EventKind;
    use std::sync::Mutex;

    type Seen = Arc<Mutex<Vec<(EventKind, u64, Option<String>)>>>;

    async fn recorded_store() -> (EventedStore<MemoryStore<u64, String>, u64, String>, Seen) {
        let bus = Arc::new(EventBus::new("users"));
        let seen: Seen = Arc::default();
        let sink = seen.clone();
        bus.subscribe_fn("recorder", &[], move |event: Event<u64, String>| {
            let sink = sink.clone();
            async move {
                sink.lock()
                    .unwrap()
                    .push((event.kind, event.entity_id, event.payload));
                Ok(())
            }
        })
        .await;
        (EventedStore::new(MemoryStore::new(), bus), seen)
    }

    #[tokio::test]
    async fn test_mutations_publish_after_success() {
        let (store, seen) = recorded_store().await;

        store.insert(1, "Alvin".into()).await.unwrap();
        store.update(1, "Bob".into()).await.unwrap();
        store.delete(&1).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (EventKind::Created, 1, Some("Alvin".to_string())),
                (EventKind::Updated, 1, Some("Bob".to_string())),
                (EventKind::Deleted, 1, None),
            ]
        );
    }

    #[tokio::test]
    async fn test_failures_publish_nothing() {
        let (store, seen) = recorded_store().await;

        assert!(store.update(1, "Bob".into()).await.is_err());
        assert_eq!(store.delete(&1).await.unwrap(), None);

        store.inner().set_available(false);
        assert!(store.insert(2, "Emma".into()).await.is_err());

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(store.backend_name(), "memory");
    }
}

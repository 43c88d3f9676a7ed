//! The entity store contract.

use std::sync::Arc;

use async_trait::async_trait;
use cachesync_core::{EntityKey, EntityValue};

use crate::error::StoreError;

/// Authoritative `id -> entity` store.
///
/// Implementations must be safe to call concurrently.
#[async_trait]
pub trait EntityStore<K, V>: Send + Sync
where
    K: EntityKey,
    V: EntityValue,
{
    /// Read an entity. `Ok(None)` if it does not exist.
    async fn find(&self, id: &K) -> Result<Option<V>, StoreError>;

    /// Add a new entity. Fails with `AlreadyExists` if the id is taken.
    async fn insert(&self, id: K, entity: V) -> Result<(), StoreError>;

    /// Replace an existing entity. Fails with `NotFound` if absent.
    async fn update(&self, id: K, entity: V) -> Result<(), StoreError>;

    /// Remove an entity, returning it if it existed.
    async fn delete(&self, id: &K) -> Result<Option<V>, StoreError>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}

#[async_trait]
impl<K, V, S> EntityStore<K, V> for Arc<S>
where
    K: EntityKey,
    V: EntityValue,
    S: EntityStore<K, V> + ?Sized,
{
    async fn find(&self, id: &K) -> Result<Option<V>, StoreError> {
        (**self).find(id).await
    }

    async fn insert(&self, id: K, entity: V) -> Result<(), StoreError> {
        (**self).insert(id, entity).await
    }

    async fn update(&self, id: K, entity: V) -> Result<(), StoreError> {
        (**self).update(id, entity).await
    }

    async fn delete(&self, id: &K) -> Result<Option<V>, StoreError> {
        (**self).delete(id).await
    }

    fn backend_name(&self) -> &'static str {
        (**self).backend_name()
    }
}

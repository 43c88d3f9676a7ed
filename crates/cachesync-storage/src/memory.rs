//! In-memory entity store.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use cachesync_core::{EntityKey, EntityValue};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::StoreError;
use crate::traits::EntityStore;

/// A [`DashMap`]-backed store.
///
/// `set_available(false)` makes every operation fail with
/// [`StoreError::Unavailable`], which lets tests exercise loader failures.
pub struct MemoryStore<K, V> {
    entities: DashMap<K, V>,
    available: AtomicBool,
}

impl<K: EntityKey, V: EntityValue> MemoryStore<K, V> {
    pub fn new() -> Self {
        Self {
            entities: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle simulated backend availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::unavailable("memory store is offline"))
        }
    }
}

impl<K: EntityKey, V: EntityValue> std::fmt::Debug for MemoryStore<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entities", &self.entities.len())
            .field("available", &self.available.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<K: EntityKey, V: EntityValue> Default for MemoryStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K: EntityKey, V: EntityValue> EntityStore<K, V> for MemoryStore<K, V> {
    async fn find(&self, id: &K) -> Result<Option<V>, StoreError> {
        self.check_available()?;
        Ok(self.entities.get(id).map(|e| e.value().clone()))
    }

    async fn insert(&self, id: K, entity: V) -> Result<(), StoreError> {
        self.check_available()?;
        match self.entities.entry(id) {
            Entry::Occupied(occupied) => Err(StoreError::already_exists(occupied.key())),
            Entry::Vacant(vacant) => {
                vacant.insert(entity);
                Ok(())
            }
        }
    }

    async fn update(&self, id: K, entity: V) -> Result<(), StoreError> {
        self.check_available()?;
        match self.entities.get_mut(&id) {
            Some(mut existing) => {
                *existing = entity;
                Ok(())
            }
            None => Err(StoreError::not_found(&id)),
        }
    }

    async fn delete(&self, id: &K) -> Result<Option<V>, StoreError> {
        self.check_available()?;
        Ok(self.entities.remove(id).map(|(_, entity)| entity))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_crud() {
        let store = MemoryStore::<u64, String>::new();

        store.insert(1, "Alvin".into()).await.unwrap();
        assert_eq!(store.find(&1).await.unwrap().as_deref(), Some("Alvin"));

        store.update(1, "Bob".into()).await.unwrap();
        assert_eq!(store.find(&1).await.unwrap().as_deref(), Some("Bob"));

        assert_eq!(store.delete(&1).await.unwrap().as_deref(), Some("Bob"));
        assert_eq!(store.delete(&1).await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_insert_and_update_preconditions() {
        let store = MemoryStore::<u64, String>::new();
        store.insert(1, "Alvin".into()).await.unwrap();

        assert_eq!(
            store.insert(1, "Emma".into()).await.unwrap_err(),
            StoreError::already_exists(&1u64)
        );
        assert!(store.update(2, "Emma".into()).await.unwrap_err().is_not_found());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unavailable() {
        let store = MemoryStore::<u64, String>::new();
        store.set_available(false);

        let err = tokio_test::block_on(store.find(&1)).unwrap_err();
        assert_eq!(err, StoreError::unavailable("memory store is offline"));

        store.set_available(true);
        assert_eq!(tokio_test::block_on(store.find(&1)).unwrap(), None);
    }

    #[test]
    fn test_debug_for_generic_store() {
        fn render<K: EntityKey, V: EntityValue>(store: &MemoryStore<K, V>) -> String {
            format!("{store:?}")
        }

        let store = MemoryStore::<u64, String>::new();
        tokio_test::block_on(store.insert(1, "Alvin".into())).unwrap();
        assert_eq!(
            render(&store),
            "MemoryStore { entities: 1, available: true, .. }"
        );
    }
}

//! Cache loader reading from an [`EntityStore`].

use std::marker::PhantomData;

use async_trait::async_trait;
use cachesync_cache::Loader;
use cachesync_core::{EntityKey, EntityValue};
use cachesync_storage::EntityStore;

/// Loads cache misses from a store. A missing entity becomes a negative
/// cache entry; a store error becomes a load failure.
pub struct StoreLoader<S, K, V> {
    store: S,
    _entity: PhantomData<fn() -> (K, V)>,
}

impl<S, K, V> StoreLoader<S, K, V>
where
    S: EntityStore<K, V>,
    K: EntityKey,
    V: EntityValue,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }
}

#[async_trait]
impl<S, K, V> Loader<K, V> for StoreLoader<S, K, V>
where
    S: EntityStore<K, V>,
    K: EntityKey,
    V: EntityValue,
{
    async fn load(&self, key: &K) -> anyhow::Result<Option<V>> {
        Ok(self.store.find(key).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachesync_storage::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_loads_from_store() {
        let store = Arc::new(MemoryStore::<u64, String>::new());
        store.insert(1, "Alvin".into()).await.unwrap();
        let loader = StoreLoader::new(store.clone());

        assert_eq!(loader.load(&1).await.unwrap().as_deref(), Some("Alvin"));
        assert_eq!(loader.load(&2).await.unwrap(), None);

        store.set_available(false);
        let err = loader.load(&1).await.unwrap_err();
        assert_eq!(err.to_string(), "Store unavailable: memory store is offline");
    }
}

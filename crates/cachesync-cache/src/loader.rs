//! Value loaders.

use std::future::Future;

use async_trait::async_trait;

/// Fetches the authoritative value for a key on a cache miss or refresh.
///
/// `Ok(None)` means the entity does not exist; the cache stores that as a
/// negative entry. `Err` is a load failure and is never cached.
///
/// Implementations must tolerate concurrent calls for different keys.
#[async_trait]
pub trait Loader<K, V>: Send + Sync {
    async fn load(&self, key: &K) -> anyhow::Result<Option<V>>;
}

/// Adapts an async closure taking the key by value.
///
/// ```ignore
/// let cache = LoadingCache::builder()
///     .max_capacity(100)
///     .build(FnLoader::new(|id: u64| async move { Ok(Some(id * 2)) }));
/// ```
pub struct FnLoader<F> {
    f: F,
}

impl<F> FnLoader<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<K, V, F, Fut> Loader<K, V> for FnLoader<F>
where
    K: Clone + Send + Sync + 'static,
    V: Send + 'static,
    F: Fn(K) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<V>>> + Send + 'static,
{
    async fn load(&self, key: &K) -> anyhow::Result<Option<V>> {
        (self.f)(key.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_loader() {
        let loader = FnLoader::new(|id: u64| async move {
            if id == 0 {
                anyhow::bail!("id must be positive");
            }
            Ok(if id % 2 == 0 { Some(id * 10) } else { None })
        });

        assert_eq!(Loader::<u64, u64>::load(&loader, &2).await.unwrap(), Some(20));
        assert_eq!(Loader::<u64, u64>::load(&loader, &3).await.unwrap(), None);
        assert!(Loader::<u64, u64>::load(&loader, &0).await.is_err());
    }
}

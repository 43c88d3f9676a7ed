//! Entry weights for weight-bounded caches.

/// Computes the weight of a cached value.
///
/// Weights are taken once, when the value is stored. Negative results
/// always weigh 1.
pub trait Weigher<K, V>: Send + Sync {
    fn weigh(&self, key: &K, value: &V) -> u32;
}

impl<K, V, F> Weigher<K, V> for F
where
    F: Fn(&K, &V) -> u32 + Send + Sync,
{
    fn weigh(&self, key: &K, value: &V) -> u32 {
        self(key, value)
    }
}

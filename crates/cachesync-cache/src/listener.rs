//! Removal notifications.

use std::fmt;

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemovalCause {
    /// `invalidate` or `invalidate_all`
    Explicit,
    /// A load, refresh or `put` overwrote the value
    Replaced,
    /// Evicted to stay within capacity
    Size,
    /// Outlived one of the expiry policies
    Expired,
}

impl RemovalCause {
    /// True for removals the cache decided on by itself.
    pub fn was_evicted(&self) -> bool {
        matches!(self, RemovalCause::Size | RemovalCause::Expired)
    }
}

impl fmt::Display for RemovalCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RemovalCause::Explicit => "explicit",
            RemovalCause::Replaced => "replaced",
            RemovalCause::Size => "size",
            RemovalCause::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Called after an entry is removed, outside of any cache lock.
///
/// `value` is `None` when the removed entry was a negative result.
pub trait RemovalListener<K, V>: Send + Sync {
    fn on_removal(&self, key: &K, value: Option<&V>, cause: RemovalCause);
}

impl<K, V, F> RemovalListener<K, V> for F
where
    F: Fn(&K, Option<&V>, RemovalCause) + Send + Sync,
{
    fn on_removal(&self, key: &K, value: Option<&V>, cause: RemovalCause) {
        self(key, value, cause)
    }
}

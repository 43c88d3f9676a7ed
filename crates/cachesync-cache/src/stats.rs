//! Cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated on the hot path with relaxed atomics.
#[derive(Debug, Default)]
pub struct CacheStatistics {
    /// Reads answered from a live entry
    pub hits: AtomicU64,
    /// Reads that started or joined a load
    pub misses: AtomicU64,
    /// Loads that produced a value or a negative result
    pub load_successes: AtomicU64,
    /// Loads that failed, timed out or panicked
    pub load_failures: AtomicU64,
    /// Entries removed for size or expiry
    pub evictions: AtomicU64,
}

impl CacheStatistics {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_load(&self, success: bool) {
        if success {
            self.load_successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.load_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Fraction of requests that were hits. 1.0 when nothing was requested.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        let total = hits + misses;

        if total == 0.0 { 1.0 } else { hits / total }
    }

    /// Get a snapshot of current statistics.
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            load_successes: self.load_successes.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),
        }
    }
}

/// A point-in-time snapshot of cache statistics.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub load_successes: u64,
    pub load_failures: u64,
    pub evictions: u64,
    pub hit_ratio: f64,
}

impl CacheStatsSnapshot {
    pub fn request_count(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn load_count(&self) -> u64 {
        self.load_successes + self.load_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_ratio() {
        let stats = CacheStatistics::default();
        assert_eq!(stats.hit_ratio(), 1.0);

        stats.record_miss();
        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        assert_eq!(stats.hit_ratio(), 0.75);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = CacheStatistics::default();
        stats.record_miss();
        stats.record_load(true);
        stats.record_load(false);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.request_count(), 1);
        assert_eq!(snapshot.load_count(), 2);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["load_failures"], 1);
        assert_eq!(json["hit_ratio"], 0.0);
    }
}

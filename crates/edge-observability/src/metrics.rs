//! Process-wide cache counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Cache counters, shared by the dispatcher and the sweeper.
///
/// All updates are relaxed atomics; a snapshot is a consistent-enough view
/// for logging, not a transaction.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    revalidated: AtomicU64,
    invalidated: AtomicU64,
    populated: AtomicU64,
    bypassed: AtomicU64,
    redirects: AtomicU64,
    evicted: AtomicU64,
    bytes_served_from_cache: AtomicU64,
    bytes_populated: AtomicU64,
}

/// Point-in-time copy of [`CacheMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub revalidated: u64,
    pub invalidated: u64,
    pub populated: u64,
    pub bypassed: u64,
    pub redirects: u64,
    pub evicted: u64,
    pub bytes_served_from_cache: u64,
    pub bytes_populated: u64,
}

impl MetricsSnapshot {
    /// Fraction of cache-eligible requests answered locally.
    pub fn hit_ratio(&self) -> f64 {
        let served = self.hits + self.revalidated;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh copy served.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Stale copy confirmed by the origin.
    pub fn record_revalidated(&self) {
        self.revalidated.fetch_add(1, Ordering::Relaxed);
    }

    /// Request answered from origin.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Stale entry removed on the request path.
    pub fn record_invalidated(&self) {
        self.invalidated.fetch_add(1, Ordering::Relaxed);
    }

    /// Body and record written.
    pub fn record_populated(&self, bytes: u64) {
        self.populated.fetch_add(1, Ordering::Relaxed);
        self.bytes_populated.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Proxied without capture (`private`/`no-store`).
    pub fn record_bypass(&self) {
        self.bypassed.fetch_add(1, Ordering::Relaxed);
    }

    /// Client sent to the origin.
    pub fn record_redirect(&self) {
        self.redirects.fetch_add(1, Ordering::Relaxed);
    }

    /// Entries removed by the sweeper.
    pub fn record_evicted(&self, count: u64) {
        self.evicted.fetch_add(count, Ordering::Relaxed);
    }

    /// Bytes streamed from local files.
    pub fn add_bytes_served_from_cache(&self, bytes: u64) {
        self.bytes_served_from_cache
            .fetch_add(bytes, Ordering::Relaxed);
    }

    /// Copy the current values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            revalidated: self.revalidated.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
            populated: self.populated.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            redirects: self.redirects.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            bytes_served_from_cache: self.bytes_served_from_cache.load(Ordering::Relaxed),
            bytes_populated: self.bytes_populated.load(Ordering::Relaxed),
        }
    }

    /// Emit the counters as one structured log line.
    pub fn log_summary(&self) {
        let s = self.snapshot();
        tracing::info!(
            hits = s.hits,
            misses = s.misses,
            revalidated = s.revalidated,
            invalidated = s.invalidated,
            populated = s.populated,
            bypassed = s.bypassed,
            redirects = s.redirects,
            evicted = s.evicted,
            bytes_served_from_cache = s.bytes_served_from_cache,
            bytes_populated = s.bytes_populated,
            hit_ratio = s.hit_ratio(),
            "cache counters"
        );
    }
}

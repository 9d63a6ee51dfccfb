//! Monotone counters (§3 Statistics), exposed read-only via `Pool::statistics()`.
use std::sync::atomic::{AtomicU64, Ordering};

/// A thin, lock-free counter interface. This is *not* a metrics/JMX sink (that
/// plumbing is out of scope); it just keeps the numbers so one can be wired up.
#[derive(Debug, Default)]
pub struct Statistics {
    statements_prepared: AtomicU64,
    prepare_time_total_ns: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    connections_requested: AtomicU64,
    wait_time_total_ns: AtomicU64,
}

/// A consistent (but not atomic-across-fields) snapshot of [`Statistics`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StatisticsSnapshot {
    pub statements_prepared: u64,
    pub prepare_time_total_ns: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub connections_requested: u64,
    pub wait_time_total_ns: u64,
}

impl Statistics {
    pub(crate) fn record_prepare(&self, elapsed_ns: u64, cache_hit: bool) {
        self.statements_prepared.fetch_add(1, Ordering::Relaxed);
        self.prepare_time_total_ns.fetch_add(elapsed_ns, Ordering::Relaxed);
        if cache_hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_acquire(&self, wait_ns: u64) {
        self.connections_requested.fetch_add(1, Ordering::Relaxed);
        self.wait_time_total_ns.fetch_add(wait_ns, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            statements_prepared: self.statements_prepared.load(Ordering::Relaxed),
            prepare_time_total_ns: self.prepare_time_total_ns.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            connections_requested: self.connections_requested.load(Ordering::Relaxed),
            wait_time_total_ns: self.wait_time_total_ns.load(Ordering::Relaxed),
        }
    }
}

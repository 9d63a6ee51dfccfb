//! A single pool shard (§3 ConnectionPartition, §4.3).
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_queue::ArrayQueue;
use tokio::sync::Notify;

use crate::handle::ConnectionHandle;
use crate::pool::PoolShared;
use crate::stats::Statistics;

/// Shared, `Arc`-held state for one shard of the pool.
///
/// The back-reference to the owning pool is a [`Weak`], not a strong `Arc`:
/// the pool outlives its partitions structurally (it owns the `Vec<Arc<..>>`
/// they live in), so a strong pointer here would just be a same-lifetime
/// cycle with no benefit, whereas `Weak` costs nothing to upgrade on the rare
/// path (classification escalating to a full pool-wide termination).
pub(crate) struct PartitionShared {
    pub(crate) index: usize,
    free: ArrayQueue<ConnectionHandle>,
    total: AtomicUsize,
    pub(crate) min: usize,
    pub(crate) max: usize,
    pub(crate) acquire_increment: usize,
    unable_to_grow: AtomicBool,
    growth_signal: Notify,
    pub(crate) stats: Arc<Statistics>,
    pool: Weak<PoolShared>,
}

impl PartitionShared {
    pub(crate) fn new(
        index: usize,
        min: usize,
        max: usize,
        acquire_increment: usize,
        stats: Arc<Statistics>,
        pool: Weak<PoolShared>,
    ) -> Arc<Self> {
        Arc::new(Self {
            index,
            free: ArrayQueue::new(max.max(1)),
            total: AtomicUsize::new(0),
            min,
            max,
            acquire_increment,
            unable_to_grow: AtomicBool::new(false),
            growth_signal: Notify::new(),
            stats,
            pool,
        })
    }

    pub(crate) fn pool(&self) -> Option<Arc<PoolShared>> {
        self.pool.upgrade()
    }

    /// Non-blocking dequeue of a free handle.
    pub(crate) fn try_checkout(&self) -> Option<ConnectionHandle> {
        self.free.pop()
    }

    pub(crate) fn free_len(&self) -> usize {
        self.free.len()
    }

    pub(crate) fn total(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    /// Low-free-count heuristic that decides whether to poke the growth worker.
    pub(crate) fn needs_growth(&self) -> bool {
        self.free.is_empty() && self.total() < self.max
    }

    pub(crate) fn signal_growth(&self) {
        self.growth_signal.notify_one();
    }

    pub(crate) async fn wait_for_growth_signal(&self) {
        self.growth_signal.notified().await;
    }

    pub(crate) fn set_unable_to_grow(&self, v: bool) {
        self.unable_to_grow.store(v, Ordering::Release);
    }

    pub(crate) fn unable_to_grow(&self) -> bool {
        self.unable_to_grow.load(Ordering::Acquire)
    }

    /// Offer a handle back to the free queue. The queue is sized to `max`, so
    /// this only fails if `total` briefly overshoots `max`, which the growth
    /// worker is responsible for never doing; callers should treat `Err` as a
    /// bug and retire the handle rather than leak it.
    pub(crate) fn push_free(&self, handle: ConnectionHandle) -> Result<(), ConnectionHandle> {
        self.free.push(handle)
    }

    pub(crate) fn record_new_connection(&self) {
        self.total.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_retirement(&self) {
        self.total.fetch_sub(1, Ordering::AcqRel);
    }

    /// Drain every free handle, for pool-wide termination and shutdown.
    pub(crate) fn drain_free(&self) -> Vec<ConnectionHandle> {
        std::iter::from_fn(|| self.free.pop()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_growth_when_empty_and_below_max() {
        let stats = Arc::new(Statistics::default());
        let partition = PartitionShared::new(0, 2, 5, 2, stats, Weak::new());
        assert!(partition.needs_growth());
        partition.record_new_connection();
        partition.record_new_connection();
        assert_eq!(partition.total(), 2);
    }

    #[test]
    fn does_not_need_growth_once_at_max() {
        let stats = Arc::new(Statistics::default());
        let partition = PartitionShared::new(0, 1, 1, 1, stats, Weak::new());
        partition.record_new_connection();
        assert!(!partition.needs_growth());
    }
}

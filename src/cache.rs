//! Bounded, per-handle statement cache (§3 StatementCache, §4.1.1).
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::raw::{RawStatement, StatementKey};

/// A bounded K→V map from [`StatementKey`] to a reusable statement wrapper.
///
/// Eviction policy is LRU (see DESIGN.md for the rationale), implemented via
/// the `lru` crate's `push`, which returns the evicted entry so the caller can
/// close it physically rather than leaking the underlying driver resource.
///
/// A capacity of `0` disables caching entirely: `inner` is `None` and every
/// lookup is a guaranteed miss, matching `statementsCacheSize = 0` in §6.
pub struct StatementCache {
    inner: Option<LruCache<StatementKey, Box<dyn RawStatement>>>,
}

impl StatementCache {
    pub fn new(capacity: usize) -> Self {
        Self { inner: NonZeroUsize::new(capacity).map(LruCache::new) }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, LruCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return the cached statement for `key`, if any. A hit takes
    /// the statement out of the cache for the duration it is "logically open"
    /// with the client; it is reinserted by [`StatementCache::insert`] when
    /// the client closes it.
    pub fn take(&mut self, key: &StatementKey) -> Option<Box<dyn RawStatement>> {
        self.inner.as_mut()?.pop(key)
    }

    /// Offer a statement back to the cache under `key`. Returns the evicted
    /// victim (key plus statement) if the cache was at capacity, so the
    /// caller can close it physically.
    pub fn insert(
        &mut self,
        key: StatementKey,
        stmt: Box<dyn RawStatement>,
    ) -> Option<(StatementKey, Box<dyn RawStatement>)> {
        self.inner.as_mut().and_then(|cache| cache.push(key, stmt))
    }

    /// Remove every cached statement, for physical retirement of the owning
    /// handle: every cached statement must be closed.
    pub fn drain(&mut self) -> Vec<Box<dyn RawStatement>> {
        match &mut self.inner {
            Some(cache) => std::iter::from_fn(|| cache.pop_lru().map(|(_, stmt)| stmt)).collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverError;
    use crate::raw::{DriverResult, StatementParam};
    use futures_core::future::BoxFuture;

    struct StubStatement(u32);

    impl RawStatement for StubStatement {
        fn execute(&mut self, _params: &[StatementParam]) -> BoxFuture<'_, DriverResult<u64>> {
            Box::pin(async { Ok(0) })
        }

        fn close(&mut self) -> BoxFuture<'_, DriverResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn key(n: u64) -> StatementKey {
        // StatementKey's only public constructor hashes SQL text + options;
        // reuse that rather than reaching into its private field.
        StatementKey::new(&format!("select {n}"), &Default::default())
    }

    #[test]
    fn zero_capacity_disables_caching() {
        let mut cache = StatementCache::new(0);
        assert!(!cache.is_enabled());
        assert!(cache.insert(key(1), Box::new(StubStatement(1))).is_none());
        assert!(cache.take(&key(1)).is_none());
    }

    #[test]
    fn hit_after_reinsert() {
        let mut cache = StatementCache::new(4);
        let k = key(1);
        assert!(cache.insert(k.clone(), Box::new(StubStatement(1))).is_none());
        assert!(cache.take(&k).is_some());
        assert!(cache.take(&k).is_none(), "statement was taken out, not a permanent hit");
    }

    #[test]
    fn lru_eviction_on_overflow() {
        let mut cache = StatementCache::new(2);
        assert!(cache.insert(key(1), Box::new(StubStatement(1))).is_none());
        assert!(cache.insert(key(2), Box::new(StubStatement(2))).is_none());
        // touch key 1 so key 2 becomes the least-recently-used entry
        let s1 = cache.take(&key(1)).unwrap();
        cache.insert(key(1), s1);
        let evicted = cache.insert(key(3), Box::new(StubStatement(3)));
        assert!(evicted.is_some());
        assert_eq!(evicted.unwrap().0, key(2));
    }
}

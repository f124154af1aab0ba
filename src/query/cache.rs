use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;
use crate::query::planner::ClauseId;
use crate::search::filter::Filter;

/// Compiled filters shared by the executors of a query.
///
/// Only unbound filters of deterministic clauses are stored; executors bind
/// their own context after a hit.
pub struct FilterCache {
    cache: Mutex<LruCache<ClauseId, Filter>>,
    pub size_limit: usize,
    hit_count: AtomicUsize,
    miss_count: AtomicUsize,
}

impl FilterCache {
    pub fn new(size_limit: usize) -> Self {
        let cap = NonZeroUsize::new(size_limit).unwrap_or(NonZeroUsize::MIN);
        FilterCache {
            cache: Mutex::new(LruCache::new(cap)),
            size_limit: cap.get(),
            hit_count: AtomicUsize::new(0),
            miss_count: AtomicUsize::new(0),
        }
    }

    pub fn get(&self, key: ClauseId) -> Option<Filter> {
        let mut cache = self.cache.lock();
        if let Some(filter) = cache.get(&key) {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            Some(filter.clone())
        } else {
            self.miss_count.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn put(&self, key: ClauseId, filter: Filter) {
        self.cache.lock().put(key, filter);
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            size: self.cache.lock().len(),
            capacity: self.size_limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub hit_count: usize,
    pub miss_count: usize,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

//! Per-argument result cache invalidated by a snapshot stamp.

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use metrics::counter;
use rustc_hash::FxHashMap;
use tracing::trace;

pub const DEFAULT_MEMO_CAP: usize = 64;

/// Caches `V` per structural key `K` for one stamp `P` (usually a state
/// revision). A different stamp empties the cache. Past `cap` entries the
/// oldest key is evicted and counted as dropped.
pub struct Memo<K, V, P = u64> {
    name: &'static str,
    cap: usize,
    inner: Mutex<Inner<K, V, P>>,
}

struct Inner<K, V, P> {
    stamp: Option<P>,
    map: FxHashMap<K, Arc<V>>,
    order: VecDeque<K>,
    hits: u64,
    misses: u64,
    dropped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoStats {
    pub len: usize,
    pub hits: u64,
    pub misses: u64,
    pub dropped: u64,
}

impl<K, V, P> Memo<K, V, P>
where
    K: Clone + Eq + Hash,
    P: Copy + PartialEq,
{
    pub fn new(name: &'static str) -> Self {
        Self::with_capacity(name, DEFAULT_MEMO_CAP)
    }

    pub fn with_capacity(name: &'static str, cap: usize) -> Self {
        Self {
            name,
            cap: cap.max(1),
            inner: Mutex::new(Inner {
                stamp: None,
                map: FxHashMap::default(),
                order: VecDeque::new(),
                hits: 0,
                misses: 0,
                dropped: 0,
            }),
        }
    }

    /// Returns the cached value for `key` at `stamp`, computing it on a miss.
    /// `compute` runs without the lock held.
    pub fn get_or_compute(&self, stamp: P, key: K, compute: impl FnOnce() -> V) -> Arc<V> {
        {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if inner.stamp != Some(stamp) {
                inner.stamp = Some(stamp);
                inner.map.clear();
                inner.order.clear();
            }
            if let Some(hit) = inner.map.get(&key).cloned() {
                inner.hits += 1;
                counter!("select_memo_hits_total", 1u64, "selector" => self.name);
                return hit;
            }
            inner.misses += 1;
        }
        counter!("select_memo_misses_total", 1u64, "selector" => self.name);
        trace!(selector = self.name, "memo miss");

        let value = Arc::new(compute());
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        // Another reader may have moved to a newer stamp meanwhile.
        if inner.stamp != Some(stamp) {
            return value;
        }
        if !inner.map.contains_key(&key) {
            if inner.order.len() >= self.cap {
                if let Some(old) = inner.order.pop_front() {
                    inner.map.remove(&old);
                    inner.dropped += 1;
                }
            }
            inner.order.push_back(key.clone());
        }
        inner.map.insert(key, Arc::clone(&value));
        value
    }

    pub fn stats(&self) -> MemoStats {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        MemoStats { len: inner.map.len(), hits: inner.hits, misses: inner.misses, dropped: inner.dropped }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<K, V, P> std::fmt::Debug for Memo<K, V, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo").field("name", &self.name).field("cap", &self.cap).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn repeated_key_hits_without_recompute() {
        let memo: Memo<Vec<u32>, usize> = Memo::new("test");
        let calls = Cell::new(0);
        let a = memo.get_or_compute(1, vec![1, 2], || {
            calls.set(calls.get() + 1);
            2
        });
        let b = memo.get_or_compute(1, vec![1, 2], || {
            calls.set(calls.get() + 1);
            2
        });
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.get(), 1);
        assert_eq!(memo.stats().hits, 1);
        assert_eq!(memo.stats().misses, 1);
    }

    #[test]
    fn new_stamp_clears_entries() {
        let memo: Memo<u32, String> = Memo::new("test");
        let a = memo.get_or_compute(1, 7, || "old".to_string());
        let b = memo.get_or_compute(2, 7, || "new".to_string());
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.as_str(), "new");
        assert_eq!(memo.stats().len, 1);
    }

    #[test]
    fn evicts_oldest_past_capacity() {
        let memo: Memo<u32, u32> = Memo::with_capacity("test", 2);
        memo.get_or_compute(1, 1, || 1);
        memo.get_or_compute(1, 2, || 2);
        memo.get_or_compute(1, 3, || 3);
        let stats = memo.stats();
        assert_eq!(stats.len, 2);
        assert_eq!(stats.dropped, 1);
        // Key 1 was evicted and is computed again.
        memo.get_or_compute(1, 1, || 10);
        assert_eq!(memo.stats().misses, 4);
    }
}

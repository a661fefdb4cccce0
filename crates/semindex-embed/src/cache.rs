use std::borrow::Borrow;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

/// Counters reported by [`FifoCache::stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub name: &'static str,
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Inner<K, V> {
    map: HashMap<K, V>,
    order: VecDeque<K>,
}

/// Bounded map that evicts in insertion order. Re-inserting an existing key
/// replaces the value without refreshing its position.
pub struct FifoCache<K, V> {
    name: &'static str,
    capacity: usize,
    inner: Mutex<Inner<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V> FifoCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            inner: Mutex::new(Inner { map: HashMap::new(), order: VecDeque::new() }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let found = self.lock().map.get(key).cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn insert(&self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.lock();
        if let Some(slot) = inner.map.get_mut(&key) {
            *slot = value;
            return;
        }
        while inner.map.len() >= self.capacity {
            let Some(oldest) = inner.order.pop_front() else { break };
            inner.map.remove(&oldest);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        inner.order.push_back(key.clone());
        inner.map.insert(key, value);
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.lock().map.contains_key(key)
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let mut inner = self.lock();
        let removed = inner.map.remove(key);
        if removed.is_some() {
            inner.order.retain(|k| <K as Borrow<Q>>::borrow(k) != key);
        }
        removed
    }

    /// Keep only entries whose key satisfies `keep`.
    pub fn retain_keys(&self, mut keep: impl FnMut(&K) -> bool) {
        let mut inner = self.lock();
        let Inner { map, order } = &mut *inner;
        order.retain(|k| {
            let kept = keep(k);
            if !kept {
                map.remove(k);
            }
            kept
        });
    }

    pub fn len(&self) -> usize { self.lock().map.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.map.clear();
        inner.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            name: self.name,
            entries: self.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

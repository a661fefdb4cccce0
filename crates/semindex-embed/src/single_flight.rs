use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use futures::future::{join_all, BoxFuture, FutureExt, Shared};

type Flight<V> = Shared<BoxFuture<'static, V>>;

/// Collapses concurrent computations for the same key into one.
///
/// The first caller for a key starts the work; callers arriving while it is
/// in flight await the same future and get a clone of its output. The entry
/// is dropped once the work completes, so a later call starts afresh.
///
/// The `lookup` passed to [`SingleFlight::run_or_lookup`] is consulted while
/// the in-flight table is locked. A flight publishes its result (typically
/// into a cache) before its entry is removed, so a caller either joins the
/// flight or sees the published value.
pub struct SingleFlight<K, V>
where
    V: Clone,
{
    inflight: Mutex<HashMap<K, Flight<V>>>,
    started: AtomicU64,
}

enum Slot<V: Clone> {
    Ready(V),
    Waiting(Flight<V>),
}

impl<K, V> Default for SingleFlight<K, V>
where
    V: Clone,
{
    fn default() -> Self { Self { inflight: Mutex::new(HashMap::new()), started: AtomicU64::new(0) } }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Flight<V>>> {
        self.inflight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn run<F, Fut>(&self, key: K, make: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        self.run_or_lookup(key, |_| None, make).await
    }

    /// Like [`Self::run`], but returns `lookup`'s value when it has one.
    pub async fn run_or_lookup<L, F, Fut>(&self, key: K, lookup: L, make: F) -> V
    where
        L: FnOnce(&K) -> Option<V>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let flight = {
            let mut inflight = self.lock();
            if let Some(existing) = inflight.get(&key) {
                existing.clone()
            } else if let Some(v) = lookup(&key) {
                return v;
            } else {
                let fut = make().boxed().shared();
                inflight.insert(key.clone(), fut.clone());
                self.started.fetch_add(1, Ordering::Relaxed);
                fut
            }
        };
        let out = flight.clone().await;
        self.finish(&key, &flight);
        out
    }

    /// Batched [`Self::run_or_lookup`]. Keys that are neither found by
    /// `lookup` nor already in flight are computed together by a single call
    /// to `make`, whose output is matched to its input keys by position;
    /// missing positions yield `V::default()`. Results follow `keys` order.
    pub async fn run_batch<L, F, Fut>(&self, keys: &[K], mut lookup: L, make: F) -> Vec<V>
    where
        V: Default,
        L: FnMut(&K) -> Option<V>,
        F: FnOnce(Vec<K>) -> Fut,
        Fut: Future<Output = Vec<V>> + Send + 'static,
    {
        let mut started = Vec::new();
        let slots: Vec<Slot<V>> = {
            let mut inflight = self.lock();
            let mut ready = HashMap::new();
            let mut missing = Vec::new();
            let mut seen = HashSet::new();
            for key in keys {
                if !seen.insert(key) || inflight.contains_key(key) {
                    continue;
                }
                match lookup(key) {
                    Some(v) => {
                        ready.insert(key, v);
                    }
                    None => missing.push(key.clone()),
                }
            }
            if !missing.is_empty() {
                let batch = make(missing.clone()).boxed().shared();
                for (i, key) in missing.into_iter().enumerate() {
                    let one: Flight<V> = batch
                        .clone()
                        .map(move |out: Vec<V>| out.get(i).cloned().unwrap_or_default())
                        .boxed()
                        .shared();
                    inflight.insert(key.clone(), one.clone());
                    started.push((key, one));
                }
                self.started.fetch_add(started.len() as u64, Ordering::Relaxed);
            }
            keys.iter()
                .map(|key| match ready.get(key) {
                    Some(v) => Slot::Ready(v.clone()),
                    None => Slot::Waiting(inflight.get(key).cloned().unwrap_or_else(|| {
                        futures::future::ready(V::default()).boxed().shared()
                    })),
                })
                .collect()
        };

        let out = join_all(slots.into_iter().map(|slot| async move {
            match slot {
                Slot::Ready(v) => v,
                Slot::Waiting(flight) => flight.await,
            }
        }))
        .await;
        for (key, flight) in &started {
            self.finish(key, flight);
        }
        out
    }

    fn finish(&self, key: &K, flight: &Flight<V>) {
        let mut inflight = self.lock();
        if inflight.get(key).is_some_and(|current| current.ptr_eq(flight)) {
            inflight.remove(key);
        }
    }

    /// Number of computations actually started.
    pub fn started(&self) -> u64 { self.started.load(Ordering::Relaxed) }

    pub fn in_flight(&self) -> usize { self.lock().len() }
}

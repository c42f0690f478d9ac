//! Generic TTL + recency eviction cache.
//!
//! Two independent staleness mechanisms:
//!
//! - **TTL**: a background sweeper removes entries older than the TTL,
//!   and `get` lazily expires an entry that aged out before the sweep.
//! - **Capacity**: inserting at capacity first evicts the oldest tenth
//!   of the recency queue.
//!
//! An id appears in the recency queue at most once, and presence in the
//! map implies presence in the queue and vice versa.

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Ceiling on the background sweep interval.
const SWEEP_INTERVAL_CEILING: Duration = Duration::from_secs(30);

struct CacheEntry<V> {
    value: V,
    last_used: Instant,
}

struct CacheState<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    recency: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V> CacheState<K, V> {
    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            self.recency.remove(pos);
        }
        self.recency.push_back(key.clone());
    }

    fn evict(&mut self, key: &K) {
        self.entries.remove(key);
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            self.recency.remove(pos);
        }
    }
}

struct Shared<K, V> {
    state: Mutex<CacheState<K, V>>,
    shutdown: Mutex<bool>,
    wake: Condvar,
    ttl: Duration,
    capacity: usize,
}

/// A bounded read cache with TTL expiry and LRU-style capacity eviction.
///
/// # Teardown
///
/// The sweeper thread is stopped by [`Cache::shutdown`] or on drop.
pub struct Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    shared: Arc<Shared<K, V>>,
    sweeper: Option<JoinHandle<()>>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a cache with the given capacity and TTL and starts the
    /// background sweeper.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                recency: VecDeque::new(),
            }),
            shutdown: Mutex::new(false),
            wake: Condvar::new(),
            ttl,
            capacity: capacity.max(1),
        });

        let sweeper_shared = Arc::clone(&shared);
        let interval = ttl.min(SWEEP_INTERVAL_CEILING);
        let sweeper = std::thread::Builder::new()
            .name("foliodb-cache-sweep".into())
            .spawn(move || {
                let mut stopped = sweeper_shared.shutdown.lock();
                loop {
                    if *stopped {
                        return;
                    }
                    sweeper_shared.wake.wait_for(&mut stopped, interval);
                    if *stopped {
                        return;
                    }
                    Self::sweep(&sweeper_shared);
                }
            })
            .expect("failed to spawn cache sweeper");

        Self {
            shared,
            sweeper: Some(sweeper),
        }
    }

    /// Removes every entry older than the TTL.
    fn sweep(shared: &Shared<K, V>) {
        let mut state = shared.state.lock();
        let now = Instant::now();
        let expired: Vec<K> = state
            .entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.last_used) > shared.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "cache sweep expired entries");
        }
        for key in &expired {
            state.evict(key);
        }
    }

    /// Returns the cached value, refreshing its recency.
    ///
    /// An entry older than the TTL is evicted on the spot and reported
    /// as absent, even if the sweeper has not run yet.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.shared.state.lock();
        let fresh = match state.entries.get(key) {
            Some(entry) => entry.last_used.elapsed() <= self.shared.ttl,
            None => return None,
        };
        if !fresh {
            state.evict(key);
            return None;
        }
        state.touch(key);
        let entry = state.entries.get_mut(key)?;
        entry.last_used = Instant::now();
        Some(entry.value.clone())
    }

    /// Inserts or replaces a value, moving the key to the MRU end.
    ///
    /// At capacity, the oldest tenth of the recency queue (at least one
    /// entry) is evicted before the new key is inserted.
    pub fn update(&self, key: K, value: V) {
        let mut state = self.shared.state.lock();
        let is_new = !state.entries.contains_key(&key);

        if is_new && state.entries.len() >= self.shared.capacity {
            let count = (self.shared.capacity / 10).max(1);
            for _ in 0..count {
                match state.recency.front().cloned() {
                    Some(oldest) => state.evict(&oldest),
                    None => break,
                }
            }
        }

        state.touch(&key);
        state.entries.insert(
            key,
            CacheEntry {
                value,
                last_used: Instant::now(),
            },
        );
    }

    /// Removes a key from the map and the recency queue.
    pub fn delete(&self, key: &K) {
        self.shared.state.lock().evict(key);
    }

    /// Returns the number of resident entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    /// Returns whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops the background sweeper.
    pub fn shutdown(&mut self) {
        {
            let mut stopped = self.shared.shutdown.lock();
            *stopped = true;
            self.shared.wake.notify_all();
        }
        if let Some(handle) = self.sweeper.take() {
            let _ = handle.join();
        }
    }
}

impl<K, V> Drop for Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<K, V> std::fmt::Debug for Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("len", &self.len())
            .field("capacity", &self.shared.capacity)
            .field("ttl", &self.shared.ttl)
            .finish_non_exhaustive()
    }
}

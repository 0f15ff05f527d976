//! Strict LRU cache with single-flight loading.
//!
//! [`LruCache`] hands out `Arc` handles, so an entry evicted while another
//! thread is still reading it stays alive until that reader is done. Misses
//! for the same key are coalesced: one caller runs the loader while the
//! others block until it finishes and then share its result.
//!
//! # Example
//!
//! ```ignore
//! use terrain::cache::LruCache;
//!
//! let cache = LruCache::with_eviction_hook(2, |key: &u32, value: &String| {
//!     println!("evicted {key} = {value}");
//! });
//!
//! let value = cache.get_or_load(1, || Ok("one".to_string()))?;
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::debug;

use crate::error::{Result, TerrainError};

/// Default maximum number of resident entries.
pub const DEFAULT_CAPACITY: usize = 8192;

/// Called synchronously on every entry that leaves the cache.
pub type EvictionHook<K, V> = Box<dyn Fn(&K, &V) + Send + Sync>;

/// Statistics about cache usage.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of entries currently in the cache.
    pub entry_count: u64,
    /// Number of lookups served without running a loader.
    pub hit_count: u64,
    /// Number of lookups that ran a loader.
    pub miss_count: u64,
    /// Number of entries evicted to make room.
    pub eviction_count: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0).
    ///
    /// Returns 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

struct Entry<V> {
    value: Arc<V>,
    tick: u64,
}

enum Outcome<V> {
    Loaded(Arc<V>),
    Failed(String),
}

/// A load in progress. The outcome is set exactly once, under the state lock.
struct Flight<V> {
    outcome: OnceLock<Outcome<V>>,
}

struct State<K, V> {
    entries: HashMap<K, Entry<V>>,
    /// Access tick -> key, oldest first.
    recency: BTreeMap<u64, K>,
    clock: u64,
    in_flight: HashMap<K, Arc<Flight<V>>>,
}

impl<K: Eq + Hash + Clone, V> State<K, V> {
    fn next_tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Look up a resident entry and mark it most recently used.
    fn touch(&mut self, key: &K) -> Option<Arc<V>> {
        let tick = self.next_tick();
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.tick);
        self.recency.insert(tick, key.clone());
        entry.tick = tick;
        Some(Arc::clone(&entry.value))
    }

    fn remove(&mut self, key: &K) -> Option<Arc<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        Some(entry.value)
    }
}

/// Fixed-capacity, strictly least-recently-used cache.
///
/// All bookkeeping sits behind one mutex; loaders run outside it. The
/// eviction hook runs while the mutex is held and must not call back into the
/// cache.
pub struct LruCache<K, V> {
    capacity: usize,
    state: Mutex<State<K, V>>,
    load_complete: Condvar,
    on_evict: Option<EvictionHook<K, V>>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    eviction_count: AtomicU64,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(State {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                clock: 0,
                in_flight: HashMap::new(),
            }),
            load_complete: Condvar::new(),
            on_evict: None,
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            eviction_count: AtomicU64::new(0),
        }
    }

    /// Create a cache that calls `hook` on every entry it drops.
    ///
    /// The hook runs once per entry: on eviction, [`invalidate`](Self::invalidate)
    /// and [`clear`](Self::clear). An evicted entry is handed to the hook
    /// before the entry that displaced it is admitted.
    pub fn with_eviction_hook<F>(capacity: usize, hook: F) -> Self
    where
        F: Fn(&K, &V) + Send + Sync + 'static,
    {
        let mut cache = Self::new(capacity);
        cache.on_evict = Some(Box::new(hook));
        cache
    }

    /// Return the cached value for `key`, running `load` on a miss.
    ///
    /// Concurrent misses for the same key run `load` only once. The other
    /// callers wait and receive the same handle. A failed load is not cached:
    /// the loading caller gets the original error, waiters get
    /// [`TerrainError::LoadFailed`], and the next call tries again.
    pub fn get_or_load<F>(&self, key: K, load: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Result<V>,
    {
        let flight = {
            let mut state = self.lock();

            if let Some(value) = state.touch(&key) {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                return Ok(value);
            }

            let pending = state.in_flight.get(&key).cloned();
            if let Some(flight) = pending {
                let outcome = loop {
                    if let Some(outcome) = flight.outcome.get() {
                        break outcome;
                    }
                    state = self.wait(state);
                };
                drop(state);

                return match outcome {
                    Outcome::Loaded(value) => {
                        self.hit_count.fetch_add(1, Ordering::Relaxed);
                        Ok(Arc::clone(value))
                    }
                    Outcome::Failed(reason) => Err(TerrainError::LoadFailed {
                        key: key.to_string(),
                        reason: reason.clone(),
                    }),
                };
            }

            self.miss_count.fetch_add(1, Ordering::Relaxed);
            let flight = Arc::new(Flight {
                outcome: OnceLock::new(),
            });
            state.in_flight.insert(key.clone(), Arc::clone(&flight));
            flight
        };

        let mut guard = LoadGuard {
            cache: self,
            key: &key,
            flight: &flight,
            armed: true,
        };
        let result = load();
        guard.armed = false;

        match result {
            Ok(value) => {
                let value = Arc::new(value);
                self.finish(&key, &flight, Outcome::Loaded(Arc::clone(&value)));
                Ok(value)
            }
            Err(e) => {
                self.finish(&key, &flight, Outcome::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Insert a value directly, evicting the least recently used entry if
    /// the cache is full. Replacing an existing key releases the old value.
    pub fn insert(&self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);
        let mut state = self.lock();
        self.admit(&mut state, key, Arc::clone(&value));
        value
    }

    /// Look up a resident entry, marking it most recently used.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.lock().touch(key)
    }

    /// Whether `key` is resident. Does not affect recency.
    pub fn contains(&self, key: &K) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Remove one entry, running the eviction hook on it.
    ///
    /// Returns `false` if the key was not resident.
    pub fn invalidate(&self, key: &K) -> bool {
        let mut state = self.lock();
        match state.remove(key) {
            Some(value) => {
                self.release(key, &value);
                true
            }
            None => false,
        }
    }

    /// Remove every entry, oldest first, running the eviction hook on each.
    pub fn clear(&self) {
        let mut state = self.lock();
        let keys: Vec<K> = std::mem::take(&mut state.recency).into_values().collect();
        for key in keys {
            if let Some(entry) = state.entries.remove(&key) {
                self.release(&key, &entry.value);
            }
        }
    }

    /// Resident keys from least to most recently used.
    pub fn keys(&self) -> Vec<K> {
        self.lock().recency.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of resident entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.len() as u64,
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            eviction_count: self.eviction_count.load(Ordering::Relaxed),
        }
    }

    // A panicking loader or hook poisons the mutex; the state itself is
    // always consistent between statements, so keep going.
    fn lock(&self) -> MutexGuard<'_, State<K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State<K, V>>) -> MutexGuard<'a, State<K, V>> {
        self.load_complete
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, key: &K, flight: &Flight<V>, outcome: Outcome<V>) {
        let mut state = self.lock();
        state.in_flight.remove(key);
        if let Outcome::Loaded(value) = &outcome {
            self.admit(&mut state, key.clone(), Arc::clone(value));
        }
        let _ = flight.outcome.set(outcome);
        drop(state);
        self.load_complete.notify_all();
    }

    fn admit(&self, state: &mut State<K, V>, key: K, value: Arc<V>) {
        if let Some(previous) = state.remove(&key) {
            self.release(&key, &previous);
        }

        while state.entries.len() >= self.capacity {
            let Some((_, oldest)) = state.recency.pop_first() else {
                break;
            };
            if let Some(entry) = state.entries.remove(&oldest) {
                self.eviction_count.fetch_add(1, Ordering::Relaxed);
                debug!(key = %oldest, "Evicting least recently used entry");
                self.release(&oldest, &entry.value);
            }
        }

        let tick = state.next_tick();
        state.recency.insert(tick, key.clone());
        state.entries.insert(key, Entry { value, tick });
    }

    fn release(&self, key: &K, value: &V) {
        if let Some(hook) = &self.on_evict {
            hook(key, value);
        }
    }
}

/// Fails the flight if the loader unwinds, so waiters are not stuck forever.
struct LoadGuard<'a, K, V>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    cache: &'a LruCache<K, V>,
    key: &'a K,
    flight: &'a Flight<V>,
    armed: bool,
}

impl<K, V> Drop for LoadGuard<'_, K, V>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    fn drop(&mut self) {
        if self.armed {
            self.cache.finish(
                self.key,
                self.flight,
                Outcome::Failed("loader panicked".to_string()),
            );
        }
    }
}

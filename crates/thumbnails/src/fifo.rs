//! Thread-safe bounded cache with FIFO eviction
//!
//! A generic in-process mapping that holds at most `capacity` entries and
//! evicts the oldest-inserted entry once the cap is exceeded. Lookups do not
//! promote: eviction order is insertion order, not access order. Nothing here
//! is persisted; the cache is rebuilt lazily from the disk tier after a
//! restart.

use parking_lot::Mutex;
use std::borrow::Borrow;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;

pub struct FifoCache<K, V> {
    inner: Mutex<FifoInner<K, V>>,
}

struct FifoInner<K, V> {
    map: HashMap<K, V>,
    order: VecDeque<K>,
    capacity: usize,
}

impl<K: Clone + Hash + Eq, V: Clone> FifoCache<K, V> {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(FifoInner {
                map: HashMap::new(),
                order: VecDeque::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Look up a value. Does not affect eviction order.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().map.get(key).cloned()
    }

    /// Insert a value, evicting the single oldest-inserted entry if the cap
    /// is exceeded. Re-inserting an existing key replaces its value but keeps
    /// the key's original position in the eviction queue.
    pub fn insert(&self, key: K, value: V) {
        self.inner.lock().insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Empty the cache, returning how many entries were removed.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.map.len();
        inner.map.clear();
        inner.order.clear();
        count
    }
}

impl<K: Clone + Hash + Eq, V: Clone> FifoInner<K, V> {
    fn insert(&mut self, key: K, value: V) {
        if self.map.insert(key.clone(), value).is_some() {
            return;
        }

        self.order.push_back(key);
        while self.map.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.map.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

impl<K: fmt::Debug, V> fmt::Debug for FifoCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("FifoCache")
            .field("len", &inner.map.len())
            .field("capacity", &inner.capacity)
            .finish()
    }
}

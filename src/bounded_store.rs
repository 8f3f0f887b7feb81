//! Fixed-capacity, insertion-ordered map with FIFO eviction
//!
//! Both the game registry and the report reconciler keep their live state in a
//! [`BoundedStore`] so that a stream of distinct keys (stale hosts, garbage
//! match identifiers) cannot grow memory without limit.
//!
//! Eviction policy:
//! - Entries are ordered by when their key was last inserted.
//! - Inserting a new key into a full store evicts the oldest entry first.
//! - Re-inserting an existing key replaces its value and moves it to the
//!   newest position; nothing is evicted.
//! - Mutating a value in place through [`BoundedStore::get_mut`] does not
//!   change its position.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Insertion-ordered map holding at most `capacity` entries
#[derive(Debug, Clone)]
pub struct BoundedStore<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K, V> BoundedStore<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty store. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Insert or replace `key`, returning the entry evicted to make room
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if self.entries.contains_key(&key) {
            self.detach(&key);
            self.order.push_back(key.clone());
            self.entries.insert(key, value);
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.evict_oldest()
        } else {
            None
        };

        self.order.push_back(key.clone());
        self.entries.insert(key, value);
        evicted
    }

    /// Remove `key`, returning its value if it was present
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        self.detach(key);
        Some(value)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate entries from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.order
            .iter()
            .filter_map(move |key| self.entries.get(key).map(|value| (key, value)))
    }

    /// Keys from oldest to newest
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }

    fn evict_oldest(&mut self) -> Option<(K, V)> {
        let key = self.order.pop_front()?;
        self.entries.remove(&key).map(|value| (key, value))
    }

    fn detach(&mut self, key: &K) {
        if let Some(position) = self.order.iter().position(|k| k == key) {
            self.order.remove(position);
        }
    }
}

impl<K, V> BoundedStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Copy of all values from oldest to newest
    pub fn snapshot(&self) -> Vec<V> {
        self.iter().map(|(_, value)| value.clone()).collect()
    }
}

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;

/// A mutex-guarded map whose read-modify-write helpers run under one lock
/// acquisition. Values are cloned out, so `V` is usually an `Arc` or small.
pub struct LockedMap<K, V> {
    inner: Mutex<HashMap<K, V>>,
}

impl<K, V> Default for LockedMap<K, V> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> LockedMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.lock().contains_key(key)
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.inner.lock().insert(key, value)
    }

    /// Insert only if absent. Returns `false` when the key was taken.
    pub fn try_insert(&self, key: K, value: V) -> bool {
        let mut map = self.inner.lock();
        if map.contains_key(&key) {
            return false;
        }
        map.insert(key, value);
        true
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().remove(key)
    }

    /// Atomic lookup-or-create: `create` runs at most once per absent key.
    pub fn compute_if_absent(&self, key: K, create: impl FnOnce() -> V) -> V {
        self.inner.lock().entry(key).or_insert_with(create).clone()
    }

    /// Mutate an existing entry in place.
    pub fn update<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        self.inner.lock().get_mut(key).map(f)
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner.lock().keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<V> {
        self.inner.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

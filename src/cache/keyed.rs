use dashmap::DashMap;
use std::{hash::Hash, sync::Arc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Concurrent map with one async write lock per key.
///
/// Reads (`get`, `snapshot`, ...) never wait on the key locks. Writers take
/// [`KeyedCache::lock`] for the key they touch and hold it across the store
/// call and the in-memory update, so two commands for the same key can't
/// interleave their writes.
#[derive(Debug)]
pub struct KeyedCache<K: Clone + Eq + Hash, V> {
    data: Arc<DashMap<K, V>>,
    locks: Arc<DashMap<K, Arc<Mutex<()>>>>,
}

impl<K, V> KeyedCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Waits for the write lock of `key`.
    pub async fn lock(&self, key: &K) -> KeyGuard<K> {
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        KeyGuard {
            guard: Some(lock.lock_owned().await),
            key: key.clone(),
            locks: self.locks.clone(),
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.data.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.data.contains_key(key)
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.data.insert(key, value)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.data.remove(key).map(|(_, value)| value)
    }

    /// Applies `f` to the value of `key` in place.
    pub fn update<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        self.data.get_mut(key).map(|mut entry| f(entry.value_mut()))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Replaces the whole content, used by bulk loads.
    pub fn replace_all(&self, entries: impl IntoIterator<Item = (K, V)>) {
        self.data.clear();
        for (key, value) in entries {
            self.data.insert(key, value);
        }
        debug!("Cache recargado con {} entradas", self.data.len());
    }

    pub fn keys(&self) -> Vec<K> {
        self.data.iter().map(|entry| entry.key().clone()).collect()
    }
}

/// Write lock of one key.
///
/// Dropping it releases the lock and forgets the key's mutex once no other
/// writer holds or waits on it, so the lock map only tracks keys in use.
pub struct KeyGuard<K: Clone + Eq + Hash> {
    guard: Option<OwnedMutexGuard<()>>,
    key: K,
    locks: Arc<DashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Clone + Eq + Hash> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters clone the mutex under the same shard lock, so a count of one
        // means nobody else can reach it.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl<K, V> Default for KeyedCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for KeyedCache<K, V>
where
    K: Clone + Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            locks: self.locks.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn writers_for_the_same_key_are_serialized() {
        let cache: KeyedCache<u64, Vec<u32>> = KeyedCache::new();
        cache.insert(1, Vec::new());

        let first = {
            let cache = cache.clone();
            tokio::spawn(async move {
                let _guard = cache.lock(&1).await;
                cache.update(&1, |v| v.push(1));
                tokio::time::sleep(Duration::from_millis(20)).await;
                cache.update(&1, |v| v.push(2));
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        let guard = cache.lock(&1).await;
        cache.update(&1, |v| v.push(3));
        drop(guard);
        first.await.unwrap();

        assert_eq!(cache.get(&1), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn released_locks_are_forgotten() {
        let cache: KeyedCache<u64, u32> = KeyedCache::new();

        for key in 0..50 {
            let _guard = cache.lock(&key).await;
            cache.insert(key, 1);
        }
        assert_eq!(cache.tracked_locks(), 0);

        let held = cache.lock(&7).await;
        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move {
                let _guard = cache.lock(&7).await;
                cache.update(&7, |v| *v += 1);
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The waiter still shares the mutex, so it must survive this release.
        drop(held);
        waiter.await.unwrap();

        assert_eq!(cache.get(&7), Some(2));
        assert_eq!(cache.tracked_locks(), 0);
    }

    #[tokio::test]
    async fn reads_do_not_wait_for_writers() {
        let cache: KeyedCache<u64, u32> = KeyedCache::new();
        cache.insert(9, 4);

        let _guard = cache.lock(&9).await;
        assert_eq!(cache.get(&9), Some(4));
        assert!(cache.contains(&9));
    }
}

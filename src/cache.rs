//! A concurrent, sliding-TTL key-value cache.
//!
//! Every successful read refreshes an entry's expiry to `now + ttl`; a read that observes an
//! expired entry evicts it and reports absence. One mutex guards the map; no I/O, and no
//! callback into caller code, ever happens while the lock is held.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Default time-to-live applied by [`TtlCache::put`] when no explicit TTL is given.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

struct Entry<V> {
    value: V,
    ttl: Duration,
    expiry: Instant,
}

/// A thread-safe map whose entries expire `ttl` after their most recent read or write.
pub struct TtlCache<K, V> {
    inner: Mutex<HashMap<K, Entry<V>>>,
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts or replaces `key`, using the default 600s TTL.
    pub async fn put(&self, key: K, value: V) {
        self.put_with_ttl(key, value, DEFAULT_TTL).await;
    }

    /// Inserts or replaces `key` with an explicit TTL, remembered for future slides.
    pub async fn put_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let mut guard = self.inner.lock().await;
        guard.insert(
            key,
            Entry {
                value,
                ttl,
                expiry: Instant::now() + ttl,
            },
        );
    }

    /// Returns the value for `key` if present and not expired, sliding its expiry forward.
    /// Evicts and returns `None` if the entry has expired.
    pub async fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.lock().await;
        self.get_locked(&mut guard, key)
    }

    /// Like [`Self::get`] but only reports presence; still performs the slide.
    pub async fn find(&self, key: &K) -> bool {
        self.get(key).await.is_some()
    }

    /// Evicts all expired entries, then returns the number of entries remaining.
    pub async fn size(&self) -> usize {
        let mut guard = self.inner.lock().await;
        let now = Instant::now();
        guard.retain(|_, entry| entry.expiry > now);
        guard.len()
    }

    /// Removes all entries.
    pub async fn clear(&self) {
        self.inner.lock().await.clear();
    }

    fn get_locked(&self, guard: &mut HashMap<K, Entry<V>>, key: &K) -> Option<V> {
        let now = Instant::now();
        match guard.get_mut(key) {
            Some(entry) if entry.expiry > now => {
                entry.expiry = now + entry.ttl;
                Some(entry.value.clone())
            }
            Some(_) => {
                guard.remove(key);
                None
            }
            None => None,
        }
    }
}

use std::{
    collections::HashMap,
    hash::Hash,
    sync::Mutex,
    time::{Duration, Instant},
};

struct Entry<V> {
    value: V,
    inserted: Instant,
    last_used: u64,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    tick: u64,
}

/// Time-bounded, capacity-bounded cache safe to share between tasks.
///
/// Entries older than `ttl` are never returned. When full, the least recently used
/// entry is evicted to make room.
pub struct TtlCache<K, V> {
    ttl: Duration,
    capacity: usize,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                tick: 0,
            }),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn put(&self, key: K, value: V) {
        self.put_at(key, value, Instant::now())
    }

    pub fn invalidate(&self, key: &K) -> bool {
        let mut inner = self.lock();
        inner.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_at(&self, key: &K, now: Instant) -> Option<V> {
        let mut inner = self.lock();
        let expired = match inner.entries.get(key) {
            None => return None,
            Some(entry) => now.saturating_duration_since(entry.inserted) >= self.ttl,
        };
        if expired {
            inner.entries.remove(key);
            return None;
        }
        inner.tick += 1;
        let tick = inner.tick;
        inner.entries.get_mut(key).map(|entry| {
            entry.last_used = tick;
            entry.value.clone()
        })
    }

    pub fn put_at(&self, key: K, value: V, now: Instant) {
        let mut inner = self.lock();
        let ttl = self.ttl;
        inner
            .entries
            .retain(|_, entry| now.saturating_duration_since(entry.inserted) < ttl);

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                inner.entries.remove(&oldest);
            }
        }

        inner.tick += 1;
        let last_used = inner.tick;
        inner.entries.insert(
            key,
            Entry {
                value,
                inserted: now,
                last_used,
            },
        );
    }

    // a poisoned lock only means another task panicked mid-update; the map is still usable
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_expires_after_ttl() {
        let cache = TtlCache::new(Duration::from_secs(300), 10);
        let start = Instant::now();
        cache.put_at("10.0.0.1", 1, start);
        assert_eq!(cache.get_at(&"10.0.0.1", start + Duration::from_secs(299)), Some(1));
        assert_eq!(cache.get_at(&"10.0.0.1", start + Duration::from_secs(300)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let cache = TtlCache::new(Duration::from_secs(300), 2);
        let now = Instant::now();
        cache.put_at("a", 1, now);
        cache.put_at("b", 2, now);
        // touch "a" so "b" becomes least recently used
        assert_eq!(cache.get_at(&"a", now), Some(1));
        cache.put_at("c", 3, now);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_at(&"b", now), None);
        assert_eq!(cache.get_at(&"a", now), Some(1));
        assert_eq!(cache.get_at(&"c", now), Some(3));
    }

    #[test]
    fn test_invalidate() {
        let cache = TtlCache::new(Duration::from_secs(300), 2);
        cache.put("a", 1);
        assert!(cache.invalidate(&"a"));
        assert!(!cache.invalidate(&"a"));
        assert_eq!(cache.get(&"a"), None);
    }
}

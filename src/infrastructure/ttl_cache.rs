use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Keyed cache whose entries expire a fixed time after insertion.
///
/// Constructed once and shared by handle; nothing in the crate keeps ambient
/// global cache state.
pub struct TtlCache<V> {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry<V>>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// Look up `key` as of `now`. Expired entries are evicted and never served.
    pub fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if now < entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: &str, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    /// Store `value` under `key` as of `now`, dropping every entry already expired.
    pub fn insert_at(&self, key: &str, value: V, now: Instant) {
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| now < entry.expires_at);
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_before_expiry() {
        let cache = TtlCache::new(Duration::from_secs(300));
        let now = Instant::now();
        cache.insert_at("scan", 42u32, now);

        assert_eq!(cache.get_at("scan", now + Duration::from_secs(299)), Some(42));
    }

    #[test]
    fn test_expired_entry_is_evicted() {
        let cache = TtlCache::new(Duration::from_secs(300));
        let now = Instant::now();
        cache.insert_at("scan", 42u32, now);

        // now == expiry is already a miss
        assert_eq!(cache.get_at("scan", now + Duration::from_secs(300)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_insert_prunes_expired_keys() {
        let cache = TtlCache::new(Duration::from_secs(300));
        let now = Instant::now();
        cache.insert_at("git,node", 1u32, now);
        cache.insert_at("git,python", 2u32, now + Duration::from_secs(100));
        assert_eq!(cache.len(), 2);

        // Neither old key is read again; the first has expired by the next insert.
        cache.insert_at("docker", 3u32, now + Duration::from_secs(300));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_at("git,python", now + Duration::from_secs(300)), Some(2));
        assert_eq!(cache.get_at("git,node", now), None);

        cache.insert_at("docker", 4u32, now + Duration::from_secs(1_000));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("a", 1u8);
        cache.insert("b", 2u8);

        cache.invalidate("a");
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));

        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}

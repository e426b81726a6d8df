//! Time-to-live result cache.
//!
//! A value is a hit strictly while `age < ttl`. Expired entries are treated
//! as absent and removed on the lookup that finds them; [`TtlCache::purge_expired`]
//! and [`TtlCache::clear`] drop them in bulk. Lookups and inserts take the
//! same mutex, so a concurrent reader can never observe an entry past its TTL.
//!
//! Every [`clear`](TtlCache::clear) bumps a generation counter. A caller that
//! computes a value outside the lock reads [`generation`](TtlCache::generation)
//! first and stores through [`insert_if_generation`](TtlCache::insert_if_generation),
//! which drops the value if a flush happened in between.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    generation: u64,
}

pub struct TtlCache<V> {
    state: Mutex<CacheState<V>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                generation: 0,
            }),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut state = self.state.lock();
        let fresh = state.entries.get(key)?.stored_at.elapsed() < self.ttl;
        if fresh {
            state.entries.get(key).map(|e| e.value.clone())
        } else {
            state.entries.remove(key);
            None
        }
    }

    pub fn insert(&self, key: String, value: V) {
        self.state.lock().entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Current flush generation.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Store `value` only if no [`clear`](Self::clear) happened since
    /// `generation` was read. Returns whether the value was stored.
    pub fn insert_if_generation(&self, key: String, generation: u64, value: V) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            return false;
        }
        state.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
        true
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.generation += 1;
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut state = self.state.lock();
        let before = state.entries.len();
        let ttl = self.ttl;
        state.entries.retain(|_, e| e.stored_at.elapsed() < ttl);
        before - state.entries.len()
    }

    /// Number of stored entries, including ones that have expired but not
    /// been evicted yet.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Deterministic cache key: SHA-256 over a namespace and the JSON form of
/// `payload`. Struct fields serialize in declaration order and sets/maps
/// used in payloads are ordered, so equal payloads give equal keys.
///
/// Returns `None` if `payload` cannot be serialized; such requests are not cached.
pub fn cache_key<T: Serialize + ?Sized>(namespace: &str, payload: &T) -> Option<String> {
    let json = serde_json::to_string(payload).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b":");
    hasher.update(json.as_bytes());
    Some(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hit_within_ttl() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("k".to_string(), 42);
        assert_eq!(cache.get("k"), Some(42));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn test_expired_entry_is_evicted() {
        let cache = TtlCache::new(Duration::from_millis(20));
        cache.insert("k".to_string(), "v".to_string());
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_ttl_never_hits() {
        let cache = TtlCache::new(Duration::ZERO);
        cache.insert("k".to_string(), 1);
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_purge_and_clear() {
        let cache = TtlCache::new(Duration::from_millis(20));
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        std::thread::sleep(Duration::from_millis(40));
        cache.insert("c".to_string(), 3);
        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_key_deterministic() {
        let a = cache_key("search", &json!({"text": "rust", "limit": 5}));
        let b = cache_key("search", &json!({"text": "rust", "limit": 5}));
        let c = cache_key("search", &json!({"text": "rust", "limit": 6}));
        let d = cache_key("retrieve", &json!({"text": "rust", "limit": 5}));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.as_deref().map(str::len), Some(64));
    }

    #[test]
    fn test_unserializable_payload_has_no_key() {
        use std::collections::HashMap;
        // JSON object keys must be strings.
        let payload: HashMap<(u8, u8), u8> = HashMap::from([((1, 2), 3)]);
        assert_eq!(cache_key("search", &payload), None);
    }

    #[test]
    fn test_insert_after_flush_is_dropped() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let before = cache.generation();
        cache.clear();
        assert!(!cache.insert_if_generation("k".to_string(), before, 1));
        assert_eq!(cache.get("k"), None);

        let current = cache.generation();
        assert!(cache.insert_if_generation("k".to_string(), current, 2));
        assert_eq!(cache.get("k"), Some(2));
    }
}

//! Content-addressed memoization of reasoning calls.
//!
//! Keys are SHA-256 digests of the normalized request, so only exact
//! (whitespace-insensitive) repeats hit. Unbounded unless a capacity is
//! configured, in which case the least recently used entry is evicted.

use std::collections::HashMap;
use std::sync::Mutex;

use sha2::{Digest, Sha256};

/// Collapse runs of whitespace and trim, so formatting noise in prompts
/// does not defeat the cache.
pub fn normalize_input(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cache key for a request: sha256 over model, instruction and content
pub fn cache_key(model: &str, system: &str, user: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [model, system, user] {
        hasher.update(normalize_input(part).as_bytes());
        // Separator keeps ("ab", "c") and ("a", "bc") apart
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    tick: u64,
}

#[derive(Debug)]
struct CacheEntry {
    value: String,
    last_used: u64,
}

/// Process-wide response cache
#[derive(Debug, Default)]
pub struct ResponseCache {
    inner: Mutex<CacheInner>,
    capacity: Option<usize>,
}

impl ResponseCache {
    /// Unbounded cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache holding at most `capacity` entries (LRU eviction)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity: Some(capacity.max(1)),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.tick += 1;
        let tick = inner.tick;

        inner.entries.get_mut(key).map(|entry| {
            entry.last_used = tick;
            entry.value.clone()
        })
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.tick += 1;
        let tick = inner.tick;

        inner.entries.insert(
            key.into(),
            CacheEntry {
                value: value.into(),
                last_used: tick,
            },
        );

        if let Some(capacity) = self.capacity {
            while inner.entries.len() > capacity {
                // Linear scan; fine for the cap sizes this is configured with
                let oldest = inner
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.last_used)
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(k) => {
                        inner.entries.remove(&k);
                    }
                    None => break,
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let cache = ResponseCache::new();
        let key = cache_key("gpt-4", "extract", "fog at DEL");
        cache.set(key.clone(), "[]");
        assert_eq!(cache.get(&key), Some("[]".to_string()));
    }

    #[test]
    fn test_different_input_misses() {
        let cache = ResponseCache::new();
        cache.set(cache_key("gpt-4", "extract", "fog at DEL"), "value");

        assert_eq!(cache.get(&cache_key("gpt-4", "extract", "fog at BOM")), None);
        assert_eq!(cache.get(&cache_key("gpt-4o-mini", "extract", "fog at DEL")), None);
    }

    #[test]
    fn test_key_ignores_whitespace_noise() {
        assert_eq!(
            cache_key("m", "sys", "fog   at\n\nDEL "),
            cache_key("m", "sys", "fog at DEL")
        );
    }

    #[test]
    fn test_key_parts_do_not_bleed() {
        assert_ne!(cache_key("m", "ab", "c"), cache_key("m", "a", "bc"));
    }

    #[test]
    fn test_key_is_sha256_hex() {
        let key = cache_key("m", "s", "u");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_lru_eviction() {
        let cache = ResponseCache::with_capacity(2);
        cache.set("a", "1");
        cache.set("b", "2");

        // Touch "a" so "b" becomes least recently used
        assert!(cache.get("a").is_some());
        cache.set("c", "3");

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some("1".to_string()));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("c"), Some("3".to_string()));
    }

    #[test]
    fn test_overwrite_keeps_single_entry() {
        let cache = ResponseCache::new();
        cache.set("k", "old");
        cache.set("k", "new");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k"), Some("new".to_string()));
    }
}

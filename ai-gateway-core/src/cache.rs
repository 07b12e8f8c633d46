//! Two-tier cache: provider/template configuration and per-request execution
//! results. Both tiers are an LRU-ordered map with TTL expiry, sized and
//! expired independently, backed by the same generic [`TtlLruCache`].

use crate::models::CacheEntry;
use chrono::Utc;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CacheStats {
    pub hit_count: u64,
    pub miss_count: u64,
    pub evictions: u64,
}

/// A `Map<String, CacheEntry<T>>` with LRU-on-get (the `lru` crate's `get`
/// already moves the touched key to the most-recently-used position), TTL
/// expiry checked against wall-clock time, and size-bounded eviction from
/// the LRU tail.
pub struct TtlLruCache<T: Clone> {
    entries: Mutex<LruCache<String, CacheEntry<T>>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<T: Clone> TtlLruCache<T> {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(max_entries).expect("cache capacity must be non-zero"),
            )),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.lock().unwrap();
        let now = Utc::now();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.data.clone())
            }
            Some(_) => {
                entries.pop(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set(&self, key: impl Into<String>, value: T) {
        let mut entries = self.entries.lock().unwrap();
        let was_full = entries.len() == entries.cap().get();
        let key = key.into();
        let already_present = entries.contains(&key);
        let now = Utc::now();
        let entry = CacheEntry {
            data: value,
            created_at: now,
            expires_at: now + self.ttl,
        };
        if let Some((_, _evicted)) = entries.push(key, entry) {
            if was_full && !already_present {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.lock().unwrap().pop(key);
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_fresh(&self, key: &str) -> bool {
        let entries = self.entries.lock().unwrap();
        entries
            .peek(key)
            .map(|e| !e.is_expired(Utc::now()))
            .unwrap_or(false)
    }

    /// Remove every entry for which `predicate` returns true. Used by
    /// template invalidation to sweep matching execution-cache entries.
    pub fn retain_keys<F>(&self, mut predicate: F)
    where
        F: FnMut(&str, &T) -> bool,
    {
        let mut entries = self.entries.lock().unwrap();
        let to_remove: Vec<String> = entries
            .iter()
            .filter(|(k, v)| !predicate(k, &v.data))
            .map(|(k, _)| k.clone())
            .collect();
        for key in to_remove {
            entries.pop(&key);
        }
    }

    /// Drop every expired entry. Intended to be called by a periodic
    /// cleanup task (every 10 minutes per spec).
    pub fn sweep_expired(&self) {
        let mut entries = self.entries.lock().unwrap();
        let now = Utc::now();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, v)| v.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            entries.pop(&key);
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

pub const TEMPLATE_CACHE_TTL: Duration = Duration::from_secs(30 * 60);
pub const TEMPLATE_CACHE_MAX: usize = 500;
pub const EXECUTION_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
pub const EXECUTION_CACHE_MAX: usize = 1000;

/// Canonicalize a JSON value by sorting object keys recursively, so the
/// stringified form is independent of the caller's key order.
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{:?}:{}", k, canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        serde_json::Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

/// 32-bit signed hash over a string, matching the wrap-around arithmetic of
/// the classic `hash = hash*31 + charCode` string hash.
fn hash32(s: &str) -> i32 {
    let mut hash: i32 = 0;
    for c in s.chars() {
        hash = hash.wrapping_mul(31).wrapping_add(c as i32);
    }
    hash
}

fn to_base36(mut n: i64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let negative = n < 0;
    if negative {
        n = -n;
    }
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    if negative {
        buf.push(b'-');
    }
    buf.reverse();
    String::from_utf8(buf).unwrap()
}

/// `generateExecutionKey(templateId, vars)`: order-invariant over the
/// variable map, so callers that build the same variables in a different
/// order hit the same cache entry.
pub fn generate_execution_key(template_id: &str, vars: &serde_json::Value) -> String {
    let canonical = canonical_json(vars);
    let hash = hash32(&canonical);
    format!("exec_{}_{}", template_id, to_base36(hash as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_key_is_order_invariant() {
        let a = serde_json::json!({"a": "1", "b": "2"});
        let b = serde_json::json!({"b": "2", "a": "1"});
        assert_eq!(
            generate_execution_key("tpl-1", &a),
            generate_execution_key("tpl-1", &b)
        );
    }

    #[test]
    fn lru_evicts_oldest_after_capacity() {
        let cache: TtlLruCache<String> = TtlLruCache::new(2, Duration::from_secs(60));
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        cache.set("c", "3".to_string());
        assert!(cache.get("a").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn get_refreshes_recency() {
        let cache: TtlLruCache<String> = TtlLruCache::new(2, Duration::from_secs(60));
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        // touch "a" so "b" becomes the LRU tail
        assert!(cache.get("a").is_some());
        cache.set("c", "3".to_string());
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
    }

    #[test]
    fn expired_entries_are_treated_as_misses() {
        let cache: TtlLruCache<String> = TtlLruCache::new(10, Duration::from_millis(1));
        cache.set("a", "1".to_string());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("a").is_none());
        assert_eq!(cache.stats().miss_count, 1);
    }
}

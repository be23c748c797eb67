//! In-process L1 cache
//!
//! LRU-ordered records with per-record TTL. Expired records are dropped on
//! read, and a full sweep runs lazily once `cleanup_interval` has passed
//! since the previous one. Eviction triggers when the cache already holds
//! more than `max_size` records and a new key arrives, so the cache peaks at
//! `max_size + 1` records.

use std::sync::Mutex;
use std::time::Duration;

use lru::LruCache;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::config::L1Config;

/// A cached value with its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheRecord {
    pub value: Value,
    pub created_at: Instant,
    pub last_accessed_at: Instant,
    pub access_count: u64,
    /// Zero or negative disables time-based expiry
    pub ttl_seconds: i64,
}

impl CacheRecord {
    pub fn new(value: Value, ttl_seconds: i64) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            ttl_seconds,
        }
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.ttl_seconds > 0
            && now.duration_since(self.created_at) >= Duration::from_secs(self.ttl_seconds as u64)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct L1Stats {
    pub size: usize,
    pub evictions: u64,
    pub expirations: u64,
}

struct L1State {
    records: LruCache<String, CacheRecord>,
    last_cleanup: Instant,
    evictions: u64,
    expirations: u64,
}

pub struct L1Cache {
    state: Mutex<L1State>,
    max_size: usize,
    cleanup_interval: Duration,
}

impl L1Cache {
    pub fn new(config: &L1Config) -> Self {
        Self {
            state: Mutex::new(L1State {
                records: LruCache::unbounded(),
                last_cleanup: Instant::now(),
                evictions: 0,
                expirations: 0,
            }),
            max_size: config.max_size,
            cleanup_interval: Duration::from_secs(config.cleanup_interval),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, L1State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn maybe_cleanup(&self, state: &mut L1State, now: Instant) {
        if now.duration_since(state.last_cleanup) < self.cleanup_interval {
            return;
        }
        let expired: Vec<String> = state
            .records
            .iter()
            .filter(|(_, record)| record.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.records.pop(key);
        }
        state.expirations += expired.len() as u64;
        state.last_cleanup = now;
        if !expired.is_empty() {
            tracing::debug!("L1 cleanup removed {} expired records", expired.len());
        }
    }

    /// Read a value, refreshing its recency and access stats.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut state = self.lock();
        self.maybe_cleanup(&mut state, now);

        let expired = match state.records.get_mut(key) {
            None => return None,
            Some(record) if record.is_expired_at(now) => true,
            Some(record) => {
                record.last_accessed_at = now;
                record.access_count += 1;
                return Some(record.value.clone());
            }
        };
        if expired {
            state.records.pop(key);
            state.expirations += 1;
        }
        None
    }

    /// The record for `key` without touching recency or stats.
    pub fn peek(&self, key: &str) -> Option<CacheRecord> {
        let now = Instant::now();
        let state = self.lock();
        state
            .records
            .peek(key)
            .filter(|record| !record.is_expired_at(now))
            .cloned()
    }

    pub fn insert(&self, key: &str, value: Value, ttl_seconds: i64) {
        let now = Instant::now();
        let mut state = self.lock();
        self.maybe_cleanup(&mut state, now);

        if !state.records.contains(key) {
            while state.records.len() > self.max_size {
                match state.records.pop_lru() {
                    Some((evicted, _)) => {
                        state.evictions += 1;
                        tracing::debug!("L1 evicted {}", evicted);
                    }
                    None => break,
                }
            }
        }
        state
            .records
            .put(key.to_string(), CacheRecord::new(value, ttl_seconds));
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().records.pop(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.peek(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let removed = state.records.len();
        state.records.clear();
        removed
    }

    pub fn stats(&self) -> L1Stats {
        let state = self.lock();
        L1Stats {
            size: state.records.len(),
            evictions: state.evictions,
            expirations: state.expirations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache(max_size: usize, cleanup_interval: u64) -> L1Cache {
        L1Cache::new(&L1Config {
            max_size,
            cleanup_interval,
            default_ttl: 0,
        })
    }

    #[test]
    fn test_lru_eviction_order() {
        let l1 = cache(2, 60);
        l1.insert("k1", json!(1), 0);
        l1.insert("k2", json!(2), 0);
        l1.insert("k3", json!(3), 0);
        assert_eq!(l1.get("k1"), Some(json!(1)));
        l1.insert("k4", json!(4), 0);

        assert!(!l1.contains("k2"));
        assert!(l1.contains("k1"));
        assert!(l1.contains("k3"));
        assert!(l1.contains("k4"));
        assert_eq!(l1.stats().evictions, 1);
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let l1 = cache(1, 60);
        l1.insert("a", json!(1), 0);
        l1.insert("b", json!(2), 0);
        l1.insert("b", json!(3), 0);
        assert_eq!(l1.len(), 2);
        assert_eq!(l1.get("b"), Some(json!(3)));
    }

    #[test]
    fn test_access_stats_only_on_hits() {
        let l1 = cache(10, 60);
        l1.insert("a", json!("x"), 0);
        assert!(l1.get("missing").is_none());
        l1.get("a");
        l1.get("a");
        let record = l1.peek("a").unwrap();
        assert_eq!(record.access_count, 2);
        assert!(record.last_accessed_at >= record.created_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_records_read_as_missing() {
        let l1 = cache(10, 3600);
        l1.insert("short", json!(1), 5);
        l1.insert("forever", json!(2), 0);

        tokio::time::advance(Duration::from_secs(6)).await;

        assert!(l1.get("short").is_none());
        assert_eq!(l1.get("forever"), Some(json!(2)));
        assert_eq!(l1.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_cleanup_sweeps_expired() {
        let l1 = cache(10, 60);
        for i in 0..5 {
            l1.insert(&format!("k{i}"), json!(i), 10);
        }
        l1.insert("keep", json!("v"), 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        l1.get("keep");

        assert_eq!(l1.len(), 1);
        assert_eq!(l1.stats().expirations, 5);
    }

    #[test]
    fn test_clear_and_remove() {
        let l1 = cache(10, 60);
        l1.insert("a", json!(1), 0);
        l1.insert("b", json!(2), 0);
        assert!(l1.remove("a"));
        assert!(!l1.remove("a"));
        assert_eq!(l1.clear(), 1);
        assert!(l1.is_empty());
    }
}

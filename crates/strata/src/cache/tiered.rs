//! Two-level request/response cache
//!
//! L1 is the in-process [`L1Cache`], L2 a shared [`L2Backend`]. Reads check
//! L1 then L2 and promote L2 hits into L1. An unavailable L2 counts as a
//! miss. Concurrent misses on the same key may each promote it; there is no
//! single-flight guard.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::cache::l1::{L1Cache, L1Stats};
use crate::cache::l2::L2Backend;
use crate::config::{L1Config, L2Config};
use crate::error::Result;

/// Which tiers accepted a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOutcome {
    pub l1: bool,
    pub l2: bool,
}

impl SetOutcome {
    pub fn is_complete(&self) -> bool {
        self.l1 && self.l2
    }
}

#[derive(Debug, Default)]
struct CacheCounters {
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,
    l2_errors: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

/// Hit/miss counters per level.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    /// L2 calls that failed; each is also counted as a miss
    pub l2_errors: u64,
    pub sets: u64,
    pub deletes: u64,
    pub l1: L1Stats,
}

impl CacheStats {
    /// Fraction of `get`s answered by either level (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.l1_hits + self.l1_misses;
        if total == 0 {
            0.0
        } else {
            (self.l1_hits + self.l2_hits) as f64 / total as f64
        }
    }

    pub fn l1_hit_rate(&self) -> f64 {
        let total = self.l1_hits + self.l1_misses;
        if total == 0 {
            0.0
        } else {
            self.l1_hits as f64 / total as f64
        }
    }

    pub fn l2_hit_rate(&self) -> f64 {
        let total = self.l2_hits + self.l2_misses;
        if total == 0 {
            0.0
        } else {
            self.l2_hits as f64 / total as f64
        }
    }
}

pub struct TieredCache {
    l1: L1Cache,
    l2: Arc<dyn L2Backend>,
    l1_default_ttl: i64,
    l2_default_ttl: i64,
    counters: CacheCounters,
}

impl TieredCache {
    pub fn new(l1: &L1Config, l2_config: &L2Config, l2: Arc<dyn L2Backend>) -> Self {
        tracing::info!(
            "Initializing tiered cache: L1 max {} (ttl {}s), L2 namespace {} (ttl {}s)",
            l1.max_size,
            l1.default_ttl,
            l2_config.namespace,
            l2_config.default_ttl
        );
        Self {
            l1: L1Cache::new(l1),
            l2,
            l1_default_ttl: l1.default_ttl,
            l2_default_ttl: l2_config.default_ttl,
            counters: CacheCounters::default(),
        }
    }

    pub fn l1(&self) -> &L1Cache {
        &self.l1
    }

    /// L2 value for `key`, or `None` on miss, error or undecodable bytes.
    async fn l2_get(&self, key: &str) -> Option<Value> {
        match self.l2.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    self.counters.l2_hits.fetch_add(1, Ordering::Relaxed);
                    Some(value)
                }
                Err(e) => {
                    tracing::warn!("Discarding undecodable L2 value for {}: {}", key, e);
                    self.counters.l2_misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
            Ok(None) => {
                self.counters.l2_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                tracing::warn!("L2 unavailable reading {}: {}", key, e);
                self.counters.l2_errors.fetch_add(1, Ordering::Relaxed);
                self.counters.l2_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.l1.get(key) {
            self.counters.l1_hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("L1 cache hit for key: {}", key);
            return Some(value);
        }
        self.counters.l1_misses.fetch_add(1, Ordering::Relaxed);

        let value = self.l2_get(key).await?;
        tracing::debug!("L2 cache hit for key: {}, promoting to L1", key);
        self.l1.insert(key, value.clone(), self.l1_default_ttl);
        Some(value)
    }

    /// Write both levels. `None` TTLs use the configured defaults; `<= 0`
    /// disables expiry. An L2 failure is reported in the outcome and L1
    /// keeps the value.
    pub async fn set(
        &self,
        key: &str,
        value: Value,
        l1_ttl: Option<i64>,
        l2_ttl: Option<i64>,
    ) -> Result<SetOutcome> {
        let bytes = Bytes::from(serde_json::to_vec(&value)?);
        self.l1
            .insert(key, value, l1_ttl.unwrap_or(self.l1_default_ttl));
        self.counters.sets.fetch_add(1, Ordering::Relaxed);

        let l2 = match self
            .l2
            .set(key, bytes, l2_ttl.unwrap_or(self.l2_default_ttl))
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!("L2 write for {} failed, value kept in L1 only: {}", key, e);
                self.counters.l2_errors.fetch_add(1, Ordering::Relaxed);
                false
            }
        };
        Ok(SetOutcome { l1: true, l2 })
    }

    /// Remove from both levels. True if either held the key.
    pub async fn delete(&self, key: &str) -> bool {
        let in_l1 = self.l1.remove(key);
        let in_l2 = match self.l2.delete(key).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!("L2 delete for {} failed: {}", key, e);
                self.counters.l2_errors.fetch_add(1, Ordering::Relaxed);
                false
            }
        };
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        in_l1 || in_l2
    }

    /// Pre-populate L1 from L2. Maps each key to whether it was loaded.
    pub async fn warm_up(&self, keys: &[String]) -> HashMap<String, bool> {
        let mut loaded = HashMap::with_capacity(keys.len());
        for key in keys {
            let value = self.l2_get(key).await;
            let found = value.is_some();
            if let Some(value) = value {
                self.l1.insert(key, value, self.l1_default_ttl);
            }
            loaded.insert(key.clone(), found);
        }
        let count = loaded.values().filter(|found| **found).count();
        tracing::info!("Warmed L1 with {}/{} keys", count, keys.len());
        loaded
    }

    /// Empty L1 and the L2 namespace. Returns the number of L2 keys removed.
    pub async fn clear(&self) -> Result<u64> {
        let l1_removed = self.l1.clear();
        let l2_removed = self.l2.clear().await?;
        tracing::info!("Cleared cache: {} L1 records, {} L2 keys", l1_removed, l2_removed);
        Ok(l2_removed)
    }

    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn set_as<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<i64>,
    ) -> Result<SetOutcome> {
        self.set(key, serde_json::to_value(value)?, ttl, ttl).await
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            l1_hits: self.counters.l1_hits.load(Ordering::Relaxed),
            l1_misses: self.counters.l1_misses.load(Ordering::Relaxed),
            l2_hits: self.counters.l2_hits.load(Ordering::Relaxed),
            l2_misses: self.counters.l2_misses.load(Ordering::Relaxed),
            l2_errors: self.counters.l2_errors.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            l1: self.l1.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::l2::KvL2Backend;
    use crate::storage::kv::MemoryKv;
    use crate::storage::pool::{KvPool, PoolConfig};
    use crate::storage::retry::RetryPolicy;
    use serde_json::json;

    fn cache_on(server: &MemoryKv) -> TieredCache {
        let pool = Arc::new(KvPool::new(
            server.connector(None),
            PoolConfig {
                retry: RetryPolicy::none(),
                ..Default::default()
            },
        ));
        TieredCache::new(
            &L1Config::default(),
            &L2Config::default(),
            Arc::new(KvL2Backend::new(pool, "l2")),
        )
    }

    #[tokio::test]
    async fn test_l2_hit_promotes_to_l1() {
        let server = MemoryKv::new();
        let writer = cache_on(&server);
        let reader = cache_on(&server);

        writer.set("k", json!({"a": 1}), None, None).await.unwrap();
        assert!(!reader.l1().contains("k"));

        assert_eq!(reader.get("k").await, Some(json!({"a": 1})));
        assert!(reader.l1().contains("k"));
        assert_eq!(reader.get("k").await, Some(json!({"a": 1})));

        let stats = reader.stats();
        assert_eq!(stats.l1_hits, 1);
        assert_eq!(stats.l2_hits, 1);
        assert!((stats.hit_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_l2_outage_is_a_miss() {
        let server = MemoryKv::new();
        let cache = cache_on(&server);
        server.set_online(false);

        let outcome = cache.set("k", json!(1), None, None).await.unwrap();
        assert_eq!(outcome, SetOutcome { l1: true, l2: false });
        assert!(!outcome.is_complete());

        assert_eq!(cache.get("k").await, Some(json!(1)));
        assert!(cache.get("missing").await.is_none());
        assert_eq!(cache.stats().l2_errors, 2);
    }

    #[tokio::test]
    async fn test_delete_reports_either_level() {
        let server = MemoryKv::new();
        let cache = cache_on(&server);
        cache.set("k", json!(1), None, None).await.unwrap();
        cache.l1().remove("k");

        assert!(cache.delete("k").await);
        assert!(!cache.delete("k").await);
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
        struct Plan {
            plan: String,
        }

        let server = MemoryKv::new();
        let cache = cache_on(&server);
        let plan = Plan { plan: "pro".into() };
        cache.set_as("user:42", &plan, Some(0)).await.unwrap();
        assert_eq!(cache.get_as::<Plan>("user:42").await.unwrap(), Some(plan));
        assert!(cache.get_as::<u32>("user:42").await.is_err());
    }
}

//! Hot tier: pooled key-value store with server-side TTL
//!
//! Entries are stored as JSON under `{namespace}:{key}`. Writes carry the
//! entry's remaining TTL as a server-side expiry, reads additionally check
//! the wall-clock expiry and delete stale entries lazily. Batch operations
//! are chunked to `batch_size` and pipelined.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::Value;

use crate::config::HotConfig;
use crate::error::Result;
use crate::memory::{MemoryEntry, MemoryMetadata, StorageTier};
use crate::storage::access::{AccessRecorder, AccessSink, RecorderSlot};
use crate::storage::filter::SearchFilter;
use crate::storage::kv::{Expiry, KvConnection, KvConnector, KvWrite, escape_glob};
use crate::storage::pool::KvPool;
use crate::storage::{
    HealthReport, Lifecycle, SearchHit, SearchQuery, TierBackend, TierCounters, TierStats,
    TierStatus, not_initialized, rank_hits, text_match_score,
};

/// Server-side expiry matching the entry's remaining lifetime.
fn expiry_for(metadata: &MemoryMetadata, now: DateTime<Utc>) -> Expiry {
    match metadata.remaining_ttl(now) {
        None => Expiry::Persist,
        Some(secs) => Expiry::Seconds(secs.max(1)),
    }
}

/// Hot tier over a pooled key-value connection.
pub struct HotTier<C: KvConnector> {
    pool: Arc<KvPool<C>>,
    config: HotConfig,
    ready: AtomicBool,
    init_lock: tokio::sync::Mutex<()>,
    recorder: RecorderSlot,
    counters: TierCounters,
}

impl<C: KvConnector> HotTier<C> {
    pub fn new(pool: Arc<KvPool<C>>, config: HotConfig) -> Self {
        Self {
            pool,
            config,
            ready: AtomicBool::new(false),
            init_lock: tokio::sync::Mutex::new(()),
            recorder: RecorderSlot::default(),
            counters: TierCounters::default(),
        }
    }

    pub fn pool(&self) -> &Arc<KvPool<C>> {
        &self.pool
    }

    /// Store `content` under `key` with the configured default TTL.
    pub async fn put(&self, key: &str, content: impl Into<Value>) -> Result<bool> {
        let entry = MemoryEntry::new(key, content).with_ttl(self.config.ttl_default);
        self.save(&entry).await
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(not_initialized(StorageTier::Hot))
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.namespace, key)
    }

    fn user_key(&self, storage_key: &str) -> Option<String> {
        storage_key
            .strip_prefix(self.config.namespace.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
            .map(str::to_string)
    }

    fn scan_pattern(&self, prefix: &str) -> String {
        format!("{}*", escape_glob(&self.storage_key(prefix)))
    }

    fn encode(&self, entry: &MemoryEntry) -> Result<Bytes> {
        let mut stored = entry.clone();
        stored.metadata.tier = StorageTier::Hot;
        Ok(Bytes::from(stored.to_bytes()?))
    }

    async fn scan_page(&self, cursor: u64, pattern: &str) -> Result<(u64, Vec<String>)> {
        let count = self.config.scan_count;
        self.pool
            .execute("SCAN", |conn| {
                let pattern = pattern.to_string();
                async move { conn.scan(cursor, &pattern, count).await }
            })
            .await
    }

    /// Stream of raw storage-key pages matching `pattern`.
    fn scan_pages(&self, pattern: String) -> BoxStream<'_, Result<Vec<String>>> {
        stream::unfold(Some(0u64), move |cursor| {
            let pattern = pattern.clone();
            async move {
                let cursor = cursor?;
                match self.scan_page(cursor, &pattern).await {
                    Ok((next, keys)) => Some((Ok(keys), (next != 0).then_some(next))),
                    Err(e) => Some((Err(e), None)),
                }
            }
        })
        .boxed()
    }

    async fn delete_storage_keys(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.pool
            .execute("DEL", |conn| {
                let keys = keys.to_vec();
                async move { conn.del(&keys).await }
            })
            .await
    }

    /// Decode a stored value, dropping it when it has already expired.
    async fn decode_live(&self, storage_key: &str, raw: &[u8]) -> Result<Option<MemoryEntry>> {
        let entry = MemoryEntry::from_bytes(raw)?;
        if entry.is_expired() {
            tracing::debug!("Hot entry {} expired, deleting", entry.key);
            self.counters.expired(1);
            if let Err(e) = self.delete_storage_keys(&[storage_key.to_string()]).await {
                tracing::warn!("Failed to delete expired hot entry {}: {}", entry.key, e);
            }
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn fetch(&self, key: &str) -> Result<Option<MemoryEntry>> {
        let storage_key = self.storage_key(key);
        let raw = self
            .pool
            .execute("GET", |conn| {
                let storage_key = storage_key.clone();
                async move { conn.get(&storage_key).await }
            })
            .await?;
        match raw {
            Some(raw) => self.decode_live(&storage_key, &raw).await,
            None => Ok(None),
        }
    }

    async fn record_access(&self, entry: &mut MemoryEntry) {
        entry.mark_accessed();
        self.recorder.record(entry.clone()).await;
    }

    /// Load every live entry under the namespace, page by page.
    async fn scan_entries(
        &self,
        filter: &SearchFilter,
        mut visit: impl FnMut(MemoryEntry) -> bool + Send,
    ) -> Result<()> {
        let mut pages = self.scan_pages(self.scan_pattern(""));
        while let Some(page) = pages.next().await {
            let keys = page?;
            if keys.is_empty() {
                continue;
            }
            let values = self
                .pool
                .execute("MGET", |conn| {
                    let keys = keys.clone();
                    async move { conn.mget(&keys).await }
                })
                .await?;
            for (storage_key, raw) in keys.iter().zip(values) {
                let Some(raw) = raw else { continue };
                let entry = match self.decode_live(storage_key, &raw).await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!("Skipping undecodable hot entry {}: {}", storage_key, e);
                        continue;
                    }
                };
                if filter.matches(&entry) && !visit(entry) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

struct HotAccessSink<C: KvConnector> {
    pool: Arc<KvPool<C>>,
    namespace: String,
}

/// Merge a queued access into the stored value. Returns `None` when a save
/// replaced the value after it was read.
fn merge_access(stored: &[u8], accessed: &MemoryEntry) -> Result<Option<MemoryEntry>> {
    let mut current = MemoryEntry::from_bytes(stored)?;
    if current.metadata.content_hash != accessed.metadata.content_hash
        || current.metadata.updated_at != accessed.metadata.updated_at
    {
        return Ok(None);
    }
    current.metadata.access_count += 1;
    current.metadata.accessed_at = current.metadata.accessed_at.max(accessed.metadata.accessed_at);
    Ok(Some(current))
}

/// Attempts per access update when concurrent writers keep changing the value.
const ACCESS_SWAP_ATTEMPTS: usize = 3;

#[async_trait]
impl<C: KvConnector> AccessSink for HotAccessSink<C> {
    async fn record_access(&self, entry: &MemoryEntry) -> Result<()> {
        let storage_key = format!("{}:{}", self.namespace, entry.key);
        for _ in 0..ACCESS_SWAP_ATTEMPTS {
            let raw = self
                .pool
                .execute("GET", |conn| {
                    let storage_key = storage_key.clone();
                    async move { conn.get(&storage_key).await }
                })
                .await?;
            let Some(raw) = raw else {
                return Ok(());
            };
            let Some(merged) = merge_access(&raw, entry)? else {
                tracing::debug!("Skipped stale access update for {}", entry.key);
                return Ok(());
            };
            let updated = Bytes::from(merged.to_bytes()?);
            let swapped = self
                .pool
                .execute("CAS", |conn| {
                    let storage_key = storage_key.clone();
                    let (raw, updated) = (raw.clone(), updated.clone());
                    async move { conn.compare_and_swap(&storage_key, &raw, updated).await }
                })
                .await?;
            if swapped {
                return Ok(());
            }
        }
        tracing::debug!("Gave up on contended access update for {}", entry.key);
        Ok(())
    }
}

#[async_trait]
impl<C: KvConnector> Lifecycle for HotTier<C> {
    async fn initialize(&self) -> Result<()> {
        if self.ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = self.init_lock.lock().await;
        if self.ready.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.pool.warm_up().await?;
        self.pool.health_check().await?;

        self.recorder.start_with(|| {
            AccessRecorder::spawn(
                "hot",
                Arc::new(HotAccessSink {
                    pool: self.pool.clone(),
                    namespace: self.config.namespace.clone(),
                }),
                self.config.access_queue,
            )
        });

        self.ready.store(true, Ordering::SeqCst);
        tracing::info!(
            "Hot tier ready on {} (namespace {})",
            self.pool.endpoint(),
            self.config.namespace
        );
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.ready.store(false, Ordering::SeqCst);
        self.recorder.stop().await;
        tracing::info!("Hot tier shut down");
        Ok(())
    }
}

#[async_trait]
impl<C: KvConnector> TierBackend for HotTier<C> {
    fn tier(&self) -> StorageTier {
        StorageTier::Hot
    }

    async fn save(&self, entry: &MemoryEntry) -> Result<bool> {
        self.ensure_ready()?;
        let now = Utc::now();
        if entry.metadata.is_expired_at(now) {
            tracing::debug!("Refusing to save expired entry {}", entry.key);
            return Ok(false);
        }

        let storage_key = self.storage_key(&entry.key);
        let bytes = self.encode(entry)?;
        let expiry = expiry_for(&entry.metadata, now);
        self.pool
            .execute("SET", |conn| {
                let storage_key = storage_key.clone();
                let bytes = bytes.clone();
                async move { conn.set(&storage_key, bytes, expiry).await }
            })
            .await?;

        self.counters.wrote(1);
        tracing::debug!("Saved {} to hot tier", entry.key);
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<MemoryEntry>> {
        self.ensure_ready()?;
        match self.fetch(key).await? {
            Some(mut entry) => {
                self.counters.hit();
                self.record_access(&mut entry).await;
                Ok(Some(entry))
            }
            None => {
                self.counters.miss();
                Ok(None)
            }
        }
    }

    async fn peek(&self, key: &str) -> Result<Option<MemoryEntry>> {
        self.ensure_ready()?;
        self.fetch(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_ready()?;
        let removed = self.delete_storage_keys(&[self.storage_key(key)]).await?;
        self.counters.deleted(removed);
        Ok(removed > 0)
    }

    async fn search(
        &self,
        query: &SearchQuery,
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        self.ensure_ready()?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut hits = Vec::new();
        match query {
            SearchQuery::Text(text) => {
                self.scan_entries(filter, |entry| {
                    let score = text_match_score(&entry.searchable_text(), text);
                    if score > 0 {
                        hits.push(SearchHit {
                            entry,
                            score: score as f32,
                        });
                    }
                    true
                })
                .await?;
            }
            SearchQuery::FilterOnly => {
                self.scan_entries(filter, |entry| {
                    hits.push(SearchHit { entry, score: 1.0 });
                    hits.len() < limit
                })
                .await?;
            }
            SearchQuery::Vector(_) => return Err(query.unsupported(StorageTier::Hot)),
        }
        Ok(rank_hits(hits, limit))
    }

    fn list_keys<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<String>> {
        if let Err(e) = self.ensure_ready() {
            return stream::once(async move { Err(e) }).boxed();
        }
        self.scan_pages(self.scan_pattern(prefix))
            .map_ok(move |keys| {
                let keys: Vec<Result<String>> =
                    keys.iter().filter_map(|k| self.user_key(k)).map(Ok).collect();
                stream::iter(keys)
            })
            .try_flatten()
            .boxed()
    }

    async fn batch_save(&self, entries: &[MemoryEntry]) -> Result<HashMap<String, bool>> {
        self.ensure_ready()?;
        let mut results = HashMap::with_capacity(entries.len());
        let now = Utc::now();

        for chunk in entries.chunks(self.config.batch_size.max(1)) {
            let mut writes = Vec::with_capacity(chunk.len());
            for entry in chunk {
                if entry.metadata.is_expired_at(now) {
                    results.insert(entry.key.clone(), false);
                    continue;
                }
                match self.encode(entry) {
                    Ok(value) => writes.push(KvWrite {
                        key: self.storage_key(&entry.key),
                        value,
                        expiry: expiry_for(&entry.metadata, now),
                    }),
                    Err(e) => {
                        tracing::warn!("Failed to encode {}: {}", entry.key, e);
                        results.insert(entry.key.clone(), false);
                    }
                }
            }
            if writes.is_empty() {
                continue;
            }

            let written: Vec<String> = writes
                .iter()
                .filter_map(|w| self.user_key(&w.key))
                .collect();
            let outcome = self
                .pool
                .execute("SET pipeline", |conn| {
                    let writes = writes.clone();
                    async move { conn.set_many(writes).await }
                })
                .await;

            let ok = match outcome {
                Ok(()) => {
                    self.counters.wrote(written.len() as u64);
                    true
                }
                Err(e) => {
                    self.counters.error();
                    tracing::warn!("Hot batch of {} entries failed: {}", written.len(), e);
                    false
                }
            };
            for key in written {
                results.insert(key, ok);
            }
        }

        tracing::debug!("Hot batch_save of {} entries", entries.len());
        Ok(results)
    }

    async fn batch_get(&self, keys: &[String]) -> Result<HashMap<String, Option<MemoryEntry>>> {
        self.ensure_ready()?;
        let mut results = HashMap::with_capacity(keys.len());

        for chunk in keys.chunks(self.config.batch_size.max(1)) {
            let storage_keys: Vec<String> = chunk.iter().map(|k| self.storage_key(k)).collect();
            let values = match self
                .pool
                .execute("MGET", |conn| {
                    let storage_keys = storage_keys.clone();
                    async move { conn.mget(&storage_keys).await }
                })
                .await
            {
                Ok(values) => values,
                Err(e) => {
                    self.counters.error();
                    tracing::warn!("Hot batch read of {} keys failed: {}", chunk.len(), e);
                    for key in chunk {
                        results.insert(key.clone(), None);
                    }
                    continue;
                }
            };

            for ((key, storage_key), raw) in chunk.iter().zip(&storage_keys).zip(values) {
                let entry = match raw {
                    Some(raw) => match self.decode_live(storage_key, &raw).await {
                        Ok(entry) => entry,
                        Err(e) => {
                            tracing::warn!("Failed to decode hot entry {}: {}", key, e);
                            None
                        }
                    },
                    None => None,
                };
                let entry = match entry {
                    Some(mut entry) => {
                        self.counters.hit();
                        self.record_access(&mut entry).await;
                        Some(entry)
                    }
                    None => {
                        self.counters.miss();
                        None
                    }
                };
                results.insert(key.clone(), entry);
            }
        }
        Ok(results)
    }

    async fn clear(&self, prefix: &str) -> Result<u64> {
        self.ensure_ready()?;
        let mut removed = 0;
        let mut pages = self.scan_pages(self.scan_pattern(prefix));
        while let Some(page) = pages.next().await {
            removed += self.delete_storage_keys(&page?).await?;
        }
        self.counters.deleted(removed);
        tracing::info!("Cleared {} hot entries with prefix {:?}", removed, prefix);
        Ok(removed)
    }

    async fn stats(&self) -> Result<TierStats> {
        let mut counters = self.counters.snapshot();
        counters.extend(self.pool.metrics().counters());
        counters.extend(self.recorder.counters());

        if !self.ready.load(Ordering::SeqCst) {
            return Ok(TierStats {
                tier: StorageTier::Hot,
                status: TierStatus::NotInitialized,
                entries: None,
                counters,
            });
        }

        let db_size = self
            .pool
            .execute("DBSIZE", |conn| async move { conn.dbsize().await })
            .await?;
        counters.insert("db_size".to_string(), db_size);

        Ok(TierStats {
            tier: StorageTier::Hot,
            status: TierStatus::Ready,
            entries: None,
            counters,
        })
    }

    async fn health_check(&self) -> HealthReport {
        if !self.ready.load(Ordering::SeqCst) {
            return HealthReport::unhealthy(
                TierStatus::NotInitialized,
                std::time::Duration::ZERO,
                "hot tier is not initialized",
            );
        }
        let start = std::time::Instant::now();
        match self.pool.health_check().await {
            Ok(latency) => HealthReport::healthy(TierStatus::Ready, latency),
            Err(e) => HealthReport::unhealthy(TierStatus::Ready, start.elapsed(), e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::{MemoryConnector, MemoryKv};
    use crate::storage::pool::PoolConfig;
    use serde_json::json;
    use std::time::Duration;

    fn hot_config() -> HotConfig {
        HotConfig {
            namespace: "test".to_string(),
            batch_size: 7,
            scan_count: 5,
            ..HotConfig::default()
        }
    }

    async fn hot_tier(server: &MemoryKv) -> HotTier<MemoryConnector> {
        let pool = Arc::new(KvPool::new(server.connector(None), PoolConfig::default()));
        let tier = HotTier::new(pool, hot_config());
        tier.initialize().await.unwrap();
        tier
    }

    #[test]
    fn test_expiry_for() {
        let now = Utc::now();
        let entry = MemoryEntry::new("k", "v");
        assert_eq!(expiry_for(&entry.metadata, now), Expiry::Persist);

        let entry = MemoryEntry::new("k", "v").with_ttl(30);
        assert!(matches!(
            expiry_for(&entry.metadata, now),
            Expiry::Seconds(s) if (29..=30).contains(&s)
        ));
    }

    #[tokio::test]
    async fn test_uninitialized_tier_fails_closed() {
        let server = MemoryKv::new();
        let pool = Arc::new(KvPool::new(server.connector(None), PoolConfig::default()));
        let tier = HotTier::new(pool, hot_config());

        let err = tier.get("k").await.unwrap_err();
        assert!(matches!(err, crate::error::StrataError::DegradedCapability(_)));
        assert_eq!(tier.stats().await.unwrap().status, TierStatus::NotInitialized);
        assert!(!tier.health_check().await.healthy);
    }

    #[tokio::test]
    async fn test_failed_initialize_stays_closed() {
        let server = MemoryKv::new();
        server.set_online(false);
        let mut config = PoolConfig::default();
        config.retry = crate::storage::RetryPolicy::none();
        let pool = Arc::new(KvPool::new(server.connector(None), config));
        let tier = HotTier::new(pool, hot_config());

        assert!(tier.initialize().await.is_err());
        server.set_online(true);
        assert!(tier.save(&MemoryEntry::new("k", "v")).await.is_err());

        tier.initialize().await.unwrap();
        tier.initialize().await.unwrap();
        assert!(tier.save(&MemoryEntry::new("k", "v")).await.unwrap());
    }

    #[tokio::test]
    async fn test_namespacing_and_access_tracking() {
        let server = MemoryKv::new();
        let tier = hot_tier(&server).await;
        tier.put("user:1", json!({"name": "ada"})).await.unwrap();

        let raw = server.connector(None).connect().await.unwrap();
        assert!(raw.get("test:user:1").await.unwrap().is_some());

        let first = tier.get("user:1").await.unwrap().unwrap();
        assert_eq!(first.metadata.access_count, 1);
        assert_eq!(first.metadata.ttl_seconds, 3600);

        tier.shutdown().await.unwrap();
        tier.initialize().await.unwrap();
        let stored = tier.peek("user:1").await.unwrap().unwrap();
        assert_eq!(stored.metadata.access_count, 1);
        assert_eq!(stored.metadata.content_hash, first.metadata.content_hash);
    }

    #[tokio::test]
    async fn test_queued_access_does_not_overwrite_newer_save() {
        let server = MemoryKv::new();
        let tier = hot_tier(&server).await;
        tier.save(&MemoryEntry::new("k", "old")).await.unwrap();
        tier.get("k").await.unwrap().unwrap();
        tier.save(&MemoryEntry::new("k", "new")).await.unwrap();

        // Shutdown drains the queued access update.
        tier.shutdown().await.unwrap();
        tier.initialize().await.unwrap();

        let stored = tier.peek("k").await.unwrap().unwrap();
        assert_eq!(stored.content(), &json!("new"));
        assert_eq!(stored.metadata.access_count, 0);
        assert!(stored.verify_integrity());
    }

    #[test]
    fn test_merge_access() {
        let saved = MemoryEntry::new("k", "v");
        let raw = saved.to_bytes().unwrap();

        let mut accessed = saved.clone();
        accessed.mark_accessed();
        let merged = merge_access(&raw, &accessed).unwrap().unwrap();
        assert_eq!(merged.metadata.access_count, 1);
        assert_eq!(merged.metadata.accessed_at, accessed.metadata.accessed_at);

        // Two reads of the same stored value each count once.
        let raw = merged.to_bytes().unwrap();
        let merged = merge_access(&raw, &accessed).unwrap().unwrap();
        assert_eq!(merged.metadata.access_count, 2);

        let mut replaced = saved.clone();
        replaced.set_content(json!("other"));
        let raw = replaced.to_bytes().unwrap();
        assert!(merge_access(&raw, &accessed).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lazy_expiry_on_read() {
        let server = MemoryKv::new();
        let tier = hot_tier(&server).await;

        let mut entry = MemoryEntry::new("old", "v").with_ttl(60);
        tier.save(&entry).await.unwrap();
        // Simulate clock skew: the server still holds a value whose
        // wall-clock lifetime is over.
        entry.metadata.created_at = Utc::now() - chrono::Duration::seconds(120);
        let raw = server.connector(None).connect().await.unwrap();
        raw.set("test:old", Bytes::from(entry.to_bytes().unwrap()), Expiry::Persist)
            .await
            .unwrap();

        assert!(tier.get("old").await.unwrap().is_none());
        assert!(raw.get("test:old").await.unwrap().is_none());
        assert_eq!(tier.stats().await.unwrap().counters["expired"], 1);
    }

    #[tokio::test]
    async fn test_list_keys_and_clear_by_prefix() {
        let server = MemoryKv::new();
        let tier = hot_tier(&server).await;
        for i in 0..12 {
            tier.save(&MemoryEntry::new(format!("user:42:{i}"), i)).await.unwrap();
        }
        tier.save(&MemoryEntry::new("user:7:0", "other")).await.unwrap();
        tier.save(&MemoryEntry::new("user:4*", "glob")).await.unwrap();

        let keys: Vec<String> = tier.list_keys("user:42:").try_collect().await.unwrap();
        assert_eq!(keys.len(), 12);
        assert!(keys.iter().all(|k| k.starts_with("user:42:")));

        let glob: Vec<String> = tier.list_keys("user:4*").try_collect().await.unwrap();
        assert_eq!(glob, vec!["user:4*".to_string()]);

        assert_eq!(tier.clear("user:42:").await.unwrap(), 12);
        assert!(tier.get("user:7:0").await.unwrap().is_some());
        assert_eq!(tier.clear("").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_text_search_ranks_by_match_count() {
        let server = MemoryKv::new();
        let tier = hot_tier(&server).await;
        tier.save(&MemoryEntry::new("a", "rust rust rust")).await.unwrap();
        tier.save(&MemoryEntry::new("b", "rust and go")).await.unwrap();
        tier.save(&MemoryEntry::new("c", "python")).await.unwrap();

        let hits = tier
            .search(&SearchQuery::Text("Rust".into()), 10, &SearchFilter::new())
            .await
            .unwrap();
        let keys: Vec<_> = hits.iter().map(|h| h.entry.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);

        let err = tier
            .search(&SearchQuery::Vector(vec![0.0; 4]), 10, &SearchFilter::new())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::StrataError::DegradedCapability(_)));
    }

    #[tokio::test]
    async fn test_batch_failure_marks_chunk_false() {
        let server = MemoryKv::new();
        let mut config = PoolConfig::default();
        config.retry = crate::storage::RetryPolicy::none();
        config.min_idle = 0;
        let pool = Arc::new(KvPool::new(server.connector(None), config));
        let tier = HotTier::new(pool, hot_config());
        tier.initialize().await.unwrap();

        server.set_online(false);
        let entries: Vec<_> = (0..10).map(|i| MemoryEntry::new(format!("k{i}"), i)).collect();
        let results = tier.batch_save(&entries).await.unwrap();
        assert_eq!(results.len(), 10);
        assert!(results.values().all(|ok| !ok));

        server.set_online(true);
        let results = tier.batch_save(&entries).await.unwrap();
        assert!(results.values().all(|ok| *ok));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_side_ttl_is_set() {
        let server = MemoryKv::new();
        let tier = hot_tier(&server).await;
        tier.save(&MemoryEntry::new("short", "v").with_ttl(5)).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        let raw = server.connector(None).connect().await.unwrap();
        assert!(raw.get("test:short").await.unwrap().is_none());
    }
}

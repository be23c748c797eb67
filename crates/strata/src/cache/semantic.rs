//! Semantic cache
//!
//! Answers are stored in the [`TieredCache`] under a key derived from the
//! exact query text. Alongside, an in-memory table keeps each cached query's
//! embedding. A lookup embeds the incoming query, finds the most similar
//! table record and, when the cosine similarity reaches the threshold, reads
//! that record's answer.
//!
//! The table is bounded by `max_cache_size` and evicts the oldest inserted
//! record, regardless of how recently it was matched.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::cache::tiered::TieredCache;
use crate::config::SemanticConfig;
use crate::embedding::{Embedder, cosine_similarity};
use crate::error::Result;

/// Cache key for the answer to `query`.
pub fn semantic_key(query: &str) -> String {
    format!("semantic:{:x}", Sha256::digest(query.as_bytes()))
}

struct TableRecord {
    query: String,
    key: String,
    embedding: Vec<f32>,
}

/// A similarity hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticHit {
    pub value: Value,
    /// The previously cached query that matched
    pub matched_query: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SemanticStats {
    pub hits: u64,
    pub misses: u64,
    pub embed_errors: u64,
    pub evictions: u64,
    pub table_size: usize,
    pub threshold: f32,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    embed_errors: AtomicU64,
    evictions: AtomicU64,
}

pub struct SemanticCache {
    cache: Arc<TieredCache>,
    embedder: Arc<dyn Embedder>,
    config: SemanticConfig,
    table: Mutex<VecDeque<TableRecord>>,
    counters: Counters,
}

impl SemanticCache {
    pub fn new(
        cache: Arc<TieredCache>,
        embedder: Arc<dyn Embedder>,
        config: SemanticConfig,
    ) -> Self {
        Self {
            cache,
            embedder,
            config,
            table: Mutex::new(VecDeque::new()),
            counters: Counters::default(),
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, VecDeque<TableRecord>> {
        self.table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn embed(&self, query: &str) -> Option<Vec<f32>> {
        match self.embedder.embed(query).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                self.counters.embed_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Embedding failed, semantic lookup degraded: {}", e);
                None
            }
        }
    }

    /// Cache `value` as the answer to `query`. Without an embedding the
    /// answer is still reachable through [`get_exact`](Self::get_exact).
    pub async fn set(&self, query: &str, value: Value, ttl: Option<i64>) -> Result<()> {
        let key = semantic_key(query);
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        self.cache.set(&key, value, Some(ttl), Some(ttl)).await?;

        let Some(embedding) = self.embed(query).await else {
            return Ok(());
        };

        let mut table = self.table();
        table.retain(|record| record.query != query);
        table.push_back(TableRecord {
            query: query.to_string(),
            key,
            embedding,
        });
        while table.len() > self.config.max_cache_size {
            if let Some(evicted) = table.pop_front() {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Semantic table evicted {:?}", evicted.query);
            }
        }
        Ok(())
    }

    /// Best match for `query` at or above the similarity threshold.
    pub async fn get(&self, query: &str) -> Option<SemanticHit> {
        let Some(embedding) = self.embed(query).await else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let best = {
            let table = self.table();
            table
                .iter()
                .map(|record| (cosine_similarity(&embedding, &record.embedding), record))
                .max_by(|a, b| a.0.total_cmp(&b.0))
                .map(|(similarity, record)| (similarity, record.query.clone(), record.key.clone()))
        };

        let Some((similarity, matched_query, key)) = best else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        if similarity < self.config.similarity_threshold {
            tracing::debug!(
                "Semantic miss: best similarity {:.3} below {:.3}",
                similarity,
                self.config.similarity_threshold
            );
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        match self.cache.get(&key).await {
            Some(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Semantic hit ({:.3}) on {:?}", similarity, matched_query);
                Some(SemanticHit {
                    value,
                    matched_query,
                    similarity,
                })
            }
            None => {
                // The answer expired or was evicted; forget the query too.
                self.table().retain(|record| record.key != key);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Answer cached for exactly `query`, without embedding.
    pub async fn get_exact(&self, query: &str) -> Option<Value> {
        self.cache.get(&semantic_key(query)).await
    }

    /// Forget `query` and its answer. True if anything was removed.
    pub async fn invalidate(&self, query: &str) -> bool {
        let in_table = {
            let mut table = self.table();
            let before = table.len();
            table.retain(|record| record.query != query);
            table.len() != before
        };
        let in_cache = self.cache.delete(&semantic_key(query)).await;
        in_table || in_cache
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> SemanticStats {
        SemanticStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            embed_errors: self.counters.embed_errors.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            table_size: self.len(),
            threshold: self.config.similarity_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semantic_key_is_stable() {
        assert_eq!(semantic_key("hello"), semantic_key("hello"));
        assert_ne!(semantic_key("hello"), semantic_key("Hello"));
        assert!(semantic_key("q").starts_with("semantic:"));
        assert_eq!(semantic_key("q").len(), "semantic:".len() + 64);
    }
}

//! Storage tiers for Strata
//!
//! Every tier implements [`TierBackend`], a uniform contract for CRUD, batch
//! I/O, search, key listing, stats and health. Tiers must be initialized
//! through [`Lifecycle`] before use; operations on an uninitialized tier
//! fail with [`StrataError::DegradedCapability`].

pub mod access;
pub mod cold;
pub mod filter;
pub mod hot;
pub mod kv;
pub mod migration;
pub mod pool;
pub mod redis_kv;
pub mod registry;
pub mod retry;
pub mod tiers;
pub mod warm;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::error::{Result, StrataError};
use crate::memory::{MemoryEntry, StorageTier};

pub use access::{AccessRecorder, AccessSink};
pub use cold::{ColdTier, StubColdTier};
pub use filter::SearchFilter;
pub use hot::HotTier;
pub use kv::{Expiry, KvConnection, KvConnector, MemoryConnector, MemoryKv};
pub use migration::{MigrationCoordinator, MigrationPolicy, MigrationReport};
pub use pool::{KvPool, PoolConfig, PoolMetricsSnapshot};
pub use redis_kv::{RedisConnection, RedisConnector};
pub use registry::{AnyConnection, AnyConnector, EndpointKey, PoolRegistry};
pub use retry::RetryPolicy;
pub use tiers::TierSet;
pub use warm::WarmTier;

/// Connection setup and teardown, required of every tier.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Establish connections. Idempotent. On failure the tier stays closed
    /// and later operations return `DegradedCapability`.
    async fn initialize(&self) -> Result<()>;

    /// Drain pending access updates and stop tier-owned tasks.
    async fn shutdown(&self) -> Result<()>;
}

/// Uniform contract implemented by the Hot, Warm and Cold tiers.
#[async_trait]
pub trait TierBackend: Lifecycle {
    fn tier(&self) -> StorageTier;

    /// True for declared no-op tiers; callers must not rely on their writes.
    fn is_stub(&self) -> bool {
        false
    }

    /// Insert or overwrite an entry. `Ok(false)` means the backend refused it.
    async fn save(&self, entry: &MemoryEntry) -> Result<bool>;

    /// Read an entry, recording the access. Expired entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<MemoryEntry>>;

    /// Read an entry without recording an access.
    async fn peek(&self, key: &str) -> Result<Option<MemoryEntry>>;

    /// Remove an entry. Returns whether something was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn search(
        &self,
        query: &SearchQuery,
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>>;

    /// Stream keys starting with `prefix`, page by page.
    fn list_keys<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<String>>;

    async fn batch_save(&self, entries: &[MemoryEntry]) -> Result<HashMap<String, bool>>;

    async fn batch_get(&self, keys: &[String]) -> Result<HashMap<String, Option<MemoryEntry>>>;

    /// Remove every entry whose key starts with `prefix`. Returns the count.
    async fn clear(&self, prefix: &str) -> Result<u64>;

    async fn stats(&self) -> Result<TierStats>;

    async fn health_check(&self) -> HealthReport;
}

/// What a search is matched against.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchQuery {
    /// Substring or embedded-text query
    Text(String),
    /// Nearest-neighbour query
    Vector(Vec<f32>),
    /// Filters only, no ranking term
    FilterOnly,
}

impl SearchQuery {
    pub fn kind(&self) -> &'static str {
        match self {
            SearchQuery::Text(_) => "text",
            SearchQuery::Vector(_) => "vector",
            SearchQuery::FilterOnly => "filter",
        }
    }

    pub(crate) fn unsupported(&self, tier: StorageTier) -> StrataError {
        StrataError::DegradedCapability(format!(
            "{} tier does not support {} queries",
            tier,
            self.kind()
        ))
    }
}

/// A ranked search result. Higher scores rank first.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub entry: MemoryEntry,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TierStatus {
    Ready,
    NotInitialized,
    NotImplemented,
}

impl TierStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierStatus::Ready => "ready",
            TierStatus::NotInitialized => "not_initialized",
            TierStatus::NotImplemented => "not_implemented",
        }
    }
}

/// Backend-specific counters reported by [`TierBackend::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct TierStats {
    pub tier: StorageTier,
    pub status: TierStatus,
    /// Number of stored entries, when the backend can count cheaply
    pub entries: Option<u64>,
    pub counters: BTreeMap<String, u64>,
}

/// Result of a [`TierBackend::health_check`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub status: TierStatus,
    pub latency: Duration,
    pub message: Option<String>,
}

impl HealthReport {
    pub fn healthy(status: TierStatus, latency: Duration) -> Self {
        Self {
            healthy: true,
            status,
            latency,
            message: None,
        }
    }

    pub fn unhealthy(status: TierStatus, latency: Duration, message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            status,
            latency,
            message: Some(message.into()),
        }
    }
}

/// Operation counters shared by the tier implementations.
#[derive(Debug, Default)]
pub struct TierCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub writes: AtomicU64,
    pub deletes: AtomicU64,
    pub expired: AtomicU64,
    pub errors: AtomicU64,
}

impl TierCounters {
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn wrote(&self, n: u64) {
        self.writes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn deleted(&self, n: u64) {
        self.deletes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn expired(&self, n: u64) {
        self.expired.fetch_add(n, Ordering::Relaxed);
    }

    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        BTreeMap::from([
            ("hits".to_string(), self.hits.load(Ordering::Relaxed)),
            ("misses".to_string(), self.misses.load(Ordering::Relaxed)),
            ("writes".to_string(), self.writes.load(Ordering::Relaxed)),
            ("deletes".to_string(), self.deletes.load(Ordering::Relaxed)),
            ("expired".to_string(), self.expired.load(Ordering::Relaxed)),
            ("errors".to_string(), self.errors.load(Ordering::Relaxed)),
        ])
    }
}

/// Substring score used by tiers without a real text index: the number of
/// occurrences of each whitespace-separated query term in `text`.
/// `text` is expected to be lowercase already.
pub(crate) fn text_match_score(text: &str, query: &str) -> usize {
    query
        .to_lowercase()
        .split_whitespace()
        .map(|term| text.matches(term).count())
        .sum()
}

/// Sort hits by descending score and keep the first `limit`.
pub(crate) fn rank_hits(mut hits: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(limit);
    hits
}

pub(crate) fn not_initialized(tier: StorageTier) -> StrataError {
    StrataError::DegradedCapability(format!("{tier} tier is not initialized"))
}

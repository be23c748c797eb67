//! Pool registry
//!
//! One [`KvPool`] per backend endpoint, keyed by `host:port/db`, shared by
//! every consumer that points at the same server (the hot tier and the L2
//! cache usually do). `memory://` URLs resolve to in-process servers held by
//! the registry so tests and single-node setups need no external service.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use url::Url;

use crate::error::{Result, StrataError};
use crate::storage::kv::{
    Expiry, KvConnection, KvConnector, KvWrite, MemoryConnection, MemoryConnector, MemoryKv,
};
use crate::storage::pool::{KvPool, PoolConfig, PoolMetricsSnapshot};
use crate::storage::redis_kv::{RedisConnection, RedisConnector};

/// Connector selected by URL scheme.
#[derive(Clone)]
pub enum AnyConnector {
    Redis(RedisConnector),
    Memory(MemoryConnector),
}

#[derive(Clone)]
pub enum AnyConnection {
    Redis(RedisConnection),
    Memory(MemoryConnection),
}

#[async_trait]
impl KvConnector for AnyConnector {
    type Connection = AnyConnection;

    async fn connect(&self) -> Result<AnyConnection> {
        match self {
            AnyConnector::Redis(c) => c.connect().await.map(AnyConnection::Redis),
            AnyConnector::Memory(c) => c.connect().await.map(AnyConnection::Memory),
        }
    }

    fn endpoint(&self) -> String {
        match self {
            AnyConnector::Redis(c) => c.endpoint(),
            AnyConnector::Memory(c) => c.endpoint(),
        }
    }
}

macro_rules! delegate {
    ($self:ident, $conn:ident => $call:expr) => {
        match $self {
            AnyConnection::Redis($conn) => $call,
            AnyConnection::Memory($conn) => $call,
        }
    };
}

#[async_trait]
impl KvConnection for AnyConnection {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        delegate!(self, c => c.get(key).await)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        delegate!(self, c => c.mget(keys).await)
    }

    async fn set(&self, key: &str, value: Bytes, expiry: Expiry) -> Result<()> {
        delegate!(self, c => c.set(key, value, expiry).await)
    }

    async fn compare_and_swap(&self, key: &str, expected: &Bytes, value: Bytes) -> Result<bool> {
        delegate!(self, c => c.compare_and_swap(key, expected, value).await)
    }

    async fn set_many(&self, writes: Vec<KvWrite>) -> Result<()> {
        delegate!(self, c => c.set_many(writes).await)
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        delegate!(self, c => c.del(keys).await)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        delegate!(self, c => c.scan(cursor, pattern, count).await)
    }

    async fn ping(&self) -> Result<()> {
        delegate!(self, c => c.ping().await)
    }

    async fn dbsize(&self) -> Result<u64> {
        delegate!(self, c => c.dbsize().await)
    }
}

/// Parsed endpoint identity of a KV URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointKey {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub db: u32,
    pub password: Option<String>,
}

impl EndpointKey {
    pub fn parse(raw: &str) -> Result<Self> {
        let url =
            Url::parse(raw).map_err(|e| StrataError::Config(format!("Invalid URL {raw}: {e}")))?;
        let scheme = url.scheme().to_string();
        let default_port = match scheme.as_str() {
            "redis" | "rediss" => 6379,
            "memory" => 0,
            other => {
                return Err(StrataError::Config(format!(
                    "Unsupported KV scheme {other:?} (expected redis, rediss or memory)"
                )));
            }
        };

        let host = url.host_str().unwrap_or("127.0.0.1").to_string();
        let db = match url.path().trim_start_matches('/') {
            "" => 0,
            db => db
                .parse()
                .map_err(|_| StrataError::Config(format!("Invalid database index in {raw}")))?,
        };

        Ok(Self {
            scheme,
            host,
            port: url.port().unwrap_or(default_port),
            db,
            password: url.password().map(str::to_string),
        })
    }

    /// Registry key: `host:port/db`.
    pub fn pool_key(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.db)
    }

    pub fn is_memory(&self) -> bool {
        self.scheme == "memory"
    }
}

/// Process-wide map of pools, built once by the storage context.
#[derive(Default)]
pub struct PoolRegistry {
    pools: DashMap<String, Arc<KvPool<AnyConnector>>>,
    memory_servers: DashMap<String, MemoryKv>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// In-process server for `host/db`, created on first use.
    pub fn memory_server(&self, endpoint: &EndpointKey) -> MemoryKv {
        self.memory_servers
            .entry(endpoint.pool_key())
            .or_insert_with(|| match endpoint.password {
                Some(ref password) => MemoryKv::with_password(password.clone()),
                None => MemoryKv::new(),
            })
            .clone()
    }

    fn connector(&self, url: &str, endpoint: &EndpointKey) -> Result<AnyConnector> {
        if endpoint.is_memory() {
            let server = self.memory_server(endpoint);
            Ok(AnyConnector::Memory(
                server
                    .connector(endpoint.password.clone())
                    .named(format!("{}/{}", endpoint.host, endpoint.db)),
            ))
        } else {
            RedisConnector::new(url).map(AnyConnector::Redis)
        }
    }

    /// Shared pool for `url`. The first caller's config sizes the pool.
    pub fn pool(&self, url: &str, config: PoolConfig) -> Result<Arc<KvPool<AnyConnector>>> {
        let endpoint = EndpointKey::parse(url)?;
        let key = endpoint.pool_key();
        if let Some(pool) = self.pools.get(&key) {
            if !pool.is_closed() {
                return Ok(pool.clone());
            }
        }

        let connector = self.connector(url, &endpoint)?;
        let pool = self
            .pools
            .entry(key.clone())
            .and_modify(|existing| {
                if existing.is_closed() {
                    *existing = Arc::new(KvPool::new(connector.clone(), config.clone()));
                }
            })
            .or_insert_with(|| {
                tracing::info!("Created KV pool for {} (max {})", key, config.max_size);
                Arc::new(KvPool::new(connector, config))
            })
            .clone();
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn metrics(&self) -> Vec<(String, PoolMetricsSnapshot)> {
        let mut metrics: Vec<_> = self
            .pools
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().metrics()))
            .collect();
        metrics.sort_by(|a, b| a.0.cmp(&b.0));
        metrics
    }

    /// PING every pool, logging failures.
    pub async fn health_check_all(&self) {
        let pools: Vec<_> = self
            .pools
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        for (key, pool) in pools {
            match pool.health_check().await {
                Ok(latency) => tracing::debug!("KV pool {} healthy ({:?})", key, latency),
                Err(e) => tracing::warn!("KV pool {} health check failed: {}", key, e),
            }
        }
    }

    pub fn close_all(&self) {
        for entry in self.pools.iter() {
            entry.value().close();
        }
        tracing::info!("Closed {} KV pools", self.pools.len());
    }
}

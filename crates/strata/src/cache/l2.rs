//! Distributed L2 cache backends

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::storage::kv::{Expiry, KvConnection, KvConnector, escape_glob};
use crate::storage::pool::KvPool;

/// Byte-valued store shared between processes.
#[async_trait]
pub trait L2Backend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store `value`; `ttl_seconds <= 0` stores it without expiry.
    async fn set(&self, key: &str, value: Bytes, ttl_seconds: i64) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove everything this backend owns. Returns the count removed.
    async fn clear(&self) -> Result<u64>;
}

/// L2 over the pooled KV seam, isolated under its own namespace.
pub struct KvL2Backend<C: KvConnector> {
    pool: Arc<KvPool<C>>,
    namespace: String,
    scan_count: usize,
}

impl<C: KvConnector> KvL2Backend<C> {
    pub fn new(pool: Arc<KvPool<C>>, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
            scan_count: 100,
        }
    }

    pub fn with_scan_count(mut self, scan_count: usize) -> Self {
        self.scan_count = scan_count.max(1);
        self
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

#[async_trait]
impl<C: KvConnector> L2Backend for KvL2Backend<C> {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let key = self.storage_key(key);
        self.pool
            .execute("L2 GET", |conn| {
                let key = key.clone();
                async move { conn.get(&key).await }
            })
            .await
    }

    async fn set(&self, key: &str, value: Bytes, ttl_seconds: i64) -> Result<bool> {
        let key = self.storage_key(key);
        let expiry = if ttl_seconds > 0 {
            Expiry::Seconds(ttl_seconds as u64)
        } else {
            Expiry::Persist
        };
        self.pool
            .execute("L2 SET", |conn| {
                let key = key.clone();
                let value = value.clone();
                async move { conn.set(&key, value, expiry).await.map(|()| true) }
            })
            .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let keys = vec![self.storage_key(key)];
        let removed = self
            .pool
            .execute("L2 DEL", |conn| {
                let keys = keys.clone();
                async move { conn.del(&keys).await }
            })
            .await?;
        Ok(removed > 0)
    }

    async fn clear(&self) -> Result<u64> {
        let pattern = format!("{}:*", escape_glob(&self.namespace));
        let count = self.scan_count;
        let mut cursor = 0u64;
        let mut removed = 0u64;
        loop {
            let (next, keys) = self
                .pool
                .execute("L2 SCAN", |conn| {
                    let pattern = pattern.clone();
                    async move { conn.scan(cursor, &pattern, count).await }
                })
                .await?;
            if !keys.is_empty() {
                removed += self
                    .pool
                    .execute("L2 DEL", |conn| {
                        let keys = keys.clone();
                        async move { conn.del(&keys).await }
                    })
                    .await?;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(removed)
    }
}

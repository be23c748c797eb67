//! Bounded connection pool for the key-value seam
//!
//! A semaphore caps the number of connections in use. Idle connections are
//! kept in a queue and reopened once they exceed the keep-alive window.
//! Every request runs under a timeout and transient failures are retried
//! with the pool's [`RetryPolicy`].

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::Instant;

use crate::config::{HotConfig, RetryConfig};
use crate::error::{Result, StrataError};
use crate::storage::kv::{KvConnection, KvConnector};
use crate::storage::retry::RetryPolicy;

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum connections in use at once
    pub max_size: usize,
    /// Connections opened by [`KvPool::warm_up`]
    pub min_idle: usize,
    /// Maximum wait for a free slot
    pub acquire_timeout: Duration,
    /// Bound on connect and on every request
    pub request_timeout: Duration,
    /// Idle connections older than this are dropped instead of reused
    pub keepalive: Duration,
    pub retry: RetryPolicy,
}

impl PoolConfig {
    pub fn from_config(hot: &HotConfig, retry: &RetryConfig) -> Self {
        Self {
            max_size: hot.pool_size,
            min_idle: hot.pool_min,
            acquire_timeout: hot.acquire_timeout(),
            request_timeout: hot.socket_timeout(),
            keepalive: hot.keepalive(),
            retry: RetryPolicy::from(retry),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from_config(&HotConfig::default(), &RetryConfig::default())
    }
}

#[derive(Debug, Default)]
struct PoolMetrics {
    acquired: AtomicU64,
    acquire_timeouts: AtomicU64,
    connections_opened: AtomicU64,
    connections_discarded: AtomicU64,
    connections_expired: AtomicU64,
    requests: AtomicU64,
    request_failures: AtomicU64,
    timeouts: AtomicU64,
    retries: AtomicU64,
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolMetricsSnapshot {
    pub max_size: usize,
    pub in_use: usize,
    pub idle: usize,
    pub acquired: u64,
    pub acquire_timeouts: u64,
    pub connections_opened: u64,
    pub connections_discarded: u64,
    pub connections_expired: u64,
    pub requests: u64,
    pub request_failures: u64,
    pub timeouts: u64,
    pub retries: u64,
}

impl PoolMetricsSnapshot {
    /// Flatten into `pool_*` counters for tier stats.
    pub fn counters(&self) -> Vec<(String, u64)> {
        vec![
            ("pool_max_size".to_string(), self.max_size as u64),
            ("pool_in_use".to_string(), self.in_use as u64),
            ("pool_idle".to_string(), self.idle as u64),
            ("pool_acquired".to_string(), self.acquired),
            ("pool_acquire_timeouts".to_string(), self.acquire_timeouts),
            ("pool_connections_opened".to_string(), self.connections_opened),
            ("pool_requests".to_string(), self.requests),
            ("pool_request_failures".to_string(), self.request_failures),
            ("pool_timeouts".to_string(), self.timeouts),
            ("pool_retries".to_string(), self.retries),
        ]
    }
}

struct IdleConnection<T> {
    conn: T,
    since: Instant,
}

/// Pool of connections to one key-value endpoint.
pub struct KvPool<C: KvConnector> {
    connector: C,
    config: PoolConfig,
    semaphore: Semaphore,
    idle: Mutex<VecDeque<IdleConnection<C::Connection>>>,
    metrics: PoolMetrics,
    closed: AtomicBool,
}

/// A checked-out connection. Returned to the idle queue on drop unless
/// discarded after a failure.
pub struct PooledConnection<'a, C: KvConnector> {
    pool: &'a KvPool<C>,
    conn: Option<C::Connection>,
    discard: bool,
    _permit: SemaphorePermit<'a>,
}

impl<C: KvConnector> PooledConnection<'_, C> {
    pub fn connection(&self) -> Option<&C::Connection> {
        self.conn.as_ref()
    }

    /// Drop the connection instead of returning it to the pool.
    pub fn discard(&mut self) {
        self.discard = true;
    }
}

impl<C: KvConnector> Drop for PooledConnection<'_, C> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.discard || self.pool.closed.load(Ordering::SeqCst) {
            self.pool
                .metrics
                .connections_discarded
                .fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.pool.lock_idle().push_back(IdleConnection {
            conn,
            since: Instant::now(),
        });
    }
}

impl<C: KvConnector> KvPool<C> {
    pub fn new(connector: C, config: PoolConfig) -> Self {
        let max_size = config.max_size.max(1);
        Self {
            connector,
            semaphore: Semaphore::new(max_size),
            config: PoolConfig { max_size, ..config },
            idle: Mutex::new(VecDeque::new()),
            metrics: PoolMetrics::default(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn lock_idle(&self) -> std::sync::MutexGuard<'_, VecDeque<IdleConnection<C::Connection>>> {
        self.idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn open(&self) -> Result<C::Connection> {
        let timeout = self.config.request_timeout;
        let conn = tokio::time::timeout(timeout, self.connector.connect())
            .await
            .map_err(|_| {
                self.metrics.timeouts.fetch_add(1, Ordering::Relaxed);
                StrataError::timeout(format!("connect {}", self.endpoint()), timeout)
            })??;
        self.metrics
            .connections_opened
            .fetch_add(1, Ordering::Relaxed);
        Ok(conn)
    }

    fn take_idle(&self) -> Option<C::Connection> {
        let mut idle = self.lock_idle();
        while let Some(candidate) = idle.pop_front() {
            if candidate.since.elapsed() <= self.config.keepalive {
                return Some(candidate.conn);
            }
            self.metrics
                .connections_expired
                .fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    /// Open `min_idle` connections ahead of traffic. The first failure is
    /// returned so initialization can fail closed.
    pub async fn warm_up(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StrataError::ConnectionFailure("pool is closed".to_string()));
        }
        let missing = self
            .config
            .min_idle
            .min(self.config.max_size)
            .saturating_sub(self.lock_idle().len());
        for _ in 0..missing {
            let conn = self.open().await?;
            self.lock_idle().push_back(IdleConnection {
                conn,
                since: Instant::now(),
            });
        }
        tracing::debug!(
            "Pool {} warmed with {} connections",
            self.endpoint(),
            self.lock_idle().len()
        );
        Ok(())
    }

    /// Check out a connection, waiting at most `acquire_timeout` for a slot.
    pub async fn acquire(&self) -> Result<PooledConnection<'_, C>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StrataError::ConnectionFailure("pool is closed".to_string()));
        }

        let timeout = self.config.acquire_timeout;
        let permit = tokio::time::timeout(timeout, self.semaphore.acquire())
            .await
            .map_err(|_| {
                self.metrics
                    .acquire_timeouts
                    .fetch_add(1, Ordering::Relaxed);
                StrataError::timeout(format!("acquire connection to {}", self.endpoint()), timeout)
            })?
            .map_err(|_| StrataError::ConnectionFailure("pool is closed".to_string()))?;

        let conn = match self.take_idle() {
            Some(conn) => conn,
            None => self.open().await?,
        };
        self.metrics.acquired.fetch_add(1, Ordering::Relaxed);

        Ok(PooledConnection {
            pool: self,
            conn: Some(conn),
            discard: false,
            _permit: permit,
        })
    }

    async fn attempt<T, F, Fut>(&self, op_name: &str, operation: &mut F) -> Result<T>
    where
        F: FnMut(C::Connection) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut guard = self.acquire().await?;
        let Some(conn) = guard.connection().cloned() else {
            return Err(StrataError::ConnectionFailure("connection lost".to_string()));
        };
        self.metrics.requests.fetch_add(1, Ordering::Relaxed);

        let timeout = self.config.request_timeout;
        match tokio::time::timeout(timeout, operation(conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                self.metrics
                    .request_failures
                    .fetch_add(1, Ordering::Relaxed);
                if e.is_transient() {
                    guard.discard();
                }
                Err(e)
            }
            Err(_) => {
                self.metrics
                    .request_failures
                    .fetch_add(1, Ordering::Relaxed);
                self.metrics.timeouts.fetch_add(1, Ordering::Relaxed);
                guard.discard();
                Err(StrataError::timeout(op_name, timeout))
            }
        }
    }

    /// Run `operation` on a pooled connection with timeout and retries.
    ///
    /// The operation receives a clone of the connection, so it may be called
    /// again on a fresh connection after a transient failure.
    pub async fn execute<T, F, Fut>(&self, op_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut(C::Connection) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;
        loop {
            match self.attempt(op_name, &mut operation).await {
                Ok(value) => return Ok(value),
                Err(e) => match self.config.retry.should_retry(retries, &e) {
                    Some(delay) => {
                        retries += 1;
                        self.metrics.retries.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(
                            "{} on {} failed ({}), retry {}/{} in {:?}",
                            op_name,
                            self.endpoint(),
                            e,
                            retries,
                            self.config.retry.max_attempts,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
            }
        }
    }

    /// PING one connection. Returns round-trip latency.
    pub async fn health_check(&self) -> Result<Duration> {
        let start = Instant::now();
        let mut guard = self.acquire().await?;
        let Some(conn) = guard.connection().cloned() else {
            return Err(StrataError::ConnectionFailure("connection lost".to_string()));
        };
        let timeout = self.config.request_timeout;
        let result = match tokio::time::timeout(timeout, conn.ping()).await {
            Ok(result) => result,
            Err(_) => Err(StrataError::timeout("PING", timeout)),
        };
        if result.is_err() {
            guard.discard();
        }
        result.map(|_| start.elapsed())
    }

    pub fn metrics(&self) -> PoolMetricsSnapshot {
        let available = self.semaphore.available_permits();
        PoolMetricsSnapshot {
            max_size: self.config.max_size,
            in_use: self.config.max_size.saturating_sub(available),
            idle: self.lock_idle().len(),
            acquired: self.metrics.acquired.load(Ordering::Relaxed),
            acquire_timeouts: self.metrics.acquire_timeouts.load(Ordering::Relaxed),
            connections_opened: self.metrics.connections_opened.load(Ordering::Relaxed),
            connections_discarded: self.metrics.connections_discarded.load(Ordering::Relaxed),
            connections_expired: self.metrics.connections_expired.load(Ordering::Relaxed),
            requests: self.metrics.requests.load(Ordering::Relaxed),
            request_failures: self.metrics.request_failures.load(Ordering::Relaxed),
            timeouts: self.metrics.timeouts.load(Ordering::Relaxed),
            retries: self.metrics.retries.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Refuse new checkouts and drop idle connections.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.semaphore.close();
            self.lock_idle().clear();
            tracing::info!("Closed connection pool for {}", self.endpoint());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::{Expiry, MemoryConnector, MemoryKv};
    use bytes::Bytes;

    fn test_config() -> PoolConfig {
        PoolConfig {
            max_size: 2,
            min_idle: 1,
            acquire_timeout: Duration::from_millis(50),
            request_timeout: Duration::from_millis(100),
            keepalive: Duration::from_secs(60),
            retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
                multiplier: 2.0,
            },
        }
    }

    fn pool(server: &MemoryKv) -> KvPool<MemoryConnector> {
        KvPool::new(server.connector(None), test_config())
    }

    #[tokio::test]
    async fn test_connections_are_reused() {
        let server = MemoryKv::new();
        let pool = pool(&server);
        pool.warm_up().await.unwrap();
        assert_eq!(server.connections_opened(), 1);

        for i in 0..5 {
            pool.execute("SET", |conn| async move {
                conn.set(&format!("k{i}"), Bytes::from_static(b"v"), Expiry::Persist)
                    .await
            })
            .await
            .unwrap();
        }

        assert_eq!(server.connections_opened(), 1);
        let metrics = pool.metrics();
        assert_eq!(metrics.requests, 5);
        assert_eq!(metrics.in_use, 0);
        assert_eq!(metrics.idle, 1);
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_exhausted() {
        let server = MemoryKv::new();
        let pool = pool(&server);

        let _a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        let err = pool.acquire().await.err().unwrap();

        assert!(err.is_timeout());
        assert_eq!(pool.metrics().acquire_timeouts, 1);
        assert_eq!(pool.metrics().in_use, 2);
    }

    #[tokio::test]
    async fn test_request_timeout_is_distinguished_and_retried() {
        let server = MemoryKv::new();
        let pool = pool(&server);
        pool.warm_up().await.unwrap();
        server.set_latency(Duration::from_millis(500));

        let err = pool
            .execute("GET slow", |conn| async move { conn.get("slow").await })
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        let metrics = pool.metrics();
        assert_eq!(metrics.retries, 2);
        assert!(metrics.timeouts >= 3);
    }

    #[tokio::test]
    async fn test_outage_exhausts_retry_budget() {
        let server = MemoryKv::new();
        let pool = pool(&server);
        pool.warm_up().await.unwrap();
        server.set_online(false);

        let err = pool
            .execute("PING", |conn| async move { conn.ping().await })
            .await
            .unwrap_err();
        assert!(matches!(err, StrataError::ConnectionFailure(_)));
        assert!(pool.health_check().await.is_err());

        server.set_online(true);
        assert!(pool.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_authentication_failure_is_not_retried() {
        let server = MemoryKv::with_password("secret");
        let pool = KvPool::new(server.connector(Some("wrong".into())), test_config());

        let err = pool
            .execute("PING", |conn| async move { conn.ping().await })
            .await
            .unwrap_err();
        assert!(matches!(err, StrataError::AuthenticationFailure(_)));
        assert_eq!(pool.metrics().retries, 0);
    }

    #[tokio::test]
    async fn test_closed_pool_refuses_checkout() {
        let server = MemoryKv::new();
        let pool = pool(&server);
        pool.warm_up().await.unwrap();
        pool.close();

        assert!(pool.is_closed());
        assert!(pool.acquire().await.is_err());
        assert_eq!(pool.metrics().idle, 0);
    }
}

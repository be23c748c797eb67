//! Key-value wire seam
//!
//! The hot tier and the L2 cache talk to a key-value server through
//! [`KvConnector`] / [`KvConnection`]. Two implementations exist: the Redis
//! client in [`super::redis_kv`] and [`MemoryKv`], an in-process server with
//! server-side TTL, authentication and an offline switch used for embedded
//! deployments and fault injection in tests.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use crate::error::{Result, StrataError};

/// Server-side expiry for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// No expiry; clears any existing TTL
    Persist,
    /// Expire after this many seconds
    Seconds(u64),
}

/// One write in a pipelined batch.
#[derive(Debug, Clone)]
pub struct KvWrite {
    pub key: String,
    pub value: Bytes,
    pub expiry: Expiry,
}

/// A live connection. Clones share the underlying transport.
#[async_trait]
pub trait KvConnection: Clone + Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>>;

    async fn set(&self, key: &str, value: Bytes, expiry: Expiry) -> Result<()>;

    /// Replace `key` with `value` only if it still holds `expected`. The
    /// key's TTL is kept. Returns `false` when the value changed or is gone.
    async fn compare_and_swap(&self, key: &str, expected: &Bytes, value: Bytes) -> Result<bool>;

    /// Apply all writes in a single round trip.
    async fn set_many(&self, writes: Vec<KvWrite>) -> Result<()>;

    async fn del(&self, keys: &[String]) -> Result<u64>;

    /// One `SCAN` step. A returned cursor of 0 ends the iteration.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)>;

    async fn ping(&self) -> Result<()>;

    async fn dbsize(&self) -> Result<u64>;
}

/// Opens connections to one endpoint.
#[async_trait]
pub trait KvConnector: Send + Sync + 'static {
    type Connection: KvConnection;

    async fn connect(&self) -> Result<Self::Connection>;

    /// `host:port/db` style identifier used in logs and the pool registry.
    fn endpoint(&self) -> String;
}

/// Escape glob metacharacters so a literal prefix can be used in `SCAN MATCH`.
pub fn escape_glob(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Glob matcher supporting `*`, `?` and backslash escapes.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    fn tokens(pattern: &str) -> Vec<Token> {
        let mut out = Vec::new();
        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            match c {
                '*' => out.push(Token::Star),
                '?' => out.push(Token::Any),
                '\\' => out.push(Token::Lit(chars.next().unwrap_or('\\'))),
                other => out.push(Token::Lit(other)),
            }
        }
        out
    }

    #[derive(Clone, Copy)]
    enum Token {
        Star,
        Any,
        Lit(char),
    }

    let pat = tokens(pattern);
    let txt: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < txt.len() {
        match pat.get(p) {
            Some(Token::Star) => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(Token::Any) => {
                p += 1;
                t += 1;
            }
            Some(Token::Lit(c)) if *c == txt[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((bp, bt)) => {
                    p = bp + 1;
                    t = bt + 1;
                    backtrack = Some((bp, bt + 1));
                }
                None => return false,
            },
        }
    }
    pat[p..].iter().all(|tok| matches!(tok, Token::Star))
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

#[derive(Debug, Default)]
struct MemoryKvInner {
    data: Mutex<BTreeMap<String, StoredValue>>,
    /// Last key returned for each open scan cursor
    cursors: Mutex<BTreeMap<u64, String>>,
    next_cursor: AtomicU64,
    offline: AtomicBool,
    password: Option<String>,
    latency_ms: AtomicU64,
    connections: AtomicU64,
}

/// In-process key-value server.
///
/// Values expire on the tokio clock, so tests can drive expiry with
/// `tokio::time::pause`/`advance`.
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    inner: Arc<MemoryKvInner>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// A server that rejects connections without this password.
    pub fn with_password(password: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(MemoryKvInner {
                password: Some(password.into()),
                ..Default::default()
            }),
        }
    }

    /// Simulate an outage: connects and commands fail with `ConnectionFailure`.
    pub fn set_online(&self, online: bool) {
        self.inner.offline.store(!online, Ordering::SeqCst);
    }

    /// Delay every command by `latency`, for timeout testing.
    pub fn set_latency(&self, latency: Duration) {
        self.inner
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of connections opened so far.
    pub fn connections_opened(&self) -> u64 {
        self.inner.connections.load(Ordering::SeqCst)
    }

    pub fn connector(&self, password: Option<String>) -> MemoryConnector {
        MemoryConnector {
            server: self.clone(),
            name: "memory".to_string(),
            password,
        }
    }

    fn check_online(&self) -> Result<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StrataError::ConnectionFailure(
                "in-process server is offline".to_string(),
            ));
        }
        Ok(())
    }

    async fn enter(&self) -> Result<()> {
        let latency = self.inner.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.check_online()
    }

    fn with_data<T>(&self, f: impl FnOnce(&mut BTreeMap<String, StoredValue>) -> T) -> T {
        let mut data = self
            .inner
            .data
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut data)
    }

    fn read(&self, key: &str, now: Instant) -> Option<Bytes> {
        self.with_data(|data| match data.get(key) {
            Some(stored) if stored.is_live(now) => Some(stored.value.clone()),
            Some(_) => {
                data.remove(key);
                None
            }
            None => None,
        })
    }

    fn write(&self, key: &str, value: Bytes, expiry: Expiry, now: Instant) {
        let expires_at = match expiry {
            Expiry::Persist => None,
            Expiry::Seconds(secs) => Some(now + Duration::from_secs(secs)),
        };
        self.with_data(|data| {
            data.insert(key.to_string(), StoredValue { value, expires_at });
        });
    }
}

/// Connector for a [`MemoryKv`] server.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    server: MemoryKv,
    name: String,
    password: Option<String>,
}

impl MemoryConnector {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl KvConnector for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection> {
        self.server.enter().await?;
        if let Some(ref required) = self.server.inner.password {
            if self.password.as_ref() != Some(required) {
                return Err(StrataError::AuthenticationFailure(format!(
                    "invalid credentials for memory://{}",
                    self.name
                )));
            }
        }
        self.server.inner.connections.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            server: self.server.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("memory://{}", self.name)
    }
}

/// Connection to a [`MemoryKv`] server.
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    server: MemoryKv,
}

#[async_trait]
impl KvConnection for MemoryConnection {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.server.enter().await?;
        Ok(self.server.read(key, Instant::now()))
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        self.server.enter().await?;
        let now = Instant::now();
        Ok(keys.iter().map(|k| self.server.read(k, now)).collect())
    }

    async fn set(&self, key: &str, value: Bytes, expiry: Expiry) -> Result<()> {
        self.server.enter().await?;
        self.server.write(key, value, expiry, Instant::now());
        Ok(())
    }

    async fn compare_and_swap(&self, key: &str, expected: &Bytes, value: Bytes) -> Result<bool> {
        self.server.enter().await?;
        let now = Instant::now();
        Ok(self.server.with_data(|data| match data.get_mut(key) {
            Some(stored) if stored.is_live(now) && stored.value == *expected => {
                stored.value = value;
                true
            }
            _ => false,
        }))
    }

    async fn set_many(&self, writes: Vec<KvWrite>) -> Result<()> {
        self.server.enter().await?;
        let now = Instant::now();
        for write in writes {
            self.server.write(&write.key, write.value, write.expiry, now);
        }
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        self.server.enter().await?;
        let now = Instant::now();
        Ok(self.server.with_data(|data| {
            keys.iter()
                .filter_map(|k| data.remove(k))
                .filter(|stored| stored.is_live(now))
                .count() as u64
        }))
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        self.server.enter().await?;
        let inner = &self.server.inner;
        let after = if cursor == 0 {
            None
        } else {
            let mut cursors = inner
                .cursors
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match cursors.remove(&cursor) {
                Some(last) => Some(last),
                None => return Ok((0, Vec::new())),
            }
        };

        let now = Instant::now();
        let count = count.max(1);
        let (keys, last_examined, exhausted) = self.server.with_data(|data| {
            let lower = match after {
                Some(ref last) => Bound::Excluded(last.clone()),
                None => Bound::Unbounded,
            };
            let mut examined = 0;
            let mut last_examined = None;
            let mut keys = Vec::new();
            let mut range = data.range((lower, Bound::Unbounded));
            for (key, stored) in range.by_ref() {
                examined += 1;
                last_examined = Some(key.clone());
                if stored.is_live(now) && glob_match(pattern, key) {
                    keys.push(key.clone());
                }
                if examined >= count {
                    break;
                }
            }
            let exhausted = range.next().is_none();
            (keys, last_examined, exhausted)
        });

        let next = match (exhausted, last_examined) {
            (false, Some(last)) => {
                let id = inner.next_cursor.fetch_add(1, Ordering::SeqCst) + 1;
                inner
                    .cursors
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .insert(id, last);
                id
            }
            _ => 0,
        };
        Ok((next, keys))
    }

    async fn ping(&self) -> Result<()> {
        self.server.enter().await
    }

    async fn dbsize(&self) -> Result<u64> {
        self.server.enter().await?;
        let now = Instant::now();
        Ok(self
            .server
            .with_data(|data| data.values().filter(|v| v.is_live(now)).count() as u64))
    }
}

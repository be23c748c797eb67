//! Warm tier: SQLite document store
//!
//! Each entry is one row holding the JSON document plus denormalized columns
//! used for filtering (`access_count`, `source`, `tags`), expiry
//! (`expires_at`) and substring search (`searchable_text`). The
//! `access_count`/`accessed_at` columns are authoritative over the copies
//! inside the document, so access updates are a single `UPDATE`.

use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};

use crate::config::WarmConfig;
use crate::error::{Result, StrataError};
use crate::memory::{MemoryEntry, StorageTier};
use crate::storage::access::{AccessRecorder, AccessSink, RecorderSlot};
use crate::storage::filter::SearchFilter;
use crate::storage::retry::RetryPolicy;
use crate::storage::{
    HealthReport, Lifecycle, SearchHit, SearchQuery, TierBackend, TierCounters, TierStats,
    TierStatus, not_initialized, rank_hits, text_match_score,
};

const LIST_PAGE_SIZE: i64 = 256;
const SEARCH_PAGE_SIZE: i64 = 256;

fn map_sqlx_error(context: &str, e: sqlx::Error) -> StrataError {
    match e {
        sqlx::Error::PoolTimedOut => {
            StrataError::ConnectionFailure(format!("{context}: timed out waiting for a connection"))
        }
        sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
            StrataError::ConnectionFailure(format!("{context}: {e}"))
        }
        sqlx::Error::Database(ref db)
            if db.message().contains("locked") || db.message().contains("busy") =>
        {
            StrataError::ConnectionFailure(format!("{context}: {e}"))
        }
        other => StrataError::Storage(format!("{context}: {other}")),
    }
}

fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

fn valid_table_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

/// Column values for one entry.
struct WarmRow {
    key: String,
    document: String,
    access_count: i64,
    accessed_at: i64,
    source: String,
    tags: String,
    expires_at: Option<i64>,
    searchable_text: String,
    created_at: i64,
}

impl WarmRow {
    fn from_entry(entry: &MemoryEntry) -> Result<Self> {
        let mut stored = entry.clone();
        stored.metadata.tier = StorageTier::Warm;
        let meta = &stored.metadata;
        Ok(Self {
            key: stored.key.clone(),
            document: serde_json::to_string(&stored)?,
            access_count: i64::try_from(meta.access_count).unwrap_or(i64::MAX),
            accessed_at: meta.accessed_at.timestamp_micros(),
            source: meta.source.clone(),
            tags: serde_json::to_string(&meta.tags)?,
            expires_at: meta.expires_at().map(|at| at.timestamp_micros()),
            searchable_text: stored.searchable_text(),
            created_at: meta.created_at.timestamp_micros(),
        })
    }
}

fn decode_row(row: &SqliteRow) -> Result<MemoryEntry> {
    let column = |name: &str, e: sqlx::Error| {
        StrataError::SerializationFailure(format!("Failed to read column {name}: {e}"))
    };
    let document: String = row.try_get("document").map_err(|e| column("document", e))?;
    let access_count: i64 = row
        .try_get("access_count")
        .map_err(|e| column("access_count", e))?;
    let accessed_at: i64 = row
        .try_get("accessed_at")
        .map_err(|e| column("accessed_at", e))?;

    let mut entry: MemoryEntry = serde_json::from_str(&document)?;
    entry.metadata.access_count = u64::try_from(access_count).unwrap_or(0);
    if let Some(at) = DateTime::from_timestamp_micros(accessed_at) {
        entry.metadata.accessed_at = at;
    }
    Ok(entry)
}

/// Warm tier over a SQLite table.
pub struct WarmTier {
    config: WarmConfig,
    retry: RetryPolicy,
    pool: RwLock<Option<SqlitePool>>,
    ready: AtomicBool,
    init_lock: tokio::sync::Mutex<()>,
    recorder: RecorderSlot,
    counters: TierCounters,
}

impl WarmTier {
    pub fn new(config: WarmConfig, retry: RetryPolicy) -> Self {
        Self {
            config,
            retry,
            pool: RwLock::new(None),
            ready: AtomicBool::new(false),
            init_lock: tokio::sync::Mutex::new(()),
            recorder: RecorderSlot::default(),
            counters: TierCounters::default(),
        }
    }

    fn table(&self) -> &str {
        &self.config.collection
    }

    fn pool(&self) -> Result<SqlitePool> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(not_initialized(StorageTier::Warm));
        }
        self.pool
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(|| not_initialized(StorageTier::Warm))
    }

    /// Run a query with the request timeout, retrying transient failures.
    async fn call<T, F, Fut>(&self, op: &str, mut query: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        let timeout = self.config.request_timeout();
        self.retry
            .run(op, || {
                let fut = query();
                async move {
                    match tokio::time::timeout(timeout, fut).await {
                        Ok(result) => result.map_err(|e| map_sqlx_error(op, e)),
                        Err(_) => Err(StrataError::timeout(op, timeout)),
                    }
                }
            })
            .await
    }

    async fn connect(&self) -> Result<SqlitePool> {
        let in_memory =
            self.config.url.contains(":memory:") || self.config.url.contains("mode=memory");
        let options = SqliteConnectOptions::from_str(&self.config.url)
            .map_err(|e| StrataError::Config(format!("Invalid warm tier URL: {e}")))?
            .create_if_missing(true);

        if !in_memory {
            if let Some(parent) = options.get_filename().parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }

        // Every connection to an in-memory database is a separate database.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(self.config.max_connections.max(1))
        };

        pool_options
            .acquire_timeout(self.config.request_timeout())
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect warm tier", e))
    }

    async fn create_schema(&self, pool: &SqlitePool) -> Result<()> {
        let table = self.table();
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    key TEXT PRIMARY KEY NOT NULL,
                    document TEXT NOT NULL,
                    access_count INTEGER NOT NULL DEFAULT 0,
                    accessed_at INTEGER NOT NULL,
                    source TEXT NOT NULL DEFAULT '',
                    tags TEXT NOT NULL DEFAULT '[]',
                    expires_at INTEGER,
                    searchable_text TEXT NOT NULL DEFAULT '',
                    created_at INTEGER NOT NULL
                )"
            ),
            format!("CREATE INDEX IF NOT EXISTS {table}_expires_at ON {table} (expires_at)"),
            format!("CREATE INDEX IF NOT EXISTS {table}_accessed_at ON {table} (accessed_at)"),
        ];
        for sql in &statements {
            sqlx::query(sql)
                .execute(pool)
                .await
                .map_err(|e| map_sqlx_error("create warm schema", e))?;
        }
        Ok(())
    }

    fn upsert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (key, document, access_count, accessed_at, source, tags, expires_at, searchable_text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(key) DO UPDATE SET
                document = excluded.document,
                access_count = excluded.access_count,
                accessed_at = excluded.accessed_at,
                source = excluded.source,
                tags = excluded.tags,
                expires_at = excluded.expires_at,
                searchable_text = excluded.searchable_text,
                created_at = excluded.created_at",
            self.table()
        )
    }

    /// Write up to `batch_limit` entries in one transaction. Larger inputs
    /// are rejected with `CapacityExceeded`.
    pub async fn insert_many(&self, entries: &[MemoryEntry]) -> Result<()> {
        if entries.len() > self.config.batch_limit {
            return Err(StrataError::CapacityExceeded(format!(
                "warm batch of {} exceeds limit of {}",
                entries.len(),
                self.config.batch_limit
            )));
        }
        let rows = entries
            .iter()
            .map(WarmRow::from_entry)
            .collect::<Result<Vec<_>>>()?;
        self.write_rows(&rows).await
    }

    async fn write_rows(&self, rows: &[WarmRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let pool = self.pool()?;
        let pool = &pool;
        let sql = self.upsert_sql();
        let sql = sql.as_str();

        self.call("warm batch write", || async move {
            let mut tx = pool.begin().await?;
            for row in rows {
                sqlx::query(sql)
                    .bind(&row.key)
                    .bind(&row.document)
                    .bind(row.access_count)
                    .bind(row.accessed_at)
                    .bind(&row.source)
                    .bind(&row.tags)
                    .bind(row.expires_at)
                    .bind(&row.searchable_text)
                    .bind(row.created_at)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await
        })
        .await?;

        self.counters.wrote(rows.len() as u64);
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<MemoryEntry>> {
        let pool = self.pool()?;
        let pool = &pool;
        let sql = format!(
            "SELECT document, access_count, accessed_at FROM {} WHERE key = ?1",
            self.table()
        );
        let sql = sql.as_str();

        let row = self
            .call("warm get", || async move {
                sqlx::query(sql).bind(key).fetch_optional(pool).await
            })
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let entry = decode_row(&row)?;
        if entry.is_expired() {
            tracing::debug!("Warm entry {} expired, deleting", key);
            self.counters.expired(1);
            if let Err(e) = self.delete_key(key).await {
                tracing::warn!("Failed to delete expired warm entry {}: {}", key, e);
            }
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn delete_key(&self, key: &str) -> Result<bool> {
        let pool = self.pool()?;
        let pool = &pool;
        let sql = format!("DELETE FROM {} WHERE key = ?1", self.table());
        let sql = sql.as_str();
        let result = self
            .call("warm delete", || async move {
                sqlx::query(sql).bind(key).execute(pool).await
            })
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete entries past their expiry in batches of `sweep_batch`.
    /// Returns the number removed.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let pool = self.pool()?;
        let pool = &pool;
        let batch = i64::try_from(self.config.sweep_batch.max(1)).unwrap_or(i64::MAX);
        let sql = format!(
            "DELETE FROM {table} WHERE key IN (
                SELECT key FROM {table}
                WHERE expires_at IS NOT NULL AND expires_at <= ?1
                LIMIT ?2
            )",
            table = self.table()
        );
        let sql = sql.as_str();

        let mut removed = 0u64;
        loop {
            let now = now_micros();
            let result = self
                .call("warm sweep", || async move {
                    sqlx::query(sql).bind(now).bind(batch).execute(pool).await
                })
                .await?;
            let affected = result.rows_affected();
            removed += affected;
            if affected < batch as u64 {
                break;
            }
        }

        if removed > 0 {
            self.counters.expired(removed);
            tracing::info!("Warm sweep removed {} expired entries", removed);
        }
        Ok(removed)
    }

    async fn list_page(&self, prefix: &str, after: Option<&str>) -> Result<Vec<String>> {
        let pool = self.pool()?;
        let pool = &pool;
        let sql = format!(
            "SELECT key FROM {} WHERE key >= ?1 AND (?2 IS NULL OR key > ?2)
             AND (expires_at IS NULL OR expires_at > ?3)
             ORDER BY key LIMIT ?4",
            self.table()
        );
        let sql = sql.as_str();
        let now = now_micros();

        let rows = self
            .call("warm list keys", || async move {
                sqlx::query(sql)
                    .bind(prefix)
                    .bind(after)
                    .bind(now)
                    .bind(LIST_PAGE_SIZE)
                    .fetch_all(pool)
                    .await
            })
            .await?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("key")
                    .map_err(|e| map_sqlx_error("warm list keys", e))
            })
            .collect()
    }

    /// Filter-only query, most recently accessed first.
    async fn search_filtered(&self, limit: usize, filter: &SearchFilter) -> Result<Vec<SearchHit>> {
        let pool = self.pool()?;
        let pool = &pool;
        let table = self.table();
        let now = now_micros();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = self
            .call("warm filter search", || async move {
                let mut qb = QueryBuilder::<Sqlite>::new(format!(
                    "SELECT document, access_count, accessed_at FROM {table} WHERE (expires_at IS NULL OR expires_at > "
                ));
                qb.push_bind(now).push(")");
                filter.push_sqlite_conditions(&mut qb);
                qb.push(" ORDER BY accessed_at DESC LIMIT ").push_bind(limit);
                qb.build().fetch_all(pool).await
            })
            .await?;

        rows.iter()
            .map(|row| decode_row(row).map(|entry| SearchHit { entry, score: 1.0 }))
            .collect()
    }

    /// Substring scoring over `searchable_text`, paging through matching rows.
    async fn search_text(
        &self,
        text: &str,
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        let pool = self.pool()?;
        let pool = &pool;
        let table = self.table();
        let now = now_micros();
        let mut after: Option<String> = None;
        let mut hits = Vec::new();

        loop {
            let cursor = after.as_deref();
            let rows = self
                .call("warm text search", || async move {
                    let mut qb = QueryBuilder::<Sqlite>::new(format!(
                        "SELECT key, document, access_count, accessed_at, searchable_text FROM {table} WHERE (expires_at IS NULL OR expires_at > "
                    ));
                    qb.push_bind(now).push(")");
                    if let Some(cursor) = cursor {
                        qb.push(" AND key > ").push_bind(cursor.to_string());
                    }
                    filter.push_sqlite_conditions(&mut qb);
                    qb.push(" ORDER BY key LIMIT ").push_bind(SEARCH_PAGE_SIZE);
                    qb.build().fetch_all(pool).await
                })
                .await?;

            for row in &rows {
                let searchable: String = row
                    .try_get("searchable_text")
                    .map_err(|e| map_sqlx_error("warm text search", e))?;
                let score = text_match_score(&searchable, text);
                if score > 0 {
                    hits.push(SearchHit {
                        entry: decode_row(row)?,
                        score: score as f32,
                    });
                }
            }

            if (rows.len() as i64) < SEARCH_PAGE_SIZE {
                break;
            }
            after = rows
                .last()
                .map(|row| row.try_get::<String, _>("key"))
                .transpose()
                .map_err(|e| map_sqlx_error("warm text search", e))?;
        }

        Ok(rank_hits(hits, limit))
    }
}

struct WarmAccessSink {
    pool: SqlitePool,
    table: String,
    timeout: Duration,
}

#[async_trait]
impl AccessSink for WarmAccessSink {
    async fn record_access(&self, entry: &MemoryEntry) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET access_count = access_count + 1, accessed_at = MAX(accessed_at, ?1) WHERE key = ?2",
            self.table
        );
        let update = sqlx::query(&sql)
            .bind(entry.metadata.accessed_at.timestamp_micros())
            .bind(&entry.key)
            .execute(&self.pool);
        match tokio::time::timeout(self.timeout, update).await {
            Ok(result) => result
                .map(|_| ())
                .map_err(|e| map_sqlx_error("warm access update", e)),
            Err(_) => Err(StrataError::timeout("warm access update", self.timeout)),
        }
    }
}

#[async_trait]
impl Lifecycle for WarmTier {
    async fn initialize(&self) -> Result<()> {
        if self.ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = self.init_lock.lock().await;
        if self.ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        if !valid_table_name(self.table()) {
            return Err(StrataError::Config(format!(
                "Invalid warm collection name: {:?}",
                self.table()
            )));
        }

        let pool = self.connect().await?;
        self.create_schema(&pool).await?;

        self.recorder.start_with(|| {
            AccessRecorder::spawn(
                "warm",
                Arc::new(WarmAccessSink {
                    pool: pool.clone(),
                    table: self.config.collection.clone(),
                    timeout: self.config.request_timeout(),
                }),
                self.config.access_queue,
            )
        });

        *self
            .pool
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(pool);
        self.ready.store(true, Ordering::SeqCst);
        tracing::info!("Warm tier ready (collection {})", self.table());
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.ready.store(false, Ordering::SeqCst);
        self.recorder.stop().await;
        let pool = self
            .pool
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(pool) = pool {
            pool.close().await;
        }
        tracing::info!("Warm tier shut down");
        Ok(())
    }
}

#[async_trait]
impl TierBackend for WarmTier {
    fn tier(&self) -> StorageTier {
        StorageTier::Warm
    }

    async fn save(&self, entry: &MemoryEntry) -> Result<bool> {
        self.pool()?;
        if entry.is_expired() {
            tracing::debug!("Refusing to save expired entry {}", entry.key);
            return Ok(false);
        }
        let row = WarmRow::from_entry(entry)?;
        self.write_rows(std::slice::from_ref(&row)).await?;
        tracing::debug!("Saved {} to warm tier", entry.key);
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<MemoryEntry>> {
        match self.fetch(key).await? {
            Some(mut entry) => {
                self.counters.hit();
                entry.mark_accessed();
                self.recorder.record(entry.clone()).await;
                Ok(Some(entry))
            }
            None => {
                self.counters.miss();
                Ok(None)
            }
        }
    }

    async fn peek(&self, key: &str) -> Result<Option<MemoryEntry>> {
        self.fetch(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed = self.delete_key(key).await?;
        if removed {
            self.counters.deleted(1);
        }
        Ok(removed)
    }

    async fn search(
        &self,
        query: &SearchQuery,
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        self.pool()?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        match query {
            SearchQuery::FilterOnly => self.search_filtered(limit, filter).await,
            SearchQuery::Text(text) if text.trim().is_empty() => {
                self.search_filtered(limit, filter).await
            }
            SearchQuery::Text(text) => self.search_text(text, limit, filter).await,
            SearchQuery::Vector(_) => Err(query.unsupported(StorageTier::Warm)),
        }
    }

    fn list_keys<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<String>> {
        stream::unfold(Some(None::<String>), move |state| async move {
            let after = state?;
            match self.list_page(prefix, after.as_deref()).await {
                Ok(keys) => {
                    let full_page = keys.len() as i64 == LIST_PAGE_SIZE;
                    let total = keys.len();
                    let matching: Vec<String> =
                        keys.into_iter().take_while(|k| k.starts_with(prefix)).collect();
                    let next = (full_page && matching.len() == total)
                        .then(|| matching.last().cloned())
                        .flatten()
                        .map(Some);
                    Some((Ok(matching), next))
                }
                Err(e) => Some((Err(e), None)),
            }
        })
        .map_ok(|keys| stream::iter(keys.into_iter().map(Ok)))
        .try_flatten()
        .boxed()
    }

    async fn batch_save(&self, entries: &[MemoryEntry]) -> Result<HashMap<String, bool>> {
        self.pool()?;
        let mut results = HashMap::with_capacity(entries.len());

        for chunk in entries.chunks(self.config.batch_limit.max(1)) {
            let mut rows = Vec::with_capacity(chunk.len());
            for entry in chunk {
                if entry.is_expired() {
                    results.insert(entry.key.clone(), false);
                    continue;
                }
                match WarmRow::from_entry(entry) {
                    Ok(row) => rows.push(row),
                    Err(e) => {
                        tracing::warn!("Failed to encode {}: {}", entry.key, e);
                        results.insert(entry.key.clone(), false);
                    }
                }
            }

            let ok = match self.write_rows(&rows).await {
                Ok(()) => true,
                Err(e) => {
                    self.counters.error();
                    tracing::warn!("Warm batch of {} entries failed: {}", rows.len(), e);
                    false
                }
            };
            for row in rows {
                results.insert(row.key, ok);
            }
        }

        tracing::debug!("Warm batch_save of {} entries", entries.len());
        Ok(results)
    }

    async fn batch_get(&self, keys: &[String]) -> Result<HashMap<String, Option<MemoryEntry>>> {
        let pool = self.pool()?;
        let pool = &pool;
        let table = self.table();
        let mut results: HashMap<String, Option<MemoryEntry>> =
            keys.iter().map(|k| (k.clone(), None)).collect();

        for chunk in keys.chunks(self.config.batch_limit.max(1)) {
            let rows = self
                .call("warm batch get", || async move {
                    let mut qb = QueryBuilder::<Sqlite>::new(format!(
                        "SELECT key, document, access_count, accessed_at FROM {table} WHERE key IN ("
                    ));
                    let mut separated = qb.separated(", ");
                    for key in chunk {
                        separated.push_bind(key.clone());
                    }
                    separated.push_unseparated(")");
                    qb.build().fetch_all(pool).await
                })
                .await;

            let rows = match rows {
                Ok(rows) => rows,
                Err(e) => {
                    self.counters.error();
                    tracing::warn!("Warm batch read of {} keys failed: {}", chunk.len(), e);
                    continue;
                }
            };

            for row in &rows {
                let mut entry = match decode_row(row) {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!("Failed to decode warm row: {}", e);
                        continue;
                    }
                };
                if entry.is_expired() {
                    self.counters.expired(1);
                    if let Err(e) = self.delete_key(&entry.key).await {
                        tracing::warn!("Failed to delete expired warm entry {}: {}", entry.key, e);
                    }
                    continue;
                }
                entry.mark_accessed();
                self.recorder.record(entry.clone()).await;
                results.insert(entry.key.clone(), Some(entry));
            }
        }

        for value in results.values() {
            if value.is_some() {
                self.counters.hit();
            } else {
                self.counters.miss();
            }
        }
        Ok(results)
    }

    async fn clear(&self, prefix: &str) -> Result<u64> {
        let pool = self.pool()?;
        let pool = &pool;
        let sql = format!(
            "DELETE FROM {} WHERE substr(key, 1, length(?1)) = ?1",
            self.table()
        );
        let sql = sql.as_str();
        let result = self
            .call("warm clear", || async move {
                sqlx::query(sql).bind(prefix).execute(pool).await
            })
            .await?;
        let removed = result.rows_affected();
        self.counters.deleted(removed);
        tracing::info!("Cleared {} warm entries with prefix {:?}", removed, prefix);
        Ok(removed)
    }

    async fn stats(&self) -> Result<TierStats> {
        let mut counters = self.counters.snapshot();
        counters.extend(self.recorder.counters());

        let Ok(pool) = self.pool() else {
            return Ok(TierStats {
                tier: StorageTier::Warm,
                status: TierStatus::NotInitialized,
                entries: None,
                counters,
            });
        };
        let pool = &pool;
        let sql = format!("SELECT COUNT(*) AS n FROM {}", self.table());
        let sql = sql.as_str();
        let row = self
            .call("warm count", || async move {
                sqlx::query(sql).fetch_one(pool).await
            })
            .await?;
        let count: i64 = row
            .try_get("n")
            .map_err(|e| map_sqlx_error("warm count", e))?;
        counters.insert("pool_size".to_string(), u64::from(pool.size()));

        Ok(TierStats {
            tier: StorageTier::Warm,
            status: TierStatus::Ready,
            entries: Some(u64::try_from(count).unwrap_or(0)),
            counters,
        })
    }

    async fn health_check(&self) -> HealthReport {
        let Ok(pool) = self.pool() else {
            return HealthReport::unhealthy(
                TierStatus::NotInitialized,
                Duration::ZERO,
                "warm tier is not initialized",
            );
        };
        let start = Instant::now();
        let ping = sqlx::query("SELECT 1").execute(&pool);
        match tokio::time::timeout(self.config.request_timeout(), ping).await {
            Ok(Ok(_)) => HealthReport::healthy(TierStatus::Ready, start.elapsed()),
            Ok(Err(e)) => {
                HealthReport::unhealthy(TierStatus::Ready, start.elapsed(), e.to_string())
            }
            Err(_) => HealthReport::unhealthy(
                TierStatus::Ready,
                start.elapsed(),
                "health check timed out",
            ),
        }
    }
}

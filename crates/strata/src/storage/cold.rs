//! Cold tier: LanceDB vector table
//!
//! Entries are rows keyed by `key` with a fixed-dimension embedding column.
//! Similarity search runs a cosine nearest-neighbour query with the search
//! filter pushed down as a SQL predicate. [`StubColdTier`] is the declared
//! no-op variant for deployments without a vector store.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use arrow_array::types::Float32Type;
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{DistanceType, Table};

use crate::config::ColdConfig;
use crate::embedding::Embedder;
use crate::error::{Result, StrataError};
use crate::memory::{MemoryEntry, StorageTier};
use crate::storage::access::{AccessRecorder, AccessSink, RecorderSlot};
use crate::storage::filter::{SearchFilter, encode_tag_column, escape_sql_literal};
use crate::storage::retry::RetryPolicy;
use crate::storage::{
    HealthReport, Lifecycle, SearchHit, SearchQuery, TierBackend, TierCounters, TierStats,
    TierStatus, not_initialized,
};

const WRITE_CHUNK: usize = 256;
const LIST_PAGE_SIZE: usize = 256;

fn storage_error(context: &str, e: impl std::fmt::Display) -> StrataError {
    StrataError::Storage(format!("{context}: {e}"))
}

fn key_predicate(key: &str) -> String {
    format!("key = '{}'", escape_sql_literal(key))
}

fn keys_predicate(keys: &[String]) -> String {
    let list = keys
        .iter()
        .map(|k| format!("'{}'", escape_sql_literal(k)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("key IN ({list})")
}

fn live_predicate(now_micros: i64) -> String {
    format!("(expires_at IS NULL OR expires_at > {now_micros})")
}

fn cold_schema(vector_dim: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("document", DataType::Utf8, false),
        Field::new(
            "embedding",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                vector_dim as i32,
            ),
            false,
        ),
        Field::new("tags", DataType::Utf8, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("access_count", DataType::Int64, false),
        Field::new("accessed_at", DataType::Int64, false),
        Field::new("expires_at", DataType::Int64, true),
    ]))
}

/// Column values for one entry.
struct ColdRow {
    key: String,
    document: String,
    embedding: Vec<f32>,
    tags: String,
    source: String,
    access_count: i64,
    accessed_at: i64,
    expires_at: Option<i64>,
}

impl ColdRow {
    fn new(entry: &MemoryEntry, embedding: Vec<f32>) -> Result<Self> {
        let mut stored = entry.clone();
        stored.metadata.tier = StorageTier::Cold;
        // The vector lives in its own column
        stored.embedding = None;
        let meta = &stored.metadata;
        Ok(Self {
            key: stored.key.clone(),
            document: serde_json::to_string(&stored)?,
            embedding,
            tags: encode_tag_column(&meta.tags),
            source: meta.source.clone(),
            access_count: i64::try_from(meta.access_count).unwrap_or(i64::MAX),
            accessed_at: meta.accessed_at.timestamp_micros(),
            expires_at: meta.expires_at().map(|at| at.timestamp_micros()),
        })
    }
}

fn rows_to_batch(rows: &[ColdRow], schema: Arc<Schema>, vector_dim: usize) -> Result<RecordBatch> {
    let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
    let documents: Vec<&str> = rows.iter().map(|r| r.document.as_str()).collect();
    let embeddings: Vec<Option<Vec<Option<f32>>>> = rows
        .iter()
        .map(|r| Some(r.embedding.iter().copied().map(Some).collect()))
        .collect();
    let tags: Vec<&str> = rows.iter().map(|r| r.tags.as_str()).collect();
    let sources: Vec<&str> = rows.iter().map(|r| r.source.as_str()).collect();
    let access_counts: Vec<i64> = rows.iter().map(|r| r.access_count).collect();
    let accessed_at: Vec<i64> = rows.iter().map(|r| r.accessed_at).collect();
    let expires_at: Vec<Option<i64>> = rows.iter().map(|r| r.expires_at).collect();

    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(keys)),
            Arc::new(StringArray::from(documents)),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
                embeddings,
                vector_dim as i32,
            )),
            Arc::new(StringArray::from(tags)),
            Arc::new(StringArray::from(sources)),
            Arc::new(Int64Array::from(access_counts)),
            Arc::new(Int64Array::from(accessed_at)),
            Arc::new(Int64Array::from(expires_at)),
        ],
    )
    .map_err(|e| storage_error("Failed to create RecordBatch", e))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| StrataError::SerializationFailure(format!("Missing column {name}")))
}

fn int_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| StrataError::SerializationFailure(format!("Missing column {name}")))
}

/// Rebuild the entry stored at `row`. Column values for access tracking and
/// the embedding override the document.
fn batch_to_entry(batch: &RecordBatch, row: usize) -> Result<MemoryEntry> {
    let documents = string_column(batch, "document")?;
    let access_counts = int_column(batch, "access_count")?;
    let accessed_at = int_column(batch, "accessed_at")?;

    let mut entry: MemoryEntry = serde_json::from_str(documents.value(row))?;
    entry.metadata.access_count = u64::try_from(access_counts.value(row)).unwrap_or(0);
    if let Some(at) = DateTime::from_timestamp_micros(accessed_at.value(row)) {
        entry.metadata.accessed_at = at;
    }

    if let Some(list) = batch
        .column_by_name("embedding")
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
    {
        let values = list.value(row);
        if let Some(floats) = values.as_any().downcast_ref::<Float32Array>() {
            entry.embedding = Some(floats.values().to_vec());
        }
    }
    Ok(entry)
}

fn batches_to_entries(batches: &[RecordBatch]) -> Result<Vec<MemoryEntry>> {
    let mut entries = Vec::new();
    for batch in batches {
        for row in 0..batch.num_rows() {
            entries.push(batch_to_entry(batch, row)?);
        }
    }
    Ok(entries)
}

/// Cold tier over a LanceDB table.
pub struct ColdTier {
    config: ColdConfig,
    retry: RetryPolicy,
    embedder: Option<Arc<dyn Embedder>>,
    table: RwLock<Option<Table>>,
    ready: AtomicBool,
    init_lock: tokio::sync::Mutex<()>,
    recorder: RecorderSlot,
    counters: TierCounters,
}

impl ColdTier {
    pub fn new(config: ColdConfig, retry: RetryPolicy) -> Self {
        Self {
            config,
            retry,
            embedder: None,
            table: RwLock::new(None),
            ready: AtomicBool::new(false),
            init_lock: tokio::sync::Mutex::new(()),
            recorder: RecorderSlot::default(),
            counters: TierCounters::default(),
        }
    }

    /// Embed text queries and entries saved without a vector.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    fn table(&self) -> Result<Table> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(not_initialized(StorageTier::Cold));
        }
        self.table
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(|| not_initialized(StorageTier::Cold))
    }

    /// Bound a backend call by the request timeout and retry transient errors.
    async fn call<T, F, Fut>(&self, op: &str, mut request: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = self.config.request_timeout();
        self.retry
            .run(op, || {
                let fut = request();
                async move {
                    tokio::time::timeout(timeout, fut)
                        .await
                        .map_err(|_| StrataError::timeout(op, timeout))?
                }
            })
            .await
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.vector_dim {
            return Err(StrataError::SerializationFailure(format!(
                "embedding has {} dimensions, cold tier expects {}",
                vector.len(),
                self.config.vector_dim
            )));
        }
        Ok(())
    }

    /// The entry's vector, computed with the embedder when absent.
    /// `None` when there is neither.
    async fn vector_for(&self, entry: &MemoryEntry) -> Result<Option<Vec<f32>>> {
        let vector = match (&entry.embedding, &self.embedder) {
            (Some(vector), _) => vector.clone(),
            (None, Some(embedder)) => embedder.embed(&entry.content_text()).await?,
            (None, None) => return Ok(None),
        };
        self.check_dimension(&vector)?;
        Ok(Some(vector))
    }

    async fn query_entries(
        &self,
        table: &Table,
        predicate: String,
        limit: Option<usize>,
    ) -> Result<Vec<MemoryEntry>> {
        let predicate = predicate.as_str();
        let batches: Vec<RecordBatch> = self
            .call("cold query", || async move {
                let mut query = table.query().only_if(predicate);
                if let Some(limit) = limit {
                    query = query.limit(limit);
                }
                let stream = query
                    .execute()
                    .await
                    .map_err(|e| storage_error("Failed to query cold tier", e))?;
                stream
                    .try_collect()
                    .await
                    .map_err(|e| storage_error("Failed to collect query results", e))
            })
            .await?;
        batches_to_entries(&batches)
    }

    async fn write_rows(&self, table: &Table, rows: &[ColdRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = rows.iter().map(|r| r.key.clone()).collect();
        let predicate = keys_predicate(&keys);
        let predicate = predicate.as_str();
        let schema = cold_schema(self.config.vector_dim);
        let batch = rows_to_batch(rows, schema.clone(), self.config.vector_dim)?;
        let batch = &batch;
        let schema = &schema;

        self.call("cold upsert", || async move {
            table
                .delete(predicate)
                .await
                .map_err(|e| storage_error("Failed to replace cold entries", e))?;
            let batches = RecordBatchIterator::new(vec![Ok(batch.clone())], schema.clone());
            table
                .add(Box::new(batches))
                .execute()
                .await
                .map_err(|e| storage_error("Failed to insert cold entries", e))?;
            Ok(())
        })
        .await?;

        self.counters.wrote(rows.len() as u64);
        Ok(())
    }

    async fn delete_where(&self, table: &Table, predicate: &str) -> Result<()> {
        self.call("cold delete", || async move {
            table
                .delete(predicate)
                .await
                .map(|_| ())
                .map_err(|e| storage_error("Failed to delete cold entries", e))
        })
        .await
    }

    async fn fetch(&self, key: &str) -> Result<Option<MemoryEntry>> {
        let table = self.table()?;
        let entry = self
            .query_entries(&table, key_predicate(key), Some(1))
            .await?
            .into_iter()
            .next();
        match entry {
            Some(entry) if entry.is_expired() => {
                tracing::debug!("Cold entry {} expired, deleting", key);
                self.counters.expired(1);
                if let Err(e) = self.delete_where(&table, &key_predicate(key)).await {
                    tracing::warn!("Failed to delete expired cold entry {}: {}", key, e);
                }
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn vector_search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        self.check_dimension(vector)?;
        let table = self.table()?;
        let table = &table;
        let mut predicate = live_predicate(Utc::now().timestamp_micros());
        if let Some(clause) = filter.to_lance_clause() {
            predicate = format!("{predicate} AND {clause}");
        }
        let predicate = predicate.as_str();

        let batches: Vec<RecordBatch> = self
            .call("cold vector search", || async move {
                let stream = table
                    .query()
                    .nearest_to(vector)
                    .map_err(|e| storage_error("Failed to create vector query", e))?
                    .distance_type(DistanceType::Cosine)
                    .only_if(predicate)
                    .limit(limit)
                    .execute()
                    .await
                    .map_err(|e| storage_error("Failed to execute search", e))?;
                stream
                    .try_collect()
                    .await
                    .map_err(|e| storage_error("Failed to collect search results", e))
            })
            .await?;

        let mut hits = Vec::new();
        for batch in &batches {
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>());
            for row in 0..batch.num_rows() {
                let entry = batch_to_entry(batch, row)?;
                if !filter.matches(&entry) {
                    continue;
                }
                let distance = distances.map(|d| d.value(row)).unwrap_or(1.0);
                hits.push(SearchHit {
                    entry,
                    score: 1.0 - distance,
                });
            }
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(hits)
    }

    async fn list_page(&self, table: &Table, prefix: &str, offset: usize) -> Result<Vec<String>> {
        let mut predicate = live_predicate(Utc::now().timestamp_micros());
        if !prefix.is_empty() && !prefix.contains(['%', '_']) {
            predicate = format!("{predicate} AND key LIKE '{}%'", escape_sql_literal(prefix));
        }
        let predicate = predicate.as_str();

        let batches: Vec<RecordBatch> = self
            .call("cold list keys", || async move {
                let stream = table
                    .query()
                    .only_if(predicate)
                    .select(Select::Columns(vec!["key".to_string()]))
                    .limit(LIST_PAGE_SIZE)
                    .offset(offset)
                    .execute()
                    .await
                    .map_err(|e| storage_error("Failed to list cold keys", e))?;
                stream
                    .try_collect()
                    .await
                    .map_err(|e| storage_error("Failed to collect cold keys", e))
            })
            .await?;

        let mut keys = Vec::new();
        for batch in &batches {
            let column = string_column(batch, "key")?;
            for row in 0..batch.num_rows() {
                keys.push(column.value(row).to_string());
            }
        }
        Ok(keys)
    }
}

struct ColdAccessSink {
    table: Table,
    timeout: Duration,
}

#[async_trait]
impl AccessSink for ColdAccessSink {
    async fn record_access(&self, entry: &MemoryEntry) -> Result<()> {
        let accessed_at = entry.metadata.accessed_at.timestamp_micros();
        let update = self
            .table
            .update()
            .only_if(key_predicate(&entry.key))
            .column("access_count", "access_count + 1")
            .column("accessed_at", format!("{accessed_at}"))
            .execute();
        match tokio::time::timeout(self.timeout, update).await {
            Ok(result) => result
                .map(|_| ())
                .map_err(|e| storage_error("Failed to update cold access", e)),
            Err(_) => Err(StrataError::timeout("cold access update", self.timeout)),
        }
    }
}

#[async_trait]
impl Lifecycle for ColdTier {
    async fn initialize(&self) -> Result<()> {
        if self.ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = self.init_lock.lock().await;
        if self.ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(ref embedder) = self.embedder {
            if embedder.dimension() != self.config.vector_dim {
                return Err(StrataError::Config(format!(
                    "embedder produces {} dimensions, cold.vector_dim is {}",
                    embedder.dimension(),
                    self.config.vector_dim
                )));
            }
        }

        tokio::fs::create_dir_all(&self.config.data_dir).await?;
        let uri = self
            .config
            .data_dir
            .to_str()
            .ok_or_else(|| StrataError::Config("Invalid cold data_dir encoding".to_string()))?;

        let connection = lancedb::connect(uri)
            .execute()
            .await
            .map_err(|e| {
                StrataError::ConnectionFailure(format!("Failed to connect to LanceDB: {e}"))
            })?;

        let names = connection
            .table_names()
            .execute()
            .await
            .map_err(|e| storage_error("Failed to list tables", e))?;

        let table = if names.contains(&self.config.table) {
            connection
                .open_table(&self.config.table)
                .execute()
                .await
                .map_err(|e| storage_error("Failed to open cold table", e))?
        } else {
            let schema = cold_schema(self.config.vector_dim);
            let batch = rows_to_batch(&[], schema.clone(), self.config.vector_dim)?;
            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
            connection
                .create_table(&self.config.table, Box::new(batches))
                .execute()
                .await
                .map_err(|e| storage_error("Failed to create cold table", e))?
        };

        self.recorder.start_with(|| {
            AccessRecorder::spawn(
                "cold",
                Arc::new(ColdAccessSink {
                    table: table.clone(),
                    timeout: self.config.request_timeout(),
                }),
                self.config.access_queue,
            )
        });

        *self
            .table
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(table);
        self.ready.store(true, Ordering::SeqCst);
        tracing::info!(
            "Cold tier ready at {} (table {}, {} dims)",
            self.config.data_dir.display(),
            self.config.table,
            self.config.vector_dim
        );
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.ready.store(false, Ordering::SeqCst);
        self.recorder.stop().await;
        self.table
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        tracing::info!("Cold tier shut down");
        Ok(())
    }
}

#[async_trait]
impl TierBackend for ColdTier {
    fn tier(&self) -> StorageTier {
        StorageTier::Cold
    }

    async fn save(&self, entry: &MemoryEntry) -> Result<bool> {
        let table = self.table()?;
        if entry.is_expired() {
            tracing::debug!("Refusing to save expired entry {}", entry.key);
            return Ok(false);
        }
        let Some(vector) = self.vector_for(entry).await? else {
            tracing::warn!("Cold tier refused {}: no embedding and no embedder", entry.key);
            return Ok(false);
        };
        let row = ColdRow::new(entry, vector)?;
        self.write_rows(&table, std::slice::from_ref(&row)).await?;
        tracing::debug!("Saved {} to cold tier", entry.key);
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
        let table = self.table()?;
        let table_ref = &table;
        let predicate = key_predicate(key);
        let filter = predicate.clone();
        let filter = &filter;
        let existing = self
            .call("cold count", || async move {
                table_ref
                    .count_rows(Some(filter.clone()))
                    .await
                    .map_err(|e| storage_error("Failed to count cold entries", e))
            })
            .await?;
        if existing == 0 {
            return Ok(false);
        }
        self.delete_where(&table, &predicate).await?;
        self.counters.deleted(1);
        Ok(true)
    }

    async fn search(
        &self,
        query: &SearchQuery,
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        let table = self.table()?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        match query {
            SearchQuery::Vector(vector) => self.vector_search(vector, limit, filter).await,
            SearchQuery::Text(text) => match self.embedder {
                Some(ref embedder) => {
                    let vector = embedder.embed(text).await?;
                    self.vector_search(&vector, limit, filter).await
                }
                None => Err(query.unsupported(StorageTier::Cold)),
            },
            SearchQuery::FilterOnly => {
                let mut predicate = live_predicate(Utc::now().timestamp_micros());
                if let Some(clause) = filter.to_lance_clause() {
                    predicate = format!("{predicate} AND {clause}");
                }
                let entries = self.query_entries(&table, predicate, Some(limit)).await?;
                Ok(entries
                    .into_iter()
                    .filter(|e| filter.matches(e))
                    .map(|entry| SearchHit { entry, score: 1.0 })
                    .collect())
            }
        }
    }

    fn list_keys<'a>(&'a self, prefix: &'a str) -> BoxStream<'a, Result<String>> {
        let table = match self.table() {
            Ok(table) => table,
            Err(e) => return stream::once(async move { Err(e) }).boxed(),
        };
        stream::unfold(Some(0usize), move |offset| {
            let table = table.clone();
            async move {
                let offset = offset?;
                match self.list_page(&table, prefix, offset).await {
                    Ok(keys) => {
                        let next = (keys.len() == LIST_PAGE_SIZE).then_some(offset + keys.len());
                        let matching: Vec<String> =
                            keys.into_iter().filter(|k| k.starts_with(prefix)).collect();
                        Some((Ok(matching), next))
                    }
                    Err(e) => Some((Err(e), None)),
                }
            }
        })
        .map_ok(|keys| stream::iter(keys.into_iter().map(Ok)))
        .try_flatten()
        .boxed()
    }

    async fn batch_save(&self, entries: &[MemoryEntry]) -> Result<HashMap<String, bool>> {
        let table = self.table()?;
        let mut results = HashMap::with_capacity(entries.len());

        for chunk in entries.chunks(WRITE_CHUNK) {
            let mut rows = Vec::with_capacity(chunk.len());
            for entry in chunk {
                if entry.is_expired() {
                    results.insert(entry.key.clone(), false);
                    continue;
                }
                let row = match self.vector_for(entry).await {
                    Ok(Some(vector)) => ColdRow::new(entry, vector),
                    Ok(None) => Err(StrataError::DegradedCapability(
                        "no embedding and no embedder".to_string(),
                    )),
                    Err(e) => Err(e),
                };
                match row {
                    Ok(row) => rows.push(row),
                    Err(e) => {
                        tracing::warn!("Cold tier refused {}: {}", entry.key, e);
                        results.insert(entry.key.clone(), false);
                    }
                }
            }

            let ok = match self.write_rows(&table, &rows).await {
                Ok(()) => true,
                Err(e) => {
                    self.counters.error();
                    tracing::warn!("Cold batch of {} entries failed: {}", rows.len(), e);
                    false
                }
            };
            for row in rows {
                results.insert(row.key, ok);
            }
        }
        Ok(results)
    }

    async fn batch_get(&self, keys: &[String]) -> Result<HashMap<String, Option<MemoryEntry>>> {
        let table = self.table()?;
        let mut results: HashMap<String, Option<MemoryEntry>> =
            keys.iter().map(|k| (k.clone(), None)).collect();
        let now = Utc::now().timestamp_micros();

        for chunk in keys.chunks(WRITE_CHUNK) {
            let predicate = format!("{} AND {}", keys_predicate(chunk), live_predicate(now));
            match self.query_entries(&table, predicate, None).await {
                Ok(entries) => {
                    for mut entry in entries {
                        entry.mark_accessed();
                        self.recorder.record(entry.clone()).await;
                        results.insert(entry.key.clone(), Some(entry));
                    }
                }
                Err(e) => {
                    self.counters.error();
                    tracing::warn!("Cold batch read of {} keys failed: {}", chunk.len(), e);
                }
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
        let table = self.table()?;
        let keys: Vec<String> = self.list_keys(prefix).try_collect().await?;
        for chunk in keys.chunks(WRITE_CHUNK) {
            self.delete_where(&table, &keys_predicate(chunk)).await?;
        }
        let removed = keys.len() as u64;
        self.counters.deleted(removed);
        tracing::info!("Cleared {} cold entries with prefix {:?}", removed, prefix);
        Ok(removed)
    }

    async fn stats(&self) -> Result<TierStats> {
        let mut counters = self.counters.snapshot();
        counters.extend(self.recorder.counters());

        let Ok(table) = self.table() else {
            return Ok(TierStats {
                tier: StorageTier::Cold,
                status: TierStatus::NotInitialized,
                entries: None,
                counters,
            });
        };
        let table = &table;
        let count = self
            .call("cold count", || async move {
                table
                    .count_rows(None)
                    .await
                    .map_err(|e| storage_error("Failed to count cold entries", e))
            })
            .await?;
        counters.insert("vector_dim".to_string(), self.config.vector_dim as u64);

        Ok(TierStats {
            tier: StorageTier::Cold,
            status: TierStatus::Ready,
            entries: Some(count as u64),
            counters,
        })
    }

    async fn health_check(&self) -> HealthReport {
        let Ok(table) = self.table() else {
            return HealthReport::unhealthy(
                TierStatus::NotInitialized,
                Duration::ZERO,
                "cold tier is not initialized",
            );
        };
        let start = Instant::now();
        match tokio::time::timeout(self.config.request_timeout(), table.count_rows(None)).await {
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

/// Declared no-op cold tier.
///
/// Writes report success and are discarded, reads find nothing and stats
/// report `not_implemented`. Callers must check [`TierBackend::is_stub`]
/// before relying on this tier.
#[derive(Debug, Default)]
pub struct StubColdTier;

impl StubColdTier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Lifecycle for StubColdTier {
    async fn initialize(&self) -> Result<()> {
        tracing::warn!("Cold tier is a stub: writes are discarded and reads return nothing");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl TierBackend for StubColdTier {
    fn tier(&self) -> StorageTier {
        StorageTier::Cold
    }

    fn is_stub(&self) -> bool {
        true
    }

    async fn save(&self, _entry: &MemoryEntry) -> Result<bool> {
        Ok(true)
    }

    async fn get(&self, _key: &str) -> Result<Option<MemoryEntry>> {
        Ok(None)
    }

    async fn peek(&self, _key: &str) -> Result<Option<MemoryEntry>> {
        Ok(None)
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }

    async fn search(
        &self,
        _query: &SearchQuery,
        _limit: usize,
        _filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        Ok(Vec::new())
    }

    fn list_keys<'a>(&'a self, _prefix: &'a str) -> BoxStream<'a, Result<String>> {
        stream::empty().boxed()
    }

    async fn batch_save(&self, entries: &[MemoryEntry]) -> Result<HashMap<String, bool>> {
        Ok(entries.iter().map(|e| (e.key.clone(), true)).collect())
    }

    async fn batch_get(&self, keys: &[String]) -> Result<HashMap<String, Option<MemoryEntry>>> {
        Ok(keys.iter().map(|k| (k.clone(), None)).collect())
    }

    async fn clear(&self, _prefix: &str) -> Result<u64> {
        Ok(0)
    }

    async fn stats(&self) -> Result<TierStats> {
        Ok(TierStats {
            tier: StorageTier::Cold,
            status: TierStatus::NotImplemented,
            entries: None,
            counters: Default::default(),
        })
    }

    async fn health_check(&self) -> HealthReport {
        HealthReport::healthy(TierStatus::NotImplemented, Duration::ZERO)
    }
}

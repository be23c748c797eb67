//! Integration tests for the semantic cache
//!
//! Uses scripted mock embeddings so similarities are exact.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use strata::cache::{KvL2Backend, SemanticCache, TieredCache};
use strata::config::{L1Config, L2Config, SemanticConfig};
use strata::storage::{KvPool, MemoryKv, PoolConfig};
use strata::testing::{MockEmbedder, unit_vector, vector_with_similarity};

const DIM: usize = 8;

fn create_semantic_cache(
    server: &MemoryKv,
    max_cache_size: usize,
) -> (SemanticCache, Arc<MockEmbedder>) {
    let pool = Arc::new(KvPool::new(server.connector(None), PoolConfig::default()));
    let tiered = Arc::new(TieredCache::new(
        &L1Config::default(),
        &L2Config::default(),
        Arc::new(KvL2Backend::new(pool, "semantic-test")),
    ));
    let embedder = Arc::new(MockEmbedder::new(DIM));
    let cache = SemanticCache::new(
        tiered,
        embedder.clone(),
        SemanticConfig {
            similarity_threshold: 0.85,
            max_cache_size,
            default_ttl: 0,
        },
    );
    (cache, embedder)
}

#[tokio::test]
async fn test_similar_query_hits_dissimilar_misses() {
    let server = MemoryKv::new();
    let (cache, embedder) = create_semantic_cache(&server, 100);
    embedder.script("What is Rust?", unit_vector(DIM, 0));
    embedder.script("what's rust", vector_with_similarity(DIM, 0.9));
    embedder.script("weather today", vector_with_similarity(DIM, 0.5));

    cache
        .set("What is Rust?", json!("A systems language"), None)
        .await
        .unwrap();

    let hit = cache.get("what's rust").await.expect("similar query should hit");
    assert_eq!(hit.value, json!("A systems language"));
    assert_eq!(hit.matched_query, "What is Rust?");
    assert!((hit.similarity - 0.9).abs() < 1e-4);

    assert!(cache.get("weather today").await.is_none());

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.table_size, 1);
}

#[tokio::test]
async fn test_threshold_is_inclusive() {
    let server = MemoryKv::new();
    let (cache, embedder) = create_semantic_cache(&server, 100);
    embedder.script("base", unit_vector(DIM, 0));
    embedder.script("edge", vector_with_similarity(DIM, 0.86));
    embedder.script("below", vector_with_similarity(DIM, 0.84));

    cache.set("base", json!(1), None).await.unwrap();
    assert!(cache.get("edge").await.is_some());
    assert!(cache.get("below").await.is_none());
}

#[tokio::test]
async fn test_embedder_failure_degrades() {
    let server = MemoryKv::new();
    let (cache, embedder) = create_semantic_cache(&server, 100);
    embedder.set_failing(true);

    cache.set("question", json!("answer"), None).await.unwrap();
    assert!(cache.get("question").await.is_none());
    assert_eq!(cache.get_exact("question").await, Some(json!("answer")));
    assert!(cache.is_empty());
    assert_eq!(cache.stats().embed_errors, 2);
}

#[tokio::test]
async fn test_table_evicts_oldest_inserted() {
    let server = MemoryKv::new();
    let (cache, embedder) = create_semantic_cache(&server, 2);
    for (i, q) in ["q1", "q2", "q3"].iter().enumerate() {
        embedder.script(*q, unit_vector(DIM, i));
    }

    cache.set("q1", json!(1), None).await.unwrap();
    cache.set("q2", json!(2), None).await.unwrap();
    assert!(cache.get("q1").await.is_some());
    cache.set("q3", json!(3), None).await.unwrap();

    // q1 was used most recently but inserted first.
    assert!(cache.get("q1").await.is_none());
    assert!(cache.get("q2").await.is_some());
    assert!(cache.get("q3").await.is_some());
    assert_eq!(cache.get_exact("q1").await, Some(json!(1)));
    assert_eq!(cache.stats().evictions, 1);
}

#[tokio::test]
async fn test_invalidate() {
    let server = MemoryKv::new();
    let (cache, _embedder) = create_semantic_cache(&server, 100);
    cache.set("q", json!("a"), None).await.unwrap();

    assert!(cache.invalidate("q").await);
    assert!(!cache.invalidate("q").await);
    assert!(cache.get("q").await.is_none());
    assert!(cache.get_exact("q").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_expired_answers_leave_the_table() {
    let server = MemoryKv::new();
    let (cache, embedder) = create_semantic_cache(&server, 100);
    embedder.script("q", unit_vector(DIM, 0));

    cache.set("q", json!("a"), Some(5)).await.unwrap();
    assert_eq!(cache.len(), 1);

    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(cache.get("q").await.is_none());
    assert_eq!(cache.len(), 0);
}

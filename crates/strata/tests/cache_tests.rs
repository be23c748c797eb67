//! Integration tests for the two-level cache

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use strata::cache::{KvL2Backend, TieredCache};
use strata::config::{L1Config, L2Config};
use strata::storage::{KvPool, MemoryKv, PoolConfig, RetryPolicy};

fn create_cache(server: &MemoryKv, l1: L1Config) -> TieredCache {
    let pool = Arc::new(KvPool::new(
        server.connector(None),
        PoolConfig {
            retry: RetryPolicy::none(),
            ..PoolConfig::default()
        },
    ));
    TieredCache::new(
        &l1,
        &L2Config::default(),
        Arc::new(KvL2Backend::new(pool, "strata:l2")),
    )
}

#[tokio::test]
async fn test_set_then_clear() {
    let server = MemoryKv::new();
    let cache = create_cache(&server, L1Config::default());

    let outcome = cache
        .set("user:42", json!({"plan": "pro"}), Some(0), Some(0))
        .await
        .unwrap();
    assert!(outcome.is_complete());
    assert_eq!(cache.get("user:42").await, Some(json!({"plan": "pro"})));

    cache.clear().await.unwrap();
    assert!(cache.get("user:42").await.is_none());
}

#[tokio::test]
async fn test_l1_evicts_least_recently_used() {
    let server = MemoryKv::new();
    let cache = create_cache(
        &server,
        L1Config {
            max_size: 2,
            ..L1Config::default()
        },
    );

    for key in ["k1", "k2", "k3"] {
        cache.set(key, json!(key), None, None).await.unwrap();
    }
    assert_eq!(cache.get("k1").await, Some(json!("k1")));
    cache.set("k4", json!("k4"), None, None).await.unwrap();

    assert!(!cache.l1().contains("k2"));
    for key in ["k1", "k3", "k4"] {
        assert!(cache.l1().contains(key), "{key} should still be in L1");
    }

    // Evicted from L1 only; L2 still serves it and it is promoted back.
    assert_eq!(cache.get("k2").await, Some(json!("k2")));
    assert!(cache.l1().contains("k2"));
}

#[tokio::test]
async fn test_warm_up_reports_per_key() {
    let server = MemoryKv::new();
    let writer = create_cache(&server, L1Config::default());
    writer.set("a", json!(1), None, None).await.unwrap();
    writer.set("b", json!(2), None, None).await.unwrap();

    let reader = create_cache(&server, L1Config::default());
    let loaded = reader
        .warm_up(&["a".to_string(), "b".to_string(), "c".to_string()])
        .await;
    assert!(loaded["a"]);
    assert!(loaded["b"]);
    assert!(!loaded["c"]);
    assert!(reader.l1().contains("a"));
    assert!(!reader.l1().contains("c"));
}

#[tokio::test(start_paused = true)]
async fn test_ttls_apply_per_level() {
    let server = MemoryKv::new();
    let cache = create_cache(&server, L1Config::default());
    cache.set("k", json!("v"), Some(5), Some(60)).await.unwrap();

    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(!cache.l1().contains("k"));
    assert_eq!(cache.get("k").await, Some(json!("v")));

    tokio::time::advance(Duration::from_secs(400)).await;
    assert!(cache.get("k").await.is_none());
}

#[tokio::test]
async fn test_stats_and_hit_rate() {
    let server = MemoryKv::new();
    let cache = create_cache(&server, L1Config::default());
    cache.set("hit", json!(1), None, None).await.unwrap();

    cache.get("hit").await;
    cache.get("miss").await;

    let stats = cache.stats();
    assert_eq!(stats.l1_hits, 1);
    assert_eq!(stats.l1_misses, 1);
    assert_eq!(stats.l2_misses, 1);
    assert_eq!(stats.l2_errors, 0);
    assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
}

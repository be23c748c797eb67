//! Test utilities for strata - mock collaborators
//!
//! Everything here runs without models or external services so unit and
//! integration tests stay fast and deterministic.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;

use crate::embedding::Embedder;
use crate::error::{Result, StrataError};

/// Mock embedder for tests that don't need real ML.
///
/// Unscripted text gets a deterministic pseudo-random vector derived from its
/// hash. `script` pins exact vectors so tests can control similarity, and
/// `set_failing` makes every call fail.
#[derive(Debug)]
pub struct MockEmbedder {
    dimension: usize,
    scripted: Mutex<HashMap<String, Vec<f32>>>,
    failing: AtomicBool,
    calls: AtomicU64,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            scripted: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
            calls: AtomicU64::new(0),
        }
    }

    /// Return `vector` whenever `text` is embedded.
    pub fn script(&self, text: impl Into<String>, vector: Vec<f32>) {
        self.scripted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(text.into(), vector);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// The vector unscripted `text` maps to, in range [-1, 1].
    pub fn hashed(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let seed = hasher.finish();

        (0..self.dimension)
            .map(|i| {
                let x = seed
                    .wrapping_mul(i as u64 + 1)
                    .wrapping_add(0x9e3779b97f4a7c15);
                let normalized = (x as f32) / (u64::MAX as f32);
                (normalized * 2.0) - 1.0
            })
            .collect()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StrataError::Embedding("mock embedder is failing".to_string()));
        }
        let scripted = self
            .scripted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(text)
            .cloned();
        Ok(scripted.unwrap_or_else(|| self.hashed(text)))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Unit vector along `axis`, handy for scripting exact similarities.
pub fn unit_vector(dimension: usize, axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; dimension];
    if let Some(slot) = v.get_mut(axis) {
        *slot = 1.0;
    }
    v
}

/// Vector in the plane of axes 0 and 1 whose cosine similarity with
/// `unit_vector(dimension, 0)` is `similarity`.
pub fn vector_with_similarity(dimension: usize, similarity: f32) -> Vec<f32> {
    let mut v = vec![0.0; dimension];
    v[0] = similarity;
    if dimension > 1 {
        v[1] = (1.0 - similarity * similarity).max(0.0).sqrt();
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[tokio::test]
    async fn mock_embedding_is_deterministic() {
        let embedder = MockEmbedder::default();
        let a = embedder.embed("hello world").await.unwrap();
        let b = embedder.embed("hello world").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 384);
        assert!(a.iter().all(|v| (-1.0..=1.0).contains(v)));
        assert_eq!(embedder.calls(), 2);
    }

    #[tokio::test]
    async fn mock_embedding_honours_script_and_failure() {
        let embedder = MockEmbedder::new(4);
        embedder.script("pinned", unit_vector(4, 2));
        assert_eq!(embedder.embed("pinned").await.unwrap(), vec![0.0, 0.0, 1.0, 0.0]);

        embedder.set_failing(true);
        assert!(matches!(
            embedder.embed("pinned").await,
            Err(StrataError::Embedding(_))
        ));
    }

    #[test]
    fn scripted_similarity_is_exact() {
        let base = unit_vector(8, 0);
        let near = vector_with_similarity(8, 0.9);
        assert!((cosine_similarity(&base, &near) - 0.9).abs() < 1e-5);
    }
}

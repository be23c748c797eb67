//! Embedding collaborator
//!
//! The semantic cache and the cold tier only need `text -> Vec<f32>`; the
//! [`Embedder`] trait is that seam. [`LocalEmbedder`] runs a fastembed model
//! in-process on the blocking thread pool.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};

use crate::error::{Result, StrataError};

pub const EMBEDDING_DIMENSION: usize = 384;

/// Turns text into a fixed-dimension vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Length of every vector this embedder returns.
    fn dimension(&self) -> usize;
}

/// Cosine similarity in `[-1, 1]`. Mismatched, empty or zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// fastembed model (MultilingualE5Small, 384 dimensions).
pub struct LocalEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
}

impl LocalEmbedder {
    /// Load the model, downloading it on first use.
    pub fn new() -> Result<Self> {
        let model = TextEmbedding::try_new(InitOptions::new(FastEmbedModel::MultilingualE5Small))
            .map_err(|e| StrataError::Embedding(e.to_string()))?;
        tracing::info!("Loaded local embedding model ({} dims)", EMBEDDING_DIMENSION);
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
        })
    }

    /// Load the model on the blocking pool.
    pub async fn load() -> Result<Self> {
        tokio::task::spawn_blocking(Self::new)
            .await
            .map_err(|e| StrataError::Embedding(format!("model loader panicked: {e}")))?
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.model.clone();
        let text = text.to_string();
        let embeddings = tokio::task::spawn_blocking(move || {
            let mut model = model.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            model.embed(vec![text], None)
        })
        .await
        .map_err(|e| StrataError::Embedding(format!("embedding task panicked: {e}")))?
        .map_err(|e| StrataError::Embedding(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| StrataError::Embedding("No embedding returned".to_string()))
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_similarity_orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-5);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_similarity_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[cfg(feature = "ml-tests")]
    #[tokio::test]
    async fn test_local_embedder_dimension() {
        let embedder = LocalEmbedder::load().await.expect("Failed to load model");
        let vector = embedder.embed("Hello, world!").await.expect("Failed to embed");
        assert_eq!(vector.len(), EMBEDDING_DIMENSION);
    }
}

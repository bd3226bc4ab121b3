//! Embedding provider trait and cosine similarity.
//!
//! Embeddings are consumed by vector stores only; the query pipeline never
//! calls a provider directly. Concrete providers (OpenAI, Ollama, local
//! fastembed) live in the `sectioned-rag` app crate.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

/// Turns chunk and question text into vectors for a [`VectorStore`](crate::store::VectorStore).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Recorded next to every stored vector.
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    /// One vector per text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Vector for a question.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    provider
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("embedding provider returned no vector"))
}

/// Cosine of the angle between two vectors, in `[-1.0, 1.0]`.
///
/// Vectors of different lengths score `0.0`, as do empty and zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, na, nb), (x, y)| {
            (dot + x * y, na + x * x, nb + y * y)
        });
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

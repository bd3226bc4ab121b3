//! In-memory [`VectorStore`] implementation for tests and embedded use.
//!
//! Chunks live in a `Vec` behind `std::sync::RwLock`. Similarity is
//! brute-force cosine over stored vectors when an embedder is attached and
//! lexical term overlap otherwise. Locks are never held across an `.await`.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::{cosine_similarity, embed_query, EmbeddingProvider};
use crate::models::{Chunk, RetrievalCandidate};
use crate::scoring::lexical_overlap;

use super::{sort_by_score, SourceSummary, VectorStore};

struct StoredChunk {
    chunk: Chunk,
    vector: Option<Vec<f32>>,
}

/// In-memory vector store.
pub struct InMemoryVectorStore {
    chunks: RwLock<Vec<StoredChunk>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl InMemoryVectorStore {
    /// A store ranking by lexical overlap.
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            embedder: None,
        }
    }

    /// A store ranking by cosine similarity of `embedder` vectors.
    pub fn with_embedder(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            embedder: Some(embedder),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<StoredChunk>>> {
        self.chunks
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<StoredChunk>>> {
        self.chunks
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<RetrievalCandidate>> {
        let query_vec = match &self.embedder {
            Some(embedder) => Some(embed_query(embedder.as_ref(), query).await?),
            None => None,
        };

        let stored = self.read()?;
        let mut candidates: Vec<RetrievalCandidate> = stored
            .iter()
            .map(|sc| {
                let score = match (&query_vec, &sc.vector) {
                    (Some(q), Some(v)) => cosine_similarity(q, v),
                    (Some(_), None) => 0.0,
                    (None, _) => lexical_overlap(query, &sc.chunk.text),
                };
                RetrievalCandidate::new(sc.chunk.clone(), score)
            })
            .collect();
        drop(stored);

        sort_by_score(&mut candidates);
        candidates.truncate(k);
        Ok(candidates)
    }

    async fn contains_hash(&self, content_hash: &str) -> Result<bool> {
        Ok(self
            .read()?
            .iter()
            .any(|sc| sc.chunk.content_hash == content_hash))
    }

    async fn add(&self, chunks: &[Chunk]) -> Result<usize> {
        let vectors: Vec<Option<Vec<f32>>> = match &self.embedder {
            Some(embedder) if !chunks.is_empty() => {
                let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
                let vectors = embedder.embed(&texts).await?;
                if vectors.len() != chunks.len() {
                    anyhow::bail!(
                        "embedder returned {} vectors for {} chunks",
                        vectors.len(),
                        chunks.len()
                    );
                }
                vectors.into_iter().map(Some).collect()
            }
            _ => vec![None; chunks.len()],
        };

        let mut stored = self.write()?;
        let mut written = 0;
        for (chunk, vector) in chunks.iter().zip(vectors) {
            let exists = stored.iter().any(|sc| {
                sc.chunk.content_hash == chunk.content_hash
                    && sc.chunk.chunk_index == chunk.chunk_index
            });
            if exists {
                continue;
            }
            stored.push(StoredChunk {
                chunk: chunk.clone(),
                vector,
            });
            written += 1;
        }
        Ok(written)
    }

    async fn count_all(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    async fn delete_by_source(&self, workspace_id: &str, source: &str) -> Result<usize> {
        let mut stored = self.write()?;
        let before = stored.len();
        stored.retain(|sc| !(sc.chunk.workspace_id == workspace_id && sc.chunk.source == source));
        Ok(before - stored.len())
    }

    async fn delete_other_versions(
        &self,
        workspace_id: &str,
        source: &str,
        keep_hash: &str,
    ) -> Result<usize> {
        let mut stored = self.write()?;
        let before = stored.len();
        stored.retain(|sc| {
            let c = &sc.chunk;
            !(c.workspace_id == workspace_id && c.source == source && c.content_hash != keep_hash)
        });
        Ok(before - stored.len())
    }

    async fn sources(&self) -> Result<Vec<SourceSummary>> {
        let stored = self.read()?;
        let mut by_hash: BTreeMap<(String, String, String), SourceSummary> = BTreeMap::new();
        for sc in stored.iter() {
            let c = &sc.chunk;
            by_hash
                .entry((c.workspace_id.clone(), c.source.clone(), c.content_hash.clone()))
                .or_insert_with(|| SourceSummary {
                    source: c.source.clone(),
                    content_hash: c.content_hash.clone(),
                    workspace_id: c.workspace_id.clone(),
                    confidentiality: c.confidentiality,
                    chunk_count: 0,
                    indexed_at: None,
                })
                .chunk_count += 1;
        }
        Ok(by_hash.into_values().collect())
    }
}

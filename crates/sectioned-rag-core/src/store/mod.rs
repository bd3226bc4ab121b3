//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the only shared resource of the pipeline:
//! ingestion writes chunks through it and queries read them back. The core
//! does no locking or transactions of its own; each call is treated as
//! atomic and consistency under concurrent writers is the backend's job.
//!
//! Implementations must round-trip every [`Chunk`] field unmodified.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`similarity_search`](VectorStore::similarity_search) | Nearest chunks for a query text |
//! | [`contains_hash`](VectorStore::contains_hash) | Exact-match duplicate check on `content_hash` |
//! | [`add`](VectorStore::add) | Persist new chunks |
//! | [`count_all`](VectorStore::count_all) | Total chunk count, sizes the broad retrieval |
//! | [`delete_by_source`](VectorStore::delete_by_source) | Forget a document in one workspace |
//! | [`delete_other_versions`](VectorStore::delete_other_versions) | Tombstone older versions once a new one is stored |
//! | [`sources`](VectorStore::sources) | One summary row per indexed document |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{Chunk, Confidentiality, RetrievalCandidate};

/// One indexed document version, as listed by [`VectorStore::sources`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSummary {
    pub source: String,
    pub content_hash: String,
    pub workspace_id: String,
    pub confidentiality: Confidentiality,
    pub chunk_count: usize,
    /// Unix seconds of the first insert, when the backend records it.
    pub indexed_at: Option<i64>,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Up to `k` chunks ordered by decreasing similarity to `query`.
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<RetrievalCandidate>>;

    /// True when any chunk carries this `content_hash`.
    async fn contains_hash(&self, content_hash: &str) -> Result<bool>;

    /// Persist chunks. Returns the number of chunks written; a chunk whose
    /// `(content_hash, chunk_index)` is already stored is skipped.
    async fn add(&self, chunks: &[Chunk]) -> Result<usize>;

    async fn count_all(&self) -> Result<usize>;

    /// Remove every chunk of `source` in `workspace_id`. Returns the number removed.
    async fn delete_by_source(&self, workspace_id: &str, source: &str) -> Result<usize>;

    /// Remove the chunks of `source` in `workspace_id` whose `content_hash`
    /// is not `keep_hash`. Returns the number removed.
    async fn delete_other_versions(
        &self,
        workspace_id: &str,
        source: &str,
        keep_hash: &str,
    ) -> Result<usize>;

    async fn sources(&self) -> Result<Vec<SourceSummary>>;
}

/// Sort candidates by descending score, keeping insertion order on ties.
pub fn sort_by_score(candidates: &mut [RetrievalCandidate]) {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
}

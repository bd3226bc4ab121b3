//! Broad retrieval with exact metadata filtering.
//!
//! The vector store is asked for as many candidates as it holds (up to
//! `candidate_cap`), not a small top-k: the workspace and confidentiality
//! filter that follows is an exact match, and a small k would silently drop
//! permitted chunks that happened to rank below other tenants' chunks.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::context::ContextParams;
use crate::gate::GateParams;
use crate::models::{Chunk, Query, RetrievalCandidate};
use crate::store::VectorStore;

/// Query-time tuning, one struct for the whole retrieval chain.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalParams {
    /// Upper bound on the broad similarity query.
    pub candidate_cap: usize,
    /// Ceiling on candidates kept after filtering.
    pub filtered_cap: usize,
    /// Minimum top-two score gap for the section gate to narrow.
    pub gap_threshold: f32,
    /// Number of section titles kept when the gate narrows.
    pub section_top_k: usize,
    /// Number of candidates kept after reranking.
    pub rerank_top_n: usize,
    pub k_neighbors: usize,
    pub min_chunks: usize,
    /// Maximum in-flight scorer calls.
    pub scoring_concurrency: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            candidate_cap: 5000,
            filtered_cap: 100,
            gap_threshold: 1.0,
            section_top_k: 3,
            rerank_top_n: 5,
            k_neighbors: 3,
            min_chunks: 16,
            scoring_concurrency: 8,
        }
    }
}

impl RetrievalParams {
    pub fn gate(&self) -> GateParams {
        GateParams {
            gap_threshold: self.gap_threshold,
            top_k: self.section_top_k,
            concurrency: self.scoring_concurrency,
        }
    }

    pub fn context(&self) -> ContextParams {
        ContextParams {
            k_neighbors: self.k_neighbors,
            min_chunks: self.min_chunks,
        }
    }
}

/// Output of [`retrieve`].
#[derive(Debug, Clone, Default)]
pub struct Retrieved {
    /// Filtered candidates in similarity order, capped at `filtered_cap`.
    pub candidates: Vec<RetrievalCandidate>,
    /// Every candidate that passed the filter, uncapped. Neighbour lookup
    /// during context assembly draws from this pool.
    pub pool: Vec<RetrievalCandidate>,
}

impl Retrieved {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// True when the chunk is in the caller's workspace and readable at one of
/// the caller's levels.
pub fn passes_filter(query: &Query, chunk: &Chunk) -> bool {
    query.permits(chunk)
}

/// Drop every candidate the caller may not see, preserving order.
pub fn filter_candidates(
    query: &Query,
    candidates: Vec<RetrievalCandidate>,
) -> Vec<RetrievalCandidate> {
    candidates
        .into_iter()
        .filter(|c| passes_filter(query, &c.chunk))
        .collect()
}

/// Broad similarity query followed by workspace and confidentiality filtering.
pub async fn retrieve(
    store: &dyn VectorStore,
    query: &Query,
    params: &RetrievalParams,
) -> Result<Retrieved> {
    let total = store.count_all().await?;
    let k = total.min(params.candidate_cap);
    if k == 0 {
        warn!("vector store is empty");
        return Ok(Retrieved::default());
    }

    let raw = store.similarity_search(&query.question, k).await?;
    let before = raw.len();
    for c in raw.iter().take(5) {
        debug!(
            workspace = %c.chunk.workspace_id,
            confidentiality = %c.chunk.confidentiality,
            "candidate before filtering"
        );
    }

    let pool = filter_candidates(query, raw);
    let mut candidates = pool.clone();
    candidates.truncate(params.filtered_cap);

    info!(
        total,
        requested = k,
        before,
        after = candidates.len(),
        workspace = %query.workspace_id,
        "retrieval filtered"
    );
    if candidates.is_empty() {
        warn!(
            workspace = %query.workspace_id,
            allowed = ?query.allowed_confidentiality,
            "no candidate survived workspace/confidentiality filtering"
        );
    }

    Ok(Retrieved { candidates, pool })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Confidentiality;
    use crate::store::memory::InMemoryVectorStore;

    fn chunk(ws: &str, level: Confidentiality, idx: u32) -> Chunk {
        Chunk {
            text: format!("prix du lot {idx}"),
            source: format!("{ws}.pdf"),
            content_hash: ws.to_string(),
            workspace_id: ws.to_string(),
            confidentiality: level,
            section_title: "Prix".into(),
            section_index: 1,
            chunk_index: idx,
            page_number: None,
        }
    }

    #[test]
    fn test_filter_never_leaks_disallowed_levels() {
        let all_levels: Vec<Vec<Confidentiality>> = vec![
            vec![],
            vec![Confidentiality::Public],
            vec![Confidentiality::Prive],
            Confidentiality::ALL.to_vec(),
        ];
        let candidates: Vec<RetrievalCandidate> = [("ws1", 0u32), ("ws2", 1u32)]
            .iter()
            .flat_map(|(ws, base)| {
                Confidentiality::ALL.into_iter().enumerate().map(move |(i, lvl)| {
                    RetrievalCandidate::new(chunk(ws, lvl, base * 10 + i as u32), 1.0)
                })
            })
            .collect();

        for allowed in all_levels {
            let query = Query::new("q", "ws1", allowed.clone());
            let kept = filter_candidates(&query, candidates.clone());
            assert!(kept
                .iter()
                .all(|c| allowed.contains(&c.chunk.confidentiality) && c.chunk.workspace_id == "ws1"));
            assert_eq!(kept.len(), allowed.len());
        }
    }

    #[tokio::test]
    async fn test_retrieve_caps_candidates_but_keeps_pool() {
        let store = InMemoryVectorStore::new();
        let chunks: Vec<Chunk> = (0..10).map(|i| chunk("ws1", Confidentiality::Public, i)).collect();
        store.add(&chunks).await.unwrap();

        let params = RetrievalParams {
            filtered_cap: 4,
            ..RetrievalParams::default()
        };
        let query = Query::new("prix", "ws1", [Confidentiality::Public]);
        let got = retrieve(&store, &query, &params).await.unwrap();
        assert_eq!(got.candidates.len(), 4);
        assert_eq!(got.pool.len(), 10);
    }

    #[tokio::test]
    async fn test_retrieve_on_empty_store() {
        let store = InMemoryVectorStore::new();
        let query = Query::new("prix", "ws1", Confidentiality::ALL);
        let got = retrieve(&store, &query, &RetrievalParams::default()).await.unwrap();
        assert!(got.is_empty());
    }
}

//! Pairwise reranking of retrieval candidates.

use anyhow::Result;
use tracing::{debug, info};

use crate::models::RetrievalCandidate;
use crate::scoring::{score_all, PairwiseScorer};
use crate::store::sort_by_score;

/// Score every candidate against the question and keep the `top_n` best.
///
/// Scores replace the retrieval scores. Ties keep their original candidate
/// order since the sort is stable and scores are attached before sorting.
pub async fn rerank(
    question: &str,
    candidates: Vec<RetrievalCandidate>,
    scorer: &dyn PairwiseScorer,
    top_n: usize,
    concurrency: usize,
) -> Result<Vec<RetrievalCandidate>> {
    let texts: Vec<&str> = candidates.iter().map(|c| c.chunk.text.as_str()).collect();
    let scores = score_all(scorer, question, &texts, concurrency).await?;

    let mut ranked: Vec<RetrievalCandidate> = candidates
        .into_iter()
        .zip(scores)
        .map(|(c, score)| RetrievalCandidate { score, ..c })
        .collect();
    sort_by_score(&mut ranked);
    ranked.truncate(top_n);

    info!(kept = ranked.len(), "candidates reranked");
    for c in &ranked {
        debug!(source = %c.chunk.source, chunk_index = c.chunk.chunk_index, score = c.score, "reranked");
    }
    Ok(ranked)
}

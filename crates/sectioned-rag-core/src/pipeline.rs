//! The query pipeline: retrieve → gate → rerank → context → answer.
//!
//! Empty retrieval and an empty section-narrowed set are normal outcomes and
//! yield [`Answer::no_relevant_content`]. Collaborator failures surface as
//! [`QueryError`]; the application boundary turns them into
//! [`Answer::generic_failure`]. Nothing here is retried.

use thiserror::Error;
use tracing::{info, warn};

use crate::answer::answer;
use crate::context::build_context;
use crate::gate::{distinct_section_titles, restrict_to_sections, section_gate};
use crate::generation::Generator;
use crate::models::{Answer, Query};
use crate::rerank::rerank;
use crate::retrieval::{retrieve, RetrievalParams};
use crate::scoring::PairwiseScorer;
use crate::store::VectorStore;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("vector store failed: {0:#}")]
    Store(anyhow::Error),
    #[error("relevance scoring failed: {0:#}")]
    Scoring(anyhow::Error),
    #[error("answer generation failed: {0:#}")]
    Generation(anyhow::Error),
}

/// Answer a question from the chunks the caller is allowed to read.
pub async fn ask(
    query: &Query,
    store: &dyn VectorStore,
    scorer: &dyn PairwiseScorer,
    generator: &dyn Generator,
    params: &RetrievalParams,
) -> Result<Answer, QueryError> {
    info!(
        question = %query.question,
        workspace = %query.workspace_id,
        allowed = ?query.allowed_confidentiality,
        "question received"
    );

    let retrieved = retrieve(store, query, params)
        .await
        .map_err(QueryError::Store)?;
    if retrieved.is_empty() {
        return Ok(Answer::no_relevant_content());
    }

    let titles = distinct_section_titles(&retrieved.candidates);
    info!(sections = titles.len(), "distinct sections among candidates");
    let decision = section_gate(&query.question, &titles, scorer, &params.gate())
        .await
        .map_err(QueryError::Scoring)?;

    let candidates = if decision.narrow {
        let narrowed = restrict_to_sections(retrieved.candidates, &decision.keep);
        info!(kept = ?decision.keep, candidates = narrowed.len(), "narrowed to sections");
        narrowed
    } else {
        info!("section narrowing skipped");
        retrieved.candidates
    };
    if candidates.is_empty() {
        warn!("no candidate left after section narrowing");
        return Ok(Answer::no_relevant_content());
    }

    let ranked = rerank(
        &query.question,
        candidates,
        scorer,
        params.rerank_top_n,
        params.scoring_concurrency,
    )
    .await
    .map_err(QueryError::Scoring)?;
    if ranked.is_empty() {
        return Ok(Answer::no_relevant_content());
    }

    let context = build_context(&ranked, &retrieved.pool, &params.context());
    answer(&query.question, &context, generator)
        .await
        .map_err(QueryError::Generation)
}

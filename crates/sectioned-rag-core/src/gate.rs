//! Section gate.
//!
//! Decides per query whether narrowing candidates to a few sections helps.
//! Every distinct section title is scored against the question. A clear
//! winner (top score ahead of the runner-up by at least `gap_threshold`)
//! means one section is unambiguously relevant and the candidates are
//! restricted to the `top_k` best titles. A small gap means several sections
//! are plausible and nothing is narrowed.
//!
//! Titles are scored once; the top-k selection reuses those scores.

use std::collections::{BTreeSet, HashSet};

use anyhow::Result;
use tracing::info;

use crate::models::RetrievalCandidate;
use crate::scoring::{score_all, PairwiseScorer};

#[derive(Debug, Clone, PartialEq)]
pub struct GateParams {
    pub gap_threshold: f32,
    pub top_k: usize,
    pub concurrency: usize,
}

impl Default for GateParams {
    fn default() -> Self {
        Self {
            gap_threshold: 1.0,
            top_k: 3,
            concurrency: 8,
        }
    }
}

/// Outcome of [`section_gate`].
#[derive(Debug, Clone, PartialEq)]
pub struct SectionDecision {
    /// Whether candidates should be restricted to `keep`.
    pub narrow: bool,
    /// Best titles, highest score first. Empty when not narrowing.
    pub keep: Vec<String>,
    /// Top-two score gap, when at least two titles were scored.
    pub gap: Option<f32>,
}

/// Distinct section titles of the candidates, sorted.
pub fn distinct_section_titles(candidates: &[RetrievalCandidate]) -> Vec<String> {
    candidates
        .iter()
        .map(|c| c.chunk.section_title.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Score each title against the question; highest first, ties in input order.
pub async fn score_titles(
    question: &str,
    titles: &[String],
    scorer: &dyn PairwiseScorer,
    concurrency: usize,
) -> Result<Vec<(String, f32)>> {
    let texts: Vec<&str> = titles.iter().map(String::as_str).collect();
    let scores = score_all(scorer, question, &texts, concurrency).await?;
    let mut scored: Vec<(String, f32)> = titles.iter().cloned().zip(scores).collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    Ok(scored)
}

/// Gap rule over scores sorted descending: `(narrow, gap)`.
///
/// Fewer than two scores always narrows.
pub fn gap_decision(sorted_scores: &[f32], gap_threshold: f32) -> (bool, Option<f32>) {
    match sorted_scores {
        [first, second, ..] => {
            let gap = first - second;
            (gap >= gap_threshold, Some(gap))
        }
        _ => (true, None),
    }
}

/// Whether narrowing to sections is worthwhile for this question.
pub async fn should_filter_by_section(
    question: &str,
    titles: &[String],
    scorer: &dyn PairwiseScorer,
    gap_threshold: f32,
    concurrency: usize,
) -> Result<bool> {
    if titles.len() < 2 {
        return Ok(true);
    }
    let scored = score_titles(question, titles, scorer, concurrency).await?;
    let scores: Vec<f32> = scored.iter().map(|(_, s)| *s).collect();
    Ok(gap_decision(&scores, gap_threshold).0)
}

/// The `top_k` titles most relevant to the question.
pub async fn most_relevant_sections(
    question: &str,
    titles: &[String],
    scorer: &dyn PairwiseScorer,
    top_k: usize,
    concurrency: usize,
) -> Result<Vec<String>> {
    let scored = score_titles(question, titles, scorer, concurrency).await?;
    Ok(scored.into_iter().take(top_k).map(|(t, _)| t).collect())
}

/// Score titles once and decide whether and how to narrow.
pub async fn section_gate(
    question: &str,
    titles: &[String],
    scorer: &dyn PairwiseScorer,
    params: &GateParams,
) -> Result<SectionDecision> {
    if titles.len() < 2 {
        info!(titles = titles.len(), "section gate: single section, narrowing");
        return Ok(SectionDecision {
            narrow: true,
            keep: titles.to_vec(),
            gap: None,
        });
    }

    let scored = score_titles(question, titles, scorer, params.concurrency).await?;
    let scores: Vec<f32> = scored.iter().map(|(_, s)| *s).collect();
    let (narrow, gap) = gap_decision(&scores, params.gap_threshold);
    info!(
        top = ?&scores[..2],
        gap = gap.unwrap_or_default(),
        threshold = params.gap_threshold,
        narrow,
        "section gate decided"
    );

    let keep = if narrow {
        scored.into_iter().take(params.top_k).map(|(t, _)| t).collect()
    } else {
        Vec::new()
    };
    Ok(SectionDecision { narrow, keep, gap })
}

/// Keep only candidates whose section title is in `keep`.
pub fn restrict_to_sections(
    candidates: Vec<RetrievalCandidate>,
    keep: &[String],
) -> Vec<RetrievalCandidate> {
    let keep: HashSet<&str> = keep.iter().map(String::as_str).collect();
    candidates
        .into_iter()
        .filter(|c| keep.contains(c.chunk.section_title.as_str()))
        .collect()
}

//! Pairwise relevance scoring.
//!
//! A [`PairwiseScorer`] compares two texts and returns a real-valued score,
//! higher meaning more relevant. The section gate scores `(question, title)`
//! pairs and the reranker scores `(question, chunk text)` pairs. Model
//! identity is opaque: cross-encoder logits and lexical overlap counts are
//! both valid scores.
//!
//! Scoring calls are independent and side-effect free, so [`score_all`]
//! runs them with bounded concurrency. Results are returned in input order
//! regardless of completion order.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};

#[async_trait]
pub trait PairwiseScorer: Send + Sync {
    async fn score(&self, a: &str, b: &str) -> Result<f32>;
}

/// Score `query` against every text, preserving input order.
pub async fn score_all(
    scorer: &dyn PairwiseScorer,
    query: &str,
    texts: &[&str],
    concurrency: usize,
) -> Result<Vec<f32>> {
    stream::iter(texts.iter().map(|text| scorer.score(query, text)))
        .buffered(concurrency.max(1))
        .try_collect()
        .await
}

/// Lowercased alphanumeric tokens of at least three characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Number of distinct tokens of `query` that also occur in `text`.
pub fn lexical_overlap(query: &str, text: &str) -> f32 {
    let text_tokens: HashSet<String> = tokenize(text).into_iter().collect();
    let query_tokens: HashSet<String> = tokenize(query).into_iter().collect();
    query_tokens
        .iter()
        .filter(|t| text_tokens.contains(*t))
        .count() as f32
}

/// Deterministic scorer counting shared terms. Used offline and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalScorer;

#[async_trait]
impl PairwiseScorer for LexicalScorer {
    async fn score(&self, a: &str, b: &str) -> Result<f32> {
        Ok(lexical_overlap(a, b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_tokenize_drops_short_words() {
        assert_eq!(tokenize("Le prix, du LOT-2 est ferme"), vec!["prix", "lot", "est", "ferme"]);
    }

    #[test]
    fn test_lexical_overlap_counts_distinct_terms() {
        assert_eq!(lexical_overlap("prix prix ferme", "Le prix est ferme et définitif"), 2.0);
        assert_eq!(lexical_overlap("délais", "Le prix est ferme"), 0.0);
    }

    /// Completes later calls first to exercise ordering.
    struct Reversed {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PairwiseScorer for Reversed {
        async fn score(&self, _a: &str, b: &str) -> Result<f32> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as u64;
            tokio::time::sleep(Duration::from_millis(30u64.saturating_sub(n * 10))).await;
            Ok(b.len() as f32)
        }
    }

    #[tokio::test]
    async fn test_score_all_preserves_input_order() {
        let scorer = Reversed {
            calls: AtomicUsize::new(0),
        };
        let scores = score_all(&scorer, "q", &["a", "bbb", "cc"], 3).await.unwrap();
        assert_eq!(scores, vec![1.0, 3.0, 2.0]);
    }

    #[tokio::test]
    async fn test_score_all_propagates_errors() {
        struct Failing;
        #[async_trait]
        impl PairwiseScorer for Failing {
            async fn score(&self, _a: &str, _b: &str) -> Result<f32> {
                anyhow::bail!("scorer unavailable")
            }
        }
        assert!(score_all(&Failing, "q", &["a"], 1).await.is_err());
    }
}

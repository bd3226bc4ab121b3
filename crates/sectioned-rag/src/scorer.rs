//! Pairwise scorer backends.
//!
//! | `scorer.provider` | Backend |
//! |-------------------|---------|
//! | `http` | cross-encoder server, `POST {url}/rerank` with a TEI-style `{query, texts}` body |
//! | `local` | fastembed `TextRerank` in-process (feature `local-fastembed`) |
//! | `lexical` | shared-term count, offline and deterministic |
//!
//! Scorers are side-effect free; the core runs them concurrently.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use sectioned_rag_core::scoring::{LexicalScorer, PairwiseScorer};

use crate::config::ScorerConfig;

/// Cross-encoder served over HTTP (text-embeddings-inference `/rerank`).
pub struct HttpScorer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpScorer {
    pub fn new(config: &ScorerConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| anyhow!("scorer.url required for http provider"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/rerank", url.trim_end_matches('/')),
        })
    }
}

/// Score of the first text in a `/rerank` response: `[{"index": 0, "score": 1.7}]`.
pub fn parse_rerank_response(json: &serde_json::Value) -> Result<f32> {
    json.as_array()
        .and_then(|results| {
            results
                .iter()
                .find(|r| r.get("index").and_then(|i| i.as_u64()) == Some(0))
        })
        .and_then(|r| r.get("score"))
        .and_then(|s| s.as_f64())
        .map(|s| s as f32)
        .ok_or_else(|| anyhow!("Invalid rerank response: no score for index 0"))
}

#[async_trait]
impl PairwiseScorer for HttpScorer {
    async fn score(&self, a: &str, b: &str) -> Result<f32> {
        let body = serde_json::json!({
            "query": a,
            "texts": [b],
            "raw_scores": true,
        });
        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Rerank API error {}: {}", status, body_text);
        }
        let json: serde_json::Value = response.json().await?;
        parse_rerank_response(&json)
    }
}

/// In-process cross-encoder. The model is loaded on first use.
#[cfg(feature = "local-fastembed")]
pub struct LocalScorer {
    model: fastembed::RerankerModel,
    slot: Arc<std::sync::Mutex<Option<fastembed::TextRerank>>>,
}

#[cfg(feature = "local-fastembed")]
impl LocalScorer {
    pub fn new(config: &ScorerConfig) -> Result<Self> {
        let model = match config.model.as_deref().unwrap_or("bge-reranker-v2-m3") {
            "bge-reranker-base" => fastembed::RerankerModel::BGERerankerBase,
            "bge-reranker-v2-m3" => fastembed::RerankerModel::BGERerankerV2M3,
            "jina-reranker-v2-base-multilingual" => {
                fastembed::RerankerModel::JINARerankerV2BaseMultiligual
            }
            other => bail!(
                "Unknown local reranker model: '{}'. Supported models: \
                 bge-reranker-base, bge-reranker-v2-m3, jina-reranker-v2-base-multilingual",
                other
            ),
        };
        Ok(Self {
            model,
            slot: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-fastembed")]
#[async_trait]
impl PairwiseScorer for LocalScorer {
    async fn score(&self, a: &str, b: &str) -> Result<f32> {
        let model = self.model.clone();
        let slot = Arc::clone(&self.slot);
        let (query, document) = (a.to_string(), b.to_string());

        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| anyhow!("local reranker lock poisoned"))?;
            if guard.is_none() {
                let reranker = fastembed::TextRerank::try_new(
                    fastembed::RerankInitOptions::new(model).with_show_download_progress(true),
                )
                .map_err(|e| anyhow!("Failed to initialize local reranker: {}", e))?;
                *guard = Some(reranker);
            }
            let reranker = guard
                .as_mut()
                .ok_or_else(|| anyhow!("local reranker unavailable"))?;
            let results = reranker
                .rerank(query.as_str(), vec![document.as_str()], false, None)
                .map_err(|e| anyhow!("Local rerank failed: {}", e))?;
            results
                .first()
                .map(|r| r.score)
                .ok_or_else(|| anyhow!("local reranker returned no score"))
        })
        .await?
    }
}

/// Create the configured [`PairwiseScorer`].
pub fn create_scorer(config: &ScorerConfig) -> Result<Arc<dyn PairwiseScorer>> {
    match config.provider.as_str() {
        "lexical" => Ok(Arc::new(LexicalScorer)),
        "http" => Ok(Arc::new(HttpScorer::new(config)?)),
        #[cfg(feature = "local-fastembed")]
        "local" => Ok(Arc::new(LocalScorer::new(config)?)),
        #[cfg(not(feature = "local-fastembed"))]
        "local" => bail!("Local scorer requires --features local-fastembed"),
        other => bail!("Unknown scorer provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_scorer_is_lexical() {
        let scorer = create_scorer(&ScorerConfig::default()).unwrap();
        let score = scorer
            .score("pénalités de retard", "Les pénalités de retard sont plafonnées")
            .await
            .unwrap();
        assert_eq!(score, 2.0);
    }

    #[test]
    fn test_http_scorer_requires_url() {
        let config = ScorerConfig {
            provider: "http".into(),
            ..ScorerConfig::default()
        };
        assert!(create_scorer(&config).is_err());
    }

    #[test]
    fn test_parse_rerank_response() {
        let json = serde_json::json!([{"index": 0, "score": -1.25}]);
        assert_eq!(parse_rerank_response(&json).unwrap(), -1.25);
        assert!(parse_rerank_response(&serde_json::json!({"error": "overloaded"})).is_err());
    }
}

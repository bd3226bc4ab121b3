//! Question answering entry points.
//!
//! [`ask_question`] never fails: any error inside the pipeline is logged
//! and surfaces to the caller as the generic failure answer.

use anyhow::Result;
use tracing::error;

use sectioned_rag_core::generation::Generator;
use sectioned_rag_core::models::{Answer, Confidentiality, Query};
use sectioned_rag_core::pipeline::ask;
use sectioned_rag_core::retrieval::RetrievalParams;
use sectioned_rag_core::scoring::PairwiseScorer;
use sectioned_rag_core::store::VectorStore;

use crate::config::Config;

pub async fn ask_question(
    query: &Query,
    store: &dyn VectorStore,
    scorer: &dyn PairwiseScorer,
    generator: &dyn Generator,
    params: &RetrievalParams,
) -> Answer {
    match ask(query, store, scorer, generator, params).await {
        Ok(answer) => answer,
        Err(e) => {
            error!(
                workspace = %query.workspace_id,
                error = %e,
                "query failed"
            );
            Answer::generic_failure()
        }
    }
}

/// `srag ask`: answer a question and print the response and its sources.
pub async fn run_ask(
    config: &Config,
    question: &str,
    workspace_id: &str,
    allowed: &[Confidentiality],
    json: bool,
) -> Result<()> {
    let store = crate::open_store(config).await?;
    let scorer = crate::scorer::create_scorer(&config.scorer)?;
    let generator = crate::generator::create_generator(&config.generator)?;

    let allowed = if allowed.is_empty() {
        Confidentiality::ALL.to_vec()
    } else {
        allowed.to_vec()
    };
    let query = Query::new(question, workspace_id, allowed);
    let answer = ask_question(
        &query,
        store.as_ref(),
        scorer.as_ref(),
        generator.as_ref(),
        &config.retrieval.params(),
    )
    .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
        return Ok(());
    }

    println!("{}", answer.response);
    if !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for (i, source) in answer.sources.iter().enumerate() {
            match source.page {
                Some(page) => println!("{}. {} (p. {})", i + 1, source.title, page),
                None => println!("{}. {}", i + 1, source.title),
            }
            let excerpt: String = source.content.chars().take(160).collect();
            println!("    \"{}\"", excerpt.replace('\n', " ").trim());
        }
    }
    Ok(())
}

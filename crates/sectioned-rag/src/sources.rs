//! Indexed document listing and removal.
//!
//! `srag sources` prints one row per stored document version;
//! `srag forget` removes every chunk of one source in one workspace.

use anyhow::Result;
use chrono::{TimeZone, Utc};

use sectioned_rag_core::store::{SourceSummary, VectorStore};

use crate::config::Config;

/// Stored documents, optionally restricted to one workspace, ordered by
/// workspace then source name.
pub async fn list_sources(
    store: &dyn VectorStore,
    workspace_id: Option<&str>,
) -> Result<Vec<SourceSummary>> {
    let mut sources: Vec<SourceSummary> = store
        .sources()
        .await?
        .into_iter()
        .filter(|s| workspace_id.map_or(true, |ws| s.workspace_id == ws))
        .collect();
    sources.sort_by(|a, b| {
        (a.workspace_id.as_str(), a.source.as_str()).cmp(&(b.workspace_id.as_str(), b.source.as_str()))
    });
    Ok(sources)
}

fn format_indexed_at(ts: Option<i64>) -> String {
    ts.and_then(|t| Utc.timestamp_opt(t, 0).single())
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub async fn run_sources(config: &Config, workspace_id: Option<&str>, json: bool) -> Result<()> {
    let store = crate::open_store(config).await?;
    let sources = list_sources(store.as_ref(), workspace_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sources)?);
        return Ok(());
    }
    if sources.is_empty() {
        println!("No documents indexed.");
        return Ok(());
    }

    println!(
        "{:<12} {:<40} {:<8} {:>6}  {:<16}  HASH",
        "WORKSPACE", "SOURCE", "LEVEL", "CHUNKS", "INDEXED"
    );
    for s in &sources {
        println!(
            "{:<12} {:<40} {:<8} {:>6}  {:<16}  {}",
            s.workspace_id,
            s.source,
            s.confidentiality.as_str(),
            s.chunk_count,
            format_indexed_at(s.indexed_at),
            &s.content_hash[..s.content_hash.len().min(12)]
        );
    }
    Ok(())
}

pub async fn run_forget(config: &Config, workspace_id: &str, source: &str) -> Result<usize> {
    let store = crate::open_store(config).await?;
    let removed = store.delete_by_source(workspace_id, source).await?;
    if removed == 0 {
        println!("No chunks found for {} in workspace {}.", source, workspace_id);
    } else {
        println!("Removed {} chunks of {} from workspace {}.", removed, source, workspace_id);
    }
    Ok(removed)
}

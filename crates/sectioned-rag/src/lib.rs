//! # Sectioned RAG
//!
//! **Section-aware document ingestion and question answering over tender
//! documents (PDF, DOCX, Markdown).**
//!
//! This crate wires the pure pipeline of [`sectioned_rag_core`] to concrete
//! collaborators: document extractors, a SQLite vector store, HTTP or local
//! embedding providers, a text generator and a pairwise relevance scorer.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌───────────┐
//! │  Extractors │──▶│ Headings → Tag → │──▶│  SQLite    │
//! │ PDF/DOCX/MD │   │ Summarize → Split│   │ chunks+FTS │
//! └─────────────┘   └──────────────────┘   └─────┬─────┘
//!                                                │
//!                          ┌─────────────────────┘
//!                          ▼
//!            retrieve → filter → gate → rerank → context → answer
//! ```
//!
//! ## Data Flow
//!
//! 1. **Extraction** ([`extract`]) turns a file into ordered blocks. PDFs
//!    also keep their raw page lines for table-of-contents detection.
//! 2. **Ingestion** ([`ingest`]) detects titles, groups sections, summarizes
//!    them with the configured [`generator`], splits the tagged text and
//!    writes the chunks through [`sqlite_store`]. Documents are deduplicated
//!    by content hash.
//! 3. **Questions** ([`query`]) run the core pipeline against the store with
//!    the configured [`scorer`] and generator.
//!
//! ## Quick Start
//!
//! ```bash
//! srag init
//! srag ingest ./dce/ --workspace ws1 --confidentiality public
//! srag ask "Quelles sont les pénalités de retard ?" --workspace ws1
//! srag sources
//! ```
//!
//! ## Configuration
//!
//! All settings live in one TOML file (default `./config/srag.toml`); see
//! [`config`] for every section and its defaults.

pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod generator;
pub mod ingest;
pub mod migrate;
pub mod query;
pub mod scorer;
pub mod sources;
pub mod sqlite_store;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::config::Config;
use crate::sqlite_store::SqliteVectorStore;

/// Open the configured database, apply the schema and attach the
/// configured embedding provider.
pub async fn open_store(config: &Config) -> Result<Arc<SqliteVectorStore>> {
    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;
    let store = match embedding::create_provider(&config.embedding)? {
        Some(embedder) => {
            info!(model = embedder.model_name(), "embeddings enabled");
            SqliteVectorStore::with_embedder(pool, embedder)
        }
        None => {
            info!("embeddings disabled, ranking by full-text relevance");
            SqliteVectorStore::new(pool)
        }
    };
    Ok(Arc::new(store))
}

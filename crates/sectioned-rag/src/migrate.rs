//! Idempotent schema creation (`srag init`).
//!
//! One row per chunk. Every [`Chunk`](sectioned_rag_core::models::Chunk)
//! field has its own column so metadata round-trips unmodified; the optional
//! embedding is stored inline as a little-endian `f32` BLOB. `chunks_fts`
//! indexes chunk text for the lexical fallback used when embeddings are
//! disabled.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::info;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    info!(path = %config.db.path.display(), "database initialized");
    Ok(())
}

/// Apply the schema to an open pool. Safe to run repeatedly.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            content_hash TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            source TEXT NOT NULL,
            workspace_id TEXT NOT NULL,
            confidentiality TEXT NOT NULL,
            section_title TEXT NOT NULL,
            section_index INTEGER NOT NULL,
            page_number INTEGER,
            text TEXT NOT NULL,
            embedding BLOB,
            embedding_model TEXT,
            indexed_at INTEGER NOT NULL,
            UNIQUE(content_hash, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_content_hash ON chunks(content_hash)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(workspace_id, source)")
        .execute(pool)
        .await?;

    Ok(())
}

//! SQLite-backed [`VectorStore`] implementation.
//!
//! Ranking depends on whether an embedding provider is attached:
//!
//! | Embedder | `similarity_search` score |
//! |----------|---------------------------|
//! | attached | cosine similarity between the query vector and the stored BLOB (0 when a row has none) |
//! | none | negated FTS5 `bm25` over the query's terms (0 for rows that do not match) |
//!
//! Every stored chunk is a candidate in both modes so that a broad search
//! sized to [`count_all`](VectorStore::count_all) sees the whole corpus, but
//! only the best `k` ever leave the store: keyword mode sorts and limits in
//! SQL, vector mode streams rows through a bounded heap. Equal scores keep
//! insertion order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use sectioned_rag_core::embedding::{cosine_similarity, embed_query, EmbeddingProvider};
use sectioned_rag_core::models::{Chunk, Confidentiality, RetrievalCandidate};
use sectioned_rag_core::scoring::tokenize;
use sectioned_rag_core::store::{SourceSummary, VectorStore};

const CHUNK_COLUMNS: &str = "c.id, c.text, c.source, c.content_hash, c.workspace_id, \
     c.confidentiality, c.section_title, c.section_index, c.chunk_index, c.page_number";

/// SQLite implementation of the [`VectorStore`] trait.
pub struct SqliteVectorStore {
    pool: SqlitePool,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            embedder: None,
        }
    }

    pub fn with_embedder(pool: SqlitePool, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            pool,
            embedder: Some(embedder),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cosine ranking over stored vectors. Rows are streamed and only the
    /// best `k` are kept, so memory stays bounded by `k` and not the table.
    async fn vector_search(
        &self,
        embedder: &dyn EmbeddingProvider,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievalCandidate>> {
        let query_vec = embed_query(embedder, query).await?;
        let sql = format!("SELECT {CHUNK_COLUMNS}, c.embedding FROM chunks c ORDER BY c.id");
        let mut rows = sqlx::query(&sql).fetch(&self.pool);

        let mut top: BinaryHeap<Ranked> = BinaryHeap::new();
        while let Some(row) = rows.try_next().await? {
            let id: i64 = row.try_get("id")?;
            let blob: Option<Vec<u8>> = row.try_get("embedding")?;
            let score = blob
                .map(|b| cosine_similarity(&query_vec, &blob_to_vec(&b)))
                .unwrap_or(0.0);

            if top.len() == k {
                match top.peek() {
                    Some(weakest) if weaker((score, id), (weakest.score, weakest.id)).is_lt() => {}
                    _ => continue,
                }
            }
            top.push(Ranked {
                score,
                id,
                candidate: RetrievalCandidate::new(row_to_chunk(&row)?, score),
            });
            if top.len() > k {
                top.pop();
            }
        }

        Ok(top
            .into_sorted_vec()
            .into_iter()
            .map(|r| r.candidate)
            .collect())
    }

    /// Negated BM25 ranking, sorted and limited by SQLite.
    async fn keyword_search(&self, query: &str, k: usize) -> Result<Vec<RetrievalCandidate>> {
        let limit = i64::try_from(k).unwrap_or(i64::MAX);
        let rows = match fts_query(query) {
            Some(fts) => {
                sqlx::query(&format!(
                    r#"
                    SELECT {CHUNK_COLUMNS}, COALESCE(m.score, 0.0) AS score
                    FROM chunks c
                    LEFT JOIN (
                        SELECT chunk_id, -bm25(chunks_fts) AS score
                        FROM chunks_fts
                        WHERE chunks_fts MATCH ?
                    ) m ON m.chunk_id = c.id
                    ORDER BY score DESC, c.id
                    LIMIT ?
                    "#
                ))
                .bind(fts)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {CHUNK_COLUMNS}, 0.0 AS score FROM chunks c ORDER BY c.id LIMIT ?"
                ))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter()
            .map(|row| {
                let score: f64 = row.try_get("score")?;
                Ok(RetrievalCandidate::new(row_to_chunk(row)?, score as f32))
            })
            .collect()
    }
}

/// A kept vector-search hit. Ordered so the weakest hit is the greatest,
/// which puts it on top of a [`BinaryHeap`].
struct Ranked {
    score: f32,
    id: i64,
    candidate: RetrievalCandidate,
}

/// `Greater` when `a` ranks below `b`: lower score, or same score and a
/// later row.
fn weaker(a: (f32, i64), b: (f32, i64)) -> Ordering {
    b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1))
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        weaker((self.score, self.id), (other.score, other.id))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

/// Little-endian `f32` bytes, as stored in `chunks.embedding`.
fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// FTS5 query matching any term of `text`, each quoted so user input
/// never reaches the FTS5 query syntax. `None` when no term survives.
pub fn fts_query(text: &str) -> Option<String> {
    let terms = tokenize(text);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

fn row_to_chunk(row: &SqliteRow) -> Result<Chunk> {
    let confidentiality: String = row.try_get("confidentiality")?;
    let section_index: i64 = row.try_get("section_index")?;
    let chunk_index: i64 = row.try_get("chunk_index")?;
    let page_number: Option<i64> = row.try_get("page_number")?;
    Ok(Chunk {
        text: row.try_get("text")?,
        source: row.try_get("source")?,
        content_hash: row.try_get("content_hash")?,
        workspace_id: row.try_get("workspace_id")?,
        confidentiality: confidentiality.parse::<Confidentiality>()?,
        section_title: row.try_get("section_title")?,
        section_index: u32::try_from(section_index)?,
        chunk_index: u32::try_from(chunk_index)?,
        page_number: page_number.map(u32::try_from).transpose()?,
    })
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<RetrievalCandidate>> {
        let candidates = match &self.embedder {
            Some(embedder) => self.vector_search(embedder.as_ref(), query, k).await?,
            None => self.keyword_search(query, k).await?,
        };
        debug!(returned = candidates.len(), k, "similarity search");
        Ok(candidates)
    }

    async fn contains_hash(&self, content_hash: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE content_hash = ?")
            .bind(content_hash)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn add(&self, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let vectors: Option<Vec<Vec<f32>>> = match &self.embedder {
            Some(embedder) => {
                let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
                let vectors = embedder.embed(&texts).await?;
                if vectors.len() != chunks.len() {
                    anyhow::bail!(
                        "embedder returned {} vectors for {} chunks",
                        vectors.len(),
                        chunks.len()
                    );
                }
                Some(vectors)
            }
            None => None,
        };
        let model = vectors
            .as_ref()
            .and(self.embedder.as_ref())
            .map(|e| e.model_name().to_string());
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for (i, chunk) in chunks.iter().enumerate() {
            let blob = vectors.as_ref().and_then(|v| v.get(i)).map(|v| vec_to_blob(v));
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO chunks (content_hash, chunk_index, source, workspace_id,
                                              confidentiality, section_title, section_index,
                                              page_number, text, embedding, embedding_model,
                                              indexed_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.content_hash)
            .bind(i64::from(chunk.chunk_index))
            .bind(&chunk.source)
            .bind(&chunk.workspace_id)
            .bind(chunk.confidentiality.as_str())
            .bind(&chunk.section_title)
            .bind(i64::from(chunk.section_index))
            .bind(chunk.page_number.map(i64::from))
            .bind(&chunk.text)
            .bind(blob)
            .bind(model.as_deref())
            .bind(now)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                continue;
            }

            sqlx::query("INSERT INTO chunks_fts (chunk_id, text) VALUES (?, ?)")
                .bind(result.last_insert_rowid())
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await?;
            written += 1;
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn count_all(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        usize::try_from(count).map_err(|e| anyhow!("invalid chunk count {count}: {e}"))
    }

    async fn delete_by_source(&self, workspace_id: &str, source: &str) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM chunks_fts WHERE chunk_id IN (SELECT id FROM chunks WHERE workspace_id = ? AND source = ?)",
        )
        .bind(workspace_id)
        .bind(source)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM chunks WHERE workspace_id = ? AND source = ?")
            .bind(workspace_id)
            .bind(source)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() as usize)
    }

    async fn delete_other_versions(
        &self,
        workspace_id: &str,
        source: &str,
        keep_hash: &str,
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM chunks_fts WHERE chunk_id IN (
                SELECT id FROM chunks
                WHERE workspace_id = ? AND source = ? AND content_hash != ?
            )
            "#,
        )
        .bind(workspace_id)
        .bind(source)
        .bind(keep_hash)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            "DELETE FROM chunks WHERE workspace_id = ? AND source = ? AND content_hash != ?",
        )
        .bind(workspace_id)
        .bind(source)
        .bind(keep_hash)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() as usize)
    }

    async fn sources(&self) -> Result<Vec<SourceSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT source, content_hash, workspace_id, confidentiality,
                   COUNT(*) AS chunk_count, MIN(indexed_at) AS indexed_at
            FROM chunks
            GROUP BY workspace_id, source, content_hash, confidentiality
            ORDER BY workspace_id, source, indexed_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let confidentiality: String = row.try_get("confidentiality")?;
                let chunk_count: i64 = row.try_get("chunk_count")?;
                Ok(SourceSummary {
                    source: row.try_get("source")?,
                    content_hash: row.try_get("content_hash")?,
                    workspace_id: row.try_get("workspace_id")?,
                    confidentiality: confidentiality.parse()?,
                    chunk_count: usize::try_from(chunk_count)?,
                    indexed_at: row.try_get("indexed_at")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate;

    async fn pool() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::connect_path(&dir.path().join("srag.sqlite"))
            .await
            .unwrap();
        migrate(&pool).await.unwrap();
        (dir, pool)
    }

    async fn store() -> (tempfile::TempDir, SqliteVectorStore) {
        let (dir, pool) = pool().await;
        (dir, SqliteVectorStore::new(pool))
    }

    /// Two-dimensional embedder: counts of "prix" and "délai".
    struct Terms;

    #[async_trait]
    impl EmbeddingProvider for Terms {
        fn model_name(&self) -> &str {
            "terms"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| vec![t.matches("prix").count() as f32, t.matches("délai").count() as f32])
                .collect())
        }
    }

    fn chunk(source: &str, hash: &str, idx: u32, text: &str) -> Chunk {
        Chunk {
            text: text.into(),
            source: source.into(),
            content_hash: hash.into(),
            workspace_id: "ws1".into(),
            confidentiality: Confidentiality::Prive,
            section_title: "ARTICLE 2 - PRIX".into(),
            section_index: 2,
            chunk_index: idx,
            page_number: if idx == 0 { Some(4) } else { None },
        }
    }

    #[test]
    fn test_fts_query_quotes_terms() {
        assert_eq!(
            fts_query("Quel est le \"prix\" OR délai ?").unwrap(),
            "\"quel\" OR \"est\" OR \"prix\" OR \"délai\""
        );
        assert!(fts_query("a ? !").is_none());
    }

    #[tokio::test]
    async fn test_metadata_round_trip() {
        let (_dir, store) = store().await;
        let chunks = vec![
            chunk("cctp.pdf", "h1", 0, "Le prix est ferme."),
            chunk("cctp.pdf", "h1", 1, "Révision annuelle."),
        ];
        assert_eq!(store.add(&chunks).await.unwrap(), 2);

        let found = store.similarity_search("prix", 10).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].chunk, chunks[0]);
        assert!(found[0].score > 0.0);
        assert_eq!(found[1].chunk, chunks[1]);
        assert_eq!(found[1].score, 0.0);
    }

    #[tokio::test]
    async fn test_add_skips_existing_hash_and_index() {
        let (_dir, store) = store().await;
        let first = vec![chunk("a.pdf", "h1", 0, "un"), chunk("a.pdf", "h1", 1, "deux")];
        assert_eq!(store.add(&first).await.unwrap(), 2);
        assert_eq!(store.add(&first).await.unwrap(), 0);
        assert_eq!(store.count_all().await.unwrap(), 2);
        assert!(store.contains_hash("h1").await.unwrap());
        assert!(!store.contains_hash("h2").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_by_source_and_sources() {
        let (_dir, store) = store().await;
        store
            .add(&[chunk("a.pdf", "h1", 0, "prix"), chunk("b.pdf", "h2", 0, "prix")])
            .await
            .unwrap();

        let sources = store.sources().await.unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].source, "a.pdf");
        assert_eq!(sources[0].confidentiality, Confidentiality::Prive);
        assert_eq!(sources[0].chunk_count, 1);
        assert!(sources[0].indexed_at.is_some());

        assert_eq!(store.delete_by_source("ws2", "a.pdf").await.unwrap(), 0);
        assert_eq!(store.delete_by_source("ws1", "a.pdf").await.unwrap(), 1);
        let found = store.similarity_search("prix", 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].chunk.source, "b.pdf");
    }

    #[tokio::test]
    async fn test_delete_other_versions_keeps_new_version_searchable() {
        let (_dir, store) = store().await;
        store
            .add(&[
                chunk("a.pdf", "v1", 0, "prix ancien"),
                chunk("a.pdf", "v2", 0, "prix nouveau"),
            ])
            .await
            .unwrap();

        assert_eq!(store.delete_other_versions("ws1", "a.pdf", "v2").await.unwrap(), 1);
        assert_eq!(store.delete_other_versions("ws1", "a.pdf", "v2").await.unwrap(), 0);
        let found = store.similarity_search("prix", 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].chunk.content_hash, "v2");
        assert!(found[0].score > 0.0);
    }

    #[tokio::test]
    async fn test_embedded_search_keeps_best_k_in_row_order() {
        let (_dir, pool) = pool().await;
        let store = SqliteVectorStore::with_embedder(pool, Arc::new(Terms));
        store
            .add(&[
                chunk("a.pdf", "h1", 0, "délai de livraison"),
                chunk("a.pdf", "h1", 1, "prix ferme"),
                chunk("a.pdf", "h1", 2, "prix et délai"),
                chunk("a.pdf", "h1", 3, "prix unitaire"),
            ])
            .await
            .unwrap();

        let found = store.similarity_search("quel prix ?", 2).await.unwrap();
        let order: Vec<u32> = found.iter().map(|c| c.chunk.chunk_index).collect();
        assert_eq!(order, vec![1, 3]);
        assert!((found[0].score - 1.0).abs() < 1e-6);

        let all = store.similarity_search("quel prix ?", 10).await.unwrap();
        let order: Vec<u32> = all.iter().map(|c| c.chunk.chunk_index).collect();
        assert_eq!(order, vec![1, 3, 2, 0]);
        assert!(all[3].score.abs() < 1e-6);
        assert!(store.similarity_search("prix", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keyword_search_is_limited_in_sql() {
        let (_dir, store) = store().await;
        store
            .add(&[
                chunk("a.pdf", "h1", 0, "planning"),
                chunk("a.pdf", "h1", 1, "prix ferme"),
                chunk("a.pdf", "h1", 2, "prix"),
            ])
            .await
            .unwrap();

        let found = store.similarity_search("prix", 2).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|c| c.score > 0.0));
        assert!(found.iter().all(|c| c.chunk.chunk_index != 0));

        let unmatched = store.similarity_search("?", 2).await.unwrap();
        let order: Vec<u32> = unmatched.iter().map(|c| c.chunk.chunk_index).collect();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn test_embedding_blob_layout() {
        let blob = vec_to_blob(&[1.0, -0.5]);
        assert_eq!(blob.len(), 8);
        assert_eq!(&blob[..4], &1.0f32.to_le_bytes());
        assert_eq!(blob_to_vec(&blob), vec![1.0, -0.5]);
    }
}

//! Context assembly by ordered neighbour expansion.
//!
//! Starting from the reranked anchors, each anchor pulls in up to
//! `k_neighbors` chunks on either side of it, restricted to the same source
//! document and the same section title, until `min_chunks` unique chunks are
//! collected or the anchors run out. The assembled set is then reordered by
//! `(source, chunk_index)` so each document reads linearly, and a separator
//! line marks every change of source in the joined text.
//!
//! Falling short of `min_chunks` is a data condition (small corpus), logged
//! and not an error.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::models::{Chunk, RetrievalCandidate};

/// Inserted between consecutive chunks of different sources.
pub const SOURCE_SEPARATOR: &str = "\n------- Nouvelle source :\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextParams {
    pub k_neighbors: usize,
    pub min_chunks: usize,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            k_neighbors: 3,
            min_chunks: 16,
        }
    }
}

/// The joined context text and the chunks it was built from, in final order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledContext {
    pub text: String,
    pub chunks: Vec<Chunk>,
}

/// Up to `k` chunks before then up to `k` after `anchor`, same source and
/// section only, ordered by `chunk_index`. The anchor itself is excluded.
pub fn neighbors<'a>(anchor: &Chunk, pool: &'a [RetrievalCandidate], k: usize) -> Vec<&'a Chunk> {
    let mut same_section: Vec<&Chunk> = pool
        .iter()
        .map(|c| &c.chunk)
        .filter(|c| c.source == anchor.source && c.section_title == anchor.section_title)
        .collect();
    same_section.sort_by_key(|c| c.chunk_index);
    same_section.dedup_by_key(|c| c.chunk_index);

    let Some(pos) = same_section
        .iter()
        .position(|c| c.chunk_index == anchor.chunk_index)
    else {
        return Vec::new();
    };

    let left = &same_section[pos.saturating_sub(k)..pos];
    let right_end = (pos + 1 + k).min(same_section.len());
    let right = &same_section[pos + 1..right_end];
    left.iter().chain(right.iter()).copied().collect()
}

/// Expand ranked anchors with their neighbours from `pool`.
pub fn build_context(
    ranked: &[RetrievalCandidate],
    pool: &[RetrievalCandidate],
    params: &ContextParams,
) -> AssembledContext {
    let mut seen: HashSet<(String, u32)> = HashSet::new();
    let mut collected: Vec<Chunk> = Vec::new();

    'anchors: for anchor in ranked.iter().map(|c| &c.chunk) {
        if collected.len() >= params.min_chunks {
            break;
        }
        if seen.insert(key(anchor)) {
            debug!(source = %anchor.source, chunk_index = anchor.chunk_index, "context anchor");
            collected.push(anchor.clone());
        }

        for neighbor in neighbors(anchor, pool, params.k_neighbors) {
            if seen.insert(key(neighbor)) {
                debug!(source = %neighbor.source, chunk_index = neighbor.chunk_index, "context neighbour");
                collected.push(neighbor.clone());
            }
            if collected.len() >= params.min_chunks {
                break 'anchors;
            }
        }
    }

    if collected.len() < params.min_chunks {
        warn!(
            collected = collected.len(),
            min_chunks = params.min_chunks,
            "context below minimum chunk count"
        );
    }

    collected.sort_by(|a, b| (&a.source, a.chunk_index).cmp(&(&b.source, b.chunk_index)));
    let text = join_context(&collected);
    info!(chunks = collected.len(), chars = text.len(), "context assembled");
    AssembledContext {
        text,
        chunks: collected,
    }
}

/// Join chunk texts with blank lines, marking every change of source.
pub fn join_context(chunks: &[Chunk]) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(chunks.len() * 2);
    let mut previous: Option<&str> = None;
    for chunk in chunks {
        if previous.is_some_and(|p| p != chunk.source) {
            parts.push(SOURCE_SEPARATOR);
        }
        parts.push(&chunk.text);
        previous = Some(&chunk.source);
    }
    parts.join("\n\n")
}

fn key(chunk: &Chunk) -> (String, u32) {
    (chunk.source.clone(), chunk.chunk_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Confidentiality;

    fn chunk(source: &str, section: &str, idx: u32) -> RetrievalCandidate {
        RetrievalCandidate::new(
            Chunk {
                text: format!("{source}#{idx}"),
                source: source.into(),
                content_hash: source.into(),
                workspace_id: "ws1".into(),
                confidentiality: Confidentiality::Public,
                section_title: section.into(),
                section_index: 0,
                chunk_index: idx,
                page_number: None,
            },
            0.0,
        )
    }

    /// 30 chunks, 10 per section A/B/C, shuffled the way a similarity
    /// search would return them.
    fn pool() -> Vec<RetrievalCandidate> {
        let mut pool: Vec<RetrievalCandidate> = (0..30)
            .map(|i| chunk("d.pdf", ["A", "B", "C"][(i / 10) as usize], i))
            .collect();
        pool.reverse();
        pool
    }

    fn indices(ctx: &AssembledContext) -> Vec<u32> {
        ctx.chunks.iter().map(|c| c.chunk_index).collect()
    }

    #[test]
    fn test_neighbors_stay_in_section() {
        let pool = pool();
        let anchor = chunk("d.pdf", "B", 11).chunk;
        let n: Vec<u32> = neighbors(&anchor, &pool, 3).iter().map(|c| c.chunk_index).collect();
        assert_eq!(n, vec![10, 12, 13, 14]);
    }

    #[test]
    fn test_neighbors_of_unknown_anchor_is_empty() {
        let anchor = chunk("other.pdf", "B", 11).chunk;
        assert!(neighbors(&anchor, &pool(), 3).is_empty());
    }

    #[test]
    fn test_top_one_with_two_neighbors_reaches_floor() {
        let pool = pool();
        let ranked = vec![chunk("d.pdf", "B", 15)];
        let ctx = build_context(
            &ranked,
            &pool,
            &ContextParams {
                k_neighbors: 2,
                min_chunks: 5,
            },
        );
        assert_eq!(indices(&ctx), vec![13, 14, 15, 16, 17]);
        assert!(ctx.chunks.iter().all(|c| c.section_title == "B"));
    }

    #[test]
    fn test_stops_at_min_chunks() {
        let pool = pool();
        let ranked = vec![chunk("d.pdf", "A", 5), chunk("d.pdf", "C", 25)];
        let ctx = build_context(
            &ranked,
            &pool,
            &ContextParams {
                k_neighbors: 3,
                min_chunks: 4,
            },
        );
        assert_eq!(indices(&ctx), vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_dedup_across_overlapping_anchors() {
        let pool = pool();
        let ranked = vec![chunk("d.pdf", "A", 4), chunk("d.pdf", "A", 5), chunk("d.pdf", "A", 4)];
        let ctx = build_context(
            &ranked,
            &pool,
            &ContextParams {
                k_neighbors: 2,
                min_chunks: 50,
            },
        );
        assert_eq!(indices(&ctx), vec![2, 3, 4, 5, 6, 7]);
        let keys: HashSet<(String, u32)> = ctx.chunks.iter().map(key).collect();
        assert_eq!(keys.len(), ctx.chunks.len());
    }

    #[test]
    fn test_final_order_and_source_separator() {
        let pool = vec![chunk("b.pdf", "S", 1), chunk("a.pdf", "S", 0), chunk("a.pdf", "S", 1)];
        let ranked = vec![chunk("b.pdf", "S", 1), chunk("a.pdf", "S", 1)];
        let ctx = build_context(
            &ranked,
            &pool,
            &ContextParams {
                k_neighbors: 1,
                min_chunks: 16,
            },
        );
        assert_eq!(
            ctx.text,
            format!("a.pdf#0\n\na.pdf#1\n\n{SOURCE_SEPARATOR}\n\nb.pdf#1")
        );
    }
}

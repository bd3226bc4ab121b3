//! Content hashing and section-aware chunk splitting.
//!
//! [`content_hash`] fingerprints the raw bytes of a source document; it is
//! the idempotency key checked before anything is indexed.
//!
//! [`split_tagged`] turns summarized, `# `-tagged text into [`Chunk`]s. Each
//! section is split independently with a [`RecursiveSplitter`] so no chunk
//! straddles two sections.
//!
//! # Algorithm
//!
//! 1. Scan the tagged text line by line. A `# Title` marker flushes the
//!    buffered lines of the previous section and opens a new one; text
//!    before the first marker belongs to "Introduction".
//! 2. Each flushed section is split with the recursive splitter: try
//!    separators in priority order (paragraph, line, sentence punctuation),
//!    recurse into pieces that are still too long with the remaining
//!    separators, and fall back to fixed-size character cuts.
//! 3. Adjacent small pieces are merged back up to `chunk_size` characters,
//!    carrying up to `overlap` characters of trailing context into the next
//!    chunk.
//! 4. `chunk_index` runs across the whole document; `section_index` is 0
//!    for the introduction and increments at every marker.
//!
//! Splitting is deterministic for identical input and parameters.
//!
//! # Example
//!
//! ```rust
//! use sectioned_rag_core::chunk::{split_tagged, ChunkOrigin, ChunkingParams};
//! use sectioned_rag_core::models::Confidentiality;
//!
//! let origin = ChunkOrigin {
//!     source: "cctp.pdf".into(),
//!     content_hash: "abc".into(),
//!     workspace_id: "ws1".into(),
//!     confidentiality: Confidentiality::Public,
//! };
//! let chunks = split_tagged("Intro.\n# Objet\nLe marché.", &origin, &ChunkingParams::default());
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[1].section_title, "Objet");
//! assert_eq!(chunks[1].chunk_index, 1);
//! ```

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::models::{Chunk, Confidentiality, INTRODUCTION_TITLE};
use crate::tagging::parse_heading_marker;

/// Splitter configuration. Sizes are counted in characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkingParams {
    pub chunk_size: usize,
    pub overlap: usize,
    /// Separators in priority order. Fixed-size cuts are always the last resort.
    pub separators: Vec<String>,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 55,
            separators: ["\n\n", "\n", ".", "!", "?"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Hex-encoded SHA-256 of the raw document bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Per-document metadata stamped onto every chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOrigin {
    pub source: String,
    pub content_hash: String,
    pub workspace_id: String,
    pub confidentiality: Confidentiality,
}

/// Recursive separator splitter with overlap.
///
/// Separators keep their position at the start of the piece that follows
/// them, so sentence punctuation stays attached to the next sentence rather
/// than being lost.
pub struct RecursiveSplitter {
    chunk_size: usize,
    overlap: usize,
    separators: Vec<String>,
}

impl RecursiveSplitter {
    pub fn new(params: &ChunkingParams) -> Self {
        let mut separators: Vec<String> = params
            .separators
            .iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect();
        separators.push(String::new());
        Self {
            chunk_size: params.chunk_size.max(1),
            overlap: params.overlap,
            separators,
        }
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &self.separators)
    }

    fn split_with(&self, text: &str, separators: &[String]) -> Vec<String> {
        let (idx, separator) = separators
            .iter()
            .enumerate()
            .find(|(_, s)| s.is_empty() || text.contains(s.as_str()))
            .map(|(i, s)| (i, s.as_str()))
            .unwrap_or((separators.len(), ""));
        let remaining = separators.get(idx + 1..).unwrap_or(&[]);

        let mut chunks = Vec::new();
        let mut small: Vec<String> = Vec::new();
        for piece in split_keep_separator(text, separator) {
            if char_len(&piece) < self.chunk_size {
                small.push(piece);
                continue;
            }
            if !small.is_empty() {
                chunks.extend(self.merge(&small));
                small.clear();
            }
            if remaining.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split_with(&piece, remaining));
            }
        }
        if !small.is_empty() {
            chunks.extend(self.merge(&small));
        }
        chunks
    }

    /// Greedily pack pieces up to `chunk_size`, keeping up to `overlap`
    /// characters of the previous chunk at the start of the next one.
    fn merge(&self, pieces: &[String]) -> Vec<String> {
        let mut out = Vec::new();
        let mut window: Vec<&str> = Vec::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                push_joined(&mut out, &window);
                while !window.is_empty()
                    && (total > self.overlap || total + len > self.chunk_size)
                {
                    total -= char_len(window[0]);
                    window.remove(0);
                }
            }
            window.push(piece);
            total += len;
        }
        push_joined(&mut out, &window);
        out
    }
}

fn push_joined(out: &mut Vec<String>, window: &[&str]) {
    let joined = window.concat();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split on `separator`, re-attaching it to the start of each following piece.
/// An empty separator splits into single characters.
fn split_keep_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }
    let mut parts = text.split(separator);
    let mut out: Vec<String> = Vec::new();
    if let Some(first) = parts.next() {
        out.push(first.to_string());
    }
    out.extend(parts.map(|p| format!("{separator}{p}")));
    out.retain(|p| !p.is_empty());
    out
}

/// Split tagged text into chunks carrying section and origin metadata.
pub fn split_tagged(text: &str, origin: &ChunkOrigin, params: &ChunkingParams) -> Vec<Chunk> {
    let splitter = RecursiveSplitter::new(params);
    let mut chunks = Vec::new();
    let mut title = INTRODUCTION_TITLE.to_string();
    let mut section_index: u32 = 0;
    let mut buffer: Vec<&str> = Vec::new();

    for line in text.lines() {
        match parse_heading_marker(line) {
            Some(next) => {
                flush_section(&splitter, &title, section_index, &buffer, origin, &mut chunks);
                title = next.to_string();
                section_index += 1;
                buffer.clear();
            }
            None => buffer.push(line),
        }
    }
    flush_section(&splitter, &title, section_index, &buffer, origin, &mut chunks);

    info!(
        source = %origin.source,
        sections = section_index + 1,
        chunks = chunks.len(),
        "document split"
    );
    chunks
}

fn flush_section(
    splitter: &RecursiveSplitter,
    title: &str,
    section_index: u32,
    lines: &[&str],
    origin: &ChunkOrigin,
    chunks: &mut Vec<Chunk>,
) {
    let body = lines.join("\n");
    let body = body.trim();
    if body.is_empty() {
        return;
    }
    for piece in splitter.split(body) {
        let chunk_index = chunks.len() as u32;
        debug!(chunk_index, section = %title, "chunk created");
        chunks.push(Chunk {
            text: piece,
            source: origin.source.clone(),
            content_hash: origin.content_hash.clone(),
            workspace_id: origin.workspace_id.clone(),
            confidentiality: origin.confidentiality,
            section_title: title.to_string(),
            section_index,
            chunk_index,
            page_number: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> ChunkOrigin {
        ChunkOrigin {
            source: "doc.pdf".into(),
            content_hash: content_hash(b"doc"),
            workspace_id: "ws1".into(),
            confidentiality: Confidentiality::Public,
        }
    }

    fn params(chunk_size: usize, overlap: usize) -> ChunkingParams {
        ChunkingParams {
            chunk_size,
            overlap,
            ..ChunkingParams::default()
        }
    }

    #[test]
    fn test_content_hash_is_stable_sha256() {
        assert_eq!(
            content_hash(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(content_hash(b"same bytes"), content_hash(b"same bytes"));
        assert_ne!(content_hash(b"a"), content_hash(b"b"));
    }

    #[test]
    fn test_short_text_single_chunk() {
        let splitter = RecursiveSplitter::new(&params(500, 55));
        assert_eq!(splitter.split("Une phrase."), vec!["Une phrase."]);
    }

    #[test]
    fn test_prefers_paragraph_breaks() {
        let splitter = RecursiveSplitter::new(&params(20, 0));
        let chunks = splitter.split("premier bloc\n\nsecond bloc\n\ntroisième");
        assert_eq!(chunks, vec!["premier bloc", "second bloc", "troisième"]);
    }

    #[test]
    fn test_sentence_punctuation_splits_keep_separator_in_front() {
        let splitter = RecursiveSplitter::new(&params(12, 0));
        let chunks = splitter.split("Un deux. Trois. Quatre");
        assert_eq!(chunks, vec!["Un deux", ". Trois", ". Quatre"]);
    }

    #[test]
    fn test_fixed_size_fallback() {
        let splitter = RecursiveSplitter::new(&params(4, 0));
        let chunks = splitter.split("abcdefghij");
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 4));
    }

    #[test]
    fn test_overlap_carries_context() {
        let splitter = RecursiveSplitter::new(&params(10, 4));
        let chunks = splitter.split("aaa\nbbb\nccc\nddd");
        assert_eq!(chunks, vec!["aaa\nbbb", "bbb\nccc", "ccc\nddd"]);
    }

    #[test]
    fn test_chunk_index_global_and_section_index_per_marker() {
        let text = "intro\n# A\nalpha\n# B\n\n# C\ngamma";
        let chunks = split_tagged(text, &origin(), &ChunkingParams::default());
        let summary: Vec<(u32, &str, u32)> = chunks
            .iter()
            .map(|c| (c.chunk_index, c.section_title.as_str(), c.section_index))
            .collect();
        assert_eq!(
            summary,
            vec![(0, "Introduction", 0), (1, "A", 1), (2, "C", 3)]
        );
    }

    #[test]
    fn test_chunk_index_strictly_increasing_across_sections() {
        let body = "Phrase courte numéro un. ".repeat(60);
        let text = format!("# A\n{body}\n# B\n{body}\n# C\n{body}");
        let chunks = split_tagged(&text, &origin(), &params(120, 20));
        assert!(chunks.len() > 3);
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].chunk_index, pair[0].chunk_index + 1);
        }
        assert!(chunks.iter().all(|c| c.content_hash == content_hash(b"doc")));
    }

    #[test]
    fn test_chunks_stay_inside_their_section() {
        let a = "Le titulaire fournit les équipements. Il assure la maintenance.\nLes délais sont fixés.";
        let b = "Le prix est ferme. Il est révisable annuellement.";
        let text = format!("# Lot A\n{a}\n# Lot B\n{b}");
        let chunks = split_tagged(&text, &origin(), &params(40, 10));
        for chunk in &chunks {
            let body = if chunk.section_title == "Lot A" { a } else { b };
            assert!(body.contains(&chunk.text), "{:?} not in its section", chunk.text);
        }
        assert!(chunks.iter().any(|c| c.section_title == "Lot B"));
    }

    #[test]
    fn test_empty_sections_produce_no_chunks() {
        let chunks = split_tagged("# A\n\n   \n# B\n", &origin(), &ChunkingParams::default());
        assert!(chunks.is_empty());
    }
}

//! Core data models shared by the ingestion and query pipelines.
//!
//! [`Chunk`] is the only durable type: its field set is the record schema
//! persisted by every [`VectorStore`](crate::store::VectorStore)
//! implementation. Everything else lives for one ingestion or one query.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Title of the implicit section holding text before the first heading.
pub const INTRODUCTION_TITLE: &str = "Introduction";

/// Response returned when nothing survives filtering.
pub const NO_RELEVANT_CONTENT: &str = "Aucun document pertinent trouvé.";

/// Response returned when the query pipeline fails.
pub const GENERIC_FAILURE: &str = "Une erreur s'est produite lors du traitement de la question.";

/// Closed set of confidentiality levels a chunk can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Confidentiality {
    #[serde(rename = "public")]
    Public,
    #[serde(rename = "privé", alias = "prive")]
    Prive,
}

impl Confidentiality {
    pub const ALL: [Confidentiality; 2] = [Confidentiality::Public, Confidentiality::Prive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidentiality::Public => "public",
            Confidentiality::Prive => "privé",
        }
    }
}

impl fmt::Display for Confidentiality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown confidentiality level '{0}' (expected: public, privé)")]
pub struct ParseConfidentialityError(pub String);

impl FromStr for Confidentiality {
    type Err = ParseConfidentialityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "public" => Ok(Confidentiality::Public),
            "privé" | "prive" | "private" => Ok(Confidentiality::Prive),
            _ => Err(ParseConfidentialityError(s.to_string())),
        }
    }
}

/// One ordered unit of extracted document content.
///
/// `page` is 1-based and only known for paginated formats (PDF).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractedBlock {
    /// A heading recognised by the extractor itself (DOCX styles, Markdown ATX).
    Heading { title: String, page: Option<u32> },
    /// Line-oriented text; may still contain `# ` heading markers after tagging.
    Text { text: String, page: Option<u32> },
    /// A table rendered as a markdown pipe table.
    Table { markdown: String, page: Option<u32> },
}

impl ExtractedBlock {
    pub fn page(&self) -> Option<u32> {
        match self {
            ExtractedBlock::Heading { page, .. }
            | ExtractedBlock::Text { page, .. }
            | ExtractedBlock::Table { page, .. } => *page,
        }
    }
}

/// A titled span of a document, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub body: String,
    /// First page the section appears on, when known.
    pub page: Option<u32>,
}

/// The durable, immutable unit of indexed text.
///
/// `content_hash` is identical for every chunk of one source document and
/// is the idempotency key; `chunk_index` is unique and strictly increasing
/// within one ingestion call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source: String,
    pub content_hash: String,
    pub workspace_id: String,
    pub confidentiality: Confidentiality,
    pub section_title: String,
    pub section_index: u32,
    pub chunk_index: u32,
    pub page_number: Option<u32>,
}

impl Chunk {
    /// Identity used for context deduplication.
    pub fn key(&self) -> (&str, u32) {
        (self.source.as_str(), self.chunk_index)
    }
}

/// A question scoped to one workspace and a set of readable levels.
#[derive(Debug, Clone)]
pub struct Query {
    pub question: String,
    pub workspace_id: String,
    pub allowed_confidentiality: BTreeSet<Confidentiality>,
}

impl Query {
    pub fn new(
        question: impl Into<String>,
        workspace_id: impl Into<String>,
        allowed: impl IntoIterator<Item = Confidentiality>,
    ) -> Self {
        Self {
            question: question.into(),
            workspace_id: workspace_id.into(),
            allowed_confidentiality: allowed.into_iter().collect(),
        }
    }

    /// True when the chunk belongs to this workspace and is readable.
    pub fn permits(&self, chunk: &Chunk) -> bool {
        chunk.workspace_id == self.workspace_id
            && self.allowed_confidentiality.contains(&chunk.confidentiality)
    }
}

/// A chunk with a transient relevance score. Scores are never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalCandidate {
    pub chunk: Chunk,
    pub score: f32,
}

impl RetrievalCandidate {
    pub fn new(chunk: Chunk, score: f32) -> Self {
        Self { chunk, score }
    }
}

/// Source attribution attached to an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRef {
    pub title: String,
    pub content: String,
    pub page: Option<u32>,
}

impl From<&Chunk> for SourceRef {
    fn from(chunk: &Chunk) -> Self {
        Self {
            title: chunk.source.clone(),
            content: chunk.text.clone(),
            page: chunk.page_number,
        }
    }
}

/// Final result of the query pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Answer {
    pub response: String,
    pub sources: Vec<SourceRef>,
}

impl Answer {
    pub fn no_relevant_content() -> Self {
        Self {
            response: NO_RELEVANT_CONTENT.to_string(),
            sources: Vec::new(),
        }
    }

    pub fn generic_failure() -> Self {
        Self {
            response: GENERIC_FAILURE.to_string(),
            sources: Vec::new(),
        }
    }
}

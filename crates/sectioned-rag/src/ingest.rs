//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow for one document:
//!
//! ```text
//! extension → size guard → content hash → duplicate check → extract
//!   → (PDF) TOC heading detection → tag → group sections
//!   → summarize each section → render `# <title>` markers → split
//!   → page attribution → add → tombstone older versions
//! ```
//!
//! A document whose hash is already stored short-circuits with
//! [`IngestOutcome::Duplicate`] before any extraction or generator call.
//! Sections are summarized one after the other; a failed slice summary
//! degrades to an excerpt and never fails the document.
//!
//! [`ingest_batch`] runs documents in sequence and records every
//! document's outcome, so one bad file never stops the rest.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

use sectioned_rag_core::chunk::{content_hash, split_tagged, ChunkOrigin, ChunkingParams};
use sectioned_rag_core::generation::Generator;
use sectioned_rag_core::headings::{HeadingDetector, HeadingParams};
use sectioned_rag_core::models::{Chunk, Confidentiality, Section};
use sectioned_rag_core::store::VectorStore;
use sectioned_rag_core::summarize::{summarize_section, SummaryParams};
use sectioned_rag_core::tagging::{group_sections, parse_heading_marker, tag_blocks};

use crate::config::Config;
use crate::extract::{extract, extract_pdf_pages, DocumentKind, ExtractError, ExtractedDocument};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("unsupported document type: {0}")]
    UnsupportedType(String),
    #[error("{name} is {size} bytes, above the {limit} byte limit")]
    TooLarge { name: String, size: u64, limit: u64 },
    #[error("failed to read {}: {error}", .path.display())]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("extraction failed: {0}")]
    Extraction(ExtractError),
    #[error("vector store failed: {0:#}")]
    Store(anyhow::Error),
}

impl From<ExtractError> for IngestError {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::UnsupportedType(name) => IngestError::UnsupportedType(name),
            other => IngestError::Extraction(other),
        }
    }
}

/// Tenant and access level stamped onto every chunk of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestMeta {
    pub workspace_id: String,
    pub confidentiality: Confidentiality,
}

/// Everything ingestion needs besides the collaborators.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub headings: HeadingParams,
    pub summary: SummaryParams,
    pub chunking: ChunkingParams,
    pub heading_styles: Vec<String>,
    pub replace_stale_on_reingest: bool,
    pub max_file_bytes: u64,
}

impl IngestOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            headings: config.headings.params(),
            summary: config.summary.params(),
            chunking: config.chunking.params(),
            heading_styles: config.ingest.heading_styles.clone(),
            replace_stale_on_reingest: config.ingest.replace_stale_on_reingest,
            max_file_bytes: config.ingest.max_file_bytes,
        }
    }
}

impl Default for IngestOptions {
    fn default() -> Self {
        let ingest = crate::config::IngestConfig::default();
        Self {
            headings: HeadingParams::default(),
            summary: SummaryParams::default(),
            chunking: ChunkingParams::default(),
            heading_styles: ingest.heading_styles,
            replace_stale_on_reingest: ingest.replace_stale_on_reingest,
            max_file_bytes: ingest.max_file_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum IngestOutcome {
    Indexed {
        content_hash: String,
        sections: usize,
        chunks: usize,
        /// Chunks of an older version of the same source that were removed.
        replaced: usize,
    },
    Duplicate {
        content_hash: String,
    },
}

/// Ingest one document held in memory.
pub async fn ingest_document(
    filename: &str,
    bytes: &[u8],
    meta: &IngestMeta,
    store: &dyn VectorStore,
    generator: &dyn Generator,
    options: &IngestOptions,
) -> Result<IngestOutcome, IngestError> {
    let kind = DocumentKind::from_filename(filename)?;
    check_size(filename, bytes.len() as u64, options.max_file_bytes)?;

    let hash = content_hash(bytes);
    info!(source = filename, content_hash = %hash, "content hash computed");
    if store.contains_hash(&hash).await.map_err(IngestError::Store)? {
        info!(source = filename, content_hash = %hash, "duplicate document, skipping");
        return Ok(IngestOutcome::Duplicate { content_hash: hash });
    }

    let document = extract(kind, bytes, &options.heading_styles)?;
    index_document(filename, hash, document, meta, store, generator, options).await
}

/// Index an already extracted document under `hash`. No duplicate check.
pub async fn index_document(
    filename: &str,
    hash: String,
    document: ExtractedDocument,
    meta: &IngestMeta,
    store: &dyn VectorStore,
    generator: &dyn Generator,
    options: &IngestOptions,
) -> Result<IngestOutcome, IngestError> {
    let sections = structure(document, &options.headings);
    info!(source = filename, sections = sections.len(), "sections found");

    let rendered = render_summaries(&sections, generator, &options.summary).await;
    let origin = ChunkOrigin {
        source: filename.to_string(),
        content_hash: hash.clone(),
        workspace_id: meta.workspace_id.clone(),
        confidentiality: meta.confidentiality,
    };
    let mut chunks = split_tagged(&rendered, &origin, &options.chunking);
    attribute_pages(&mut chunks, &sections);
    if chunks.is_empty() {
        warn!(source = filename, "document produced no chunks");
    }

    // The older version goes only once the new one is stored.
    let written = store.add(&chunks).await.map_err(IngestError::Store)?;
    info!(source = filename, chunks = written, "chunks indexed");

    let replaced = if options.replace_stale_on_reingest {
        store
            .delete_other_versions(&meta.workspace_id, filename, &hash)
            .await
            .map_err(IngestError::Store)?
    } else {
        0
    };
    if replaced > 0 {
        info!(source = filename, replaced, "older version removed");
    }

    Ok(IngestOutcome::Indexed {
        content_hash: hash,
        sections: sections.len(),
        chunks: written,
        replaced,
    })
}

fn check_size(name: &str, size: u64, limit: u64) -> Result<(), IngestError> {
    if size > limit {
        return Err(IngestError::TooLarge {
            name: name.to_string(),
            size,
            limit,
        });
    }
    Ok(())
}

/// Sections of an extracted document. Paginated documents get their titles
/// from the table of contents on the leading pages.
pub fn structure(document: ExtractedDocument, params: &HeadingParams) -> Vec<Section> {
    let blocks = if document.pages.is_empty() {
        document.blocks
    } else {
        let titles = HeadingDetector::new(params.clone()).detect(&document.pages);
        info!(titles = titles.len(), "titles detected from table of contents");
        tag_blocks(document.blocks, &titles)
    };
    group_sections(&blocks)
}

/// Summarize every section in order and render the tagged text the
/// splitter consumes. Sections with an empty body render as a bare marker.
pub async fn render_summaries(
    sections: &[Section],
    generator: &dyn Generator,
    params: &SummaryParams,
) -> String {
    let mut out = String::new();
    for section in sections {
        let title = marker_title(&section.title);
        out.push_str(&format!("# {title}\n\n"));
        if section.body.trim().is_empty() {
            continue;
        }
        let summary = summarize_section(&title, &section.body, generator, params).await;
        for line in summary.lines() {
            // A stray "# " line inside a summary must not open a section.
            if parse_heading_marker(line).is_some() {
                out.push('#');
                out.push_str(line.trim_start());
            } else {
                out.push_str(line);
            }
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

fn marker_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Each chunk inherits the first page of its section, when known.
pub fn attribute_pages(chunks: &mut [Chunk], sections: &[Section]) {
    let mut pages: HashMap<String, u32> = HashMap::new();
    for section in sections {
        if let Some(page) = section.page {
            pages.entry(marker_title(&section.title)).or_insert(page);
        }
    }
    for chunk in chunks {
        chunk.page_number = pages.get(&chunk.section_title).copied();
    }
}

/// Detect TOC titles of a PDF on disk.
pub async fn detect_headings_from_path(
    path: &Path,
    params: &HeadingParams,
) -> Result<Vec<String>, IngestError> {
    let filename = path.to_string_lossy();
    if DocumentKind::from_filename(&filename)? != DocumentKind::Pdf {
        return Err(IngestError::UnsupportedType(filename.into_owned()));
    }
    let bytes = read_file(path).await?;
    let pages = extract_pdf_pages(&bytes)?;
    let lines: Vec<Vec<String>> = pages
        .iter()
        .map(|p| p.lines().map(str::to_string).collect())
        .collect();
    Ok(HeadingDetector::new(params.clone()).detect(&lines))
}

async fn read_file(path: &Path) -> Result<Vec<u8>, IngestError> {
    tokio::fs::read(path).await.map_err(|error| {
        if error.kind() == std::io::ErrorKind::NotFound {
            IngestError::NotFound(path.to_path_buf())
        } else {
            IngestError::Io {
                path: path.to_path_buf(),
                error,
            }
        }
    })
}

/// Outcome of one file in a batch.
#[derive(Debug)]
pub struct FileReport {
    pub path: PathBuf,
    pub outcome: Result<IngestOutcome, IngestError>,
}

/// Per-status counts over a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchTotals {
    pub indexed: usize,
    pub duplicate: usize,
    pub errors: usize,
    pub chunks: usize,
}

impl BatchTotals {
    pub fn from_reports(reports: &[FileReport]) -> Self {
        let mut totals = Self::default();
        for report in reports {
            match &report.outcome {
                Ok(IngestOutcome::Indexed { chunks, .. }) => {
                    totals.indexed += 1;
                    totals.chunks += chunks;
                }
                Ok(IngestOutcome::Duplicate { .. }) => totals.duplicate += 1,
                Err(_) => totals.errors += 1,
            }
        }
        totals
    }
}

/// Ingest files one by one. The source name of each document is its file
/// name. Failures are recorded per file and never abort the batch.
pub async fn ingest_batch(
    paths: &[PathBuf],
    meta: &IngestMeta,
    store: &dyn VectorStore,
    generator: &dyn Generator,
    options: &IngestOptions,
) -> Vec<FileReport> {
    let mut reports = Vec::with_capacity(paths.len());
    for path in paths {
        let outcome = ingest_path(path, meta, store, generator, options).await;
        if let Err(e) = &outcome {
            warn!(path = %path.display(), error = %e, "document failed");
        }
        reports.push(FileReport {
            path: path.clone(),
            outcome,
        });
    }
    reports
}

async fn ingest_path(
    path: &Path,
    meta: &IngestMeta,
    store: &dyn VectorStore,
    generator: &dyn Generator,
    options: &IngestOptions,
) -> Result<IngestOutcome, IngestError> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| IngestError::UnsupportedType(path.display().to_string()))?;
    DocumentKind::from_filename(&filename)?;

    let size = tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .map_err(|error| match error.kind() {
            std::io::ErrorKind::NotFound => IngestError::NotFound(path.to_path_buf()),
            _ => IngestError::Io {
                path: path.to_path_buf(),
                error,
            },
        })?;
    check_size(&filename, size, options.max_file_bytes)?;

    let bytes = read_file(path).await?;
    ingest_document(&filename, &bytes, meta, store, generator, options).await
}

/// Expand CLI arguments into files. Directories are walked recursively and
/// contribute only supported documents; explicit files are kept as given so
/// an unsupported one is reported rather than silently skipped.
pub fn collect_files(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(input)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| DocumentKind::from_filename(&p.to_string_lossy()).is_ok())
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }
    files
}

/// `srag ingest`: index files and print one status line per file.
pub async fn run_ingest(
    config: &Config,
    inputs: &[PathBuf],
    meta: &IngestMeta,
) -> Result<BatchTotals> {
    let store = crate::open_store(config).await?;
    let generator = crate::generator::create_generator(&config.generator)?;
    let options = IngestOptions::from_config(config);

    let files = collect_files(inputs);
    let reports = ingest_batch(&files, meta, store.as_ref(), generator.as_ref(), &options).await;

    for report in &reports {
        match &report.outcome {
            Ok(IngestOutcome::Indexed {
                chunks, replaced, ..
            }) => {
                if *replaced > 0 {
                    println!(
                        "indexed    {} ({} chunks, replaced {})",
                        report.path.display(),
                        chunks,
                        replaced
                    );
                } else {
                    println!("indexed    {} ({} chunks)", report.path.display(), chunks);
                }
            }
            Ok(IngestOutcome::Duplicate { content_hash }) => {
                println!(
                    "duplicate  {} ({})",
                    report.path.display(),
                    &content_hash[..content_hash.len().min(12)]
                );
            }
            Err(e) => println!("error      {}: {}", report.path.display(), e),
        }
    }

    let totals = BatchTotals::from_reports(&reports);
    println!(
        "ingest: {} indexed, {} duplicate, {} failed, {} chunks written",
        totals.indexed, totals.duplicate, totals.errors, totals.chunks
    );
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sectioned_rag_core::models::ExtractedBlock;
    use sectioned_rag_core::store::memory::InMemoryVectorStore;

    struct Offline;

    #[async_trait::async_trait]
    impl Generator for Offline {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            anyhow::bail!("offline")
        }
    }

    fn meta() -> IngestMeta {
        IngestMeta {
            workspace_id: "ws1".into(),
            confidentiality: Confidentiality::Public,
        }
    }

    fn section(title: &str, body: &str, page: Option<u32>) -> Section {
        Section {
            title: title.into(),
            body: body.into(),
            page,
        }
    }

    #[tokio::test]
    async fn test_render_summaries_markers_and_empty_sections() {
        let sections = vec![
            section("Introduction", "Préambule.", Some(1)),
            section("ARTICLE 1\nDÉFINITIONS", "", Some(2)),
            section("ARTICLE 2", "# faux titre\nCorps.", Some(3)),
        ];
        let rendered = render_summaries(&sections, &Offline, &SummaryParams::default()).await;
        assert_eq!(
            rendered,
            "# Introduction\n\nIntroduction\n\nPréambule.\n\n\
             # ARTICLE 1 DÉFINITIONS\n\n\
             # ARTICLE 2\n\nARTICLE 2\n\n## faux titre\nCorps.\n\n"
        );
    }

    #[test]
    fn test_attribute_pages_by_section() {
        let sections = vec![section("Introduction", "x", None), section("Prix", "y", Some(4))];
        let chunk = |title: &str| Chunk {
            text: "t".into(),
            source: "a.pdf".into(),
            content_hash: "h".into(),
            workspace_id: "ws1".into(),
            confidentiality: Confidentiality::Public,
            section_title: title.into(),
            section_index: 0,
            chunk_index: 0,
            page_number: None,
        };
        let mut chunks = vec![chunk("Introduction"), chunk("Prix")];
        attribute_pages(&mut chunks, &sections);
        assert_eq!(chunks[0].page_number, None);
        assert_eq!(chunks[1].page_number, Some(4));
    }

    #[test]
    fn test_structure_without_pages_keeps_extracted_headings() {
        let document = ExtractedDocument {
            blocks: vec![
                ExtractedBlock::Heading {
                    title: "Objet".into(),
                    page: None,
                },
                ExtractedBlock::Text {
                    text: "Fourniture de mobilier.".into(),
                    page: None,
                },
            ],
            pages: Vec::new(),
        };
        let sections = structure(document, &HeadingParams::default());
        assert_eq!(sections, vec![section("Objet", "Fourniture de mobilier.", None)]);
    }

    #[tokio::test]
    async fn test_unsupported_type_and_size_guard() {
        let store = InMemoryVectorStore::new();
        let err = ingest_document("devis.xlsx", b"x", &meta(), &store, &Offline, &IngestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedType(_)));

        let options = IngestOptions {
            max_file_bytes: 4,
            ..IngestOptions::default()
        };
        let err = ingest_document("notes.md", b"# Titre\n\ncorps", &meta(), &store, &Offline, &options)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::TooLarge { size: 14, .. }));
    }

    #[tokio::test]
    async fn test_detect_headings_missing_file() {
        let err = detect_headings_from_path(Path::new("/nonexistent/cctp.pdf"), &HeadingParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::NotFound(_)));
    }

    #[test]
    fn test_batch_totals() {
        let reports = vec![
            FileReport {
                path: "a.md".into(),
                outcome: Ok(IngestOutcome::Indexed {
                    content_hash: "h1".into(),
                    sections: 2,
                    chunks: 5,
                    replaced: 0,
                }),
            },
            FileReport {
                path: "b.md".into(),
                outcome: Ok(IngestOutcome::Duplicate {
                    content_hash: "h1".into(),
                }),
            },
            FileReport {
                path: "c.xlsx".into(),
                outcome: Err(IngestError::UnsupportedType("c.xlsx".into())),
            },
        ];
        assert_eq!(
            BatchTotals::from_reports(&reports),
            BatchTotals {
                indexed: 1,
                duplicate: 1,
                errors: 1,
                chunks: 5
            }
        );
    }
}

//! Document extraction into ordered blocks.
//!
//! The file extension selects the extractor. Each one returns the document
//! as an ordered stream of [`ExtractedBlock`]s:
//!
//! | Kind | Text | Headings | Tables |
//! |------|------|----------|--------|
//! | PDF (`pdf-extract`) | one block per page stretch, page-numbered | none (recovered later from the TOC) | whitespace-aligned column runs rendered as markdown |
//! | DOCX (`zip` + `quick-xml`) | one block per paragraph | paragraphs whose style is a configured heading style | `w:tbl` rendered as markdown |
//! | Markdown (`pulldown-cmark`) | paragraphs and list items | ATX and setext headings | pipe tables |
//!
//! Extraction never panics on malformed input; it returns an
//! [`ExtractError`] and the caller skips that document.

use std::collections::HashSet;
use std::io::Read;
use std::sync::LazyLock;

use quick_xml::events::{BytesStart, Event};
use regex::Regex;
use sectioned_rag_core::models::ExtractedBlock;
use thiserror::Error;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported document type: {0}")]
    UnsupportedType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("document is not valid UTF-8: {0}")]
    Utf8(String),
}

/// Extractor selected from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    Markdown,
}

impl DocumentKind {
    pub fn from_filename(filename: &str) -> Result<Self, ExtractError> {
        let ext = std::path::Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(DocumentKind::Pdf),
            "docx" => Ok(DocumentKind::Docx),
            "md" => Ok(DocumentKind::Markdown),
            _ => Err(ExtractError::UnsupportedType(filename.to_string())),
        }
    }
}

/// Extraction result. `pages` holds raw per-page lines for paginated
/// documents and is empty otherwise.
#[derive(Debug, Clone, Default)]
pub struct ExtractedDocument {
    pub blocks: Vec<ExtractedBlock>,
    pub pages: Vec<Vec<String>>,
}

pub fn extract(
    kind: DocumentKind,
    bytes: &[u8],
    heading_styles: &[String],
) -> Result<ExtractedDocument, ExtractError> {
    match kind {
        DocumentKind::Pdf => Ok(from_pages(extract_pdf_pages(bytes)?)),
        DocumentKind::Docx => Ok(ExtractedDocument {
            blocks: extract_docx(bytes, heading_styles)?,
            pages: Vec::new(),
        }),
        DocumentKind::Markdown => {
            let text = std::str::from_utf8(bytes).map_err(|e| ExtractError::Utf8(e.to_string()))?;
            Ok(ExtractedDocument {
                blocks: extract_markdown(text),
                pages: Vec::new(),
            })
        }
    }
}

/// Build a paginated document from per-page text.
///
/// Runs of at least [`MIN_TABLE_ROWS`] consecutive lines that split into the
/// same number of whitespace-aligned columns become markdown tables; the
/// rest of the page stays text.
pub fn from_pages(pages: Vec<String>) -> ExtractedDocument {
    let lines = pages
        .iter()
        .map(|p| p.lines().map(str::to_string).collect())
        .collect();
    let blocks = pages
        .iter()
        .enumerate()
        .flat_map(|(i, text)| page_blocks(text, i as u32 + 1))
        .collect();
    ExtractedDocument {
        blocks,
        pages: lines,
    }
}

/// Fewest aligned rows that make a table.
pub const MIN_TABLE_ROWS: usize = 2;

static COLUMN_GAP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\t|\s{2,}").expect("column gap is a valid regex"));

/// Cells of a line laid out in columns, or `None` for a prose line.
pub fn table_cells(line: &str) -> Option<Vec<String>> {
    let cells: Vec<String> = COLUMN_GAP
        .split(line.trim())
        .map(str::to_string)
        .filter(|cell| !cell.is_empty())
        .collect();
    (cells.len() >= 2).then_some(cells)
}

fn table_run(lines: &[&str]) -> Vec<Vec<String>> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    for line in lines {
        match table_cells(line) {
            Some(cells) if rows.first().map_or(true, |first| first.len() == cells.len()) => {
                rows.push(cells)
            }
            _ => break,
        }
    }
    rows
}

fn page_blocks(text: &str, page: u32) -> Vec<ExtractedBlock> {
    let lines: Vec<&str> = text.lines().collect();
    let mut blocks = Vec::new();
    let mut prose: Vec<&str> = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        let rows = table_run(&lines[i..]);
        if rows.len() < MIN_TABLE_ROWS {
            prose.push(lines[i]);
            i += 1;
            continue;
        }
        flush_prose(&mut blocks, &mut prose, page);
        if let Some(markdown) = table_to_markdown(&rows) {
            blocks.push(ExtractedBlock::Table {
                markdown,
                page: Some(page),
            });
        }
        i += rows.len();
    }
    flush_prose(&mut blocks, &mut prose, page);
    blocks
}

fn flush_prose(blocks: &mut Vec<ExtractedBlock>, prose: &mut Vec<&str>, page: u32) {
    let text = prose.join("\n");
    prose.clear();
    if !text.trim().is_empty() {
        blocks.push(ExtractedBlock::Text {
            text,
            page: Some(page),
        });
    }
}

/// Text of every page, in page order.
pub fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    // pdf-extract panics on some malformed fonts and xref tables.
    let result = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes));
    match result {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(ExtractError::Pdf(e.to_string())),
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(ExtractError::Pdf(msg))
        }
    }
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{name}: {e}")))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

pub fn extract_docx(bytes: &[u8], heading_styles: &[String]) -> Result<Vec<ExtractedBlock>, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    parse_document_xml(&xml, heading_styles)
}

/// Style ids compare on their lowercase alphanumerics, so a configured
/// "CCTP - Titre 1" matches the style id "CCTP-Titre1".
fn normalize_style(style: &str) -> String {
    style
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Walks `w:body` in document order.
struct DocxWalker {
    heading_styles: HashSet<String>,
    blocks: Vec<ExtractedBlock>,
    paragraph: String,
    style: Option<String>,
    in_text: bool,
    table_depth: usize,
    rows: Vec<Vec<String>>,
    row: Vec<String>,
    cell: Vec<String>,
}

impl DocxWalker {
    fn new(heading_styles: &[String]) -> Self {
        Self {
            heading_styles: heading_styles.iter().map(|s| normalize_style(s)).collect(),
            blocks: Vec::new(),
            paragraph: String::new(),
            style: None,
            in_text: false,
            table_depth: 0,
            rows: Vec::new(),
            row: Vec::new(),
            cell: Vec::new(),
        }
    }

    fn open(&mut self, e: &BytesStart, empty: bool) {
        match e.local_name().as_ref() {
            b"p" if !empty => {
                self.paragraph.clear();
                self.style = None;
            }
            b"pStyle" => {
                self.style = e
                    .attributes()
                    .flatten()
                    .find(|a| a.key.local_name().as_ref() == b"val")
                    .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()));
            }
            b"t" if !empty => self.in_text = true,
            b"tab" => self.paragraph.push(' '),
            b"br" => self.paragraph.push('\n'),
            b"tbl" if !empty => {
                self.table_depth += 1;
                if self.table_depth == 1 {
                    self.rows.clear();
                }
            }
            b"tr" if !empty && self.table_depth == 1 => self.row.clear(),
            b"tc" if !empty && self.table_depth == 1 => self.cell.clear(),
            _ => {}
        }
    }

    fn close(&mut self, local_name: &[u8]) {
        match local_name {
            b"t" => self.in_text = false,
            b"p" => self.finish_paragraph(),
            b"tc" if self.table_depth == 1 => {
                let cell = std::mem::take(&mut self.cell).join(" ");
                self.row.push(cell);
            }
            b"tr" if self.table_depth == 1 => {
                let row = std::mem::take(&mut self.row);
                self.rows.push(row);
            }
            b"tbl" => {
                self.table_depth = self.table_depth.saturating_sub(1);
                if self.table_depth == 0 {
                    if let Some(markdown) = table_to_markdown(&self.rows) {
                        self.blocks.push(ExtractedBlock::Table {
                            markdown,
                            page: None,
                        });
                    }
                    self.rows.clear();
                }
            }
            _ => {}
        }
    }

    fn finish_paragraph(&mut self) {
        let text = std::mem::take(&mut self.paragraph).trim().to_string();
        let style = self.style.take();
        if text.is_empty() {
            return;
        }
        if self.table_depth > 0 {
            self.cell.push(text);
            return;
        }
        let is_heading = style.is_some_and(|s| self.heading_styles.contains(&normalize_style(&s)));
        self.blocks.push(if is_heading {
            ExtractedBlock::Heading {
                title: text,
                page: None,
            }
        } else {
            ExtractedBlock::Text { text, page: None }
        });
    }
}

fn parse_document_xml(xml: &[u8], heading_styles: &[String]) -> Result<Vec<ExtractedBlock>, ExtractError> {
    let mut walker = DocxWalker::new(heading_styles);
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => walker.open(&e, false),
            Ok(Event::Empty(e)) => walker.open(&e, true),
            Ok(Event::End(e)) => walker.close(e.local_name().as_ref()),
            Ok(Event::Text(te)) if walker.in_text => {
                let text = te.unescape().map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                walker.paragraph.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(walker.blocks)
}

/// Render table rows as a markdown pipe table.
///
/// The first non-empty row is the header. Rows whose cells are all empty
/// are dropped and short rows are padded to the widest row. Returns `None`
/// when nothing is left.
pub fn table_to_markdown(rows: &[Vec<String>]) -> Option<String> {
    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.iter().map(|cell| clean_cell(cell)).collect::<Vec<_>>())
        .filter(|row| row.iter().any(|cell| !cell.is_empty()))
        .collect();
    let width = rows.iter().map(Vec::len).max()?;

    let mut lines = Vec::with_capacity(rows.len() + 1);
    for (i, row) in rows.into_iter().enumerate() {
        let mut cells = row;
        cells.resize(width, String::new());
        lines.push(format!("| {} |", cells.join(" | ")));
        if i == 0 {
            lines.push(format!("|{}", " --- |".repeat(width)));
        }
    }
    Some(lines.join("\n"))
}

fn clean_cell(cell: &str) -> String {
    cell.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "\\|")
}

/// Markdown into heading, text and table blocks.
pub fn extract_markdown(text: &str) -> Vec<ExtractedBlock> {
    use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};

    let mut walker = MarkdownWalker::default();
    for event in Parser::new_ext(text, Options::ENABLE_TABLES) {
        match event {
            Event::Start(Tag::Heading { .. }) => {
                walker.flush_text();
                walker.heading = Some(String::new());
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some(title) = walker.heading.take() {
                    let title = title.trim().to_string();
                    if !title.is_empty() {
                        walker.blocks.push(ExtractedBlock::Heading { title, page: None });
                    }
                }
            }
            Event::Start(Tag::Table(_)) => {
                walker.flush_text();
                walker.in_table = true;
                walker.rows.clear();
            }
            Event::End(TagEnd::Table) => {
                walker.in_table = false;
                if let Some(markdown) = table_to_markdown(&walker.rows) {
                    walker.blocks.push(ExtractedBlock::Table {
                        markdown,
                        page: None,
                    });
                }
                walker.rows.clear();
            }
            Event::Start(Tag::TableHead) | Event::Start(Tag::TableRow) => walker.row.clear(),
            Event::End(TagEnd::TableHead) | Event::End(TagEnd::TableRow) => {
                let row = std::mem::take(&mut walker.row);
                walker.rows.push(row);
            }
            Event::Start(Tag::TableCell) => walker.cell.clear(),
            Event::End(TagEnd::TableCell) => {
                let cell = std::mem::take(&mut walker.cell);
                walker.row.push(cell);
            }
            Event::Start(Tag::Item) => walker.push_str("- "),
            Event::Text(t) | Event::Code(t) => walker.push_str(&t),
            Event::SoftBreak | Event::HardBreak => walker.push_str(" "),
            Event::End(TagEnd::Paragraph) | Event::End(TagEnd::CodeBlock) => walker.push_str("\n\n"),
            Event::End(TagEnd::Item) => walker.push_str("\n"),
            _ => {}
        }
    }
    walker.flush_text();
    walker.blocks
}

#[derive(Default)]
struct MarkdownWalker {
    blocks: Vec<ExtractedBlock>,
    text: String,
    heading: Option<String>,
    in_table: bool,
    rows: Vec<Vec<String>>,
    row: Vec<String>,
    cell: String,
}

impl MarkdownWalker {
    fn push_str(&mut self, s: &str) {
        if let Some(heading) = self.heading.as_mut() {
            heading.push_str(s);
        } else if self.in_table {
            self.cell.push_str(s);
        } else {
            self.text.push_str(s);
        }
    }

    fn flush_text(&mut self) {
        let text = std::mem::take(&mut self.text);
        let text = text.trim();
        if !text.is_empty() {
            self.blocks.push(ExtractedBlock::Text {
                text: text.to_string(),
                page: None,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx(document_xml: &str) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("word/document.xml", options).unwrap();
            zip.write_all(document_xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    fn styles() -> Vec<String> {
        vec!["CCTP - Titre 1".to_string(), "Heading1".to_string()]
    }

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(DocumentKind::from_filename("a/CCTP.PDF").unwrap(), DocumentKind::Pdf);
        assert_eq!(DocumentKind::from_filename("notes.md").unwrap(), DocumentKind::Markdown);
        assert_eq!(DocumentKind::from_filename("x.docx").unwrap(), DocumentKind::Docx);
        let err = DocumentKind::from_filename("budget.xlsx").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedType(_)));
        assert!(DocumentKind::from_filename("README").is_err());
    }

    #[test]
    fn test_invalid_pdf_returns_error() {
        let err = extract(DocumentKind::Pdf, b"not a pdf", &[]).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn test_invalid_zip_returns_error_for_docx() {
        let err = extract(DocumentKind::Docx, b"not a zip", &[]).unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn test_docx_without_document_xml() {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            zip.start_file("word/styles.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<w:styles/>").unwrap();
            zip.finish().unwrap();
        }
        let err = extract_docx(&buf.into_inner(), &[]).unwrap_err();
        assert!(err.to_string().contains("word/document.xml"));
    }

    #[test]
    fn test_docx_headings_paragraphs_and_tables_in_order() {
        let xml = r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>
<w:p><w:r><w:t>Préambule du marché</w:t></w:r></w:p>
<w:p><w:pPr><w:pStyle w:val="CCTP-Titre1"/></w:pPr><w:r><w:t>Objet</w:t></w:r><w:r><w:t xml:space="preserve"> du marché</w:t></w:r></w:p>
<w:p><w:r><w:t>Le titulaire fournit &amp; installe.</w:t></w:r></w:p>
<w:tbl>
<w:tr><w:tc><w:p><w:r><w:t>Lot</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>Montant</w:t></w:r></w:p></w:tc></w:tr>
<w:tr><w:tc><w:p/></w:tc><w:tc><w:p/></w:tc></w:tr>
<w:tr><w:tc><w:p><w:r><w:t>1</w:t></w:r></w:p></w:tc></w:tr>
</w:tbl>
<w:p><w:pPr><w:pStyle w:val="Normal"/></w:pPr><w:r><w:t>Fin</w:t></w:r></w:p>
</w:body></w:document>"#;
        let blocks = extract_docx(&docx(xml), &styles()).unwrap();
        assert_eq!(
            blocks,
            vec![
                ExtractedBlock::Text {
                    text: "Préambule du marché".into(),
                    page: None
                },
                ExtractedBlock::Heading {
                    title: "Objet du marché".into(),
                    page: None
                },
                ExtractedBlock::Text {
                    text: "Le titulaire fournit & installe.".into(),
                    page: None
                },
                ExtractedBlock::Table {
                    markdown: "| Lot | Montant |\n| --- | --- |\n| 1 |  |".into(),
                    page: None
                },
                ExtractedBlock::Text {
                    text: "Fin".into(),
                    page: None
                },
            ]
        );
    }

    #[test]
    fn test_table_to_markdown() {
        let rows = vec![
            vec!["Poste".to_string(), "Prix | HT".to_string()],
            vec![" ".to_string(), "".to_string()],
            vec!["Pose".to_string(), "120".to_string(), "€".to_string()],
        ];
        assert_eq!(
            table_to_markdown(&rows).unwrap(),
            "| Poste | Prix \\| HT |  |\n| --- | --- | --- |\n| Pose | 120 | € |"
        );
        assert!(table_to_markdown(&[]).is_none());
        assert!(table_to_markdown(&[vec![String::new()]]).is_none());
    }

    #[test]
    fn test_markdown_blocks() {
        let md = "Avant-propos.\n\n# Délais\n\nSix mois.\n\n- visite\n- réception\n\n## Prix\n\n| Lot | Prix |\n|-----|------|\n| A | 10 |\n";
        let blocks = extract_markdown(md);
        assert_eq!(
            blocks,
            vec![
                ExtractedBlock::Text {
                    text: "Avant-propos.".into(),
                    page: None
                },
                ExtractedBlock::Heading {
                    title: "Délais".into(),
                    page: None
                },
                ExtractedBlock::Text {
                    text: "Six mois.\n\n- visite\n- réception".into(),
                    page: None
                },
                ExtractedBlock::Heading {
                    title: "Prix".into(),
                    page: None
                },
                ExtractedBlock::Table {
                    markdown: "| Lot | Prix |\n| --- | --- |\n| A | 10 |".into(),
                    page: None
                },
            ]
        );
    }

    #[test]
    fn test_pages_become_numbered_blocks() {
        let doc = from_pages(vec!["Sommaire\nARTICLE 1".into(), "   ".into(), "Corps".into()]);
        assert_eq!(doc.pages.len(), 3);
        assert_eq!(doc.pages[0], vec!["Sommaire".to_string(), "ARTICLE 1".to_string()]);
        let pages: Vec<Option<u32>> = doc.blocks.iter().map(ExtractedBlock::page).collect();
        assert_eq!(pages, vec![Some(1), Some(3)]);
    }

    #[test]
    fn test_aligned_columns_become_a_table() {
        let doc = from_pages(vec![
            "ARTICLE 3 PRIX\nBordereau des prix :\nLot     Désignation        Prix HT\n1       Tables             1 200\n2       Chaises            800\nLes prix sont fermes.".into(),
        ]);
        assert_eq!(
            doc.blocks,
            vec![
                ExtractedBlock::Text {
                    text: "ARTICLE 3 PRIX\nBordereau des prix :".into(),
                    page: Some(1)
                },
                ExtractedBlock::Table {
                    markdown: "| Lot | Désignation | Prix HT |\n| --- | --- | --- |\n| 1 | Tables | 1 200 |\n| 2 | Chaises | 800 |".into(),
                    page: Some(1)
                },
                ExtractedBlock::Text {
                    text: "Les prix sont fermes.".into(),
                    page: Some(1)
                },
            ]
        );
    }

    #[test]
    fn test_single_aligned_line_stays_text() {
        let doc = from_pages(vec!["Montant total    2 000\nPayable à 30 jours.".into()]);
        assert_eq!(
            doc.blocks,
            vec![ExtractedBlock::Text {
                text: "Montant total    2 000\nPayable à 30 jours.".into(),
                page: Some(1)
            }]
        );
        assert_eq!(table_cells("Montant total    2 000").unwrap(), vec!["Montant total", "2 000"]);
        assert!(table_cells("ARTICLE 1 OBJET DU MARCHÉ").is_none());
    }

    #[test]
    fn test_markdown_rejects_invalid_utf8() {
        let err = extract(DocumentKind::Markdown, &[0xff, 0xfe, 0x00], &[]).unwrap_err();
        assert!(matches!(err, ExtractError::Utf8(_)));
    }
}

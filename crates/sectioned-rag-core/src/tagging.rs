//! Section tagging and grouping.
//!
//! [`tag_sections`] marks every line whose normalized form exactly equals a
//! normalized TOC title with a `# ` heading marker. Matching is exact on the
//! normalized form only: a title whose punctuation or wording drifts between
//! the table of contents and the body is left untagged and reported with a
//! warning.
//!
//! [`group_sections`] then folds an ordered block stream into [`Section`]s,
//! opening the implicit "Introduction" section for leading text.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::models::{ExtractedBlock, Section, INTRODUCTION_TITLE};

static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\W_]+").expect("non-word regex is valid"));
static LINE_CONTROL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\r\n\t\x0b\x0c]").expect("control regex is valid"));

/// Matching key for titles: non-alphanumeric runs become one space, lowercased.
pub fn normalize_title(title: &str) -> String {
    NON_WORD.replace_all(title, " ").to_lowercase().trim().to_string()
}

/// Returns the title of a `# Title` marker line, if `line` is one.
pub fn parse_heading_marker(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix("# ")?;
    let title = rest.trim();
    (!title.is_empty()).then_some(title)
}

/// Insert a `# ` marker before each line matching a detected title.
pub fn tag_sections(text: &str, titles: &[String]) -> String {
    let mut tagger = Tagger::new(titles);
    let tagged = tagger.tag(text);
    tagger.report_untagged();
    tagged
}

/// Tag every text block of a document against the same title set.
///
/// Heading and table blocks pass through unchanged.
pub fn tag_blocks(blocks: Vec<ExtractedBlock>, titles: &[String]) -> Vec<ExtractedBlock> {
    if titles.is_empty() {
        return blocks;
    }
    let mut tagger = Tagger::new(titles);
    let tagged = blocks
        .into_iter()
        .map(|block| match block {
            ExtractedBlock::Text { text, page } => ExtractedBlock::Text {
                text: tagger.tag(&text),
                page,
            },
            other => other,
        })
        .collect();
    tagger.report_untagged();
    tagged
}

struct Tagger<'a> {
    titles: &'a [String],
    keys: HashSet<String>,
    matched: HashSet<String>,
}

impl<'a> Tagger<'a> {
    fn new(titles: &'a [String]) -> Self {
        let keys = titles
            .iter()
            .map(|t| normalize_title(t))
            .filter(|k| !k.is_empty())
            .collect();
        Self {
            titles,
            keys,
            matched: HashSet::new(),
        }
    }

    fn tag(&mut self, text: &str) -> String {
        let mut out = Vec::new();
        for line in text.lines() {
            let stripped = line.trim().replace('\u{a0}', " ");
            let stripped = LINE_CONTROL.replace_all(&stripped, "");
            let key = normalize_title(&stripped);
            if !key.is_empty() && self.keys.contains(&key) {
                debug!(title = %stripped, "section heading tagged");
                out.push(format!("# {stripped}"));
                self.matched.insert(key);
            } else {
                out.push(line.to_string());
            }
        }
        out.join("\n")
    }

    fn report_untagged(&self) {
        for title in self.titles {
            let key = normalize_title(title);
            if !key.is_empty() && !self.matched.contains(&key) {
                warn!(%title, "title found in table of contents but not in body");
            }
        }
    }
}

/// Fold an ordered block stream into sections in document order.
///
/// A heading block or a `# ` marker line opens a new section. Text before
/// the first heading belongs to "Introduction", which is dropped when empty.
/// A title seen twice continues the earlier section so every title maps to
/// exactly one section.
pub fn group_sections(blocks: &[ExtractedBlock]) -> Vec<Section> {
    let mut grouper = Grouper::default();
    for block in blocks {
        match block {
            ExtractedBlock::Heading { title, page } => grouper.open(title, *page),
            ExtractedBlock::Text { text, page } => {
                for line in text.lines() {
                    match parse_heading_marker(line) {
                        Some(title) => grouper.open(title, *page),
                        None => grouper.push(line, *page),
                    }
                }
            }
            ExtractedBlock::Table { markdown, page } => grouper.push(markdown, *page),
        }
    }
    grouper.finish()
}

struct Grouper {
    sections: Vec<Section>,
    title: String,
    lines: Vec<String>,
    page: Option<u32>,
}

impl Default for Grouper {
    fn default() -> Self {
        Self {
            sections: Vec::new(),
            title: INTRODUCTION_TITLE.to_string(),
            lines: Vec::new(),
            page: None,
        }
    }
}

impl Grouper {
    fn open(&mut self, title: &str, page: Option<u32>) {
        self.flush();
        self.title = title.trim().to_string();
        self.page = page;
    }

    fn push(&mut self, line: &str, page: Option<u32>) {
        if self.page.is_none() && !line.trim().is_empty() {
            self.page = page;
        }
        self.lines.push(line.to_string());
    }

    fn flush(&mut self) {
        let body = self.lines.join("\n").trim().to_string();
        self.lines.clear();
        let title = std::mem::take(&mut self.title);
        let page = self.page.take();

        if title == INTRODUCTION_TITLE && body.is_empty() && self.sections.is_empty() {
            return;
        }
        match self.sections.iter_mut().find(|s| s.title == title) {
            Some(existing) => {
                if !body.is_empty() {
                    if !existing.body.is_empty() {
                        existing.body.push_str("\n\n");
                    }
                    existing.body.push_str(&body);
                }
            }
            None => self.sections.push(Section { title, body, page }),
        }
    }

    fn finish(mut self) -> Vec<Section> {
        self.flush();
        self.sections
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(t: &str, page: Option<u32>) -> ExtractedBlock {
        ExtractedBlock::Text {
            text: t.to_string(),
            page,
        }
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("  ARTICLE 1 – Définitions. "), "article 1 définitions");
        assert_eq!(normalize_title("1.2_Objet"), "1 2 objet");
    }

    #[test]
    fn test_tag_exact_normalized_match() {
        let titles = vec!["ARTICLE 1 - DÉFINITIONS".to_string()];
        let tagged = tag_sections("préambule\nArticle 1 : définitions\nTexte.", &titles);
        assert_eq!(tagged, "préambule\n# Article 1 : définitions\nTexte.");
    }

    #[test]
    fn test_tag_does_not_fuzzy_match() {
        let titles = vec!["ARTICLE 1 DEFINITIONS".to_string()];
        let tagged = tag_sections("ARTICLE 1 DEFINITIONS GENERALES", &titles);
        assert_eq!(tagged, "ARTICLE 1 DEFINITIONS GENERALES");
    }

    #[test]
    fn test_parse_heading_marker() {
        assert_eq!(parse_heading_marker("# Objet"), Some("Objet"));
        assert_eq!(parse_heading_marker("  #  Objet  "), Some("Objet"));
        assert_eq!(parse_heading_marker("#"), None);
        assert_eq!(parse_heading_marker("#hashtag"), None);
    }

    #[test]
    fn test_group_with_implicit_introduction() {
        let blocks = vec![
            text("Avant-propos.\n# ARTICLE 1 DEFINITIONS\nDéf.", Some(1)),
            text("# ARTICLE 2 SCOPE\nPérimètre.", Some(2)),
        ];
        let sections = group_sections(&blocks);
        let titles: Vec<&str> = sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Introduction", "ARTICLE 1 DEFINITIONS", "ARTICLE 2 SCOPE"]);
        assert_eq!(sections[0].body, "Avant-propos.");
        assert_eq!(sections[2].page, Some(2));
    }

    #[test]
    fn test_group_skips_empty_introduction() {
        let blocks = vec![
            ExtractedBlock::Heading {
                title: "Objet".into(),
                page: None,
            },
            text("Corps.", None),
            ExtractedBlock::Table {
                markdown: "| a |\n| --- |".into(),
                page: None,
            },
        ];
        let sections = group_sections(&blocks);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].title, "Objet");
        assert_eq!(sections[0].body, "Corps.\n| a |\n| --- |");
    }

    #[test]
    fn test_group_merges_repeated_titles() {
        let blocks = vec![text("# A\none\n# B\ntwo\n# A\nthree", None)];
        let sections = group_sections(&blocks);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].body, "one\n\nthree");
    }

    #[test]
    fn test_tag_blocks_leaves_tables_alone() {
        let titles = vec!["Objet".to_string()];
        let blocks = tag_blocks(
            vec![
                text("Objet", Some(3)),
                ExtractedBlock::Table {
                    markdown: "Objet".into(),
                    page: Some(3),
                },
            ],
            &titles,
        );
        assert_eq!(blocks[0], text("# Objet", Some(3)));
        assert!(matches!(&blocks[1], ExtractedBlock::Table { markdown, .. } if markdown == "Objet"));
    }
}

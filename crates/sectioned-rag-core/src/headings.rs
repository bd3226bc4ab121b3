//! Table-of-contents heading detection.
//!
//! Recovers candidate section titles from the leading pages of a document
//! by looking for TOC-like lines ("ARTICLE 1 DEFINITIONS ...... 3",
//! "1.2 Scope ....... 4", ...).
//!
//! # Algorithm
//!
//! 1. Keep the first `max_pages` pages of line-oriented text.
//! 2. Lines present on at least `recurrence_threshold` of the sampled pages
//!    are treated as running headers/footers and ignored.
//! 3. [`clean_lines`] strips control characters, collapses whitespace,
//!    drops "Page X sur Y" lines and glues wrapped TOC entries back together
//!    (a bare page number or a dotted leader closes the buffered entry).
//! 4. Each cleaned line is offered to an ordered list of [`HeadingRule`]s;
//!    the first rule that claims the line decides its fate.
//!
//! Detection never fails: a document without a recognisable TOC yields an
//! empty list.
//!
//! # Example
//!
//! ```rust
//! use sectioned_rag_core::headings::{HeadingDetector, HeadingParams};
//!
//! let page = vec![
//!     "SOMMAIRE".to_string(),
//!     "ARTICLE 1 DEFINITIONS ......... 3".to_string(),
//!     "ARTICLE 2 SCOPE ......... 5".to_string(),
//! ];
//! let titles = HeadingDetector::new(HeadingParams::default()).detect(&[page]);
//! assert_eq!(titles, vec!["ARTICLE 1 DEFINITIONS", "ARTICLE 2 SCOPE"]);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("heading pattern is a valid regex")
}

static CONTROL_CHARS: LazyLock<Regex> = LazyLock::new(|| compile(r"[\x00-\x1f\x7f-\x9f]"));
static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| compile(r"\s+"));
static PAGE_OF: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)^Page\s+\d+\s*(?:sur|of|/)\s*\d+"));
static BARE_NUMBER: LazyLock<Regex> = LazyLock::new(|| compile(r"^\d+$"));
static DOTTED_LEADER: LazyLock<Regex> = LazyLock::new(|| compile(r"\.{3,}"));
static PAGE_TOKEN: LazyLock<Regex> = LazyLock::new(|| compile(r"^\s*(?:\.{3,}\s*)?\d{1,3}$"));
static TRAILING_PAGE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"^(.+?)\s+(?:\.{3,}\s*)?\d{1,3}$"));
static HEADING_START: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)^(?:ARTICLE\s+\d+.*|\d+(?:\.\d+)+\s+.*|[IVXLCDM]+\.\d+.*|[A-Z]+\d+-UO\d+\s*:\s+.*)$")
});

/// Tuning for [`HeadingDetector`].
#[derive(Debug, Clone, PartialEq)]
pub struct HeadingParams {
    /// Number of leading pages scanned for a table of contents.
    pub max_pages: usize,
    /// Fraction of sampled pages a line must appear on to count as a running header.
    pub recurrence_threshold: f64,
}

impl Default for HeadingParams {
    fn default() -> Self {
        Self {
            max_pages: 7,
            recurrence_threshold: 0.6,
        }
    }
}

/// Result of offering one line to a [`HeadingRule`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    /// The rule does not recognise the line; try the next rule.
    NoMatch,
    /// The line is a heading with this title.
    Title(String),
    /// The line looks like a heading but no title could be completed.
    /// Later rules are not tried.
    Consumed,
}

/// One heading pattern. Rules are tried in a fixed priority order and the
/// first one that does not return [`RuleOutcome::NoMatch`] wins.
pub trait HeadingRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Inspect `lines[idx]`; following lines may be read as continuation.
    fn apply(&self, lines: &[String], idx: usize) -> RuleOutcome;
}

/// A single-line rule: `pattern` must match, and capture group 1 is the title.
pub struct PatternRule {
    name: &'static str,
    pattern: Regex,
}

impl PatternRule {
    pub fn new(name: &'static str, pattern: &str) -> Self {
        Self {
            name,
            pattern: compile(pattern),
        }
    }
}

impl HeadingRule for PatternRule {
    fn name(&self) -> &'static str {
        self.name
    }

    fn apply(&self, lines: &[String], idx: usize) -> RuleOutcome {
        match self.pattern.captures(&lines[idx]) {
            Some(caps) => match caps.get(1) {
                Some(m) => RuleOutcome::Title(tidy_title(m.as_str())),
                None => RuleOutcome::Consumed,
            },
            None => RuleOutcome::NoMatch,
        }
    }
}

/// "ARTICLE 3" alone on a line, titled by the next non-empty line.
pub struct ArticleContinuationRule;

static ARTICLE_ALONE: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)^\s*ARTICLE\s+\d+\s*$"));
static PAGE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| compile(r"\s*\.{3,}\s*\d{1,3}\s*$"));

impl HeadingRule for ArticleContinuationRule {
    fn name(&self) -> &'static str {
        "article-continuation"
    }

    fn apply(&self, lines: &[String], idx: usize) -> RuleOutcome {
        let line = lines[idx].trim();
        if !ARTICLE_ALONE.is_match(line) {
            return RuleOutcome::NoMatch;
        }
        match lines[idx + 1..].iter().map(|l| l.trim()).find(|l| !l.is_empty()) {
            Some(next) => {
                let next = PAGE_SUFFIX.replace(next, "");
                RuleOutcome::Title(tidy_title(&format!("{line} {next}")))
            }
            None => RuleOutcome::Consumed,
        }
    }
}

/// Generic multi-line heading: a heading-like start followed by continuation
/// lines until a trailing page-number token.
///
/// [`clean_lines`] usually glues such an entry into one line ending in its
/// page number ("3.4 Conditions particulières d'exécution 11"); that form is
/// accepted directly.
pub struct MultiLineFallbackRule {
    /// Maximum number of continuation lines accumulated before giving up.
    pub max_continuation: usize,
}

impl Default for MultiLineFallbackRule {
    fn default() -> Self {
        Self {
            max_continuation: 4,
        }
    }
}

impl HeadingRule for MultiLineFallbackRule {
    fn name(&self) -> &'static str {
        "multi-line-fallback"
    }

    fn apply(&self, lines: &[String], idx: usize) -> RuleOutcome {
        let line = lines[idx].trim();
        if !HEADING_START.is_match(line) {
            return RuleOutcome::NoMatch;
        }
        if let Some(title) = TRAILING_PAGE.captures(line).and_then(|caps| caps.get(1)) {
            let title = tidy_title(title.as_str());
            if HEADING_START.is_match(&title) {
                return RuleOutcome::Title(title);
            }
        }
        let mut title = line.to_string();
        for next in lines[idx + 1..].iter().take(self.max_continuation + 1) {
            let next = next.trim();
            if PAGE_TOKEN.is_match(next) {
                return RuleOutcome::Title(tidy_title(&title));
            }
            title.push(' ');
            title.push_str(next);
        }
        RuleOutcome::Consumed
    }
}

/// The built-in rule set, in priority order.
pub fn default_rules() -> Vec<Box<dyn HeadingRule>> {
    vec![
        Box::new(PatternRule::new(
            "article-with-page",
            r"(?i)^(ARTICLE\s+\d+\s+.+?)\.{3,}\s*\d{1,3}$",
        )),
        Box::new(ArticleContinuationRule),
        Box::new(PatternRule::new(
            "dotted-numeral",
            r"^((\d+(?:\.\d+)+)\s+.+?)\.{3,}\s*(\d{1,3})$",
        )),
        Box::new(PatternRule::new(
            "roman-dotted",
            r"(?i)^(([IVXLCDM]+\.\d+.*?)\s+.+?)(\d{1,3})$",
        )),
        Box::new(PatternRule::new(
            "unit-code",
            r"(?i)^([A-Z]+\d+-UO\d+\s*:\s+.+?)\.{3,}\s*(\d{1,3})$",
        )),
        Box::new(MultiLineFallbackRule::default()),
    ]
}

/// Detects section titles from a document's table of contents.
pub struct HeadingDetector {
    params: HeadingParams,
    rules: Vec<Box<dyn HeadingRule>>,
}

impl HeadingDetector {
    pub fn new(params: HeadingParams) -> Self {
        Self::with_rules(params, default_rules())
    }

    pub fn with_rules(params: HeadingParams, rules: Vec<Box<dyn HeadingRule>>) -> Self {
        Self { params, rules }
    }

    /// Returns the ordered, de-duplicated list of titles found in the first
    /// `max_pages` pages. Each element of `pages` is one page's lines.
    pub fn detect(&self, pages: &[Vec<String>]) -> Vec<String> {
        let sampled = &pages[..pages.len().min(self.params.max_pages)];

        let recurring = if sampled.len() >= 2 {
            detect_recurring_lines(sampled, self.params.recurrence_threshold)
        } else {
            HashSet::new()
        };
        if !recurring.is_empty() {
            debug!(count = recurring.len(), "ignoring recurring header/footer lines");
        }

        let raw: Vec<&str> = sampled.iter().flatten().map(String::as_str).collect();
        let lines = clean_lines(&raw, &recurring);

        let mut seen = HashSet::new();
        let mut titles = Vec::new();
        for idx in 0..lines.len() {
            for rule in &self.rules {
                match rule.apply(&lines, idx) {
                    RuleOutcome::NoMatch => continue,
                    RuleOutcome::Title(title) => {
                        debug!(rule = rule.name(), %title, "heading matched");
                        if !title.is_empty() && seen.insert(title.clone()) {
                            titles.push(title);
                        }
                        break;
                    }
                    RuleOutcome::Consumed => break,
                }
            }
        }

        info!(
            pages = sampled.len(),
            titles = titles.len(),
            "table of contents scanned"
        );
        titles
    }
}

/// Lines appearing on at least `threshold` of the pages (running headers/footers).
pub fn detect_recurring_lines(pages: &[Vec<String>], threshold: f64) -> HashSet<String> {
    if pages.is_empty() {
        return HashSet::new();
    }
    let mut counts: HashMap<String, usize> = HashMap::new();
    for page in pages {
        let unique: HashSet<String> = page
            .iter()
            .map(|l| normalize_line(l))
            .filter(|l| !l.is_empty())
            .collect();
        for line in unique {
            *counts.entry(line).or_default() += 1;
        }
    }
    let total = pages.len() as f64;
    counts
        .into_iter()
        .filter(|(_, count)| *count as f64 / total >= threshold)
        .map(|(line, _)| line)
        .collect()
}

/// Normalise raw TOC lines and glue wrapped entries back together.
///
/// A bare number or a line with a dotted leader closes the buffered entry;
/// a line that opens a new heading flushes whatever was buffered before it.
pub fn clean_lines(raw: &[&str], ignore: &HashSet<String>) -> Vec<String> {
    let mut cleaned = Vec::new();
    let mut buffer = String::new();

    for line in raw {
        let line = normalize_line(line);
        if line.is_empty() || ignore.contains(&line) || PAGE_OF.is_match(&line) {
            continue;
        }

        if HEADING_START.is_match(&line) && !buffer.is_empty() {
            cleaned.push(std::mem::take(&mut buffer));
        }

        let closes_entry = BARE_NUMBER.is_match(&line) || DOTTED_LEADER.is_match(&line);
        if buffer.is_empty() {
            buffer = line;
        } else {
            buffer.push(' ');
            buffer.push_str(&line);
        }
        if closes_entry {
            cleaned.push(std::mem::take(&mut buffer));
        }
    }

    if !buffer.is_empty() {
        cleaned.push(buffer);
    }
    cleaned
}

fn normalize_line(line: &str) -> String {
    let line = line.replace('\u{a0}', " ");
    let line = CONTROL_CHARS.replace_all(&line, " ");
    WHITESPACE_RUN.replace_all(line.trim(), " ").into_owned()
}

fn tidy_title(title: &str) -> String {
    title
        .trim()
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|l| l.to_string()).collect()
    }

    fn detect(pages: &[Vec<String>]) -> Vec<String> {
        HeadingDetector::new(HeadingParams::default()).detect(pages)
    }

    #[test]
    fn test_article_toc_lines() {
        let titles = detect(&[page(&[
            "Règlement de consultation",
            "ARTICLE 1 DEFINITIONS ......... 3",
            "ARTICLE 2 SCOPE ......... 5",
        ])]);
        assert_eq!(titles, vec!["ARTICLE 1 DEFINITIONS", "ARTICLE 2 SCOPE"]);
    }

    #[test]
    fn test_article_on_two_lines() {
        let titles = detect(&[page(&["ARTICLE 4", "PRIX ET PAIEMENT ....... 9"])]);
        assert_eq!(titles, vec!["ARTICLE 4 PRIX ET PAIEMENT"]);
    }

    #[test]
    fn test_dotted_numeral_and_unit_code() {
        let titles = detect(&[page(&[
            "1.2 Objet du marché ........ 4",
            "2.1.3 Délais d'exécution ....... 12",
            "LOT1-UO2 : Maintenance corrective ..... 7",
        ])]);
        assert_eq!(
            titles,
            vec![
                "1.2 Objet du marché",
                "2.1.3 Délais d'exécution",
                "LOT1-UO2 : Maintenance corrective",
            ]
        );
    }

    #[test]
    fn test_roman_dotted_heading() {
        let titles = detect(&[page(&["II.1 Présentation générale 5"])]);
        assert_eq!(titles, vec!["II.1 Présentation générale"]);
    }

    #[test]
    fn test_multi_line_fallback_until_page_token() {
        let rule = MultiLineFallbackRule::default();
        let lines = page(&["3.4 Conditions", "particulières d'exécution", "11"]);
        assert_eq!(
            rule.apply(&lines, 0),
            RuleOutcome::Title("3.4 Conditions particulières d'exécution".into())
        );
    }

    #[test]
    fn test_multi_line_fallback_gives_up_without_page_token() {
        let rule = MultiLineFallbackRule { max_continuation: 2 };
        let lines = page(&["3.4 Conditions", "a", "b", "c", "12"]);
        assert_eq!(rule.apply(&lines, 0), RuleOutcome::Consumed);
    }

    #[test]
    fn test_wrapped_entry_is_detected() {
        let titles = detect(&[page(&[
            "SOMMAIRE",
            "3.4 Conditions",
            "particulières d'exécution",
            "11",
        ])]);
        assert_eq!(titles, vec!["3.4 Conditions particulières d'exécution"]);
    }

    #[test]
    fn test_wrapped_entries_in_sequence() {
        let titles = detect(&[page(&[
            "3.4 Conditions",
            "particulières",
            "11",
            "3.5 Réception des",
            "ouvrages",
            "12",
        ])]);
        assert_eq!(
            titles,
            vec!["3.4 Conditions particulières", "3.5 Réception des ouvrages"]
        );
    }

    #[test]
    fn test_numbering_alone_is_not_a_title() {
        let rule = MultiLineFallbackRule::default();
        assert_eq!(
            rule.apply(&page(&["ARTICLE 12"]), 0),
            RuleOutcome::Consumed
        );
    }

    #[test]
    fn test_no_toc_returns_empty() {
        let titles = detect(&[page(&["Bonjour.", "Ceci est un courrier sans sommaire."])]);
        assert!(titles.is_empty());
    }

    #[test]
    fn test_only_first_pages_are_scanned() {
        let mut pages: Vec<Vec<String>> = (0..7).map(|i| page(&[&format!("texte {i}")])).collect();
        pages.push(page(&["ARTICLE 9 ANNEXES ...... 40"]));
        assert!(detect(&pages).is_empty());
    }

    #[test]
    fn test_recurring_lines_are_ignored() {
        let pages = vec![
            page(&["Marché 2024-17", "ARTICLE 1 OBJET ....... 2"]),
            page(&["Marché 2024-17", "texte"]),
            page(&["Marché 2024-17", "autre texte"]),
        ];
        let recurring = detect_recurring_lines(&pages, 0.6);
        assert!(recurring.contains("Marché 2024-17"));
        assert_eq!(detect(&pages), vec!["ARTICLE 1 OBJET"]);
    }

    #[test]
    fn test_clean_lines_merges_bare_page_numbers() {
        let cleaned = clean_lines(
            &["Page 1 sur 4", "1.1 Contexte", "général", "3", "\u{a0}\u{a0}"],
            &HashSet::new(),
        );
        assert_eq!(cleaned, vec!["1.1 Contexte général 3"]);
    }

    #[test]
    fn test_clean_lines_flushes_before_new_heading() {
        let cleaned = clean_lines(
            &["SOMMAIRE", "ARTICLE 1 OBJET ..... 2"],
            &HashSet::new(),
        );
        assert_eq!(cleaned, vec!["SOMMAIRE", "ARTICLE 1 OBJET ..... 2"]);
    }

    #[test]
    fn test_duplicate_titles_are_reported_once() {
        let titles = detect(&[page(&[
            "ARTICLE 1 OBJET ..... 2",
            "ARTICLE 1 OBJET ..... 2",
        ])]);
        assert_eq!(titles, vec!["ARTICLE 1 OBJET"]);
    }
}

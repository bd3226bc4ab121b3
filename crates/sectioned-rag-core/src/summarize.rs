//! Section summarizer.
//!
//! Short sections are kept verbatim after whitespace cleanup. Sections over
//! the word limit are cut into consecutive word slices and each slice is
//! summarized by the [`Generator`], one call at a time. A failed slice is
//! replaced by a truncated excerpt of itself, so a generator outage costs
//! fidelity but never drops content.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::generation::Generator;

/// Tuning for [`summarize_section`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryParams {
    /// Sections with at most this many words are kept verbatim.
    pub word_limit: usize,
    /// Characters kept from a slice whose summary failed.
    pub fallback_excerpt_chars: usize,
}

impl Default for SummaryParams {
    fn default() -> Self {
        Self {
            word_limit: 1500,
            fallback_excerpt_chars: 1000,
        }
    }
}

static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| compile(r"\n\s*\n"));
static SPACE_RUN: LazyLock<Regex> = LazyLock::new(|| compile(r"[ \t]+"));
static TRAILING_SPACE: LazyLock<Regex> = LazyLock::new(|| compile(r" +\n"));
static NEWLINE_RUN: LazyLock<Regex> = LazyLock::new(|| compile(r"\n+"));

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("whitespace regex is valid")
}

/// Whitespace cleanup applied to every section body.
pub fn clean_section_text(text: &str) -> String {
    let text = BLANK_RUN.replace_all(text, "\n\n");
    let text = SPACE_RUN.replace_all(&text, " ");
    let text = TRAILING_SPACE.replace_all(&text, "\n");
    let text = NEWLINE_RUN.replace_all(&text, "\n");
    text.trim().to_string()
}

/// Consecutive, non-overlapping slices of at most `limit` words.
pub fn word_slices(text: &str, limit: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .chunks(limit.max(1))
        .map(|slice| slice.join(" "))
        .collect()
}

/// The summarization instruction for one slice.
pub fn slice_prompt(slice: &str) -> String {
    format!(
        "Tu es un assistant expert en appels d'offres. Voici un extrait d'un document juridique/technique associé.\n\n\
Résume ce contenu de manière claire, structurée et concise, en ne conservant **que les informations réellement pertinentes pour comprendre les exigences, prestations attendues, aspects techniques et technologiques, critères contractuels ou autres informations pertinentes à propos du marché**.\n\n\
Ignore les parties répétitives, génériques ou peu informatives. Si l'extrait ne contient rien d'utile, réponds uniquement : \" \".\n\n\
Extrait :\n{slice}\n\nRésumé :\n"
    )
}

fn excerpt(slice: &str, max_chars: usize) -> String {
    let mut out: String = slice.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

/// Summarize one section, returning `"<title>\n\n<content>"`.
pub async fn summarize_section(
    title: &str,
    body: &str,
    generator: &dyn Generator,
    params: &SummaryParams,
) -> String {
    let cleaned = clean_section_text(body);
    let word_count = cleaned.split_whitespace().count();
    if word_count <= params.word_limit {
        return format!("{title}\n\n{cleaned}");
    }

    let slices = word_slices(&cleaned, params.word_limit);
    debug!(%title, words = word_count, slices = slices.len(), "summarizing oversized section");

    let mut parts = Vec::with_capacity(slices.len());
    for (i, slice) in slices.iter().enumerate() {
        match generator.complete(&slice_prompt(slice)).await {
            Ok(summary) => {
                let summary = summary.trim();
                if !summary.is_empty() {
                    parts.push(summary.to_string());
                }
            }
            Err(e) => {
                warn!(%title, slice = i, error = %e, "slice summary failed, keeping excerpt");
                parts.push(excerpt(slice, params.fallback_excerpt_chars));
            }
        }
    }

    format!("{title}\n\n{}", parts.join("\n\n").trim())
}

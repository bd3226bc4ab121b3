//! TOML configuration.
//!
//! Every section except `[db]` may be omitted and falls back to defaults.
//! Each section converts into the parameter struct of the core component it
//! configures, so nothing downstream reads configuration globally.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use sectioned_rag_core::chunk::ChunkingParams;
use sectioned_rag_core::headings::HeadingParams;
use sectioned_rag_core::retrieval::RetrievalParams;
use sectioned_rag_core::summarize::SummaryParams;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub headings: HeadingsConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub scorer: ScorerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HeadingsConfig {
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_recurrence_threshold")]
    pub recurrence_threshold: f64,
}

impl Default for HeadingsConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            recurrence_threshold: default_recurrence_threshold(),
        }
    }
}

fn default_max_pages() -> usize {
    7
}
fn default_recurrence_threshold() -> f64 {
    0.6
}

impl HeadingsConfig {
    pub fn params(&self) -> HeadingParams {
        HeadingParams {
            max_pages: self.max_pages,
            recurrence_threshold: self.recurrence_threshold,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummaryConfig {
    #[serde(default = "default_word_limit")]
    pub word_limit: usize,
    #[serde(default = "default_fallback_excerpt_chars")]
    pub fallback_excerpt_chars: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            word_limit: default_word_limit(),
            fallback_excerpt_chars: default_fallback_excerpt_chars(),
        }
    }
}

fn default_word_limit() -> usize {
    1500
}
fn default_fallback_excerpt_chars() -> usize {
    1000
}

impl SummaryConfig {
    pub fn params(&self) -> SummaryParams {
        SummaryParams {
            word_limit: self.word_limit,
            fallback_excerpt_chars: self.fallback_excerpt_chars,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_overlap() -> usize {
    55
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkingParams {
        ChunkingParams {
            chunk_size: self.chunk_size,
            overlap: self.overlap,
            ..ChunkingParams::default()
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_candidate_cap")]
    pub candidate_cap: usize,
    #[serde(default = "default_filtered_cap")]
    pub filtered_cap: usize,
    #[serde(default = "default_gap_threshold")]
    pub gap_threshold: f32,
    #[serde(default = "default_section_top_k")]
    pub section_top_k: usize,
    #[serde(default = "default_rerank_top_n")]
    pub rerank_top_n: usize,
    #[serde(default = "default_k_neighbors")]
    pub k_neighbors: usize,
    #[serde(default = "default_min_chunks")]
    pub min_chunks: usize,
    #[serde(default = "default_scoring_concurrency")]
    pub scoring_concurrency: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_cap: default_candidate_cap(),
            filtered_cap: default_filtered_cap(),
            gap_threshold: default_gap_threshold(),
            section_top_k: default_section_top_k(),
            rerank_top_n: default_rerank_top_n(),
            k_neighbors: default_k_neighbors(),
            min_chunks: default_min_chunks(),
            scoring_concurrency: default_scoring_concurrency(),
        }
    }
}

fn default_candidate_cap() -> usize {
    5000
}
fn default_filtered_cap() -> usize {
    100
}
fn default_gap_threshold() -> f32 {
    1.0
}
fn default_section_top_k() -> usize {
    3
}
fn default_rerank_top_n() -> usize {
    5
}
fn default_k_neighbors() -> usize {
    3
}
fn default_min_chunks() -> usize {
    16
}
fn default_scoring_concurrency() -> usize {
    8
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            candidate_cap: self.candidate_cap,
            filtered_cap: self.filtered_cap,
            gap_threshold: self.gap_threshold,
            section_top_k: self.section_top_k,
            rerank_top_n: self.rerank_top_n,
            k_neighbors: self.k_neighbors,
            min_chunks: self.min_chunks,
            scoring_concurrency: self.scoring_concurrency,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// DOCX paragraph style ids whose paragraphs open a new section.
    #[serde(default = "default_heading_styles")]
    pub heading_styles: Vec<String>,
    /// Once a new version of a source is stored, remove its older versions.
    #[serde(default = "default_replace_stale")]
    pub replace_stale_on_reingest: bool,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            heading_styles: default_heading_styles(),
            replace_stale_on_reingest: default_replace_stale(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_heading_styles() -> Vec<String> {
    [
        "CCTP - Titre 1",
        "CCTP - Titre 2",
        "CCTP - Titre 3",
        "Titre1",
        "Titre2",
        "Titre3",
        "Heading1",
        "Heading2",
        "Heading3",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_replace_stale() -> bool {
    true
}
fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL; defaults per provider when omitted.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    #[serde(default = "default_generator_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generator_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub temperature: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: default_generator_provider(),
            model: None,
            url: None,
            timeout_secs: default_generator_timeout_secs(),
            temperature: 0.0,
        }
    }
}

fn default_generator_provider() -> String {
    "disabled".to_string()
}
fn default_generator_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScorerConfig {
    #[serde(default = "default_scorer_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_scorer_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            provider: default_scorer_provider(),
            model: None,
            url: None,
            timeout_secs: default_scorer_timeout_secs(),
        }
    }
}

fn default_scorer_provider() -> String {
    "lexical".to_string()
}
fn default_scorer_timeout_secs() -> u64 {
    30
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!(
            "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.overlap,
            config.chunking.chunk_size
        );
    }

    // Validate headings
    let threshold = config.headings.recurrence_threshold;
    if !(threshold > 0.0 && threshold <= 1.0) {
        anyhow::bail!("headings.recurrence_threshold must be in (0.0, 1.0]");
    }

    // Validate retrieval
    if config.retrieval.filtered_cap == 0 {
        anyhow::bail!("retrieval.filtered_cap must be >= 1");
    }
    if config.retrieval.min_chunks == 0 {
        anyhow::bail!("retrieval.min_chunks must be >= 1");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    // Validate generator
    match config.generator.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if config.generator.model.is_none() {
                anyhow::bail!(
                    "generator.model must be specified when provider is '{}'",
                    config.generator.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown generator provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    // Validate scorer
    match config.scorer.provider.as_str() {
        "lexical" | "local" => {}
        "http" => {
            if config.scorer.url.is_none() {
                anyhow::bail!("scorer.url must be specified when provider is 'http'");
            }
        }
        other => anyhow::bail!(
            "Unknown scorer provider: '{}'. Must be http, local, or lexical.",
            other
        ),
    }

    Ok(config)
}

//! # Sectioned RAG Core
//!
//! Pure logic for the structured retrieval pipeline: data models, heading
//! detection, section tagging, summarization, chunking, the collaborator
//! traits (vector store, embeddings, pairwise scorer, generator), and the
//! query-time filter → gate → rerank → context → answer chain.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or HTTP. Concrete
//! collaborators and document extraction live in the `sectioned-rag` crate.
//!
//! ## Data Flow
//!
//! ```text
//! ingestion:  blocks ─▶ headings ─▶ tagging ─▶ summarize ─▶ chunk ─▶ store.add
//! query:      store.similarity_search ─▶ retrieval ─▶ gate ─▶ rerank ─▶ context ─▶ answer
//! ```

pub mod answer;
pub mod chunk;
pub mod context;
pub mod embedding;
pub mod gate;
pub mod generation;
pub mod headings;
pub mod models;
pub mod pipeline;
pub mod rerank;
pub mod retrieval;
pub mod scoring;
pub mod store;
pub mod summarize;
pub mod tagging;

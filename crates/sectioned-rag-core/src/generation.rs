//! Text generator trait.
//!
//! The generator is a black box: one prompt in, one completion out. It is
//! used by the section summarizer at ingestion time and by the answer
//! orchestrator at query time. Implementations live in the app crate
//! (OpenAI-compatible chat, Ollama) and in tests (scripted generators).
//!
//! No retry contract is implied; callers decide what a failure means.

use async_trait::async_trait;

#[async_trait]
pub trait Generator: Send + Sync {
    /// Complete `prompt` and return the generated text.
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

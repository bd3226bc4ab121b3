//! Answer orchestration: final prompt and single generator call.

use anyhow::Result;
use tracing::info;

use crate::context::AssembledContext;
use crate::generation::Generator;
use crate::models::{Answer, Chunk, SourceRef};

/// Instruction prompt restricting the answer to the supplied context.
pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "Tu es un assistant intelligent. Tu dois répondre en français à la question suivante en t'appuyant **exclusivement** sur le texte fourni. \
Ne mélange pas les sources fournies et ne complète jamais avec des connaissances extérieures.\n\n\
### Contexte :\n{context}\n\
### Question :\n{question}\n\
### Réponse :"
    )
}

/// Source attributions in context order.
pub fn sources_from(chunks: &[Chunk]) -> Vec<SourceRef> {
    chunks.iter().map(SourceRef::from).collect()
}

/// Generate the answer. The generator is called exactly once; a failure
/// propagates to the caller.
pub async fn answer(
    question: &str,
    context: &AssembledContext,
    generator: &dyn Generator,
) -> Result<Answer> {
    let prompt = build_prompt(&context.text, question);
    let response = generator.complete(&prompt).await?;
    info!(chars = response.len(), sources = context.chunks.len(), "answer generated");
    Ok(Answer {
        response,
        sources: sources_from(&context.chunks),
    })
}

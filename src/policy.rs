//! Reimbursement policy text prepared for prompting.
//!
//! Short policies are sent whole. Long ones are chunked and embedded once per
//! upload, and each invoice only sees the sections most similar to it.

use log::{debug, info};

use crate::chunking::{estimate_token_count, split_into_chunks, ChunkerConfig, TextChunk};
use crate::embeddings::{cosine_similarity, Embedder, Embedding, EmbeddingTask};
use crate::error::LlmError;
use crate::prompts::DEFAULT_POLICY;

pub const DEFAULT_POLICY_TOKEN_BUDGET: usize = 3000;

enum PolicyText {
    Whole(String),
    Sections(Vec<(TextChunk, Embedding)>),
}

pub struct PolicyContext {
    source: String,
    budget: usize,
    text: PolicyText,
}

impl PolicyContext {
    /// The built-in policy, used when no policy file is uploaded
    pub fn default_policy() -> Self {
        PolicyContext {
            source: "default policy".to_string(),
            budget: DEFAULT_POLICY_TOKEN_BUDGET,
            text: PolicyText::Whole(DEFAULT_POLICY.to_string()),
        }
    }

    pub async fn build(
        text: &str,
        source: &str,
        embedder: &dyn Embedder,
        chunker: &ChunkerConfig,
        budget: usize,
    ) -> Result<Self, LlmError> {
        let tokens = estimate_token_count(text);
        if tokens <= budget {
            debug!("Policy {} fits the prompt ({} tokens)", source, tokens);
            return Ok(PolicyContext {
                source: source.to_string(),
                budget,
                text: PolicyText::Whole(text.to_string()),
            });
        }

        let chunks = split_into_chunks(text, source, chunker);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = embedder
            .embed_batch(&texts, EmbeddingTask::RetrievalDocument)
            .await?;
        info!(
            "Policy {} has {} tokens, indexed {} sections",
            source,
            tokens,
            chunks.len()
        );

        Ok(PolicyContext {
            source: source.to_string(),
            budget,
            text: PolicyText::Sections(chunks.into_iter().zip(embeddings).collect()),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_sectioned(&self) -> bool {
        matches!(self.text, PolicyText::Sections(_))
    }

    /// Policy text to send alongside `invoice_text`.
    pub async fn relevant_text(
        &self,
        invoice_text: &str,
        embedder: &dyn Embedder,
    ) -> Result<String, LlmError> {
        let sections = match &self.text {
            PolicyText::Whole(text) => return Ok(text.clone()),
            PolicyText::Sections(sections) => sections,
        };

        let query = embedder
            .embed(invoice_text, EmbeddingTask::RetrievalQuery)
            .await?;

        let mut ranked: Vec<(f32, &TextChunk)> = sections
            .iter()
            .map(|(chunk, embedding)| (cosine_similarity(&query, embedding), chunk))
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut used = 0;
        let mut selected: Vec<&TextChunk> = Vec::new();
        for (_, chunk) in ranked {
            if used + chunk.token_count > self.budget && !selected.is_empty() {
                continue;
            }
            used += chunk.token_count;
            selected.push(chunk);
        }
        selected.sort_by_key(|chunk| chunk.chunk_index);

        Ok(selected
            .iter()
            .map(|chunk| chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

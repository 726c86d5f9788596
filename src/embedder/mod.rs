//! Embedding collaborators: the trait the pipelines call and the blocking
//! OpenAI-compatible client behind it.

pub mod openai;

use anyhow::{anyhow, Result};

pub use openai::OpenAiEmbedder;

/// Opaque text-to-vector function shared by ingestion and query.
///
/// Implementations are deterministic for a fixed model version and return
/// one fixed-dimension vector per input, in input order. Failure is fatal
/// to the pipeline stage that issued the call; no retry is attempted above
/// this seam.
pub trait Embedder: Send + Sync {
    /// Embeds a batch of texts, preserving input order.
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embeds a single text.
    fn embed(&self, input: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[input])?
            .pop()
            .ok_or_else(|| anyhow!("embedder returned no vector for single input"))
    }
}

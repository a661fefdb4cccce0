use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

/// Text to vector. Implementations return `None` for items they could not embed.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier for the provider/model (e.g., `fake:xxh64:d384`).
    fn id(&self) -> &str;
    /// Embedding dimensionality (D).
    fn dim(&self) -> usize;

    /// Load whatever the provider needs before the first call.
    async fn warm_up(&self) -> Result<()> { Ok(()) }

    /// Embed a batch. An `Err` means the whole call failed; a `None` entry
    /// means only that item failed.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>>;

    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        match self.embed_batch(&[text.to_string()]).await {
            Ok(mut v) if !v.is_empty() => v.swap_remove(0),
            _ => None,
        }
    }

    /// Query-side embedding; same space as documents unless overridden.
    async fn embed_query(&self, text: &str) -> Option<Vec<f32>> { self.embed(text).await }
}

/// Drop vectors whose length does not match the expected dimension.
pub fn checked_vector(v: Option<Vec<f32>>, dim: usize) -> Option<Vec<f32>> {
    v.filter(|v| v.len() == dim)
}

/// Decides which project-relative paths never enter the index.
pub trait ExclusionRules: Send + Sync {
    fn is_excluded(&self, relative_path: &Path) -> bool;
}

//! Embedding providers and the in-process embedding cache.
//!
//! `APP_USE_FAKE_EMBEDDINGS=1` switches to the deterministic [`FakeEmbedder`]
//! for tests and development. With the `local-model` feature a candle BERT
//! provider is available and loaded from `APP_MODEL_DIR`.

pub mod cache;
pub mod embedding_cache;
pub mod retry;
pub mod single_flight;

#[cfg(feature = "local-model")]
pub mod local;

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use twox_hash::XxHash64;

use semindex_core::traits::EmbeddingProvider;
use semindex_core::Result;

pub use cache::{CacheStats, FifoCache};
pub use embedding_cache::{CacheName, EmbeddingCache};
pub use retry::{init_with_retry, InitOutcome};
pub use single_flight::SingleFlight;

/// Dimension of the default sentence model (MiniLM).
pub const DEFAULT_DIM: usize = 384;

/// Token-hashing embedder: deterministic, L2-normalised, no model files.
pub struct FakeEmbedder {
    dim: usize,
    id: String,
}

impl FakeEmbedder {
    pub fn new(dim: usize) -> Self { Self { dim, id: format!("fake:xxh64:d{}", dim) } }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        let lowered = text.to_lowercase();
        let tokens = lowered.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty());
        for (i, token) in tokens.enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += val + (i as f32 % 3.0) * 0.01;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6);
        for x in &mut v { *x /= norm; }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    fn id(&self) -> &str { &self.id }
    fn dim(&self) -> usize { self.dim }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
        Ok(texts.iter().map(|t| Some(self.embed_text(t))).collect())
    }
}

fn use_fake() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Provider selected by environment: fake when requested, otherwise the
/// local model (when compiled in).
pub fn get_default_provider(dim: usize) -> Result<Arc<dyn EmbeddingProvider>> {
    if use_fake() {
        tracing::info!(dim, "using FakeEmbedder");
        return Ok(Arc::new(FakeEmbedder::new(dim)));
    }
    local_provider(dim)
}

#[cfg(feature = "local-model")]
fn local_provider(dim: usize) -> Result<Arc<dyn EmbeddingProvider>> {
    let dir = local::resolve_model_dir()?;
    Ok(Arc::new(local::LocalBertProvider::new(dir, dim)))
}

#[cfg(not(feature = "local-model"))]
fn local_provider(_dim: usize) -> Result<Arc<dyn EmbeddingProvider>> {
    Err(semindex_core::Error::Initialization(
        "no embedding model compiled in; enable the `local-model` feature or set APP_USE_FAKE_EMBEDDINGS=1".into(),
    ))
}

/// Cosine similarity; zero when either side is empty or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0f32, 0f32, 0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

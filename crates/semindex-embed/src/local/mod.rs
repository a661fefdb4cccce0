//! Local sentence-transformer (BERT/MiniLM) provider on candle.

mod device;
mod pool;
mod tokenize;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;
use tokio::sync::OnceCell;

use semindex_core::traits::EmbeddingProvider;
use semindex_core::{Error, Result};

pub use device::select_device;

const MAX_LEN: usize = 256;

struct BertInner {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl BertInner {
    fn load(model_dir: &Path) -> Result<Self> {
        let device = select_device();
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| Error::Initialization(format!("tokenizer {}: {e}", tokenizer_path.display())))?;
        let config_path = model_dir.join("config.json");
        let config: BertConfig = serde_json::from_str(&std::fs::read_to_string(&config_path)?)
            .map_err(|e| Error::Initialization(format!("config {}: {e}", config_path.display())))?;
        let weights_path = model_dir.join("pytorch_model.bin");
        let weights = candle_core::pickle::read_all(&weights_path).map_err(init_err)?;
        let weights_map: HashMap<String, Tensor> = weights.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights_map, DType::F32, &device);
        let model = BertModel::load(vb, &config).map_err(init_err)?;
        tracing::info!(dir = %model_dir.display(), "local embedding model loaded");
        Ok(Self { model, tokenizer, device })
    }

    fn embed_one(&self, text: &str) -> candle_core::Result<Vec<f32>> {
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize::tokenize_on_device(&self.tokenizer, text, MAX_LEN, &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;
        let hidden = self.model.forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
        let pooled = pool::masked_mean_l2(&hidden, &attention_mask)?;
        let v = pooled.to_device(&Device::Cpu)?.squeeze(0)?.to_vec1::<f32>()?;
        if start.elapsed().as_millis() > 100 {
            tracing::debug!(elapsed_ms = start.elapsed().as_millis() as u64, "slow embedding");
        }
        Ok(v)
    }
}

fn init_err(e: candle_core::Error) -> Error { Error::Initialization(e.to_string()) }

/// Loaded lazily on first use; a failed load is retried on the next call.
pub struct LocalBertProvider {
    model_dir: PathBuf,
    dim: usize,
    id: String,
    inner: OnceCell<Arc<BertInner>>,
}

impl LocalBertProvider {
    pub fn new(model_dir: PathBuf, dim: usize) -> Self {
        let id = format!("bert:{}:d{}", model_dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(), dim);
        Self { model_dir, dim, id, inner: OnceCell::new() }
    }

    async fn inner(&self) -> Result<Arc<BertInner>> {
        let inner = self
            .inner
            .get_or_try_init(|| async {
                let dir = self.model_dir.clone();
                let loaded = tokio::task::spawn_blocking(move || BertInner::load(&dir))
                    .await
                    .map_err(|e| Error::Initialization(format!("model loader panicked: {e}")))??;
                Ok::<_, Error>(Arc::new(loaded))
            })
            .await?;
        Ok(inner.clone())
    }
}

#[async_trait]
impl EmbeddingProvider for LocalBertProvider {
    fn id(&self) -> &str { &self.id }
    fn dim(&self) -> usize { self.dim }

    async fn warm_up(&self) -> Result<()> { self.inner().await.map(|_| ()) }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
        let inner = self.inner().await?;
        let texts = texts.to_vec();
        let dim = self.dim;
        tokio::task::spawn_blocking(move || {
            texts
                .iter()
                .map(|t| match inner.embed_one(t) {
                    Ok(v) if v.len() == dim => Some(v),
                    Ok(v) => {
                        tracing::warn!(got = v.len(), expected = dim, "embedding dimension mismatch");
                        None
                    }
                    Err(error) => {
                        tracing::warn!(%error, "embedding failed");
                        None
                    }
                })
                .collect()
        })
        .await
        .map_err(|e| Error::Computation(format!("embedding worker panicked: {e}")))
    }
}

/// Model directory from `APP_MODEL_DIR`/`MODEL_DIR`, then `models/all-MiniLM-L6-v2`.
pub fn resolve_model_dir() -> Result<PathBuf> {
    for var in ["APP_MODEL_DIR", "MODEL_DIR"] {
        if let Ok(dir) = std::env::var(var) {
            let p = PathBuf::from(&dir);
            if p.exists() {
                tracing::info!(var, dir = %p.display(), "using model dir");
                return Ok(p);
            }
        }
    }
    for candidate in ["../models/all-MiniLM-L6-v2", "models/all-MiniLM-L6-v2"] {
        let p = Path::new(candidate);
        if p.exists() {
            return Ok(p.to_path_buf());
        }
    }
    Err(Error::Initialization("could not locate a local embedding model directory".into()))
}

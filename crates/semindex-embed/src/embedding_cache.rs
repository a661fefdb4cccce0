//! Process-wide caches for query embeddings, heading embeddings, inferred
//! document contexts and per-project chunk lists.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use semindex_core::config::CacheSettings;
use semindex_core::types::{DocumentChunk, DocumentContext};

use crate::cache::{CacheStats, FifoCache};
use crate::single_flight::SingleFlight;

pub type Vector = Arc<Vec<f32>>;

const HEADING_PREFIX: &str = "h:";

fn heading_key(heading: &str) -> String { format!("{HEADING_PREFIX}{heading}") }

/// The fixed set of caches held by [`EmbeddingCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheName {
    Embeddings,
    HeadingEmbeddings,
    DocumentContexts,
    ProjectChunks,
}

impl CacheName {
    pub const ALL: [CacheName; 4] =
        [CacheName::Embeddings, CacheName::HeadingEmbeddings, CacheName::DocumentContexts, CacheName::ProjectChunks];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheName::Embeddings => "embeddings",
            CacheName::HeadingEmbeddings => "heading_embeddings",
            CacheName::DocumentContexts => "document_contexts",
            CacheName::ProjectChunks => "project_chunks",
        }
    }
}

pub struct EmbeddingCache {
    pub embeddings: Arc<FifoCache<String, Vector>>,
    pub heading_embeddings: Arc<FifoCache<String, Vector>>,
    /// Keyed by the absolute document path.
    pub document_contexts: Arc<FifoCache<PathBuf, DocumentContext>>,
    /// Keyed by the normalised project root.
    pub project_chunks: Arc<FifoCache<PathBuf, Arc<Vec<DocumentChunk>>>>,
    embedding_flights: SingleFlight<String, Option<Vector>>,
    context_flights: SingleFlight<PathBuf, DocumentContext>,
}

impl Default for EmbeddingCache {
    fn default() -> Self { Self::new(&CacheSettings::default()) }
}

impl EmbeddingCache {
    pub fn new(settings: &CacheSettings) -> Self {
        Self {
            embeddings: Arc::new(FifoCache::new(CacheName::Embeddings.as_str(), settings.embeddings)),
            heading_embeddings: Arc::new(FifoCache::new(CacheName::HeadingEmbeddings.as_str(), settings.heading_embeddings)),
            document_contexts: Arc::new(FifoCache::new(CacheName::DocumentContexts.as_str(), settings.document_contexts)),
            project_chunks: Arc::new(FifoCache::new(CacheName::ProjectChunks.as_str(), settings.project_chunks)),
            embedding_flights: SingleFlight::new(),
            context_flights: SingleFlight::new(),
        }
    }

    /// Cached query embedding, computing it at most once across concurrent callers.
    /// `None` results are not cached.
    pub async fn embedding_or_compute<F, Fut>(&self, text: &str, compute: F) -> Option<Vector>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<Vec<f32>>> + Send + 'static,
    {
        Self::vector_or_compute(&self.embeddings, &self.embedding_flights, format!("q:{text}"), compute).await
    }

    /// Cached heading embeddings for `headings`, in order. Every heading that
    /// is neither cached nor already being computed by another caller goes
    /// to one `compute` call; a result vector of the wrong length counts as
    /// a failure for all of them. Failures are not cached.
    pub async fn headings_or_compute<F, Fut>(&self, headings: &[String], compute: F) -> Vec<Option<Vector>>
    where
        F: FnOnce(Vec<String>) -> Fut,
        Fut: Future<Output = Vec<Option<Vec<f32>>>> + Send + 'static,
    {
        let keys: Vec<String> = headings.iter().map(|h| heading_key(h)).collect();
        let lookup = |key: &String| self.heading_embeddings.get(key).map(Some);
        let publish = self.heading_embeddings.clone();
        self.embedding_flights
            .run_batch(&keys, lookup, move |missing: Vec<String>| {
                let texts: Vec<String> = missing.iter().map(|k| k.strip_prefix(HEADING_PREFIX).unwrap_or(k).to_string()).collect();
                let fut = compute(texts);
                async move {
                    let mut vectors = fut.await;
                    if vectors.len() != missing.len() {
                        vectors = vec![None; missing.len()];
                    }
                    missing
                        .into_iter()
                        .zip(vectors)
                        .map(|(key, v)| {
                            let v = v.map(Arc::new);
                            if let Some(v) = &v {
                                publish.insert(key, v.clone());
                            }
                            v
                        })
                        .collect()
                }
            })
            .await
    }

    async fn vector_or_compute<F, Fut>(
        cache: &Arc<FifoCache<String, Vector>>,
        flights: &SingleFlight<String, Option<Vector>>,
        key: String,
        compute: F,
    ) -> Option<Vector>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<Vec<f32>>> + Send + 'static,
    {
        let publish = cache.clone();
        let cache_key = key.clone();
        flights
            .run_or_lookup(
                key,
                |key| cache.get(key).map(Some),
                move || {
                    let fut = compute();
                    async move {
                        let v = fut.await.map(Arc::new);
                        if let Some(v) = &v {
                            publish.insert(cache_key, v.clone());
                        }
                        v
                    }
                },
            )
            .await
    }

    /// Cached document context; concurrent callers for one document share a
    /// single inference.
    pub async fn document_context_or_compute<F, Fut>(&self, document: PathBuf, compute: F) -> DocumentContext
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DocumentContext> + Send + 'static,
    {
        let publish = self.document_contexts.clone();
        let key = document.clone();
        self.context_flights
            .run_or_lookup(
                document,
                |doc| self.document_contexts.get(doc),
                move || {
                    let fut = compute();
                    async move {
                        let ctx = fut.await;
                        publish.insert(key, ctx.clone());
                        ctx
                    }
                },
            )
            .await
    }

    /// Forget everything cached for one project root.
    pub fn invalidate_project(&self, project: &std::path::Path) {
        self.project_chunks.remove(project);
        self.document_contexts.retain_keys(|doc| !doc.starts_with(project));
    }

    pub fn clear(&self) {
        self.embeddings.clear();
        self.heading_embeddings.clear();
        self.document_contexts.clear();
        self.project_chunks.clear();
    }

    pub fn stats(&self) -> Vec<CacheStats> {
        CacheName::ALL
            .iter()
            .map(|name| match name {
                CacheName::Embeddings => self.embeddings.stats(),
                CacheName::HeadingEmbeddings => self.heading_embeddings.stats(),
                CacheName::DocumentContexts => self.document_contexts.stats(),
                CacheName::ProjectChunks => self.project_chunks.stats(),
            })
            .collect()
    }

    /// Computations started (not served from cache or an in-flight call).
    pub fn computations_started(&self) -> u64 {
        self.embedding_flights.started() + self.context_flights.started()
    }
}

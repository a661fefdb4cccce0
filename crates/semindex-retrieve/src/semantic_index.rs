//! One handle over indexing, retrieval and maintenance of the shared store.
//!
//! Retrieval here is fail-closed: storage or model errors are logged and
//! surface as an empty result.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use semindex_core::config::Settings;
use semindex_core::paths::resolve_scope;
use semindex_core::traits::{EmbeddingProvider, ExclusionRules};
use semindex_core::types::SearchResult;
use semindex_core::Result;
use semindex_embed::{get_default_provider, CacheStats, EmbeddingCache};
use semindex_indexer::{BatchReport, IndexOptions, Indexer};
use semindex_store::{EmbeddingStore, StoreStatus};

use crate::context::ContextInferer;
use crate::retriever::{DocSearchOptions, Retriever, SearchOptions};

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub store: StoreStatus,
    pub caches: Vec<CacheStats>,
}

pub struct SemanticIndex {
    store: Arc<EmbeddingStore>,
    cache: Arc<EmbeddingCache>,
    indexer: Indexer,
    retriever: Retriever,
}

impl SemanticIndex {
    pub fn new(store: Arc<EmbeddingStore>, provider: Arc<dyn EmbeddingProvider>, settings: &Settings) -> Result<Self> {
        let cache = Arc::new(EmbeddingCache::new(&settings.cache));
        let indexer = Indexer::new(store.clone(), provider.clone(), settings)?;
        let retriever = Retriever::new(store.clone(), provider, cache.clone(), settings)?;
        Ok(Self { store, cache, indexer, retriever })
    }

    /// LanceDB store under `storage.dir` with the environment-selected provider.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let store = Arc::new(EmbeddingStore::lance(&settings.storage));
        let provider = get_default_provider(settings.storage.embedding_dim)?;
        Self::new(store, provider, settings)
    }

    pub fn with_inferer(mut self, inferer: Arc<dyn ContextInferer>) -> Self {
        self.retriever = self.retriever.with_inferer(inferer);
        self
    }

    pub fn with_exclusions(mut self, exclusions: Arc<dyn ExclusionRules>) -> Self {
        self.indexer = self.indexer.with_exclusions(exclusions);
        self
    }

    pub fn store(&self) -> &Arc<EmbeddingStore> { &self.store }

    pub fn cache(&self) -> &EmbeddingCache { &self.cache }

    pub async fn index_batch(&self, project: &Path, paths: &[PathBuf], options: &IndexOptions) -> BatchReport {
        let report = self.indexer.index_batch(project, paths, options).await;
        if let Ok(scope) = resolve_scope(project) {
            self.cache.invalidate_project(&scope);
        }
        report
    }

    pub async fn search(&self, project: &Path, query: &str, options: &SearchOptions) -> Vec<SearchResult> {
        match self.retriever.search(project, query, options).await {
            Ok(results) => results,
            Err(error) => {
                tracing::error!(%error, project = %project.display(), "code search failed");
                Vec::new()
            }
        }
    }

    pub async fn search_docs(&self, project: &Path, query: &str, options: &DocSearchOptions) -> Vec<SearchResult> {
        match self.retriever.search_docs(project, query, options).await {
            Ok(results) => results,
            Err(error) => {
                tracing::error!(%error, project = %project.display(), "documentation search failed");
                Vec::new()
            }
        }
    }

    /// Remove every row of one project. Refuses root and shallow paths.
    pub async fn clear_project(&self, project: &Path) -> bool {
        match self.store.delete_project_scope(project).await {
            Ok(deleted) => {
                if let Ok(scope) = resolve_scope(project) {
                    self.cache.invalidate_project(&scope);
                }
                tracing::info!(project = %project.display(), deleted, "project cleared");
                true
            }
            Err(error) => {
                tracing::error!(%error, project = %project.display(), "project clear failed");
                false
            }
        }
    }

    pub async fn clear_all(&self) -> bool {
        let ok = match self.store.clear_all().await {
            Ok(()) => true,
            Err(error) => {
                tracing::error!(%error, "store clear failed");
                false
            }
        };
        self.cache.clear();
        ok
    }

    pub async fn status(&self) -> Result<IndexStatus> {
        Ok(IndexStatus { store: self.store.status().await?, caches: self.cache.stats() })
    }
}

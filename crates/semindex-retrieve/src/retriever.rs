//! Project-scoped hybrid retrieval over code files and documentation chunks.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arrow_array::RecordBatch;
use futures::future::join_all;

use semindex_core::config::{RerankSettings, SearchSettings, Settings};
use semindex_core::paths::{path_similarity, relative_path, resolve_scope, scope_key};
use semindex_core::traits::{checked_vector, EmbeddingProvider};
use semindex_core::types::{DocumentChunk, DocumentContext, QueryContext, ResultKind, SearchResult, STRUCTURE_KIND};
use semindex_core::{Error, Result};
use semindex_embed::{cosine_similarity, EmbeddingCache};
use semindex_indexer::structure::structure_id;
use semindex_store::schema::{CONTENT_COLUMN, SCOPE_COLUMN};
use semindex_store::{columns, DocChunkRecord, EmbeddingStore, FileRecord, Filter, HybridQuery, Table};

use crate::context::{is_generic_document, ContextInferer, KeywordInferer};
use crate::rerank::{rerank_score, RerankSignals};
use crate::score::{clamp_unit, normalized_score};
use crate::test_filter::{TestFilter, TestPaths};

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    pub threshold: Option<f32>,
    /// File under review; never returned. Absolute or project-relative.
    pub exclude_file: Option<PathBuf>,
    pub tests: TestFilter,
    pub include_structure: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DocSearchOptions {
    pub limit: Option<usize>,
    pub threshold: Option<f32>,
    /// Enables reranking.
    pub context: Option<QueryContext>,
}

pub struct Retriever {
    store: Arc<EmbeddingStore>,
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<EmbeddingCache>,
    inferer: Arc<dyn ContextInferer>,
    test_paths: TestPaths,
    search: SearchSettings,
    rerank: RerankSettings,
}

impl Retriever {
    pub fn new(
        store: Arc<EmbeddingStore>,
        provider: Arc<dyn EmbeddingProvider>,
        cache: Arc<EmbeddingCache>,
        settings: &Settings,
    ) -> Result<Self> {
        Ok(Self {
            store,
            provider,
            cache,
            inferer: Arc::new(KeywordInferer),
            test_paths: TestPaths::new()?,
            search: settings.search.clone(),
            rerank: settings.rerank.clone(),
        })
    }

    pub fn with_inferer(mut self, inferer: Arc<dyn ContextInferer>) -> Self {
        self.inferer = inferer;
        self
    }

    /// Code search within one project.
    pub async fn search(&self, project: &Path, query: &str, opts: &SearchOptions) -> Result<Vec<SearchResult>> {
        let project = resolve_scope(project)?;
        let limit = opts.limit.unwrap_or(self.search.default_limit);
        let threshold = opts.threshold.unwrap_or(self.search.similarity_threshold);
        let vector = self.query_vector(query).await?;

        let mut hits = self.candidates(Table::Files, &project, query, &vector, limit, threshold).await?;
        let reviewed = opts.exclude_file.as_deref().map(|f| ReviewedFile::new(&project, f));
        hits.retain(|h| {
            h.kind == ResultKind::File
                && !reviewed.as_ref().is_some_and(|r| r.matches(&project, &h.path))
                && self.test_paths.keep(opts.tests, &h.path)
        });
        sort_by_similarity(&mut hits);
        hits.truncate(limit);

        if opts.include_structure {
            if let Some(structure) = self.structure_hit(&project, &vector).await? {
                hits.push(structure);
            }
        }
        tracing::debug!(project = %project.display(), results = hits.len(), "code search");
        Ok(hits)
    }

    /// Documentation search within one project, reranked when a query context is given.
    pub async fn search_docs(&self, project: &Path, query: &str, opts: &DocSearchOptions) -> Result<Vec<SearchResult>> {
        let project = resolve_scope(project)?;
        let limit = opts.limit.unwrap_or(self.search.default_limit);
        let threshold = opts.threshold.unwrap_or(self.search.similarity_threshold);
        let vector = self.query_vector(query).await?;

        let mut hits = self.candidates(Table::DocChunks, &project, query, &vector, limit, threshold).await?;
        if let Some(context) = &opts.context {
            if hits.len() >= self.rerank.min_candidates {
                self.rerank(&project, &vector, context, &mut hits).await?;
            }
        }
        sort_by_similarity(&mut hits);
        hits.truncate(limit);
        tracing::debug!(project = %project.display(), results = hits.len(), "documentation search");
        Ok(hits)
    }

    async fn query_vector(&self, query: &str) -> Result<Arc<Vec<f32>>> {
        let provider = self.provider.clone();
        let text = query.to_string();
        let dim = self.store.dim();
        self.cache
            .embedding_or_compute(query, move || async move { checked_vector(provider.embed_query(&text).await, dim) })
            .await
            .ok_or_else(|| Error::Computation("query embedding failed".into()))
    }

    /// Over-fetched, scope-isolated, normalised and thresholded hits.
    async fn candidates(
        &self,
        table: Table,
        project: &Path,
        query: &str,
        vector: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        let scope = scope_key(project);
        let request = HybridQuery {
            text: query,
            vector,
            filter: self.store.scope_filter(table, &scope),
            limit: limit.max(1) * self.search.over_fetch.max(1),
        };
        let batches = self.store.search(table, &request).await?;

        let mut hits = Vec::new();
        let mut legacy = Vec::new();
        for batch in &batches {
            for row in 0..batch.num_rows() {
                let Some(hit) = to_result(table, batch, row, vector) else { continue };
                match hit.project_path.as_deref() {
                    Some(p) if p == scope => hits.push(hit),
                    Some(_) => {}
                    None => legacy.push(hit),
                }
            }
        }
        if !legacy.is_empty() {
            hits.extend(existing_only(project, legacy).await);
        }
        hits.retain(|h| h.similarity >= threshold);
        Ok(hits)
    }

    async fn structure_hit(&self, project: &Path, vector: &[f32]) -> Result<Option<SearchResult>> {
        let filter = Filter::eq("id", structure_id(project)).and(self.store.scope_filter(Table::Files, &scope_key(project)));
        let rows: Vec<FileRecord> = self.store.scan(&filter).await?;
        let Some(row) = rows.into_iter().find(|r| r.kind == STRUCTURE_KIND) else {
            return Ok(None);
        };
        let similarity = cosine_similarity(vector, &row.vector);
        if similarity <= self.search.structure_similarity {
            return Ok(None);
        }
        Ok(Some(SearchResult {
            id: row.id,
            kind: ResultKind::ProjectStructure,
            project_path: row.project_path,
            path: row.path,
            content: row.content,
            language: None,
            heading_text: None,
            document_title: None,
            start_line: None,
            similarity: clamp_unit(similarity),
            reranked: false,
        }))
    }

    async fn rerank(&self, project: &Path, query_vector: &[f32], query: &QueryContext, hits: &mut [SearchResult]) -> Result<()> {
        // every heading vector and document context is in hand before scoring
        let headings = self.heading_vectors(hits).await;
        let contexts = self.document_contexts(project, hits).await?;
        let query_path = query.query_path.as_deref().map(|q| project_relative(project, q));
        for hit in hits.iter_mut() {
            let document = contexts.get(&hit.path).cloned().unwrap_or_default();
            let heading_similarity = hit
                .heading_text
                .as_ref()
                .and_then(|h| headings.get(h))
                .map(|v| cosine_similarity(query_vector, v))
                .unwrap_or(0.0);
            let path_similarity = query_path.as_deref().map(|q| path_similarity(q, &hit.path)).unwrap_or(0.0);
            hit.similarity = rerank_score(&RerankSignals {
                similarity: hit.similarity,
                query,
                document: &document,
                heading_similarity,
                path_similarity,
            });
            hit.reranked = true;
        }
        Ok(())
    }

    /// One provider call for all distinct headings that are neither cached
    /// nor already being embedded for a concurrent query.
    async fn heading_vectors(&self, hits: &[SearchResult]) -> HashMap<String, Arc<Vec<f32>>> {
        let mut distinct: Vec<String> = hits.iter().filter_map(|h| h.heading_text.clone()).collect();
        distinct.sort();
        distinct.dedup();
        if distinct.is_empty() {
            return HashMap::new();
        }

        let provider = self.provider.clone();
        let dim = self.store.dim();
        let vectors = self
            .cache
            .headings_or_compute(&distinct, move |missing| async move {
                match provider.embed_batch(&missing).await {
                    Ok(vectors) => vectors.into_iter().map(|v| checked_vector(v, dim)).collect(),
                    Err(error) => {
                        tracing::warn!(%error, headings = missing.len(), "heading embeddings unavailable");
                        Vec::new()
                    }
                }
            })
            .await;
        distinct.into_iter().zip(vectors).filter_map(|(heading, v)| Some((heading, v?))).collect()
    }

    /// Context per distinct document among `hits`, at most
    /// `context_concurrency` inferences at a time.
    async fn document_contexts(&self, project: &Path, hits: &[SearchResult]) -> Result<HashMap<String, DocumentContext>> {
        let mut documents: Vec<String> = hits.iter().map(|h| h.path.clone()).collect();
        documents.sort();
        documents.dedup();

        let mut out = HashMap::new();
        let mut slow = Vec::new();
        for doc in documents {
            if is_generic_document(&doc) {
                out.insert(doc, DocumentContext::generic());
            } else {
                slow.push(doc);
            }
        }
        if slow.is_empty() {
            return Ok(out);
        }

        let chunks = self.project_chunks(project).await?;
        let pause = Duration::from_millis(self.rerank.context_pause_ms);
        for (i, batch) in slow.chunks(self.rerank.context_concurrency.max(1)).enumerate() {
            if i > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            let resolved = join_all(batch.iter().map(|doc| self.document_context(project, doc, &chunks, hits))).await;
            out.extend(batch.iter().cloned().zip(resolved));
        }
        Ok(out)
    }

    async fn document_context(
        &self,
        project: &Path,
        document: &str,
        chunks: &[DocumentChunk],
        hits: &[SearchResult],
    ) -> DocumentContext {
        let mut own: Vec<DocumentChunk> = chunks.iter().filter(|c| c.document_path == document).cloned().collect();
        if own.is_empty() {
            own = hits.iter().filter(|h| h.path == document).map(as_chunk).collect();
        }
        let inferer = self.inferer.clone();
        let path = document.to_string();
        self.cache
            .document_context_or_compute(project.join(document), move || async move { inferer.infer(&path, &own).await })
            .await
    }

    /// Every documentation chunk of a project, cached until the project is reindexed or cleared.
    async fn project_chunks(&self, project: &Path) -> Result<Arc<Vec<DocumentChunk>>> {
        if let Some(chunks) = self.cache.project_chunks.get(project) {
            return Ok(chunks);
        }
        let rows: Vec<DocChunkRecord> = self.store.scan_scope(&scope_key(project)).await?;
        let chunks: Arc<Vec<DocumentChunk>> = Arc::new(
            rows.into_iter()
                .map(|r| DocumentChunk {
                    id: r.id,
                    document_path: r.document_path,
                    document_title: r.document_title,
                    heading_text: r.heading_text,
                    content: r.content,
                    start_line: u32::try_from(r.start_line).ok(),
                })
                .collect(),
        );
        self.cache.project_chunks.insert(project.to_path_buf(), chunks.clone());
        Ok(chunks)
    }
}

/// The reviewed file in both of the forms a stored path may be compared against.
struct ReviewedFile {
    relative: String,
    absolute: PathBuf,
}

impl ReviewedFile {
    fn new(project: &Path, file: &Path) -> Self {
        let absolute = if file.is_absolute() { file.to_path_buf() } else { project.join(file) };
        Self { relative: relative_path(project, &absolute), absolute }
    }

    fn matches(&self, project: &Path, stored: &str) -> bool {
        stored == self.relative || project.join(stored) == self.absolute || Path::new(stored) == self.absolute
    }
}

/// Stored chunk paths are project-relative; accept either form from callers.
fn project_relative(project: &Path, path: &str) -> String {
    let p = Path::new(path);
    if p.is_absolute() { relative_path(project, p) } else { path.to_string() }
}

fn sort_by_similarity(hits: &mut [SearchResult]) { hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity)); }

/// Legacy rows carry no scope; keep those whose file still exists under `project`.
async fn existing_only(project: &Path, rows: Vec<SearchResult>) -> Vec<SearchResult> {
    let checks = rows.iter().map(|r| {
        let path = project.join(&r.path);
        async move { tokio::fs::try_exists(&path).await.unwrap_or(false) }
    });
    let exists = join_all(checks).await;
    let before = rows.len();
    let kept: Vec<SearchResult> = rows.into_iter().zip(exists).filter_map(|(r, ok)| ok.then_some(r)).collect();
    if kept.len() < before {
        tracing::debug!(dropped = before - kept.len(), "legacy rows for missing files dropped");
    }
    kept
}

fn as_chunk(hit: &SearchResult) -> DocumentChunk {
    DocumentChunk {
        id: hit.id.clone(),
        document_path: hit.path.clone(),
        document_title: hit.document_title.clone(),
        heading_text: hit.heading_text.clone(),
        content: hit.content.clone(),
        start_line: hit.start_line,
    }
}

fn to_result(table: Table, batch: &RecordBatch, row: usize, query: &[f32]) -> Option<SearchResult> {
    let id = columns::string(batch, "id", row)?;
    let project_path = columns::string(batch, SCOPE_COLUMN, row);
    let content = columns::string(batch, CONTENT_COLUMN, row).unwrap_or_default();
    let similarity = normalized_score(batch, row, query);
    let result = match table {
        Table::DocChunks => SearchResult {
            id,
            kind: ResultKind::DocumentChunk,
            project_path,
            path: columns::string(batch, "document_path", row)?,
            content,
            language: None,
            heading_text: columns::string(batch, "heading_text", row),
            document_title: columns::string(batch, "document_title", row),
            start_line: columns::int32(batch, "start_line", row).and_then(|l| u32::try_from(l).ok()),
            similarity,
            reranked: false,
        },
        Table::Files => {
            let kind = match columns::string(batch, "kind", row).as_deref() {
                Some(STRUCTURE_KIND) => ResultKind::ProjectStructure,
                _ => ResultKind::File,
            };
            SearchResult {
                id,
                kind,
                project_path,
                path: columns::string(batch, "path", row)?,
                content,
                language: columns::string(batch, "language", row),
                heading_text: None,
                document_title: None,
                start_line: None,
                similarity,
                reranked: false,
            }
        }
        Table::Comments => return None,
    };
    Some(result)
}

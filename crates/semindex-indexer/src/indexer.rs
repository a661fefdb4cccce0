//! Incremental, content-addressed indexing of one project batch.
//!
//! Flow per batch:
//! 1) Warm up the model and open the store; either failing aborts the batch
//! 2) Replace the project's directory-structure snapshot
//! 3) Classify inputs (excluded / missing / empty / code / documentation)
//! 4) One scoped scan per table; diff content hashes against stored rows
//! 5) Embed what changed in bounded rounds; delete stale rows, insert fresh ones
//! 6) Compact and re-index each touched table

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use semindex_core::config::{IndexingSettings, ModelSettings, Settings};
use semindex_core::hash::{content_hash, short_id};
use semindex_core::paths::{project_name, relative_path, resolve_scope, scope_key};
use semindex_core::traits::{checked_vector, EmbeddingProvider, ExclusionRules};
use semindex_core::types::STRUCTURE_KIND;
use semindex_core::{Error, Result};
use semindex_embed::init_with_retry;
use semindex_store::schema::{SCOPE_COLUMN, VECTOR_COLUMN};
use semindex_store::{DocChunkRecord, EmbeddingStore, FileRecord, Filter, ScopedRecord, Table};

use crate::chunker::{chunk_document, is_documentation, ChunkedDocument};
use crate::exclusions::DefaultExclusions;
use crate::language::detect_language;
use crate::report::{BatchReport, FileOutcome, FileStatus, ProgressCallback};
use crate::structure::{render_tree, structure_id};

#[derive(Clone, Default)]
pub struct IndexOptions {
    pub progress: Option<ProgressCallback>,
}

struct Candidate {
    rel: String,
    abs: PathBuf,
    content: String,
    last_modified: i64,
}

struct CodeJob {
    candidate: Candidate,
    hash: String,
    stale_ids: Vec<String>,
}

struct DocJob {
    candidate: Candidate,
    doc: ChunkedDocument,
    had_rows: bool,
}

pub struct Indexer {
    store: Arc<EmbeddingStore>,
    provider: Arc<dyn EmbeddingProvider>,
    exclusions: Arc<dyn ExclusionRules>,
    indexing: IndexingSettings,
    model: ModelSettings,
}

impl Indexer {
    pub fn new(store: Arc<EmbeddingStore>, provider: Arc<dyn EmbeddingProvider>, settings: &Settings) -> Result<Self> {
        Ok(Self {
            store,
            provider,
            exclusions: Arc::new(DefaultExclusions::new()?),
            indexing: settings.indexing.clone(),
            model: settings.model.clone(),
        })
    }

    pub fn with_exclusions(mut self, exclusions: Arc<dyn ExclusionRules>) -> Self {
        self.exclusions = exclusions;
        self
    }

    pub fn exclusions(&self) -> &dyn ExclusionRules { self.exclusions.as_ref() }

    /// Index `paths` (absolute, or relative to `project_root`) into the
    /// project's scope. Per-file problems are counted, never raised.
    pub async fn index_batch(&self, project_root: &Path, paths: &[PathBuf], options: &IndexOptions) -> BatchReport {
        let mut report = BatchReport::default();
        let total = paths.len();
        let progress = options.progress.as_ref();

        let project = match resolve_scope(project_root) {
            Ok(p) => p,
            Err(e) => return self.abort(report, project_root, paths, e, progress),
        };
        if let Err(e) = self.prepare().await {
            return self.abort(report, &project, paths, e, progress);
        }
        let scope = scope_key(&project);

        report.structure_updated = match self.update_structure(&project, &scope).await {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(%error, project = %scope, "structure snapshot not updated");
                false
            }
        };

        let (code, docs) = self.classify(&project, paths, &mut report, total, progress).await;

        let mut touched: HashSet<Table> = HashSet::new();
        if !code.is_empty() {
            match self.index_code(&scope, code, &mut report, total, progress).await {
                Ok(true) => {
                    touched.insert(Table::Files);
                }
                Ok(false) => {}
                Err(e) => return self.abort(report, &project, paths, e, progress),
            }
        }
        if !docs.is_empty() {
            match self.index_docs(&scope, docs, &mut report, total, progress).await {
                Ok(true) => {
                    touched.insert(Table::DocChunks);
                }
                Ok(false) => {}
                Err(e) => return self.abort(report, &project, paths, e, progress),
            }
        }

        if report.structure_updated {
            touched.insert(Table::Files);
        }
        for table in touched {
            self.store.compact(table).await;
            let outcome = self.store.adaptive_index(table, VECTOR_COLUMN).await;
            tracing::debug!(table = table.name(), ?outcome, "index check");
        }

        tracing::info!(
            project = %scope,
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            excluded = report.excluded,
            "batch indexed"
        );
        report
    }

    /// Model warm-up with bounded retries, then the store connection.
    async fn prepare(&self) -> Result<()> {
        let backoff = Duration::from_millis(self.model.init_backoff_ms);
        let provider = self.provider.clone();
        init_with_retry(self.model.init_attempts, backoff, |_| {
            let provider = provider.clone();
            async move { provider.warm_up().await }
        })
        .await
        .into_result()?;
        self.store.open().await.map(|_| ())
    }

    fn abort(
        &self,
        mut report: BatchReport,
        project: &Path,
        paths: &[PathBuf],
        error: Error,
        progress: Option<&ProgressCallback>,
    ) -> BatchReport {
        tracing::error!(%error, project = %project.display(), "batch aborted");
        let reason = error.to_string();
        // files that already have an outcome keep it
        let seen: HashSet<String> = report.files.iter().map(|f| f.path.clone()).collect();
        for p in paths {
            let abs = if p.is_absolute() { p.clone() } else { project.join(p) };
            let rel = relative_path(project, &abs);
            if seen.contains(&rel) {
                continue;
            }
            report.record(FileOutcome::new(rel, FileStatus::Failed).because(reason.clone()), paths.len(), progress);
        }
        report.aborted = Some(reason);
        report
    }

    async fn update_structure(&self, project: &Path, scope: &str) -> Result<()> {
        let tree = render_tree(
            project,
            self.exclusions.as_ref(),
            self.indexing.max_structure_depth,
            self.indexing.max_structure_entries,
        );
        let vector = checked_vector(self.provider.embed(&tree).await, self.store.dim())
            .ok_or_else(|| Error::Computation("structure snapshot embedding failed".into()))?;
        let id = structure_id(project);
        let record = FileRecord {
            id: id.clone(),
            project_path: Some(scope.to_string()),
            path: project_name(project),
            kind: STRUCTURE_KIND.to_string(),
            language: None,
            content_hash: content_hash(&tree),
            content: tree,
            last_modified: Utc::now().timestamp_millis(),
            vector,
        };
        let filter = Filter::eq("id", id).and(self.store.scope_filter(Table::Files, scope));
        self.store.delete_where(Table::Files, &filter).await?;
        self.store.insert(&[record]).await?;
        tracing::debug!(project = %scope, "structure snapshot replaced");
        Ok(())
    }

    async fn classify(
        &self,
        project: &Path,
        paths: &[PathBuf],
        report: &mut BatchReport,
        total: usize,
        progress: Option<&ProgressCallback>,
    ) -> (Vec<Candidate>, Vec<Candidate>) {
        let mut code = Vec::new();
        let mut docs = Vec::new();
        let mut seen = HashSet::new();
        for p in paths {
            let abs = if p.is_absolute() { p.clone() } else { project.join(p) };
            let rel = relative_path(project, &abs);
            if !seen.insert(rel.clone()) {
                continue;
            }
            if self.exclusions.is_excluded(Path::new(&rel)) {
                report.record(FileOutcome::new(rel, FileStatus::Excluded), total, progress);
                continue;
            }
            let meta = match tokio::fs::metadata(&abs).await {
                Ok(m) if m.is_file() => m,
                _ => {
                    report.record(FileOutcome::new(rel, FileStatus::Skipped).because("missing"), total, progress);
                    continue;
                }
            };
            let content = match tokio::fs::read_to_string(&abs).await {
                Ok(c) => c,
                Err(error) => {
                    report.record(FileOutcome::new(rel, FileStatus::Failed).because(error.to_string()), total, progress);
                    continue;
                }
            };
            if content.trim().is_empty() {
                report.record(FileOutcome::new(rel, FileStatus::Skipped).because("empty"), total, progress);
                continue;
            }
            let last_modified = meta
                .modified()
                .map(|t| DateTime::<Utc>::from(t).timestamp_millis())
                .unwrap_or_else(|_| Utc::now().timestamp_millis());
            if is_documentation(&abs) {
                docs.push(Candidate { rel, abs, content, last_modified });
            } else {
                let content = truncate_lines(content, self.indexing.max_code_lines);
                code.push(Candidate { rel, abs, content, last_modified });
            }
        }
        (code, docs)
    }

    /// Returns whether anything was written.
    async fn index_code(
        &self,
        scope: &str,
        candidates: Vec<Candidate>,
        report: &mut BatchReport,
        total: usize,
        progress: Option<&ProgressCallback>,
    ) -> Result<bool> {
        let existing: Vec<FileRecord> = self.store.scan_scope(scope).await?;
        let mut by_path: HashMap<&str, Vec<&FileRecord>> = HashMap::new();
        for row in existing.iter().filter(|r| r.kind != STRUCTURE_KIND) {
            by_path.entry(row.path.as_str()).or_default().push(row);
        }

        let mut jobs = Vec::new();
        for candidate in candidates {
            let hash = content_hash(&candidate.content);
            let rows = by_path.get(candidate.rel.as_str()).cloned().unwrap_or_default();
            if rows.iter().any(|r| r.content_hash() == hash) {
                let duplicates: Vec<String> =
                    rows.iter().filter(|r| r.content_hash() != hash).map(|r| r.id.clone()).collect();
                if !duplicates.is_empty() {
                    self.store.delete_ids(Table::Files, &duplicates).await?;
                }
                tracing::debug!(path = %candidate.rel, "unchanged");
                report.record(FileOutcome::new(candidate.rel, FileStatus::Skipped).because("unchanged"), total, progress);
                continue;
            }
            let stale_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
            tracing::debug!(path = %candidate.rel, changed = !stale_ids.is_empty(), "scheduled");
            jobs.push(CodeJob { candidate, hash, stale_ids });
        }
        if jobs.is_empty() {
            return Ok(false);
        }

        let texts: Vec<String> = jobs.iter().map(|j| j.candidate.content.clone()).collect();
        let vectors = self.embed_rounds(&texts).await;

        let mut records = Vec::new();
        let mut written = Vec::new();
        for (job, vector) in jobs.into_iter().zip(vectors) {
            let Some(vector) = vector else {
                report.record(
                    FileOutcome::new(job.candidate.rel, FileStatus::Failed).because("embedding failed"),
                    total,
                    progress,
                );
                continue;
            };
            if !job.stale_ids.is_empty() {
                self.store.delete_ids(Table::Files, &job.stale_ids).await?;
            }
            let c = job.candidate;
            records.push(FileRecord {
                id: short_id(&[scope, &c.rel, &job.hash]),
                project_path: Some(scope.to_string()),
                language: detect_language(&c.abs).map(str::to_string),
                kind: "file".to_string(),
                path: c.rel.clone(),
                content: c.content,
                content_hash: job.hash,
                last_modified: c.last_modified,
                vector,
            });
            written.push(c.rel);
        }
        if records.is_empty() {
            return Ok(false);
        }
        match self.store.insert(&records).await {
            Ok(_) => {
                for rel in written {
                    report.record(FileOutcome::new(rel, FileStatus::Processed).rows(1), total, progress);
                }
                Ok(true)
            }
            Err(error) => {
                tracing::warn!(%error, files = written.len(), "insert failed");
                for rel in written {
                    report.record(FileOutcome::new(rel, FileStatus::Failed).because(error.to_string()), total, progress);
                }
                Ok(false)
            }
        }
    }

    async fn index_docs(
        &self,
        scope: &str,
        candidates: Vec<Candidate>,
        report: &mut BatchReport,
        total: usize,
        progress: Option<&ProgressCallback>,
    ) -> Result<bool> {
        let existing: Vec<DocChunkRecord> = self.store.scan_scope(scope).await?;
        let mut stored: HashMap<&str, Vec<String>> = HashMap::new();
        for row in &existing {
            stored.entry(row.document_path.as_str()).or_default().push(row.content_hash().to_string());
        }

        let mut jobs = Vec::new();
        for candidate in candidates {
            let stem = candidate.abs.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
            let doc = chunk_document(&candidate.content, &stem);
            let fresh = doc.sorted_hashes();
            let previous = stored.get(candidate.rel.as_str()).map(|h| {
                let mut h = h.clone();
                h.sort();
                h
            });
            if previous.as_ref() == Some(&fresh) {
                tracing::debug!(path = %candidate.rel, chunks = fresh.len(), "document unchanged");
                report.record(FileOutcome::new(candidate.rel, FileStatus::Skipped).because("unchanged"), total, progress);
                continue;
            }
            if doc.chunks.is_empty() {
                report.record(FileOutcome::new(candidate.rel, FileStatus::Skipped).because("no content"), total, progress);
                continue;
            }
            jobs.push(DocJob { candidate, doc, had_rows: previous.is_some() });
        }
        if jobs.is_empty() {
            return Ok(false);
        }

        // one set of provider rounds for every scheduled chunk, split back per document
        let texts: Vec<String> = jobs.iter().flat_map(|j| j.doc.chunks.iter().map(|c| c.content.clone())).collect();
        let mut vectors = self.embed_rounds(&texts).await.into_iter();

        let mut wrote = false;
        for job in jobs {
            let vectors: Vec<Option<Vec<f32>>> = vectors.by_ref().take(job.doc.chunks.len()).collect();
            if vectors.len() != job.doc.chunks.len() || vectors.iter().any(Option::is_none) {
                report.record(
                    FileOutcome::new(job.candidate.rel, FileStatus::Failed).because("embedding failed"),
                    total,
                    progress,
                );
                continue;
            }
            let c = &job.candidate;
            let records: Vec<DocChunkRecord> = job
                .doc
                .chunks
                .iter()
                .zip(vectors.into_iter().flatten())
                .map(|(chunk, vector)| DocChunkRecord {
                    id: short_id(&[scope, &c.rel, &chunk.hash, &chunk.index.to_string()]),
                    project_path: Some(scope.to_string()),
                    document_path: c.rel.clone(),
                    document_title: Some(job.doc.title.clone()),
                    heading_text: chunk.heading.clone(),
                    chunk_index: i32::try_from(chunk.index).unwrap_or(i32::MAX),
                    start_line: i32::try_from(chunk.start_line).unwrap_or(i32::MAX),
                    content: chunk.content.clone(),
                    content_hash: chunk.hash.clone(),
                    last_modified: c.last_modified,
                    vector,
                })
                .collect();
            if job.had_rows {
                let filter = Filter::eq("document_path", c.rel.as_str()).and(Filter::eq(SCOPE_COLUMN, scope));
                if let Err(error) = self.store.delete_where(Table::DocChunks, &filter).await {
                    tracing::warn!(%error, path = %c.rel, "stale chunk delete failed");
                }
            }
            match self.store.insert(&records).await {
                Ok(n) => {
                    wrote = true;
                    report.record(FileOutcome::new(c.rel.clone(), FileStatus::Processed).rows(n), total, progress);
                }
                Err(error) => {
                    tracing::warn!(%error, path = %c.rel, "chunk insert failed");
                    report.record(FileOutcome::new(c.rel.clone(), FileStatus::Failed).because(error.to_string()), total, progress);
                }
            }
        }
        Ok(wrote)
    }

    /// Embed in rounds of `embed_batch_size`. A failed round fails only its items.
    async fn embed_rounds(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        let dim = self.store.dim();
        let mut out = Vec::with_capacity(texts.len());
        for round in texts.chunks(self.indexing.embed_batch_size.max(1)) {
            match self.provider.embed_batch(round).await {
                Ok(vectors) if vectors.len() == round.len() => {
                    out.extend(vectors.into_iter().map(|v| checked_vector(v, dim)));
                }
                Ok(vectors) => {
                    tracing::warn!(expected = round.len(), got = vectors.len(), "provider returned wrong batch size");
                    out.extend(std::iter::repeat_with(|| None).take(round.len()));
                }
                Err(error) => {
                    tracing::warn!(%error, items = round.len(), "embedding round failed");
                    out.extend(std::iter::repeat_with(|| None).take(round.len()));
                }
            }
        }
        out
    }
}

/// Keep the first `max_lines` lines of a code file.
fn truncate_lines(content: String, max_lines: usize) -> String {
    if max_lines == 0 || content.lines().count() <= max_lines {
        return content;
    }
    content.lines().take(max_lines).collect::<Vec<_>>().join("\n")
}

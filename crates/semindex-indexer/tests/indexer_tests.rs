use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use semindex_core::config::Settings;
use semindex_core::paths::scope_key;
use semindex_core::traits::EmbeddingProvider;
use semindex_core::types::STRUCTURE_KIND;
use semindex_core::{Error, Result};
use semindex_embed::FakeEmbedder;
use semindex_indexer::{FileStatus, IndexOptions, Indexer, ProgressCallback, ProgressEvent};
use semindex_store::memory::Call;
use semindex_store::{DocChunkRecord, EmbeddingStore, FileRecord, Filter, MemoryConnector, MemoryEngine, Table};
use tempfile::TempDir;

const DIM: usize = 16;
const FAIL_MARKER: &str = "EMBED_FAIL";

/// Fake embedder that counts calls and can be told to fail.
struct CountingProvider {
    inner: FakeEmbedder,
    calls: AtomicUsize,
    texts: AtomicUsize,
    warm_ups: AtomicUsize,
    broken: bool,
}

impl CountingProvider {
    fn new() -> Arc<Self> { Arc::new(Self::build(false)) }

    fn broken() -> Arc<Self> { Arc::new(Self::build(true)) }

    fn build(broken: bool) -> Self {
        Self {
            inner: FakeEmbedder::new(DIM),
            calls: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
            warm_ups: AtomicUsize::new(0),
            broken,
        }
    }

    fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }

    fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
        self.texts.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for CountingProvider {
    fn id(&self) -> &str { "counting" }
    fn dim(&self) -> usize { DIM }

    async fn warm_up(&self) -> Result<()> {
        self.warm_ups.fetch_add(1, Ordering::SeqCst);
        if self.broken {
            return Err(Error::Initialization("model files missing".into()));
        }
        Ok(())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| if t.contains(FAIL_MARKER) { None } else { Some(self.inner.embed_text(t)) })
            .collect())
    }
}

struct Fixture {
    _tmp: TempDir,
    root: PathBuf,
    engine: Arc<MemoryEngine>,
    store: Arc<EmbeddingStore>,
    provider: Arc<CountingProvider>,
    indexer: Indexer,
}

impl Fixture {
    fn new() -> Self { Self::with(Settings::default(), CountingProvider::new()) }

    fn with(mut settings: Settings, provider: Arc<CountingProvider>) -> Self {
        settings.model.init_backoff_ms = 1;
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("app");
        std::fs::create_dir_all(&root).unwrap();
        let engine = MemoryEngine::new();
        let store = Arc::new(EmbeddingStore::new(
            tmp.path().join("db"),
            DIM,
            Arc::new(MemoryConnector::new(engine.clone())),
        ));
        let indexer = Indexer::new(store.clone(), provider.clone(), &settings).unwrap();
        Self { _tmp: tmp, root, engine, store, provider, indexer }
    }

    fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    fn scope(&self) -> String { scope_key(&self.root) }

    async fn files(&self) -> Vec<FileRecord> {
        let mut rows: Vec<FileRecord> = self.store.scan_scope(&self.scope()).await.unwrap();
        rows.retain(|r| r.kind != STRUCTURE_KIND);
        rows
    }

    async fn index(&self, rels: &[&str]) -> semindex_indexer::BatchReport {
        let paths: Vec<PathBuf> = rels.iter().map(PathBuf::from).collect();
        self.indexer.index_batch(&self.root, &paths, &IndexOptions::default()).await
    }
}

fn id_deletes(engine: &MemoryEngine, id: &str) -> usize {
    engine
        .deletes()
        .iter()
        .filter(|(_, f)| *f == Filter::eq("id", id))
        .count()
}

#[tokio::test]
async fn new_unchanged_and_changed_files() {
    let fx = Fixture::new();
    fx.write("b.js", "export const b = 1;\n");
    fx.write("c.js", "export const c = 1;\n");
    let first = fx.index(&["b.js", "c.js"]).await;
    assert_eq!((first.processed, first.skipped, first.failed), (2, 0, 0));

    let old_c = fx.files().await.into_iter().find(|r| r.path == "c.js").unwrap();

    fx.write("a.js", "export const a = 1;\n");
    fx.write("c.js", "export const c = 2;\n");
    fx.engine.clear_calls();
    let report = fx.index(&["a.js", "b.js", "c.js"]).await;

    assert_eq!((report.processed, report.skipped, report.failed), (2, 1, 0));
    assert_eq!(report.outcome("b.js").unwrap().status, FileStatus::Skipped);
    assert_eq!(id_deletes(&fx.engine, &old_c.id), 1);
    let id_only = fx.engine.deletes().iter().filter(|(_, f)| matches!(f, Filter::Eq(col, _) if col == "id")).count();
    assert_eq!(id_only, 1, "only the stale row of c.js is deleted by id");

    let rows = fx.files().await;
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.id != old_c.id));
    let c = rows.iter().find(|r| r.path == "c.js").unwrap();
    assert_eq!(c.content, "export const c = 2;\n");
    assert_eq!(c.language.as_deref(), Some("javascript"));
}

#[tokio::test]
async fn unchanged_document_costs_no_embeddings() {
    let fx = Fixture::new();
    fx.write("docs/guide.md", "# Guide\n\nIntro.\n\n## Install\n\nRun the installer.\n");
    let first = fx.index(&["docs/guide.md"]).await;
    assert_eq!(first.processed, 1);
    assert_eq!(first.outcome("docs/guide.md").unwrap().rows, 2);

    fx.provider.reset();
    fx.engine.clear_calls();
    let second = fx.index(&["docs/guide.md"]).await;
    assert_eq!((second.processed, second.skipped, second.failed), (0, 1, 0));
    assert_eq!(fx.provider.calls(), 1, "only the structure snapshot is embedded");
    let doc_adds = fx
        .engine
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::Add { table, .. } if table == Table::DocChunks.name()))
        .count();
    assert_eq!(doc_adds, 0);
}

#[tokio::test]
async fn edited_document_replaces_its_chunks() {
    let fx = Fixture::new();
    fx.write("README.md", "# Shop\n\nA shop.\n\n## Usage\n\nStart it.\n");
    fx.index(&["README.md"]).await;

    fx.write("README.md", "# Shop\n\nA shop.\n\n## Usage\n\nStart it with care.\n\n## Deploy\n\nShip it.\n");
    fx.engine.clear_calls();
    let report = fx.index(&["README.md"]).await;
    assert_eq!(report.processed, 1);

    let expected = Filter::eq("document_path", "README.md").and(Filter::eq("project_path", fx.scope()));
    assert!(fx.engine.deletes().iter().any(|(t, f)| t == Table::DocChunks.name() && *f == expected));
    let chunks: Vec<DocChunkRecord> = fx.store.scan_scope(&fx.scope()).await.unwrap();
    assert_eq!(chunks.len(), 3);
    assert!(chunks.iter().all(|c| c.document_title.as_deref() == Some("Shop")));
    let deploy = chunks.iter().find(|c| c.heading_text.as_deref() == Some("Deploy")).unwrap();
    assert_eq!(deploy.start_line, 9);
}

#[tokio::test]
async fn changed_documents_share_one_embedding_call() {
    let fx = Fixture::new();
    fx.write("docs/a.md", "# A\n\nFirst.\n\n## More\n\nSecond.\n");
    fx.write("docs/b.md", "# B\n\nThird.\n\n## More\n\nFourth.\n");
    fx.write("docs/c.md", "# C\n\nFifth.\n\n## Broken\n\nEMBED_FAIL here.\n");

    let report = fx.index(&["docs/a.md", "docs/b.md", "docs/c.md"]).await;
    assert_eq!((report.processed, report.failed), (2, 1));
    assert_eq!(report.outcome("docs/c.md").unwrap().status, FileStatus::Failed);
    assert_eq!(fx.provider.calls(), 2, "structure snapshot plus one round for all chunks");
    assert_eq!(fx.provider.texts.load(Ordering::SeqCst), 1 + 6);

    let chunks: Vec<DocChunkRecord> = fx.store.scan_scope(&fx.scope()).await.unwrap();
    assert_eq!(chunks.len(), 4);
    assert!(chunks.iter().all(|c| c.document_path != "docs/c.md"));
    let b_more = chunks.iter().find(|c| c.document_path == "docs/b.md" && c.heading_text.as_deref() == Some("More")).unwrap();
    assert!(b_more.content.contains("Fourth"));
}

#[tokio::test]
async fn reindexing_is_idempotent() {
    let fx = Fixture::new();
    fx.write("src/lib.rs", "pub fn answer() -> u32 { 42 }\n");
    fx.write("src/main.rs", "fn main() {}\n");
    fx.index(&["src/lib.rs", "src/main.rs"]).await;
    let before = fx.files().await;

    let again = fx.index(&["src/lib.rs", "src/main.rs"]).await;
    assert_eq!((again.processed, again.skipped), (0, 2));
    let mut after = fx.files().await;
    let mut before = before;
    before.sort_by(|a, b| a.id.cmp(&b.id));
    after.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(before, after);
}

#[tokio::test]
async fn excluded_empty_and_missing_files() {
    let fx = Fixture::new();
    fx.write("node_modules/pkg/index.js", "module.exports = 1;\n");
    fx.write("empty.js", "  \n\n");
    fx.write("ok.js", "let ok = true;\n");
    let report = fx.index(&["node_modules/pkg/index.js", "empty.js", "gone.js", "ok.js"]).await;
    assert_eq!(report.excluded, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.processed, 1);
    assert_eq!(report.outcome("gone.js").unwrap().reason.as_deref(), Some("missing"));
    assert_eq!(fx.files().await.len(), 1);
}

#[tokio::test]
async fn one_failed_embedding_fails_one_file() {
    let fx = Fixture::new();
    fx.write("good.js", "let good = 1;\n");
    fx.write("bad.js", &format!("// {FAIL_MARKER}\n"));
    let report = fx.index(&["good.js", "bad.js"]).await;
    assert_eq!((report.processed, report.failed), (1, 1));
    assert_eq!(report.outcome("bad.js").unwrap().status, FileStatus::Failed);
    let rows = fx.files().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].path, "good.js");
}

#[tokio::test]
async fn model_failure_fails_whole_batch() {
    let mut settings = Settings::default();
    settings.model.init_attempts = 2;
    let provider = CountingProvider::broken();
    let fx = Fixture::with(settings, provider.clone());
    fx.write("a.js", "let a;\n");
    fx.write("b.js", "let b;\n");
    let report = fx.index(&["a.js", "b.js"]).await;
    assert_eq!(report.failed, 2);
    assert_eq!(report.processed, 0);
    assert!(report.aborted.as_deref().is_some_and(|r| r.contains("after 2 attempts")), "{:?}", report.aborted);
    assert_eq!(provider.warm_ups.load(Ordering::SeqCst), 2);
    assert_eq!(provider.calls(), 0);
    assert!(!fx.engine.calls().iter().any(|c| matches!(c, Call::Add { .. })));
}

#[tokio::test]
async fn long_code_files_are_truncated() {
    let mut settings = Settings::default();
    settings.indexing.max_code_lines = 2;
    let fx = Fixture::with(settings, CountingProvider::new());
    fx.write("long.py", "a = 1\nb = 2\nc = 3\nd = 4\n");
    fx.index(&["long.py"]).await;
    let rows = fx.files().await;
    assert_eq!(rows[0].content, "a = 1\nb = 2");
}

#[tokio::test]
async fn structure_snapshot_is_replaced_each_batch() {
    let fx = Fixture::new();
    fx.write("src/lib.rs", "pub fn x() {}\n");
    fx.index(&["src/lib.rs"]).await;
    fx.write("src/extra.rs", "pub fn y() {}\n");
    let report = fx.index(&["src/extra.rs"]).await;
    assert!(report.structure_updated);

    let all: Vec<FileRecord> = fx.store.scan_scope(&fx.scope()).await.unwrap();
    let snapshots: Vec<_> = all.iter().filter(|r| r.kind == STRUCTURE_KIND).collect();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].id, "__project_structure__app");
    assert!(snapshots[0].content.contains("extra.rs"));
}

#[tokio::test]
async fn progress_reports_every_file() {
    let fx = Fixture::new();
    fx.write("a.rs", "fn a() {}\n");
    fx.write("target/debug/build.rs", "fn b() {}\n");
    let seen: Arc<Mutex<Vec<(String, usize, usize)>>> = Arc::default();
    let sink = seen.clone();
    let progress: ProgressCallback = Arc::new(move |e: &ProgressEvent| {
        sink.lock().unwrap().push((e.outcome.path.clone(), e.done, e.total));
    });
    let paths = [Path::new("a.rs").to_path_buf(), fx.root.join("target/debug/build.rs")];
    fx.indexer
        .index_batch(&fx.root, &paths, &IndexOptions { progress: Some(progress) })
        .await;
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|(_, _, total)| *total == 2));
    assert_eq!(seen.last().unwrap().1, 2);
}

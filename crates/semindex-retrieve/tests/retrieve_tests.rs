use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use semindex_core::config::Settings;
use semindex_core::paths::scope_key;
use semindex_core::traits::EmbeddingProvider;
use semindex_core::types::{Area, DocumentChunk, DocumentContext, QueryContext, ResultKind, STRUCTURE_KIND};
use semindex_core::Result;
use semindex_embed::{EmbeddingCache, FakeEmbedder};
use semindex_indexer::structure::structure_id;
use semindex_indexer::IndexOptions;
use semindex_retrieve::{
    ContextInferer, DocSearchOptions, KeywordInferer, Retriever, SearchOptions, SemanticIndex, TestFilter,
};
use semindex_store::memory::Op;
use semindex_store::{
    DocChunkRecord, EmbeddingStore, FileRecord, MemoryConnector, MemoryEngine, ScopedRecord, StorageEngine, Table,
};
use tempfile::TempDir;

const DIM: usize = 4;
const QUERY: [f32; DIM] = [1.0, 0.0, 0.0, 0.0];

/// Returns a fixed vector per known text and `fallback` otherwise.
struct StaticProvider {
    vectors: HashMap<String, Vec<f32>>,
    fallback: Vec<f32>,
    calls: AtomicUsize,
}

impl StaticProvider {
    fn new(query: &str) -> Arc<Self> {
        Arc::new(Self {
            vectors: HashMap::from([(query.to_string(), QUERY.to_vec())]),
            fallback: vec![0.0, 0.0, 0.0, 1.0],
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for StaticProvider {
    fn id(&self) -> &str { "static" }
    fn dim(&self) -> usize { DIM }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Some(self.vectors.get(t).cloned().unwrap_or_else(|| self.fallback.clone()))).collect())
    }
}

/// Keyword inference that counts calls and takes a moment.
#[derive(Default)]
struct CountingInferer {
    calls: AtomicUsize,
}

#[async_trait]
impl ContextInferer for CountingInferer {
    async fn infer(&self, document_path: &str, chunks: &[DocumentChunk]) -> DocumentContext {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        KeywordInferer.classify(document_path, chunks)
    }
}

/// Records every text it embeds and takes a moment per call.
#[derive(Default)]
struct SlowRecordingProvider {
    seen: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl EmbeddingProvider for SlowRecordingProvider {
    fn id(&self) -> &str { "slow" }
    fn dim(&self) -> usize { DIM }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
        self.seen.lock().unwrap().extend(texts.iter().cloned());
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(texts.iter().map(|t| Some(if t == "login flow" { QUERY.to_vec() } else { vec![0.0, 1.0, 0.0, 0.0] })).collect())
    }
}

struct Fixture {
    _tmp: TempDir,
    root: PathBuf,
    engine: Arc<MemoryEngine>,
    store: Arc<EmbeddingStore>,
    provider: Arc<StaticProvider>,
    cache: Arc<EmbeddingCache>,
}

impl Fixture {
    fn new(query: &str) -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("work").join("app");
        std::fs::create_dir_all(&root).unwrap();
        let engine = MemoryEngine::new();
        let store = Arc::new(EmbeddingStore::new(tmp.path().join("db"), DIM, Arc::new(MemoryConnector::new(engine.clone()))));
        Self { _tmp: tmp, root, engine, store, provider: StaticProvider::new(query), cache: Arc::new(EmbeddingCache::default()) }
    }

    fn retriever(&self) -> Retriever {
        let mut settings = Settings::default();
        settings.rerank.context_pause_ms = 0;
        Retriever::new(self.store.clone(), self.provider.clone(), self.cache.clone(), &settings).unwrap()
    }

    fn scope(&self) -> String { scope_key(&self.root) }

    fn file(&self, id: &str, path: &str, vector: [f32; DIM]) -> FileRecord { file_in(&self.scope(), id, path, vector) }

    fn chunk(&self, id: &str, doc: &str, heading: &str, content: &str, vector: [f32; DIM]) -> DocChunkRecord {
        DocChunkRecord {
            id: id.to_string(),
            project_path: Some(self.scope()),
            document_path: doc.to_string(),
            document_title: Some(heading.to_string()),
            heading_text: Some(heading.to_string()),
            chunk_index: 0,
            start_line: 1,
            content: content.to_string(),
            content_hash: format!("h-{id}"),
            last_modified: 0,
            vector: vector.to_vec(),
        }
    }
}

fn file_in(scope: &str, id: &str, path: &str, vector: [f32; DIM]) -> FileRecord {
    FileRecord {
        id: id.to_string(),
        project_path: Some(scope.to_string()),
        path: path.to_string(),
        kind: "file".to_string(),
        language: Some("rust".to_string()),
        content: format!("// {path}"),
        content_hash: format!("h-{id}"),
        last_modified: 0,
        vector: vector.to_vec(),
    }
}

fn ids(results: &[semindex_core::types::SearchResult]) -> Vec<&str> { results.iter().map(|r| r.id.as_str()).collect() }

#[tokio::test]
async fn returns_matches_above_threshold_in_order() {
    let fx = Fixture::new("auth bug");
    fx.store
        .insert(&[
            fx.file("weak", "src/ui.rs", [0.8, 0.6, 0.0, 0.0]),
            fx.file("strong", "src/auth.rs", [1.0, 0.0, 0.0, 0.0]),
            fx.file("unrelated", "src/db.rs", [0.0, 0.0, 1.0, 0.0]),
        ])
        .await
        .unwrap();

    let results = fx.retriever().search(&fx.root, "auth bug", &SearchOptions { limit: Some(5), ..Default::default() }).await.unwrap();
    assert_eq!(ids(&results), ["strong", "weak"]);
    assert!(results[0].similarity > results[1].similarity);
    assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.similarity) && r.similarity >= 0.3));

    let strict = SearchOptions { limit: Some(5), threshold: Some(0.9), ..Default::default() };
    let results = fx.retriever().search(&fx.root, "auth bug", &strict).await.unwrap();
    assert_eq!(ids(&results), ["strong"]);
}

#[tokio::test]
async fn never_returns_other_projects() {
    let fx = Fixture::new("auth");
    let other = scope_key(&fx.root.with_file_name("app-v2"));
    fx.store
        .insert(&[
            fx.file("mine", "src/auth.rs", [0.9, 0.1, 0.0, 0.0]),
            file_in(&other, "theirs", "src/auth.rs", [1.0, 0.0, 0.0, 0.0]),
        ])
        .await
        .unwrap();
    let results = fx.retriever().search(&fx.root, "auth", &SearchOptions::default()).await.unwrap();
    assert_eq!(ids(&results), ["mine"]);
}

#[tokio::test]
async fn legacy_rows_for_deleted_files_are_dropped() {
    let fx = Fixture::new("auth");
    std::fs::create_dir_all(fx.root.join("src")).unwrap();
    std::fs::write(fx.root.join("src/live.rs"), "fn live() {}").unwrap();

    let rows = [fx.file("live", "src/live.rs", [1.0, 0.0, 0.0, 0.0]), fx.file("gone", "src/gone.rs", [1.0, 0.0, 0.0, 0.0])];
    let full = FileRecord::to_batch(&rows, DIM).unwrap();
    // every column but the scope column
    let legacy = full.project(&[0, 2, 3, 4, 5, 6, 7, 8]).unwrap();
    fx.engine.create_table(Table::Files.name(), legacy.schema()).await.unwrap();
    fx.engine.add(Table::Files.name(), legacy).await.unwrap();

    let results = fx.retriever().search(&fx.root, "auth", &SearchOptions::default()).await.unwrap();
    assert_eq!(ids(&results), ["live"]);
    assert_eq!(results[0].project_path, None);
}

#[tokio::test]
async fn skips_reviewed_file_and_filters_tests() {
    let fx = Fixture::new("auth");
    fx.store
        .insert(&[
            fx.file("auth", "src/auth.rs", [1.0, 0.0, 0.0, 0.0]),
            fx.file("auth-test", "src/auth.test.rs", [0.95, 0.05, 0.0, 0.0]),
            fx.file("session", "src/session.rs", [0.9, 0.1, 0.0, 0.0]),
        ])
        .await
        .unwrap();
    let retriever = fx.retriever();

    let absolute = SearchOptions { exclude_file: Some(fx.root.join("src/auth.rs")), ..Default::default() };
    assert_eq!(ids(&retriever.search(&fx.root, "auth", &absolute).await.unwrap()), ["auth-test", "session"]);

    let relative = SearchOptions {
        exclude_file: Some(PathBuf::from("src/auth.rs")),
        tests: TestFilter::ExcludeTests,
        ..Default::default()
    };
    assert_eq!(ids(&retriever.search(&fx.root, "auth", &relative).await.unwrap()), ["session"]);

    let only_tests = SearchOptions { tests: TestFilter::OnlyTests, ..Default::default() };
    assert_eq!(ids(&retriever.search(&fx.root, "auth", &only_tests).await.unwrap()), ["auth-test"]);
}

#[tokio::test]
async fn structure_snapshot_appended_when_similar() {
    let fx = Fixture::new("layout");
    let mut snapshot = fx.file(&structure_id(&fx.root), "app", [0.9, 0.1, 0.0, 0.0]);
    snapshot.kind = STRUCTURE_KIND.to_string();
    snapshot.content = "app/\n  src/\n".to_string();
    fx.store.insert(&[fx.file("main", "src/main.rs", [0.8, 0.2, 0.0, 0.0]), snapshot]).await.unwrap();
    let retriever = fx.retriever();

    let without = retriever.search(&fx.root, "layout", &SearchOptions::default()).await.unwrap();
    assert_eq!(ids(&without), ["main"], "snapshot is never an ordinary hit");

    let with = SearchOptions { include_structure: true, ..Default::default() };
    let results = retriever.search(&fx.root, "layout", &with).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[1].kind, ResultKind::ProjectStructure);
    assert_eq!(fx.provider.calls.load(Ordering::SeqCst), 1, "query embedded once");
}

#[tokio::test]
async fn structure_snapshot_skipped_when_dissimilar() {
    let fx = Fixture::new("layout");
    let mut snapshot = fx.file(&structure_id(&fx.root), "app", [0.0, 0.0, 1.0, 0.0]);
    snapshot.kind = STRUCTURE_KIND.to_string();
    fx.store.insert(&[snapshot]).await.unwrap();
    let with = SearchOptions { include_structure: true, ..Default::default() };
    assert!(fx.retriever().search(&fx.root, "layout", &with).await.unwrap().is_empty());
}

async fn seed_docs(fx: &Fixture) {
    fx.store
        .insert(&[
            fx.chunk("ui", "docs/ui.md", "Buttons", "react component css layout", [1.0, 0.0, 0.0, 0.0]),
            fx.chunk("auth", "docs/auth.md", "Login", "authentication jwt oauth token", [1.0, 0.0, 0.0, 0.0]),
            fx.chunk("db", "docs/db.md", "Storage", "sql schema migration table", [1.0, 0.0, 0.0, 0.0]),
        ])
        .await
        .unwrap();
}

#[tokio::test]
async fn rerank_prefers_matching_area() {
    let fx = Fixture::new("login flow");
    seed_docs(&fx).await;
    let retriever = fx.retriever();

    let plain = retriever.search_docs(&fx.root, "login flow", &DocSearchOptions::default()).await.unwrap();
    assert_eq!(plain.len(), 3);
    assert!(plain.iter().all(|r| !r.reranked));

    let context = QueryContext { area: Area::Security, dominant_technologies: vec![], query_path: None };
    let opts = DocSearchOptions { context: Some(context), ..Default::default() };
    let results = retriever.search_docs(&fx.root, "login flow", &opts).await.unwrap();
    assert_eq!(results[0].id, "auth");
    assert!(results.iter().all(|r| r.reranked));
    assert!(results[0].similarity > results[1].similarity);
}

#[tokio::test]
async fn rerank_needs_enough_candidates() {
    let fx = Fixture::new("login flow");
    fx.store
        .insert(&[fx.chunk("auth", "docs/auth.md", "Login", "jwt oauth", [1.0, 0.0, 0.0, 0.0])])
        .await
        .unwrap();
    let context = QueryContext { area: Area::Security, ..Default::default() };
    let opts = DocSearchOptions { context: Some(context), ..Default::default() };
    let results = fx.retriever().search_docs(&fx.root, "login flow", &opts).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(!results[0].reranked);
}

#[tokio::test]
async fn concurrent_queries_infer_each_document_once() {
    let fx = Fixture::new("login flow");
    seed_docs(&fx).await;
    let inferer = Arc::new(CountingInferer::default());
    let retriever = fx.retriever().with_inferer(inferer.clone());

    let context = QueryContext { area: Area::Security, ..Default::default() };
    let opts = DocSearchOptions { context: Some(context), ..Default::default() };
    let (a, b) = tokio::join!(
        retriever.search_docs(&fx.root, "login flow", &opts),
        retriever.search_docs(&fx.root, "login flow", &opts),
    );
    assert_eq!(ids(&a.unwrap()), ids(&b.unwrap()));
    assert_eq!(inferer.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn concurrent_queries_embed_each_heading_once() {
    let fx = Fixture::new("login flow");
    seed_docs(&fx).await;
    let provider = Arc::new(SlowRecordingProvider::default());
    let mut settings = Settings::default();
    settings.rerank.context_pause_ms = 0;
    let retriever = Retriever::new(fx.store.clone(), provider.clone(), fx.cache.clone(), &settings).unwrap();

    let context = QueryContext { area: Area::Security, ..Default::default() };
    let opts = DocSearchOptions { context: Some(context), ..Default::default() };
    let (a, b) = tokio::join!(
        retriever.search_docs(&fx.root, "login flow", &opts),
        retriever.search_docs(&fx.root, "login flow", &opts),
    );
    assert_eq!(ids(&a.unwrap()), ids(&b.unwrap()));

    let seen = provider.seen.lock().unwrap().clone();
    for text in ["login flow", "Buttons", "Login", "Storage"] {
        assert_eq!(seen.iter().filter(|t| *t == text).count(), 1, "{text} embedded more than once: {seen:?}");
    }
    // one query embedding, three headings, three document contexts
    assert_eq!(fx.cache.computations_started(), 7);
    let headings = fx.cache.stats().into_iter().find(|s| s.name == "heading_embeddings").unwrap();
    assert_eq!((headings.misses, headings.entries), (3, 3));

    // a later query is served from the cache
    retriever.search_docs(&fx.root, "login flow", &opts).await.unwrap();
    assert_eq!(provider.seen.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn absolute_query_path_counts_as_project_relative() {
    let fx = Fixture::new("login flow");
    seed_docs(&fx).await;
    let retriever = fx.retriever();
    let search = |query_path: Option<String>| {
        let context = QueryContext { area: Area::Unknown, dominant_technologies: vec![], query_path };
        let opts = DocSearchOptions { context: Some(context), ..Default::default() };
        let retriever = &retriever;
        let root = fx.root.clone();
        async move { retriever.search_docs(&root, "login flow", &opts).await.unwrap()[0].similarity }
    };

    let without = search(None).await;
    let relative = search(Some("docs/review.rs".to_string())).await;
    let absolute = search(Some(fx.root.join("docs/review.rs").to_string_lossy().to_string())).await;
    assert!(relative > without);
    assert_eq!(absolute, relative);
}

#[tokio::test]
async fn generic_documents_skip_inference() {
    let fx = Fixture::new("setup");
    fx.store
        .insert(&[
            fx.chunk("readme", "README.md", "Setup", "install it", [1.0, 0.0, 0.0, 0.0]),
            fx.chunk("changes", "CHANGELOG.md", "1.0", "first release", [1.0, 0.0, 0.0, 0.0]),
            fx.chunk("license", "LICENSE", "License", "MIT", [1.0, 0.0, 0.0, 0.0]),
        ])
        .await
        .unwrap();
    let inferer = Arc::new(CountingInferer::default());
    let retriever = fx.retriever().with_inferer(inferer.clone());
    let opts = DocSearchOptions { context: Some(QueryContext { area: Area::DevOps, ..Default::default() }), ..Default::default() };
    let results = retriever.search_docs(&fx.root, "setup", &opts).await.unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(inferer.calls.load(Ordering::SeqCst), 0);
}

fn facade(fx: &Fixture, provider: Arc<dyn EmbeddingProvider>) -> SemanticIndex {
    let mut settings = Settings::default();
    settings.storage.embedding_dim = DIM;
    SemanticIndex::new(fx.store.clone(), provider, &settings).unwrap()
}

#[tokio::test]
async fn facade_fails_closed() {
    let fx = Fixture::new("auth");
    fx.store.insert(&[fx.file("auth", "src/auth.rs", [1.0, 0.0, 0.0, 0.0])]).await.unwrap();
    let index = facade(&fx, fx.provider.clone());
    assert_eq!(index.search(&fx.root, "auth", &SearchOptions::default()).await.len(), 1);

    fx.engine.fail(Op::Search, "table is corrupt");
    assert!(index.search(&fx.root, "auth", &SearchOptions::default()).await.is_empty());
    assert!(index.search_docs(&fx.root, "auth", &DocSearchOptions::default()).await.is_empty());
}

#[tokio::test]
async fn facade_clears_projects() {
    let fx = Fixture::new("auth");
    fx.store.insert(&[fx.file("auth", "src/auth.rs", [1.0, 0.0, 0.0, 0.0])]).await.unwrap();
    let index = facade(&fx, fx.provider.clone());

    assert!(!index.clear_project(Path::new("/")).await);
    assert_eq!(fx.engine.row_count(Table::Files.name()), 1);

    assert!(index.clear_project(&fx.root).await);
    assert_eq!(fx.engine.row_count(Table::Files.name()), 0);

    let status = index.status().await.unwrap();
    assert_eq!(status.store.tables.len(), 3);
    assert_eq!(status.caches.len(), 4);

    assert!(index.clear_all().await);
    assert!(!fx.store.is_open().await);
}

#[tokio::test]
async fn indexes_then_finds_documentation() {
    let fx = Fixture::new("unused");
    std::fs::create_dir_all(fx.root.join("docs")).unwrap();
    std::fs::write(
        fx.root.join("docs/deploy.md"),
        "# Deploy\n\nBuild the docker image.\n\n## Rollback\n\nRedeploy the previous docker tag.\n",
    )
    .unwrap();
    let index = facade(&fx, Arc::new(FakeEmbedder::new(DIM)));

    let report = index.index_batch(&fx.root, &[PathBuf::from("docs/deploy.md")], &IndexOptions::default()).await;
    assert_eq!(report.processed, 1);

    let opts = DocSearchOptions { threshold: Some(0.0), ..Default::default() };
    let results = index.search_docs(&fx.root, "docker image", &opts).await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.kind == ResultKind::DocumentChunk && r.path == "docs/deploy.md"));
}

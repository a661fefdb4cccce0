use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use semindex_core::config::CacheSettings;
use semindex_core::traits::EmbeddingProvider;
use semindex_core::types::{Area, DocumentContext};
use semindex_embed::{cosine_similarity, EmbeddingCache, FakeEmbedder, FifoCache};

#[tokio::test]
async fn fake_embedder_is_deterministic_and_normalised() {
    let e = FakeEmbedder::new(384);
    let a = e.embed("database connection pool").await.expect("vector");
    let b = e.embed("database connection pool").await.expect("vector");
    assert_eq!(a.len(), 384);
    assert_eq!(a, b);
    let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-3);
    let unrelated = e.embed("frontend button colours").await.expect("vector");
    assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &unrelated));
}

#[test]
fn full_cache_evicts_first_inserted_key() {
    let cache = FifoCache::new("embeddings", 3);
    for k in ["k1", "k2", "k3"] {
        cache.insert(k.to_string(), k.len());
    }
    let before = cache.stats().evictions;
    cache.insert("k4".to_string(), 2);
    assert!(!cache.contains("k1"));
    assert!(cache.contains("k2") && cache.contains("k3") && cache.contains("k4"));
    assert_eq!(cache.stats().evictions, before + 1);
    assert_eq!(cache.len(), 3);
}

#[test]
fn stats_count_hits_and_misses() {
    let cache = FifoCache::new("t", 4);
    cache.insert(1u32, "one");
    assert_eq!(cache.get(&1), Some("one"));
    assert_eq!(cache.get(&2), None);
    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
}

#[tokio::test]
async fn concurrent_context_requests_share_one_inference() {
    let cache = Arc::new(EmbeddingCache::new(&CacheSettings::default()));
    let calls = Arc::new(AtomicUsize::new(0));
    let doc = PathBuf::from("/work/acme/api/docs/guide.md");

    let infer = |calls: Arc<AtomicUsize>| {
        move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            DocumentContext { area: Area::Backend, dominant_technologies: vec!["rust".into()], is_generic: false }
        }
    };

    let (a, b) = tokio::join!(
        cache.document_context_or_compute(doc.clone(), infer(calls.clone())),
        cache.document_context_or_compute(doc.clone(), infer(calls.clone())),
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(a, b);

    // later calls are served from the cache
    let c = cache.document_context_or_compute(doc, infer(calls.clone())).await;
    assert_eq!(c, a);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_embeddings_are_not_cached() {
    let cache = EmbeddingCache::default();
    let calls = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        let calls = calls.clone();
        let v = cache
            .embedding_or_compute("query", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                None
            })
            .await;
        assert!(v.is_none());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let v = cache.embedding_or_compute("query", || async { Some(vec![1.0, 0.0]) }).await;
    assert_eq!(v.as_deref(), Some(&vec![1.0, 0.0]));
    let again = cache.embedding_or_compute("query", || async { Some(vec![0.0, 1.0]) }).await;
    assert_eq!(again.as_deref(), Some(&vec![1.0, 0.0]));
}

#[test]
fn invalidating_a_project_drops_its_documents() {
    let cache = EmbeddingCache::default();
    let project = PathBuf::from("/work/acme/api");
    cache.document_contexts.insert(project.join("README.md"), DocumentContext::generic());
    cache.document_contexts.insert(PathBuf::from("/work/acme/web/README.md"), DocumentContext::generic());
    cache.project_chunks.insert(project.clone(), Arc::new(Vec::new()));

    cache.invalidate_project(&project);
    assert!(!cache.project_chunks.contains(project.as_path()));
    assert_eq!(cache.document_contexts.len(), 1);
}

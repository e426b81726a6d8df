use std::fs;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use knowledge_engine::config::{load_config, Config};
use knowledge_engine::core::embedding::EmbeddingProvider;
use knowledge_engine::core::models::DocumentMetadata;
use knowledge_engine::core::store::MemoryQuery;
use knowledge_engine::core::vector::Vector;
use knowledge_engine::orchestrator::{
    KnowledgeOrchestrator, OperationData, ResultSource, StoreOutcome, StoreRequest,
};
use knowledge_engine::retrieval::SearchQuery;
use knowledge_engine::{EngineError, Result};

const DIMS: usize = 384;

/// Returns the same 384-dimension vector for every input.
struct FixedProvider;

#[async_trait]
impl EmbeddingProvider for FixedProvider {
    fn model_name(&self) -> &str {
        "fixed"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn generate(&self, _text: &str) -> Result<Vector> {
        Ok(Vector::new(vec![0.5; DIMS]))
    }
}

/// Never answers within any reasonable deadline.
struct HangingProvider;

#[async_trait]
impl EmbeddingProvider for HangingProvider {
    fn model_name(&self) -> &str {
        "hanging"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn generate(&self, _text: &str) -> Result<Vector> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Vector::new(vec![0.5; DIMS]))
    }
}

fn setup_config(extra: &str) -> (TempDir, Config) {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("engine.toml");
    let content = format!(
        r#"[engine]
vector_dimensions = 384

[chunking]
chunk_size = 500

[retrieval]
default_threshold = 0.5

{}
"#,
        extra
    );
    fs::write(&config_path, content).unwrap();
    let config = load_config(&config_path).unwrap();
    (tmp, config)
}

fn engine(config: Config) -> KnowledgeOrchestrator {
    KnowledgeOrchestrator::from_config(config)
        .unwrap()
        .with_provider(Arc::new(FixedProvider))
}

fn text_of_len(len: usize) -> String {
    let sentence = "The quick brown fox jumps over the lazy dog. ";
    let mut text = sentence.repeat(len / sentence.len() + 1);
    text.truncate(len);
    text
}

#[tokio::test]
async fn test_index_1200_chars_into_ordered_chunks() {
    let (_tmp, config) = setup_config("");
    let engine = engine(config);

    let content = text_of_len(1200);
    let result = engine
        .retrieval()
        .index_document("doc-1", &content, DocumentMetadata::default())
        .await;
    assert!(result.success, "{:?}", result.error);
    assert!(result.indexed_chunks >= 2);

    let embeddings = engine.retrieval().store().get_document_embeddings("doc-1");
    assert_eq!(embeddings.len(), result.indexed_chunks);
    for (i, embedding) in embeddings.iter().enumerate() {
        assert_eq!(embedding.metadata.chunk_index, i);
        assert_eq!(embedding.metadata.document_id, "doc-1");
        assert_eq!(embedding.vector.dim(), DIMS);
        assert!(embedding.metadata.content.chars().count() <= 500);
    }
}

#[tokio::test]
async fn test_delete_document_removes_every_embedding() {
    let (_tmp, config) = setup_config("");
    let engine = engine(config);
    let content = text_of_len(1200);
    engine
        .retrieval()
        .index_document("keep", "a small neighbour", DocumentMetadata::default())
        .await;
    engine
        .retrieval()
        .index_document("drop", &content, DocumentMetadata::default())
        .await;

    assert!(engine.delete_document("drop") >= 2);
    let store = engine.retrieval().store();
    assert!(store.get_document_embeddings("drop").is_empty());
    assert_eq!(store.document_ids(), vec!["keep".to_string()]);
}

#[tokio::test]
async fn test_memory_tag_lifecycle() {
    let (_tmp, config) = setup_config("");
    let engine = engine(config);

    let stored = engine
        .store(StoreRequest::new("tagged memory").with_tags(["a", "b"]))
        .await;
    let id = match stored.data {
        Some(OperationData::Stored(StoreOutcome::Memory { memory_id, .. })) => memory_id,
        other => panic!("expected memory, got {:?}", other),
    };

    let found = engine.retrieve(MemoryQuery::tags(["a"])).await;
    assert_eq!(found.memories().unwrap().len(), 1);
    assert_eq!(found.memories().unwrap()[0].id, id);

    assert!(engine.delete_memory(&id));
    let found = engine.retrieve(MemoryQuery::tags(["a"])).await;
    assert!(found.memories().unwrap().is_empty());
    assert!(engine.memory().indexed_tags().is_empty());
}

#[tokio::test]
async fn test_search_cache_hit_and_ttl_recompute() {
    let (_tmp, config) = setup_config("[cache]\ncache_ttl_ms = 100\n");
    let engine = engine(config);
    engine
        .retrieval()
        .index_document("doc", "cached content", DocumentMetadata::default())
        .await;

    let query = SearchQuery::new("cached content");
    let first = engine.search(query.clone()).await;
    let second = engine.search(query.clone()).await;
    assert!(first.success);
    assert_eq!(first.metadata.source, ResultSource::Computed);
    assert_eq!(second.metadata.source, ResultSource::Cache);
    assert_eq!(first.data, second.data);

    tokio::time::sleep(Duration::from_millis(150)).await;
    let third = engine.search(query).await;
    assert_eq!(third.metadata.source, ResultSource::Computed);
    assert_eq!(third.data, first.data);
}

#[tokio::test]
async fn test_provider_timeout_surfaces_in_envelope() {
    let (_tmp, config) = setup_config("");
    let engine = KnowledgeOrchestrator::from_config(config)
        .unwrap()
        .with_provider_timeout(Duration::from_millis(50))
        .with_provider(Arc::new(HangingProvider));

    let result = engine.store(StoreRequest::new(text_of_len(1500))).await;
    assert!(!result.success);
    assert_eq!(result.metadata.source, ResultSource::Error);
    assert!(matches!(
        result.errors.as_slice(),
        [EngineError::ProviderTimeout(_)]
    ));

    let search = engine.search(SearchQuery::new("anything")).await;
    assert!(!search.success);
    assert_eq!(search.errors[0].kind(), "provider_timeout");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_operations_share_one_engine() {
    let (_tmp, config) = setup_config("");
    let engine = Arc::new(engine(config));

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let stored = engine
                .store(StoreRequest::new(format!("note number {}", i)).with_tags(["shared"]))
                .await;
            assert!(stored.success);
            engine
                .retrieval()
                .index_document(&format!("doc-{}", i), "parallel text", DocumentMetadata::default())
                .await;
            engine.search(SearchQuery::new("note")).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().success);
    }

    assert_eq!(engine.memory().len(), 8);
    assert_eq!(engine.retrieval().store().document_ids().len(), 8);
    let tagged = engine
        .retrieve(MemoryQuery::tags(["shared"]).with_limit(20))
        .await;
    assert_eq!(tagged.memories().unwrap().len(), 8);
    assert_eq!(engine.metrics().memory.tag_buckets, 1);
}

#[test]
fn test_from_config_rejects_invalid() {
    let mut config = Config::default();
    config.retrieval.max_results = 0;
    assert!(KnowledgeOrchestrator::from_config(config).is_err());
}

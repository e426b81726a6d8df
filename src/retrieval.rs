//! Retrieval engine: cached, filtered semantic search over the embedding store.
//!
//! Wraps [`EmbeddingStore`] with document indexing and deletion, a TTL
//! query cache, metadata filtering, and usage metrics.
//!
//! # Search pipeline
//!
//! 1. Build a cache key from the trimmed query text, filters, limit, and
//!    threshold; return the cached response if it is still fresh.
//! 2. Embed the query (one-off, not stored).
//! 3. Scan for embeddings with similarity `>= threshold`. With filters set,
//!    `limit * candidate_multiplier` candidates are fetched so filtering
//!    still has enough left to fill `limit`.
//! 4. Apply metadata filters, truncate to `limit`, cache, return.
//!
//! Search is best-effort: a failure yields an empty response whose
//! `error` field says why. Indexing never fails either; it reports
//! failures through [`IndexResult`].
//!
//! Every successful index and every delete flushes the whole cache. A search
//! that overlaps a flush still returns its result but does not cache it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use knowledge_engine_core::cache::{cache_key, TtlCache};
use knowledge_engine_core::embedding::EmbeddingProvider;
use knowledge_engine_core::models::{DocumentMetadata, Embedding, EmbeddingMetadata};
use knowledge_engine_core::store::EmbeddingStore;
use knowledge_engine_core::EngineError;

use crate::config::{CacheConfig, Config, RetrievalConfig};
use crate::embedding::with_timeout;

/// Metadata constraints on search results. Every field that is set must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    pub content_type: Option<String>,
    pub source: Option<String>,
    pub node_class: Option<String>,
    pub cultural_context: Option<String>,
    /// Matches when the embedding carries at least one of these tags.
    pub tags: Vec<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.content_type.is_none()
            && self.source.is_none()
            && self.node_class.is_none()
            && self.cultural_context.is_none()
            && self.tags.is_empty()
    }

    pub fn matches(&self, meta: &EmbeddingMetadata) -> bool {
        if let Some(content_type) = &self.content_type {
            if &meta.content_type != content_type {
                return false;
            }
        }
        if let Some(source) = &self.source {
            if &meta.source != source {
                return false;
            }
        }
        if let Some(node_class) = &self.node_class {
            if meta.node_class.as_ref() != Some(node_class) {
                return false;
            }
        }
        if let Some(context) = &self.cultural_context {
            if meta.cultural_context.as_ref() != Some(context) {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| meta.tags.contains(t)) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    pub text: String,
    /// Defaults to `retrieval.max_results`.
    pub limit: Option<usize>,
    /// Defaults to `retrieval.default_threshold`.
    pub threshold: Option<f32>,
    pub filters: SearchFilters,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub embedding: Embedding,
    pub similarity: f32,
}

impl SearchHit {
    pub fn document_id(&self) -> &str {
        &self.embedding.metadata.document_id
    }

    pub fn content(&self) -> &str {
        &self.embedding.metadata.content
    }
}

impl From<Embedding> for SearchHit {
    fn from(embedding: Embedding) -> Self {
        // find_similar_embeddings stores the similarity in `confidence`.
        let similarity = embedding.metadata.confidence;
        Self {
            embedding,
            similarity,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub total_count: usize,
    pub search_time: Duration,
    /// True when served from the query cache.
    pub from_cache: bool,
    /// Why the response is empty, when the search failed.
    pub error: Option<EngineError>,
}

impl SearchResponse {
    fn empty(search_time: Duration, error: Option<EngineError>) -> Self {
        Self {
            results: Vec::new(),
            total_count: 0,
            search_time,
            from_cache: false,
            error,
        }
    }
}

/// Outcome of [`RetrievalEngine::index_document`].
#[derive(Debug, Clone, PartialEq)]
pub struct IndexResult {
    pub success: bool,
    pub indexed_chunks: usize,
    pub error: Option<EngineError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalMetrics {
    pub total_queries: u64,
    /// Chunks embedded by successful index calls since startup.
    pub total_indexed_chunks: u64,
    /// Embeddings currently held by the store.
    pub stored_embeddings: usize,
    pub average_query_time: Duration,
    pub cache_hits: u64,
    pub cache_hit_rate: f64,
}

#[derive(Default)]
struct MetricsState {
    total_queries: u64,
    total_indexed_chunks: u64,
    cache_hits: u64,
    average_query_time: Duration,
}

impl MetricsState {
    fn record_query(&mut self, elapsed: Duration, cache_hit: bool) {
        self.total_queries += 1;
        if cache_hit {
            self.cache_hits += 1;
        }
        // Running average: avg += (x - avg) / n
        let n = self.total_queries as f64;
        let avg = self.average_query_time.as_secs_f64();
        let next = avg + (elapsed.as_secs_f64() - avg) / n;
        self.average_query_time = Duration::from_secs_f64(next.max(0.0));
    }
}

pub struct RetrievalEngine {
    store: Arc<EmbeddingStore>,
    cache: Option<TtlCache<SearchResponse>>,
    retrieval: RetrievalConfig,
    provider_timeout: Duration,
    metrics: Mutex<MetricsState>,
}

impl RetrievalEngine {
    /// Build an engine with an empty store and no embedding provider.
    pub fn new(config: &Config) -> Self {
        let store = EmbeddingStore::new(
            config.engine.vector_dimensions,
            config.chunking.segmenter(),
        );
        Self {
            store: Arc::new(store),
            cache: build_cache(&config.cache),
            retrieval: config.retrieval.clone(),
            provider_timeout: config.embedding.timeout(),
            metrics: Mutex::new(MetricsState::default()),
        }
    }

    /// Override the deadline applied to providers installed afterwards.
    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn with_provider(self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.set_provider(provider);
        self
    }

    /// Install `provider`, wrapped so every call is bounded by the provider timeout.
    pub fn set_provider(&self, provider: Arc<dyn EmbeddingProvider>) {
        self.store
            .set_provider(with_timeout(provider, self.provider_timeout));
    }

    pub fn store(&self) -> &Arc<EmbeddingStore> {
        &self.store
    }

    pub fn caching_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Segment, embed, and store `content` under `document_id`, replacing
    /// any embeddings the document already had.
    pub async fn index_document(
        &self,
        document_id: &str,
        content: &str,
        metadata: DocumentMetadata,
    ) -> IndexResult {
        match self
            .store
            .replace_document_embeddings(document_id, content, &metadata)
            .await
        {
            Ok(created) => {
                let chunks = created.len();
                self.metrics.lock().total_indexed_chunks += chunks as u64;
                self.clear_cache();
                info!(document_id, chunks, "indexed document");
                IndexResult {
                    success: true,
                    indexed_chunks: chunks,
                    error: None,
                }
            }
            Err(e) => {
                warn!(document_id, error = %e, kind = e.kind(), "document indexing failed");
                IndexResult {
                    success: false,
                    indexed_chunks: 0,
                    error: Some(e),
                }
            }
        }
    }

    pub async fn search(&self, query: &SearchQuery) -> SearchResponse {
        let started = Instant::now();
        let limit = query.limit.unwrap_or(self.retrieval.max_results);
        let threshold = query.threshold.unwrap_or(self.retrieval.default_threshold);
        let text = query.text.trim();

        let key = self
            .cache
            .as_ref()
            .and_then(|_| cache_key("search", &(text, &query.filters, limit, threshold)));
        let generation = self.cache.as_ref().map(TtlCache::generation);

        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(mut cached) = cache.get(key) {
                debug!(query = text, "search cache hit");
                cached.from_cache = true;
                self.metrics.lock().record_query(started.elapsed(), true);
                return cached;
            }
            debug!(query = text, "search cache miss");
        }

        if text.is_empty() {
            let response = SearchResponse::empty(started.elapsed(), None);
            self.metrics.lock().record_query(response.search_time, false);
            return response;
        }

        let response = match self.run_search(text, limit, threshold, &query.filters).await {
            Ok(results) => SearchResponse {
                total_count: results.len(),
                results,
                search_time: started.elapsed(),
                from_cache: false,
                error: None,
            },
            Err(e) => {
                warn!(query = text, error = %e, kind = e.kind(), "search failed");
                SearchResponse::empty(started.elapsed(), Some(e))
            }
        };

        if response.error.is_none() {
            if let (Some(cache), Some(key), Some(generation)) = (&self.cache, key, generation) {
                if !cache.insert_if_generation(key, generation, response.clone()) {
                    debug!(query = text, "cache flushed during search, result not cached");
                }
            }
        }
        self.metrics.lock().record_query(response.search_time, false);
        response
    }

    async fn run_search(
        &self,
        text: &str,
        limit: usize,
        threshold: f32,
        filters: &SearchFilters,
    ) -> knowledge_engine_core::Result<Vec<SearchHit>> {
        let vector = self.store.embed_query(text).await?;
        let fetch = if filters.is_empty() {
            limit
        } else {
            limit.saturating_mul(self.retrieval.candidate_multiplier)
        };
        let candidates = self.store.find_similar_embeddings(&vector, threshold, fetch)?;
        Ok(candidates
            .into_iter()
            .filter(|e| filters.matches(&e.metadata))
            .take(limit)
            .map(SearchHit::from)
            .collect())
    }

    /// Remove a document's embeddings and flush the cache. Returns the number removed.
    pub fn delete_document(&self, document_id: &str) -> usize {
        let removed = self.store.delete_document_embeddings(document_id);
        self.clear_cache();
        info!(document_id, removed, "deleted document");
        removed
    }

    /// A document's chunk contents joined in chunk order, or `None` if unknown.
    pub fn document_content(&self, document_id: &str) -> Option<String> {
        let embeddings = self.store.get_document_embeddings(document_id);
        if embeddings.is_empty() {
            return None;
        }
        let parts: Vec<&str> = embeddings
            .iter()
            .map(|e| e.metadata.content.as_str())
            .collect();
        Some(parts.join("\n\n"))
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    pub fn metrics(&self) -> RetrievalMetrics {
        let state = self.metrics.lock();
        let cache_hit_rate = if state.total_queries == 0 {
            0.0
        } else {
            state.cache_hits as f64 / state.total_queries as f64
        };
        RetrievalMetrics {
            total_queries: state.total_queries,
            total_indexed_chunks: state.total_indexed_chunks,
            stored_embeddings: self.store.len(),
            average_query_time: state.average_query_time,
            cache_hits: state.cache_hits,
            cache_hit_rate,
        }
    }
}

fn build_cache<V: Clone>(config: &CacheConfig) -> Option<TtlCache<V>> {
    config
        .enable_caching
        .then(|| TtlCache::new(config.ttl()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use knowledge_engine_core::vector::Vector;

    const DIMS: usize = 16;

    /// Hashes each lowercase word into one of `DIMS` buckets.
    struct KeywordProvider;

    #[async_trait]
    impl EmbeddingProvider for KeywordProvider {
        fn model_name(&self) -> &str {
            "keyword"
        }
        fn dims(&self) -> usize {
            DIMS
        }
        async fn generate(&self, text: &str) -> knowledge_engine_core::Result<Vector> {
            let mut values = vec![0.0; DIMS];
            for word in text.split_whitespace() {
                let word: String = word
                    .chars()
                    .filter(|c| c.is_alphanumeric())
                    .flat_map(char::to_lowercase)
                    .collect();
                if word.is_empty() {
                    continue;
                }
                let bucket = word.bytes().map(usize::from).sum::<usize>() % DIMS;
                values[bucket] += 1.0;
            }
            Ok(Vector::new(values))
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl EmbeddingProvider for SlowProvider {
        fn model_name(&self) -> &str {
            "slow"
        }
        fn dims(&self) -> usize {
            DIMS
        }
        async fn generate(&self, _text: &str) -> knowledge_engine_core::Result<Vector> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vector::new(vec![1.0; DIMS]))
        }
    }

    /// Same vectors as `KeywordProvider`, but stalls on the exact text "slow query".
    struct GatedProvider;

    #[async_trait]
    impl EmbeddingProvider for GatedProvider {
        fn model_name(&self) -> &str {
            "gated"
        }
        fn dims(&self) -> usize {
            DIMS
        }
        async fn generate(&self, text: &str) -> knowledge_engine_core::Result<Vector> {
            if text == "slow query" {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            KeywordProvider.generate(text).await
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.engine.vector_dimensions = DIMS;
        config.retrieval.default_threshold = 0.5;
        config
    }

    fn engine(config: &Config) -> RetrievalEngine {
        RetrievalEngine::new(config).with_provider(Arc::new(KeywordProvider))
    }

    fn meta(source: &str, tags: &[&str]) -> DocumentMetadata {
        DocumentMetadata {
            source: source.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_index_and_search() {
        let engine = engine(&test_config());
        let result = engine
            .index_document("rust", "rust ownership borrowing", meta("docs", &[]))
            .await;
        assert!(result.success);
        assert_eq!(result.indexed_chunks, 1);
        engine
            .index_document("cooking", "pasta tomato basil", meta("docs", &[]))
            .await;

        let response = engine.search(&SearchQuery::new("rust ownership borrowing")).await;
        assert!(response.error.is_none());
        assert_eq!(response.total_count, 1);
        assert_eq!(response.results[0].document_id(), "rust");
        assert!(response.results[0].similarity > 0.99);
    }

    #[tokio::test]
    async fn test_filters_apply() {
        let engine = engine(&test_config());
        engine
            .index_document("a", "shared words here", meta("wiki", &["x"]))
            .await;
        engine
            .index_document("b", "shared words here", meta("chat", &["y"]))
            .await;

        let by_source = SearchQuery::new("shared words here").with_filters(SearchFilters {
            source: Some("chat".to_string()),
            ..Default::default()
        });
        let response = engine.search(&by_source).await;
        assert_eq!(response.total_count, 1);
        assert_eq!(response.results[0].document_id(), "b");

        let by_tag = SearchQuery::new("shared words here").with_filters(SearchFilters {
            tags: vec!["x".to_string(), "z".to_string()],
            ..Default::default()
        });
        let response = engine.search(&by_tag).await;
        assert_eq!(response.total_count, 1);
        assert_eq!(response.results[0].document_id(), "a");
    }

    #[tokio::test]
    async fn test_second_search_hits_cache() {
        let engine = engine(&test_config());
        engine
            .index_document("doc", "cached search words", DocumentMetadata::default())
            .await;

        let query = SearchQuery::new("cached search words");
        let first = engine.search(&query).await;
        let second = engine.search(&query).await;
        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.results, second.results);

        let metrics = engine.metrics();
        assert_eq!(metrics.total_queries, 2);
        assert_eq!(metrics.cache_hits, 1);
        assert!((metrics.cache_hit_rate - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cache_expires_after_ttl() {
        let mut config = test_config();
        config.cache.cache_ttl_ms = 50;
        let engine = engine(&config);
        engine
            .index_document("doc", "expiring words", DocumentMetadata::default())
            .await;

        let query = SearchQuery::new("expiring words");
        engine.search(&query).await;
        assert!(engine.search(&query).await.from_cache);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!engine.search(&query).await.from_cache);
    }

    #[tokio::test]
    async fn test_caching_disabled() {
        let mut config = test_config();
        config.cache.enable_caching = false;
        let engine = engine(&config);
        assert!(!engine.caching_enabled());
        let query = SearchQuery::new("anything");
        engine.search(&query).await;
        assert!(!engine.search(&query).await.from_cache);
    }

    #[tokio::test]
    async fn test_index_flushes_cache() {
        let engine = engine(&test_config());
        let query = SearchQuery::new("late arrival");
        assert_eq!(engine.search(&query).await.total_count, 0);

        engine
            .index_document("late", "late arrival", DocumentMetadata::default())
            .await;
        let response = engine.search(&query).await;
        assert!(!response.from_cache);
        assert_eq!(response.total_count, 1);
    }

    #[tokio::test]
    async fn test_index_during_search_flushes_its_result() {
        let engine = Arc::new(
            RetrievalEngine::new(&test_config()).with_provider(Arc::new(GatedProvider)),
        );

        let searching = Arc::clone(&engine);
        let pending =
            tokio::spawn(async move { searching.search(&SearchQuery::new("slow query")).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Punctuation keeps the chunk text off the stalled path; the vector is the same.
        let indexed = engine
            .index_document("late", "Slow query.", DocumentMetadata::default())
            .await;
        assert!(indexed.success);

        let overlapped = pending.await.unwrap();
        assert!(!overlapped.from_cache);
        assert_eq!(overlapped.total_count, 1);

        // Started before the flush, so its result was not cached.
        let after = engine.search(&SearchQuery::new("slow query")).await;
        assert!(!after.from_cache);
        assert_eq!(after.total_count, 1);
        assert!(engine.search(&SearchQuery::new("slow query")).await.from_cache);
    }

    #[tokio::test]
    async fn test_delete_removes_and_flushes() {
        let engine = engine(&test_config());
        engine
            .index_document("gone", "soon to be deleted", DocumentMetadata::default())
            .await;
        let query = SearchQuery::new("soon to be deleted");
        assert_eq!(engine.search(&query).await.total_count, 1);

        assert_eq!(engine.delete_document("gone"), 1);
        let response = engine.search(&query).await;
        assert!(!response.from_cache);
        assert_eq!(response.total_count, 0);
        assert!(engine.document_content("gone").is_none());
    }

    #[tokio::test]
    async fn test_reindex_replaces_chunks() {
        let engine = engine(&test_config());
        engine
            .index_document("doc", "first version", DocumentMetadata::default())
            .await;
        engine
            .index_document("doc", "second version", DocumentMetadata::default())
            .await;
        assert_eq!(engine.store().len(), 1);
        assert_eq!(engine.document_content("doc").as_deref(), Some("second version"));
    }

    #[tokio::test]
    async fn test_without_provider() {
        let engine = RetrievalEngine::new(&test_config());
        let result = engine
            .index_document("doc", "some text", DocumentMetadata::default())
            .await;
        assert!(!result.success);
        assert_eq!(result.error, Some(EngineError::ProviderNotSet));

        let response = engine.search(&SearchQuery::new("some text")).await;
        assert!(response.results.is_empty());
        assert_eq!(response.error, Some(EngineError::ProviderNotSet));
    }

    #[tokio::test]
    async fn test_provider_timeout_reported() {
        let engine = RetrievalEngine::new(&test_config())
            .with_provider_timeout(Duration::from_millis(20))
            .with_provider(Arc::new(SlowProvider));

        let result = engine
            .index_document("doc", "never embedded", DocumentMetadata::default())
            .await;
        assert!(!result.success);
        assert!(matches!(result.error, Some(EngineError::ProviderTimeout(_))));

        let response = engine.search(&SearchQuery::new("never embedded")).await;
        assert_eq!(response.total_count, 0);
        assert_eq!(
            response.error.as_ref().map(EngineError::kind),
            Some("provider_timeout")
        );
    }

    #[tokio::test]
    async fn test_empty_query_returns_nothing() {
        let engine = engine(&test_config());
        let response = engine.search(&SearchQuery::new("   ")).await;
        assert!(response.results.is_empty());
        assert!(response.error.is_none());
    }
}

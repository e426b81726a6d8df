//! Knowledge orchestrator: one façade over the retrieval engine and the
//! memory store.
//!
//! Exposes five operation kinds, each returning an [`OperationResult`]
//! envelope that never carries a panic or a propagated error:
//!
//! | Operation | Routed to |
//! |-----------|-----------|
//! | [`search`](KnowledgeOrchestrator::search) | retrieval engine + memory text query, merged and deduplicated |
//! | [`store`](KnowledgeOrchestrator::store) | retrieval engine (large content) or memory store |
//! | [`retrieve`](KnowledgeOrchestrator::retrieve) | memory store, plus document hits as synthetic memories |
//! | [`compose`](KnowledgeOrchestrator::compose) | merge locally, synthesize/compare via [`GenerativeModel`] |
//! | [`analyze`](KnowledgeOrchestrator::analyze) | text statistics, embeddings, [`ContentAnalyzer`] |
//!
//! Results of every operation except `store` are cached under a key built
//! from the operation type, its payload, and the orchestrator's node class.
//! Any successful mutation made through the orchestrator flushes the cache,
//! and an operation that was running across a flush is not cached.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use knowledge_engine_core::cache::{cache_key, TtlCache};
use knowledge_engine_core::embedding::EmbeddingProvider;
use knowledge_engine_core::models::{
    DocumentMetadata, MemoryEntry, MemoryMetadata, MemoryMetadataPatch, MemoryType,
    MemoryUpdate, Priority,
};
use knowledge_engine_core::store::memory::{lexical_relevance, DEFAULT_MEMORY_LIMIT};
use knowledge_engine_core::store::{MemoryQuery, MemorySort, MemoryStats, MemoryStore};
use knowledge_engine_core::vector::cosine_similarity;
use knowledge_engine_core::{EngineError, Result};

use crate::analysis::{
    model_unavailable, AnalysisReport, AnalysisType, ComposeStrategy, ContentAnalyzer,
    GenerativeModel, SourceContent, SourceKind, TextStatistics,
};
use crate::config::Config;
use crate::embedding::create_provider;
use crate::retrieval::{RetrievalEngine, RetrievalMetrics, SearchHit, SearchQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Search,
    Store,
    Retrieve,
    Compose,
    Analyze,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Search => "search",
            OperationType::Store => "store",
            OperationType::Retrieve => "retrieve",
            OperationType::Compose => "compose",
            OperationType::Analyze => "analyze",
        }
    }
}

/// Where an envelope's data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Cache,
    Computed,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationMetadata {
    pub operation_type: OperationType,
    pub execution_time: Duration,
    pub source: ResultSource,
    pub confidence: f32,
    pub node_class: Option<String>,
    pub cultural_context: Option<String>,
}

/// Uniform envelope returned by every orchestrator operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    pub success: bool,
    pub data: Option<OperationData>,
    pub metadata: OperationMetadata,
    pub errors: Vec<EngineError>,
}

impl OperationResult {
    pub fn items(&self) -> Option<&[KnowledgeItem]> {
        match &self.data {
            Some(OperationData::Search(items)) => Some(items),
            _ => None,
        }
    }

    pub fn memories(&self) -> Option<&[MemoryEntry]> {
        match &self.data {
            Some(OperationData::Memories(memories)) => Some(memories),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationData {
    Search(Vec<KnowledgeItem>),
    Stored(StoreOutcome),
    Memories(Vec<MemoryEntry>),
    Composed(Composition),
    Analysis(AnalysisReport),
}

/// One merged search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    /// Embedding id or memory id.
    pub id: String,
    pub content: String,
    /// Cosine similarity for documents, matched-term fraction for memories.
    pub score: f32,
    pub origin: SourceKind,
    pub document_id: Option<String>,
    pub tags: BTreeSet<String>,
}

impl From<SearchHit> for KnowledgeItem {
    fn from(hit: SearchHit) -> Self {
        let metadata = hit.embedding.metadata;
        Self {
            id: hit.embedding.id,
            content: metadata.content,
            score: hit.similarity,
            origin: SourceKind::Document,
            document_id: Some(metadata.document_id),
            tags: metadata.tags,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreRequest {
    pub content: String,
    /// Document id to use when the content is indexed as a document.
    pub document_id: Option<String>,
    pub importance: Option<f32>,
    pub priority: Option<Priority>,
    pub tags: BTreeSet<String>,
    pub associations: BTreeSet<String>,
    pub source: Option<String>,
    pub content_type: Option<String>,
}

impl StoreRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "placement")]
pub enum StoreOutcome {
    Document {
        document_id: String,
        indexed_chunks: usize,
    },
    Memory {
        memory_id: String,
        memory_type: MemoryType,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeRequest {
    pub sources: Vec<String>,
    pub strategy: ComposeStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Composition {
    pub strategy: ComposeStrategy,
    pub content: String,
    pub sources: Vec<SourceContent>,
    /// Requested ids that resolved to neither a memory nor a document.
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub content: String,
    pub analysis_type: AnalysisType,
    /// Text to measure relevance against.
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorMetrics {
    pub total_operations: u64,
    pub operations_by_type: BTreeMap<String, u64>,
    pub cache_hits: u64,
    pub errors: u64,
    pub average_execution_time: Duration,
    pub error_rate: f64,
    pub retrieval: RetrievalMetrics,
    pub memory: MemoryStats,
}

#[derive(Default)]
struct OperationCounters {
    total: u64,
    by_type: BTreeMap<&'static str, u64>,
    cache_hits: u64,
    errors: u64,
    average_execution_time: Duration,
}

impl OperationCounters {
    fn record(&mut self, operation: OperationType, elapsed: Duration, source: ResultSource) {
        self.total += 1;
        *self.by_type.entry(operation.as_str()).or_default() += 1;
        match source {
            ResultSource::Cache => self.cache_hits += 1,
            ResultSource::Error => self.errors += 1,
            ResultSource::Computed => {}
        }
        let n = self.total as f64;
        let avg = self.average_execution_time.as_secs_f64();
        let next = avg + (elapsed.as_secs_f64() - avg) / n;
        self.average_execution_time = Duration::from_secs_f64(next.max(0.0));
    }
}

#[derive(Clone)]
struct CachedOperation {
    data: OperationData,
    confidence: f32,
}

type Computed = (OperationData, Option<f32>);

pub struct KnowledgeOrchestrator {
    config: Config,
    retrieval: RetrievalEngine,
    memory: MemoryStore,
    cache: Option<TtlCache<CachedOperation>>,
    generator: Option<Arc<dyn GenerativeModel>>,
    analyzer: Option<Arc<dyn ContentAnalyzer>>,
    counters: Mutex<OperationCounters>,
}

impl KnowledgeOrchestrator {
    /// Build an orchestrator with empty stores and no embedding provider.
    pub fn new(config: Config) -> Self {
        let cache = config
            .cache
            .enable_caching
            .then(|| TtlCache::new(config.cache.ttl()));
        Self {
            retrieval: RetrievalEngine::new(&config),
            memory: MemoryStore::new(),
            cache,
            generator: None,
            analyzer: None,
            counters: Mutex::new(OperationCounters::default()),
            config,
        }
    }

    /// Validate `config` and install the embedding provider it selects.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        let orchestrator = Self::new(config);
        if orchestrator.config.embedding.is_enabled() {
            let provider = create_provider(&orchestrator.config.embedding)
                .context("Failed to create embedding provider")?;
            orchestrator.retrieval.set_provider(provider);
        }
        Ok(orchestrator)
    }

    /// Deadline for each embedding call of providers installed afterwards.
    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.retrieval = self.retrieval.with_provider_timeout(timeout);
        self
    }

    pub fn with_provider(self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.retrieval.set_provider(provider);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn GenerativeModel>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn ContentAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn retrieval(&self) -> &RetrievalEngine {
        &self.retrieval
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    // ============ Operations ============

    /// Search documents and memories together.
    ///
    /// The orchestrator's node class and cultural context fill any unset
    /// filters. Memories get `ceil(limit * memory_share)` slots. Results are
    /// deduplicated by normalized content and sorted by score.
    pub async fn search(&self, query: SearchQuery) -> OperationResult {
        self.execute(OperationType::Search, &query, true, || self.run_search(&query))
            .await
    }

    /// Store content as a document or a memory, depending on its size.
    pub async fn store(&self, request: StoreRequest) -> OperationResult {
        let result = self
            .execute(OperationType::Store, &request, false, || self.run_store(&request))
            .await;
        if result.success {
            self.invalidate();
        }
        result
    }

    /// Retrieve memories; with a text query, document matches are merged
    /// in as synthetic memories.
    pub async fn retrieve(&self, query: MemoryQuery) -> OperationResult {
        self.execute(OperationType::Retrieve, &query, true, || self.run_retrieve(&query))
            .await
    }

    pub async fn compose(&self, request: ComposeRequest) -> OperationResult {
        self.execute(OperationType::Compose, &request, true, || {
            self.run_compose(&request)
        })
        .await
    }

    pub async fn analyze(&self, request: AnalyzeRequest) -> OperationResult {
        self.execute(OperationType::Analyze, &request, true, || {
            self.run_analyze(&request)
        })
        .await
    }

    // ============ Mutations outside the envelope ============

    pub fn update_memory(&self, id: &str, update: MemoryUpdate) -> bool {
        let updated = self.memory.update_memory(id, update);
        if updated {
            self.invalidate();
        }
        updated
    }

    pub fn delete_memory(&self, id: &str) -> bool {
        let deleted = self.memory.delete_memory(id);
        if deleted {
            self.invalidate();
        }
        deleted
    }

    pub fn delete_document(&self, document_id: &str) -> usize {
        let removed = self.retrieval.delete_document(document_id);
        self.invalidate();
        removed
    }

    /// Flush the orchestrator and retrieval caches.
    pub fn clear_cache(&self) {
        self.invalidate();
        self.retrieval.clear_cache();
    }

    pub fn metrics(&self) -> OrchestratorMetrics {
        let counters = self.counters.lock();
        let error_rate = if counters.total == 0 {
            0.0
        } else {
            counters.errors as f64 / counters.total as f64
        };
        OrchestratorMetrics {
            total_operations: counters.total,
            operations_by_type: counters
                .by_type
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            cache_hits: counters.cache_hits,
            errors: counters.errors,
            average_execution_time: counters.average_execution_time,
            error_rate,
            retrieval: self.retrieval.metrics(),
            memory: self.memory.stats(),
        }
    }

    // ============ Dispatch ============

    async fn execute<P, F, Fut>(
        &self,
        operation: OperationType,
        payload: &P,
        cacheable: bool,
        run: F,
    ) -> OperationResult
    where
        P: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Computed>>,
    {
        let started = Instant::now();
        let cache = self.cache.as_ref().filter(|_| cacheable);
        let key = cache.and_then(|_| {
            cache_key(
                operation.as_str(),
                &(payload, &self.config.engine.node_class),
            )
        });
        let generation = cache.map(TtlCache::generation);

        if let (Some(cache), Some(key)) = (cache, &key) {
            if let Some(hit) = cache.get(key) {
                debug!(operation = operation.as_str(), "operation cache hit");
                return self.finish(
                    operation,
                    started,
                    ResultSource::Cache,
                    Some(hit.data),
                    hit.confidence,
                    Vec::new(),
                );
            }
        }

        match run().await {
            Ok((data, confidence)) => {
                let confidence =
                    confidence.unwrap_or(self.config.orchestrator.default_confidence);
                if let (Some(cache), Some(key), Some(generation)) = (cache, key, generation) {
                    let cached = CachedOperation {
                        data: data.clone(),
                        confidence,
                    };
                    if !cache.insert_if_generation(key, generation, cached) {
                        debug!(
                            operation = operation.as_str(),
                            "cache flushed during operation, result not cached"
                        );
                    }
                }
                self.finish(
                    operation,
                    started,
                    ResultSource::Computed,
                    Some(data),
                    confidence,
                    Vec::new(),
                )
            }
            Err(e) => {
                warn!(
                    operation = operation.as_str(),
                    error = %e,
                    kind = e.kind(),
                    "operation failed"
                );
                self.finish(operation, started, ResultSource::Error, None, 0.0, vec![e])
            }
        }
    }

    fn finish(
        &self,
        operation: OperationType,
        started: Instant,
        source: ResultSource,
        data: Option<OperationData>,
        confidence: f32,
        errors: Vec<EngineError>,
    ) -> OperationResult {
        let execution_time = started.elapsed();
        self.counters
            .lock()
            .record(operation, execution_time, source);
        OperationResult {
            success: errors.is_empty(),
            data,
            metadata: OperationMetadata {
                operation_type: operation,
                execution_time,
                source,
                confidence,
                node_class: self.config.engine.node_class.clone(),
                cultural_context: self.config.engine.cultural_context.clone(),
            },
            errors,
        }
    }

    fn invalidate(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    async fn run_search(&self, query: &SearchQuery) -> Result<Computed> {
        let mut document_query = query.clone();
        let filters = &mut document_query.filters;
        if filters.node_class.is_none() {
            filters.node_class = self.config.engine.node_class.clone();
        }
        if filters.cultural_context.is_none() {
            filters.cultural_context = self.config.engine.cultural_context.clone();
        }

        let limit = query.limit.unwrap_or(self.config.retrieval.max_results);
        let memory_limit = (limit as f32 * self.config.orchestrator.memory_share).ceil() as usize;
        let mut memory_query = MemoryQuery::text(query.text.clone()).with_limit(memory_limit);
        memory_query.sort_by = Some(MemorySort::Relevance);
        memory_query.filters.node_class = document_query.filters.node_class.clone();
        memory_query.filters.cultural_context = document_query.filters.cultural_context.clone();

        let (documents, memories) = tokio::join!(self.retrieval.search(&document_query), async {
            self.memory.retrieve_memories(&memory_query)
        });

        let mut items: Vec<KnowledgeItem> = Vec::new();
        let document_error = documents.error;
        items.extend(documents.results.into_iter().map(KnowledgeItem::from));
        items.extend(
            memories
                .memories
                .into_iter()
                .map(|m| KnowledgeItem {
                    score: lexical_relevance(&query.text, &m.content),
                    id: m.id,
                    content: m.content,
                    origin: SourceKind::Memory,
                    document_id: None,
                    tags: m.metadata.tags,
                }),
        );

        if let Some(e) = document_error {
            if items.is_empty() {
                return Err(e);
            }
            debug!(error = %e, "document search failed, returning memories only");
        }

        items.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut seen = HashSet::new();
        items.retain(|item| seen.insert(content_fingerprint(&item.content)));

        let confidence = items.first().map(|item| item.score);
        Ok((OperationData::Search(items), confidence))
    }

    async fn run_store(&self, request: &StoreRequest) -> Result<Computed> {
        let engine = &self.config.engine;
        let settings = &self.config.orchestrator;

        if request.content.chars().count() > settings.document_size_threshold {
            let document_id = request
                .document_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let mut metadata = DocumentMetadata {
                node_class: engine.node_class.clone(),
                cultural_context: engine.cultural_context.clone(),
                tags: request.tags.clone(),
                priority: request.priority.unwrap_or_default(),
                ..Default::default()
            };
            if let Some(content_type) = &request.content_type {
                metadata.content_type = content_type.clone();
            }
            if let Some(source) = &request.source {
                metadata.source = source.clone();
            }
            let result = self
                .retrieval
                .index_document(&document_id, &request.content, metadata)
                .await;
            if let Some(e) = result.error {
                return Err(e);
            }
            let outcome = StoreOutcome::Document {
                document_id,
                indexed_chunks: result.indexed_chunks,
            };
            return Ok((OperationData::Stored(outcome), None));
        }

        let importance = request.importance.unwrap_or(0.5);
        let memory_type = if importance > settings.high_importance_threshold {
            MemoryType::Knowledge
        } else {
            MemoryType::Experience
        };
        let patch = MemoryMetadataPatch {
            node_class: engine.node_class.clone(),
            cultural_context: engine.cultural_context.clone(),
            memory_type: Some(memory_type),
            priority: request.priority,
            tags: Some(request.tags.clone()),
            source: request.source.clone(),
            importance: Some(importance),
            associations: Some(request.associations.clone()),
            ..Default::default()
        };
        let memory_id = self.memory.store_memory(&request.content, patch);
        info!(memory_id = %memory_id, memory_type = memory_type.as_str(), "stored memory");
        let outcome = StoreOutcome::Memory {
            memory_id,
            memory_type,
        };
        Ok((OperationData::Stored(outcome), None))
    }

    async fn run_retrieve(&self, query: &MemoryQuery) -> Result<Computed> {
        let limit = query.limit.unwrap_or(DEFAULT_MEMORY_LIMIT);
        let mut memories = self.memory.retrieve_memories(query).memories;

        if let Some(text) = query.text.as_deref().filter(|t| !t.trim().is_empty()) {
            let response = self
                .retrieval
                .search(&SearchQuery::new(text).with_limit(limit))
                .await;
            if let Some(e) = &response.error {
                debug!(error = %e, "document lookup for retrieve failed");
            }
            if !response.results.is_empty() {
                memories.extend(response.results.into_iter().map(memory_from_hit));
                sort_memories(&mut memories, query.sort_by.unwrap_or_default(), text);
            }
        }
        memories.truncate(limit);

        let confidence = memories.first().map(|m| m.metadata.confidence);
        Ok((OperationData::Memories(memories), confidence))
    }

    async fn run_compose(&self, request: &ComposeRequest) -> Result<Computed> {
        if request.sources.is_empty() {
            return Err(EngineError::InvalidQuery(
                "compose needs at least one source".to_string(),
            ));
        }

        let mut sources = Vec::new();
        let mut missing = Vec::new();
        for id in &request.sources {
            if let Some(memory) = self.memory.get_memory(id) {
                sources.push(SourceContent {
                    id: id.clone(),
                    kind: SourceKind::Memory,
                    content: memory.content,
                });
            } else if let Some(content) = self.retrieval.document_content(id) {
                sources.push(SourceContent {
                    id: id.clone(),
                    kind: SourceKind::Document,
                    content,
                });
            } else {
                missing.push(id.clone());
            }
        }
        if sources.is_empty() {
            return Err(EngineError::NotFound(missing.join(", ")));
        }

        let content = match request.strategy {
            ComposeStrategy::Merge => sources
                .iter()
                .map(|s| s.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
            ComposeStrategy::Synthesize => {
                self.generator(request.strategy)?
                    .synthesize(&sources)
                    .await?
            }
            ComposeStrategy::Compare => {
                self.generator(request.strategy)?.compare(&sources).await?
            }
        };

        let composition = Composition {
            strategy: request.strategy,
            content,
            sources,
            missing,
        };
        Ok((OperationData::Composed(composition), None))
    }

    fn generator(&self, strategy: ComposeStrategy) -> Result<&Arc<dyn GenerativeModel>> {
        self.generator
            .as_ref()
            .ok_or_else(|| model_unavailable(strategy.as_str()))
    }

    async fn run_analyze(&self, request: &AnalyzeRequest) -> Result<Computed> {
        let statistics = TextStatistics::from_text(&request.content);
        let store = self.retrieval.store();

        let report = match request.analysis_type {
            AnalysisType::Relevance => {
                let reference = request.reference.as_deref().ok_or_else(|| {
                    EngineError::InvalidQuery("relevance analysis needs a reference text".to_string())
                })?;
                let content_vector = store.embed_query(&request.content).await?;
                let reference_vector = store.embed_query(reference).await?;
                let similarity = cosine_similarity(&content_vector, &reference_vector)?;
                AnalysisReport {
                    analysis_type: request.analysis_type,
                    statistics,
                    embedding_dimensions: Some(content_vector.dim()),
                    score: Some(similarity),
                    breakdown: BTreeMap::from([("relevance".to_string(), similarity)]),
                }
            }
            AnalysisType::Complexity => AnalysisReport {
                analysis_type: request.analysis_type,
                embedding_dimensions: self.content_dimensions(&request.content).await,
                breakdown: statistics.scores(),
                statistics,
                score: None,
            },
            AnalysisType::Quality | AnalysisType::Sentiment => {
                let analyzer = self
                    .analyzer
                    .as_ref()
                    .ok_or_else(|| model_unavailable(request.analysis_type.as_str()))?;
                let scores = analyzer
                    .analyze(request.analysis_type, &request.content)
                    .await?;
                AnalysisReport {
                    analysis_type: request.analysis_type,
                    statistics,
                    embedding_dimensions: self.content_dimensions(&request.content).await,
                    score: scores.overall,
                    breakdown: scores.breakdown,
                }
            }
        };

        let confidence = report.score;
        Ok((OperationData::Analysis(report), confidence))
    }

    /// Embedding dimension of `content`, if a provider can produce one.
    async fn content_dimensions(&self, content: &str) -> Option<usize> {
        let store = self.retrieval.store();
        if !store.has_provider() {
            return None;
        }
        match store.embed_query(content).await {
            Ok(vector) => Some(vector.dim()),
            Err(e) => {
                debug!(error = %e, "content embedding unavailable for analysis");
                None
            }
        }
    }
}

/// SHA-256 of the lowercased, whitespace-collapsed content.
fn content_fingerprint(content: &str) -> String {
    let normalized = content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

fn memory_from_hit(hit: SearchHit) -> MemoryEntry {
    let embedding = hit.embedding;
    let metadata = embedding.metadata;
    let mut extra = metadata.extra;
    extra.insert("document_id".to_string(), metadata.document_id);
    extra.insert("chunk_index".to_string(), metadata.chunk_index.to_string());
    MemoryEntry {
        id: embedding.id,
        content: metadata.content,
        metadata: MemoryMetadata {
            node_class: metadata.node_class,
            cultural_context: metadata.cultural_context,
            memory_type: MemoryType::Knowledge,
            priority: metadata.priority,
            tags: metadata.tags,
            source: Some(metadata.source),
            confidence: hit.similarity,
            emotional_valence: 0.0,
            importance: hit.similarity,
            associations: BTreeSet::new(),
            extra,
        },
        created_at: embedding.created_at,
        updated_at: embedding.updated_at,
    }
}

fn sort_memories(memories: &mut [MemoryEntry], sort: MemorySort, text: &str) {
    let desc = |a: f32, b: f32| b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal);
    match sort {
        MemorySort::Importance => {
            memories.sort_by(|a, b| desc(a.metadata.importance, b.metadata.importance))
        }
        MemorySort::Recent => memories.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        MemorySort::Priority => {
            memories.sort_by_key(|m| std::cmp::Reverse(m.metadata.priority.rank()))
        }
        MemorySort::Confidence => {
            memories.sort_by(|a, b| desc(a.metadata.confidence, b.metadata.confidence))
        }
        MemorySort::Relevance => memories.sort_by(|a, b| {
            desc(
                lexical_relevance(text, &a.content),
                lexical_relevance(text, &b.content),
            )
        }),
    }
}

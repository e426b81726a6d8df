//! In-memory embedding store.
//!
//! Chunks documents with the segmenter, embeds each chunk through the
//! injected [`EmbeddingProvider`], normalizes and stores the vectors, and
//! answers nearest-neighbour queries by brute-force cosine similarity.
//!
//! All entries and the document index live in one [`EmbeddingIndex`]
//! behind a single `RwLock`, so an insert or delete is visible to readers
//! either completely or not at all. Provider calls happen before the lock
//! is taken.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::chunk::{segment, SegmenterConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{EngineError, Result};
use crate::models::{DocumentMetadata, Embedding, EmbeddingMetadata};
use crate::vector::{cosine_similarity, normalize, Vector};

/// Entries keyed by insertion sequence, plus secondary indices.
#[derive(Default)]
struct EmbeddingIndex {
    next_seq: u64,
    entries: BTreeMap<u64, Embedding>,
    ids: HashMap<String, u64>,
    by_document: HashMap<String, BTreeSet<u64>>,
}

impl EmbeddingIndex {
    fn insert(&mut self, embedding: Embedding) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.ids.insert(embedding.id.clone(), seq);
        self.by_document
            .entry(embedding.metadata.document_id.clone())
            .or_default()
            .insert(seq);
        self.entries.insert(seq, embedding);
    }

    fn remove_document(&mut self, document_id: &str) -> usize {
        let Some(seqs) = self.by_document.remove(document_id) else {
            return 0;
        };
        let mut removed = 0;
        for seq in seqs {
            if let Some(e) = self.entries.remove(&seq) {
                self.ids.remove(&e.id);
                removed += 1;
            }
        }
        removed
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.ids.clear();
        self.by_document.clear();
    }
}

pub struct EmbeddingStore {
    dimensions: usize,
    segmenter: SegmenterConfig,
    provider: RwLock<Option<Arc<dyn EmbeddingProvider>>>,
    index: RwLock<EmbeddingIndex>,
}

impl EmbeddingStore {
    pub fn new(dimensions: usize, segmenter: SegmenterConfig) -> Self {
        Self {
            dimensions,
            segmenter,
            provider: RwLock::new(None),
            index: RwLock::new(EmbeddingIndex::default()),
        }
    }

    pub fn with_provider(
        dimensions: usize,
        segmenter: SegmenterConfig,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let store = Self::new(dimensions, segmenter);
        store.set_provider(provider);
        store
    }

    pub fn set_provider(&self, provider: Arc<dyn EmbeddingProvider>) {
        if provider.dims() != self.dimensions {
            warn!(
                model = provider.model_name(),
                provider_dims = provider.dims(),
                store_dims = self.dimensions,
                "embedding provider advertises a different dimension"
            );
        }
        *self.provider.write() = Some(provider);
    }

    pub fn has_provider(&self) -> bool {
        self.provider.read().is_some()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn segmenter(&self) -> &SegmenterConfig {
        &self.segmenter
    }

    fn provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        self.provider.read().clone().ok_or(EngineError::ProviderNotSet)
    }

    /// Embed `text` and return the normalized vector without storing it.
    pub async fn embed_query(&self, text: &str) -> Result<Vector> {
        let provider = self.provider()?;
        let vector = provider.generate(text).await?;
        vector.check_dim(self.dimensions)?;
        Ok(normalize(&vector))
    }

    /// Segment `content`, embed every chunk, and store the results.
    ///
    /// Nothing is stored unless every chunk embeds successfully.
    pub async fn create_embeddings(
        &self,
        document_id: &str,
        content: &str,
        metadata: &DocumentMetadata,
    ) -> Result<Vec<Embedding>> {
        let created = self.embed_document(document_id, content, metadata).await?;
        {
            let mut index = self.index.write();
            for embedding in &created {
                index.insert(embedding.clone());
            }
        }
        debug!(document_id, chunks = created.len(), "stored document embeddings");
        Ok(created)
    }

    /// Like [`create_embeddings`](Self::create_embeddings), but swaps out any
    /// embeddings the document already had in the same write.
    pub async fn replace_document_embeddings(
        &self,
        document_id: &str,
        content: &str,
        metadata: &DocumentMetadata,
    ) -> Result<Vec<Embedding>> {
        let created = self.embed_document(document_id, content, metadata).await?;
        let replaced = {
            let mut index = self.index.write();
            let replaced = index.remove_document(document_id);
            for embedding in &created {
                index.insert(embedding.clone());
            }
            replaced
        };
        debug!(
            document_id,
            chunks = created.len(),
            replaced,
            "replaced document embeddings"
        );
        Ok(created)
    }

    async fn embed_document(
        &self,
        document_id: &str,
        content: &str,
        metadata: &DocumentMetadata,
    ) -> Result<Vec<Embedding>> {
        let provider = self.provider()?;
        let chunks = segment(content, &self.segmenter);

        let mut created = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let vector = provider.generate(&chunk.content).await?;
            vector.check_dim(self.dimensions)?;
            let now = Utc::now();
            created.push(Embedding {
                id: Uuid::new_v4().to_string(),
                vector: normalize(&vector),
                metadata: EmbeddingMetadata::from_chunk(document_id, chunk, metadata),
                created_at: now,
                updated_at: now,
            });
        }
        Ok(created)
    }

    /// Linear scan for embeddings with similarity `>= threshold`.
    ///
    /// Results are sorted by similarity (desc), ties in insertion order, and
    /// truncated to `limit`. Each returned copy has `metadata.confidence`
    /// set to its similarity.
    pub fn find_similar_embeddings(
        &self,
        query: &Vector,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<Embedding>> {
        query.check_dim(self.dimensions)?;

        let index = self.index.read();
        let mut scored: Vec<(f32, &Embedding)> = Vec::new();
        for embedding in index.entries.values() {
            let sim = cosine_similarity(query, &embedding.vector)?;
            if sim >= threshold {
                scored.push((sim, embedding));
            }
        }

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(sim, e)| {
                let mut copy = e.clone();
                copy.metadata.confidence = sim;
                copy
            })
            .collect())
    }

    /// All embeddings of a document, ordered by `chunk_index`.
    pub fn get_document_embeddings(&self, document_id: &str) -> Vec<Embedding> {
        let index = self.index.read();
        let mut embeddings: Vec<Embedding> = index
            .by_document
            .get(document_id)
            .map(|seqs| {
                seqs.iter()
                    .filter_map(|seq| index.entries.get(seq).cloned())
                    .collect()
            })
            .unwrap_or_default();
        embeddings.sort_by_key(|e| e.metadata.chunk_index);
        embeddings
    }

    /// Remove every embedding of a document. Returns how many were removed.
    pub fn delete_document_embeddings(&self, document_id: &str) -> usize {
        let removed = self.index.write().remove_document(document_id);
        debug!(document_id, removed, "deleted document embeddings");
        removed
    }

    pub fn get_embedding(&self, id: &str) -> Option<Embedding> {
        let index = self.index.read();
        index
            .ids
            .get(id)
            .and_then(|seq| index.entries.get(seq))
            .cloned()
    }

    pub fn document_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.index.read().by_document.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn contains_document(&self, document_id: &str) -> bool {
        self.index.read().by_document.contains_key(document_id)
    }

    pub fn len(&self) -> usize {
        self.index.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.index.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::vector::norm;

    /// Returns the same vector for every input.
    struct FixedProvider {
        values: Vec<f32>,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedProvider {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            self.values.len()
        }
        async fn generate(&self, _text: &str) -> Result<Vector> {
            Ok(Vector::new(self.values.clone()))
        }
    }

    /// Looks up the vector by exact text; unknown text is an error.
    struct TableProvider {
        table: HashMap<String, Vec<f32>>,
    }

    #[async_trait]
    impl EmbeddingProvider for TableProvider {
        fn model_name(&self) -> &str {
            "table"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn generate(&self, text: &str) -> Result<Vector> {
            self.table
                .get(text)
                .cloned()
                .map(Vector::new)
                .ok_or_else(|| EngineError::ProviderFailure(format!("no vector for {text}")))
        }
    }

    fn small_chunks() -> SegmenterConfig {
        SegmenterConfig {
            max_chunk_size: 500,
            ..SegmenterConfig::default()
        }
    }

    fn table_store(rows: &[(&str, [f32; 2])]) -> EmbeddingStore {
        let table = rows
            .iter()
            .map(|(text, v)| (text.to_string(), v.to_vec()))
            .collect();
        EmbeddingStore::with_provider(2, small_chunks(), Arc::new(TableProvider { table }))
    }

    fn long_text() -> String {
        (0..45)
            .map(|i| format!("Sentence {i:02} covers embedding."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[tokio::test]
    async fn test_create_embeddings_chunks_and_normalizes() {
        let text = long_text();
        assert!(text.len() >= 1200);
        let store = EmbeddingStore::with_provider(
            384,
            small_chunks(),
            Arc::new(FixedProvider {
                values: vec![0.5; 384],
            }),
        );

        let created = store
            .create_embeddings("doc-1", &text, &DocumentMetadata::default())
            .await
            .unwrap();

        assert!(created.len() >= 2);
        for (i, e) in created.iter().enumerate() {
            assert_eq!(e.metadata.chunk_index, i);
            assert_eq!(e.metadata.document_id, "doc-1");
            assert_eq!(e.vector.dim(), 384);
            assert!((norm(&e.vector) - 1.0).abs() < 1e-5);
        }
        assert_eq!(store.len(), created.len());
    }

    #[tokio::test]
    async fn test_provider_not_set() {
        let store = EmbeddingStore::new(4, SegmenterConfig::default());
        let err = store
            .create_embeddings("doc", "some text", &DocumentMetadata::default())
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::ProviderNotSet);
        assert!(store.embed_query("q").await.is_err());
    }

    #[tokio::test]
    async fn test_wrong_dimension_stores_nothing() {
        let store = EmbeddingStore::with_provider(
            8,
            SegmenterConfig::default(),
            Arc::new(FixedProvider {
                values: vec![1.0; 3],
            }),
        );
        let err = store
            .create_embeddings("doc", "text", &DocumentMetadata::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::DimensionMismatch {
                expected: 8,
                actual: 3
            }
        );
        assert!(store.is_empty());
        assert!(!store.contains_document("doc"));
    }

    #[tokio::test]
    async fn test_partial_provider_failure_is_atomic() {
        let store = table_store(&[("Known.", [1.0, 0.0])]);
        let result = store
            .create_embeddings("doc", "Known.\n\nUnknown.", &DocumentMetadata::default())
            .await;
        assert!(matches!(result, Err(EngineError::ProviderFailure(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_threshold_filters_out_weak_matches() {
        // Both stored vectors have cosine 0.5 with the query [1, 0].
        let store = table_store(&[("a", [0.5, 0.866_025_4]), ("b", [0.5, -0.866_025_4])]);
        let meta = DocumentMetadata::default();
        store.create_embeddings("d1", "a", &meta).await.unwrap();
        store.create_embeddings("d2", "b", &meta).await.unwrap();

        let query = Vector::new(vec![1.0, 0.0]);
        assert!(store.find_similar_embeddings(&query, 0.99, 10).unwrap().is_empty());

        let hits = store.find_similar_embeddings(&query, 0.4, 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert!((hits[0].metadata.confidence - 0.5).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_limit_and_ordering() {
        let store = table_store(&[
            ("low", [0.2, 0.98]),
            ("high", [1.0, 0.0]),
            ("mid", [0.7, 0.7]),
            ("none", [0.0, 1.0]),
        ]);
        let meta = DocumentMetadata::default();
        for text in ["low", "high", "mid", "none"] {
            store.create_embeddings(text, text, &meta).await.unwrap();
        }

        let query = Vector::new(vec![1.0, 0.0]);
        let hits = store.find_similar_embeddings(&query, 0.1, 100).unwrap();
        let docs: Vec<&str> = hits.iter().map(|e| e.metadata.document_id.as_str()).collect();
        assert_eq!(docs, vec!["high", "mid", "low"]);
        for pair in hits.windows(2) {
            assert!(pair[0].metadata.confidence >= pair[1].metadata.confidence);
        }

        let top = store.find_similar_embeddings(&query, 0.1, 1).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].metadata.document_id, "high");
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let store = table_store(&[("x", [1.0, 0.0])]);
        let meta = DocumentMetadata::default();
        for doc in ["first", "second", "third"] {
            store.create_embeddings(doc, "x", &meta).await.unwrap();
        }
        let hits = store
            .find_similar_embeddings(&Vector::new(vec![1.0, 0.0]), 0.0, 10)
            .unwrap();
        let docs: Vec<&str> = hits.iter().map(|e| e.metadata.document_id.as_str()).collect();
        assert_eq!(docs, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_query_dimension_checked() {
        let store = EmbeddingStore::new(3, SegmenterConfig::default());
        let err = store
            .find_similar_embeddings(&Vector::new(vec![1.0]), 0.0, 5)
            .unwrap_err();
        assert!(matches!(err, EngineError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_delete_document_embeddings() {
        let store = EmbeddingStore::with_provider(
            4,
            SegmenterConfig {
                max_chunk_size: 20,
                ..SegmenterConfig::default()
            },
            Arc::new(FixedProvider {
                values: vec![1.0, 0.0, 0.0, 0.0],
            }),
        );
        let meta = DocumentMetadata::default();
        let created = store
            .create_embeddings("gone", "One paragraph.\n\nTwo paragraph.\n\nThree.", &meta)
            .await
            .unwrap();
        store.create_embeddings("kept", "Stays here.", &meta).await.unwrap();
        assert_eq!(store.get_document_embeddings("gone").len(), created.len());

        let removed = store.delete_document_embeddings("gone");
        assert_eq!(removed, created.len());
        assert!(store.get_document_embeddings("gone").is_empty());
        assert!(store.get_embedding(&created[0].id).is_none());
        assert_eq!(store.document_ids(), vec!["kept".to_string()]);
        assert_eq!(store.delete_document_embeddings("gone"), 0);
    }

    #[tokio::test]
    async fn test_replace_swaps_previous_chunks() {
        let store = EmbeddingStore::with_provider(
            2,
            SegmenterConfig::default(),
            Arc::new(FixedProvider {
                values: vec![1.0, 0.0],
            }),
        );
        let meta = DocumentMetadata::default();
        store
            .create_embeddings("doc", "Old one.\n\nOld two.", &meta)
            .await
            .unwrap();
        store
            .replace_document_embeddings("doc", "New text.", &meta)
            .await
            .unwrap();
        let chunks = store.get_document_embeddings("doc");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.content, "New text.");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_document_embeddings_ordered_by_chunk() {
        let store = EmbeddingStore::with_provider(
            2,
            SegmenterConfig::default(),
            Arc::new(FixedProvider {
                values: vec![1.0, 1.0],
            }),
        );
        store
            .create_embeddings("doc", "A.\n\nB.\n\nC.", &DocumentMetadata::default())
            .await
            .unwrap();
        let chunks: Vec<String> = store
            .get_document_embeddings("doc")
            .into_iter()
            .map(|e| e.metadata.content)
            .collect();
        assert_eq!(chunks, vec!["A.", "B.", "C."]);
    }
}

//! Core data models used throughout the knowledge engine.
//!
//! These types represent the chunks, embeddings, and memory entries that
//! flow through indexing and retrieval. Metadata is a closed structure per
//! entity; the `extra` map is the only open-ended part.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::vector::Vector;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    /// Ordering weight: high > medium > low.
    pub fn rank(self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Medium => 1,
            Priority::High => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    #[default]
    Experience,
    Knowledge,
    Interaction,
    Reflection,
}

impl MemoryType {
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryType::Experience => "experience",
            MemoryType::Knowledge => "knowledge",
            MemoryType::Interaction => "interaction",
            MemoryType::Reflection => "reflection",
        }
    }
}

/// Per-chunk bookkeeping recorded by the segmenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub is_complete_sentence: bool,
    pub is_complete_paragraph: bool,
    pub word_count: usize,
    pub character_count: usize,
}

/// A bounded slice of a source text.
///
/// `start_offset`/`end_offset` are byte offsets into the original text and
/// never include the overlap prefix that may have been added to `content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub content: String,
    pub index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub metadata: ChunkMetadata,
}

/// Document-level metadata supplied when indexing.
///
/// Copied onto every embedding produced from the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentMetadata {
    pub content_type: String,
    pub source: String,
    pub node_class: Option<String>,
    pub cultural_context: Option<String>,
    pub tags: BTreeSet<String>,
    pub priority: Priority,
    pub confidence: f32,
    pub extra: BTreeMap<String, String>,
}

impl Default for DocumentMetadata {
    fn default() -> Self {
        Self {
            content_type: "text/plain".to_string(),
            source: "direct".to_string(),
            node_class: None,
            cultural_context: None,
            tags: BTreeSet::new(),
            priority: Priority::Medium,
            confidence: 1.0,
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingMetadata {
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub content_type: String,
    pub source: String,
    pub node_class: Option<String>,
    pub cultural_context: Option<String>,
    pub tags: BTreeSet<String>,
    pub priority: Priority,
    pub confidence: f32,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl EmbeddingMetadata {
    pub fn from_chunk(document_id: &str, chunk: &TextChunk, doc: &DocumentMetadata) -> Self {
        Self {
            document_id: document_id.to_string(),
            chunk_index: chunk.index,
            content: chunk.content.clone(),
            content_type: doc.content_type.clone(),
            source: doc.source.clone(),
            node_class: doc.node_class.clone(),
            cultural_context: doc.cultural_context.clone(),
            tags: doc.tags.clone(),
            priority: doc.priority,
            confidence: doc.confidence,
            extra: doc.extra.clone(),
        }
    }
}

/// A stored chunk vector plus its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub id: String,
    pub vector: Vector,
    pub metadata: EmbeddingMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub node_class: Option<String>,
    pub cultural_context: Option<String>,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub priority: Priority,
    pub tags: BTreeSet<String>,
    pub source: Option<String>,
    pub confidence: f32,
    pub emotional_valence: f32,
    pub importance: f32,
    pub associations: BTreeSet<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl Default for MemoryMetadata {
    fn default() -> Self {
        Self {
            node_class: None,
            cultural_context: None,
            memory_type: MemoryType::Experience,
            priority: Priority::Medium,
            tags: BTreeSet::new(),
            source: None,
            confidence: 1.0,
            emotional_valence: 0.0,
            importance: 0.5,
            associations: BTreeSet::new(),
            extra: BTreeMap::new(),
        }
    }
}

/// Partial memory metadata.
///
/// Used both when storing (unset fields take their defaults) and when
/// updating (set fields overwrite, unset fields are kept).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryMetadataPatch {
    pub node_class: Option<String>,
    pub cultural_context: Option<String>,
    #[serde(rename = "type")]
    pub memory_type: Option<MemoryType>,
    pub priority: Option<Priority>,
    pub tags: Option<BTreeSet<String>>,
    pub source: Option<String>,
    pub confidence: Option<f32>,
    pub emotional_valence: Option<f32>,
    pub importance: Option<f32>,
    pub associations: Option<BTreeSet<String>>,
    pub extra: Option<BTreeMap<String, String>>,
}

impl MemoryMetadataPatch {
    pub fn apply_to(self, meta: &mut MemoryMetadata) {
        if let Some(v) = self.node_class {
            meta.node_class = Some(v);
        }
        if let Some(v) = self.cultural_context {
            meta.cultural_context = Some(v);
        }
        if let Some(v) = self.memory_type {
            meta.memory_type = v;
        }
        if let Some(v) = self.priority {
            meta.priority = v;
        }
        if let Some(v) = self.tags {
            meta.tags = v;
        }
        if let Some(v) = self.source {
            meta.source = Some(v);
        }
        if let Some(v) = self.confidence {
            meta.confidence = v;
        }
        if let Some(v) = self.emotional_valence {
            meta.emotional_valence = v;
        }
        if let Some(v) = self.importance {
            meta.importance = v;
        }
        if let Some(v) = self.associations {
            meta.associations = v;
        }
        if let Some(v) = self.extra {
            meta.extra.extend(v);
        }
    }

    pub fn into_metadata(self) -> MemoryMetadata {
        let mut meta = MemoryMetadata::default();
        self.apply_to(&mut meta);
        meta
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub content: String,
    pub metadata: MemoryMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields to change on an existing memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryUpdate {
    pub content: Option<String>,
    pub metadata: MemoryMetadataPatch,
}

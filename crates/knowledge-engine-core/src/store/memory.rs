//! Multi-indexed short-term memory store.
//!
//! Memory entries are short free-text records kept apart from document
//! embeddings. Besides the id map, the store keeps a tag index, a date
//! index (UTC creation date) and an association index. All of them sit in
//! one [`MemoryIndex`] behind a single `RwLock`; every mutation goes
//! through [`MemoryIndex::insert`] / [`MemoryIndex::remove`], which keep
//! the secondary maps the exact inverse of the live entries and prune
//! empty buckets.
//!
//! # Retrieval strategy
//!
//! The first matching query shape wins:
//!
//! | Shape | Candidates |
//! |-------|------------|
//! | `tags` | union of the tag buckets |
//! | `temporal_range` | union of date buckets within `[start, end]` |
//! | `associations` | entries carrying any of the associations |
//! | `text` | entries containing at least one query term |
//! | none | the `limit` most recent entries |
//!
//! Candidates are then filtered, sorted by [`MemorySort`], and truncated.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::{
    MemoryEntry, MemoryMetadataPatch, MemoryType, MemoryUpdate, Priority,
};

/// Limit applied when a query does not set one.
pub const DEFAULT_MEMORY_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryFilters {
    #[serde(rename = "type")]
    pub memory_type: Option<MemoryType>,
    pub priority: Option<Priority>,
    pub source: Option<String>,
    pub min_importance: Option<f32>,
    pub node_class: Option<String>,
    pub cultural_context: Option<String>,
}

impl MemoryFilters {
    fn matches(&self, entry: &MemoryEntry) -> bool {
        let meta = &entry.metadata;
        if self.memory_type.is_some_and(|t| t != meta.memory_type) {
            return false;
        }
        if self.priority.is_some_and(|p| p != meta.priority) {
            return false;
        }
        if let Some(source) = &self.source {
            if meta.source.as_deref() != Some(source.as_str()) {
                return false;
            }
        }
        if self.min_importance.is_some_and(|min| meta.importance < min) {
            return false;
        }
        if self.node_class.is_some() && meta.node_class != self.node_class {
            return false;
        }
        if self.cultural_context.is_some() && meta.cultural_context != self.cultural_context {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySort {
    #[default]
    Importance,
    Recent,
    Priority,
    Confidence,
    /// Fraction of `text` terms found in the content; see [`lexical_relevance`].
    Relevance,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryQuery {
    pub tags: Vec<String>,
    pub temporal_range: Option<TemporalRange>,
    pub associations: Vec<String>,
    /// Free-text query matched term-by-term against memory content.
    pub text: Option<String>,
    pub limit: Option<usize>,
    pub filters: MemoryFilters,
    pub sort_by: Option<MemorySort>,
}

impl MemoryQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRetrieval {
    pub memories: Vec<MemoryEntry>,
    /// Matches after filtering, before truncation.
    pub total_count: usize,
    pub retrieval_time: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<String, usize>,
    pub tag_buckets: usize,
    pub association_buckets: usize,
    pub date_buckets: usize,
}

/// Fraction of the distinct query terms found (case-insensitively) in `content`.
pub fn lexical_relevance(query: &str, content: &str) -> f32 {
    let query = query.to_lowercase();
    let terms: BTreeSet<&str> = query.split_whitespace().collect();
    if terms.is_empty() {
        return 0.0;
    }
    let content = content.to_lowercase();
    let matched = terms.iter().filter(|t| content.contains(**t)).count();
    matched as f32 / terms.len() as f32
}

#[derive(Default)]
struct MemoryIndex {
    next_seq: u64,
    entries: HashMap<String, (u64, MemoryEntry)>,
    by_tag: HashMap<String, HashSet<String>>,
    by_date: BTreeMap<NaiveDate, HashSet<String>>,
    by_association: HashMap<String, HashSet<String>>,
}

fn unlink(bucket_map: &mut HashMap<String, HashSet<String>>, key: &str, id: &str) {
    if let Some(ids) = bucket_map.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            bucket_map.remove(key);
        }
    }
}

impl MemoryIndex {
    /// Index and store `entry`. `seq` preserves the original insertion
    /// position across updates.
    fn insert(&mut self, entry: MemoryEntry, seq: Option<u64>) {
        let seq = seq.unwrap_or_else(|| {
            let s = self.next_seq;
            self.next_seq += 1;
            s
        });
        let id = entry.id.clone();
        for tag in &entry.metadata.tags {
            self.by_tag.entry(tag.clone()).or_default().insert(id.clone());
        }
        for assoc in &entry.metadata.associations {
            self.by_association
                .entry(assoc.clone())
                .or_default()
                .insert(id.clone());
        }
        self.by_date
            .entry(entry.created_at.date_naive())
            .or_default()
            .insert(id.clone());
        self.entries.insert(id, (seq, entry));
    }

    fn remove(&mut self, id: &str) -> Option<(u64, MemoryEntry)> {
        let (seq, entry) = self.entries.remove(id)?;
        for tag in &entry.metadata.tags {
            unlink(&mut self.by_tag, tag, id);
        }
        for assoc in &entry.metadata.associations {
            unlink(&mut self.by_association, assoc, id);
        }
        let date = entry.created_at.date_naive();
        if let Some(ids) = self.by_date.get_mut(&date) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_date.remove(&date);
            }
        }
        Some((seq, entry))
    }

    fn collect<'a>(&'a self, ids: impl IntoIterator<Item = &'a String>) -> Vec<&'a (u64, MemoryEntry)> {
        let unique: HashSet<&String> = ids.into_iter().collect();
        unique.into_iter().filter_map(|id| self.entries.get(id)).collect()
    }

    fn candidates(&self, query: &MemoryQuery, limit: usize) -> Result<Vec<&(u64, MemoryEntry)>> {
        if !query.tags.is_empty() {
            return Ok(self.collect(
                query
                    .tags
                    .iter()
                    .filter_map(|t| self.by_tag.get(t))
                    .flatten(),
            ));
        }

        if let Some(range) = &query.temporal_range {
            if range.start > range.end {
                return Err(EngineError::InvalidQuery(
                    "temporal range start is after end".to_string(),
                ));
            }
            let (from, to) = (range.start.date_naive(), range.end.date_naive());
            return Ok(self.collect(self.by_date.range(from..=to).flat_map(|(_, ids)| ids)));
        }

        if !query.associations.is_empty() {
            return Ok(self.collect(
                query
                    .associations
                    .iter()
                    .filter_map(|a| self.by_association.get(a))
                    .flatten(),
            ));
        }

        if let Some(text) = query.text.as_deref().filter(|t| !t.trim().is_empty()) {
            return Ok(self
                .entries
                .values()
                .filter(|(_, e)| lexical_relevance(text, &e.content) > 0.0)
                .collect());
        }

        let mut recent: Vec<&(u64, MemoryEntry)> = self.entries.values().collect();
        sort_recent_first(&mut recent);
        recent.truncate(limit);
        Ok(recent)
    }
}

fn sort_recent_first(entries: &mut [&(u64, MemoryEntry)]) {
    entries.sort_by(|(sa, a), (sb, b)| b.created_at.cmp(&a.created_at).then(sb.cmp(sa)));
}

fn desc(a: f32, b: f32) -> std::cmp::Ordering {
    b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
}

pub struct MemoryStore {
    index: RwLock<MemoryIndex>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            index: RwLock::new(MemoryIndex::default()),
        }
    }

    /// Store a memory. Unset metadata fields take their defaults.
    pub fn store_memory(&self, content: &str, metadata: MemoryMetadataPatch) -> String {
        let now = Utc::now();
        let entry = MemoryEntry {
            id: Uuid::new_v4().to_string(),
            content: content.to_string(),
            metadata: metadata.into_metadata(),
            created_at: now,
            updated_at: now,
        };
        let id = entry.id.clone();
        debug!(
            memory_id = %id,
            memory_type = entry.metadata.memory_type.as_str(),
            tags = entry.metadata.tags.len(),
            "stored memory"
        );
        self.index.write().insert(entry, None);
        id
    }

    /// Best-effort retrieval: an unsatisfiable query shape yields an empty
    /// result rather than an error.
    pub fn retrieve_memories(&self, query: &MemoryQuery) -> MemoryRetrieval {
        let started = Instant::now();
        let limit = query.limit.unwrap_or(DEFAULT_MEMORY_LIMIT);
        let index = self.index.read();

        let mut matched = match index.candidates(query, limit) {
            Ok(candidates) => candidates,
            Err(e) => {
                debug!(error = %e, "memory query rejected");
                return MemoryRetrieval {
                    memories: Vec::new(),
                    total_count: 0,
                    retrieval_time: started.elapsed(),
                };
            }
        };

        matched.retain(|(_, e)| query.filters.matches(e));
        let total_count = matched.len();

        // Base order keeps ties deterministic under the stable sort below.
        sort_recent_first(&mut matched);
        match query.sort_by.unwrap_or_default() {
            MemorySort::Importance => {
                matched.sort_by(|(_, a), (_, b)| desc(a.metadata.importance, b.metadata.importance))
            }
            MemorySort::Recent => {}
            MemorySort::Priority => {
                matched.sort_by_key(|(_, e)| std::cmp::Reverse(e.metadata.priority.rank()))
            }
            MemorySort::Confidence => {
                matched.sort_by(|(_, a), (_, b)| desc(a.metadata.confidence, b.metadata.confidence))
            }
            MemorySort::Relevance => {
                let text = query.text.as_deref().unwrap_or_default();
                matched.sort_by(|(_, a), (_, b)| {
                    desc(
                        lexical_relevance(text, &a.content),
                        lexical_relevance(text, &b.content),
                    )
                })
            }
        }
        matched.truncate(limit);

        MemoryRetrieval {
            memories: matched.into_iter().map(|(_, e)| e.clone()).collect(),
            total_count,
            retrieval_time: started.elapsed(),
        }
    }

    /// Merge `update` into an existing memory. Returns `false` if `id` is unknown.
    pub fn update_memory(&self, id: &str, update: MemoryUpdate) -> bool {
        let mut index = self.index.write();
        let Some((seq, mut entry)) = index.remove(id) else {
            return false;
        };
        if let Some(content) = update.content {
            entry.content = content;
        }
        update.metadata.apply_to(&mut entry.metadata);
        entry.updated_at = Utc::now();
        index.insert(entry, Some(seq));
        debug!(memory_id = id, "updated memory");
        true
    }

    pub fn delete_memory(&self, id: &str) -> bool {
        let removed = self.index.write().remove(id).is_some();
        if removed {
            debug!(memory_id = id, "deleted memory");
        }
        removed
    }

    pub fn get_memory(&self, id: &str) -> Option<MemoryEntry> {
        self.index.read().entries.get(id).map(|(_, e)| e.clone())
    }

    pub fn clear_all_memories(&self) {
        *self.index.write() = MemoryIndex::default();
    }

    pub fn len(&self) -> usize {
        self.index.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tags that currently have a non-empty bucket, sorted.
    pub fn indexed_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.index.read().by_tag.keys().cloned().collect();
        tags.sort();
        tags
    }

    pub fn stats(&self) -> MemoryStats {
        let index = self.index.read();
        let mut stats = MemoryStats {
            total: index.entries.len(),
            tag_buckets: index.by_tag.len(),
            association_buckets: index.by_association.len(),
            date_buckets: index.by_date.len(),
            ..Default::default()
        };
        for (_, entry) in index.entries.values() {
            *stats
                .by_type
                .entry(entry.metadata.memory_type.as_str().to_string())
                .or_default() += 1;
            *stats
                .by_priority
                .entry(entry.metadata.priority.as_str().to_string())
                .or_default() += 1;
        }
        stats
    }
}

//! Engine configuration.
//!
//! Loaded from TOML with [`load_config`] or built in code starting from
//! [`Config::default`]. Every field has a default, so a config file only
//! needs the sections it changes:
//!
//! ```toml
//! [engine]
//! vector_dimensions = 384
//! node_class = "research"
//!
//! [chunking]
//! chunk_size = 500
//! overlap_size = 20
//!
//! [cache]
//! cache_ttl_ms = 60000
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use knowledge_engine_core::chunk::SegmenterConfig;

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EngineConfig {
    #[serde(default = "default_vector_dimensions")]
    pub vector_dimensions: usize,
    #[serde(default)]
    pub node_class: Option<String>,
    #[serde(default)]
    pub cultural_context: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vector_dimensions: default_vector_dimensions(),
            node_class: None,
            cultural_context: None,
        }
    }
}

fn default_vector_dimensions() -> usize {
    384
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub overlap_size: usize,
    #[serde(default = "default_true")]
    pub preserve_sentences: bool,
    #[serde(default = "default_true")]
    pub preserve_paragraphs: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap_size: 0,
            preserve_sentences: true,
            preserve_paragraphs: true,
        }
    }
}

impl ChunkingConfig {
    pub fn segmenter(&self) -> SegmenterConfig {
        SegmenterConfig {
            max_chunk_size: self.chunk_size,
            overlap_size: self.overlap_size,
            preserve_sentences: self.preserve_sentences,
            preserve_paragraphs: self.preserve_paragraphs,
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_threshold")]
    pub default_threshold: f32,
    /// The similarity scan fetches `limit * candidate_multiplier` candidates
    /// so metadata filtering still has enough left to fill `limit`.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            default_threshold: default_threshold(),
            candidate_multiplier: default_candidate_multiplier(),
        }
    }
}

fn default_max_results() -> usize {
    10
}
fn default_threshold() -> f32 {
    0.7
}
fn default_candidate_multiplier() -> usize {
    4
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enable_caching: bool,
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_caching: true,
            cache_ttl_ms: default_cache_ttl_ms(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

fn default_cache_ttl_ms() -> u64 {
    300_000
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Share of `max_results` given to the memory sub-query of a search.
    #[serde(default = "default_memory_share")]
    pub memory_share: f32,
    /// Content longer than this (in chars) is indexed as a document.
    #[serde(default = "default_document_size_threshold")]
    pub document_size_threshold: usize,
    /// Memories above this importance are stored as `knowledge`.
    #[serde(default = "default_high_importance_threshold")]
    pub high_importance_threshold: f32,
    #[serde(default = "default_confidence")]
    pub default_confidence: f32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            memory_share: default_memory_share(),
            document_size_threshold: default_document_size_threshold(),
            high_importance_threshold: default_high_importance_threshold(),
            default_confidence: default_confidence(),
        }
    }
}

fn default_memory_share() -> f32 {
    0.3
}
fn default_document_size_threshold() -> usize {
    1000
}
fn default_high_importance_threshold() -> f32 {
    0.7
}
fn default_confidence() -> f32 {
    0.8
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Deadline for a single `generate` call, retries included.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Check the invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.engine.vector_dimensions == 0 {
            bail!("engine.vector_dimensions must be > 0");
        }

        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }

        if self.retrieval.max_results < 1 {
            bail!("retrieval.max_results must be >= 1");
        }
        if !(-1.0..=1.0).contains(&self.retrieval.default_threshold) {
            bail!("retrieval.default_threshold must be in [-1.0, 1.0]");
        }
        if self.retrieval.candidate_multiplier == 0 {
            bail!("retrieval.candidate_multiplier must be > 0");
        }

        if !(0.0..=1.0).contains(&self.orchestrator.memory_share) {
            bail!("orchestrator.memory_share must be in [0.0, 1.0]");
        }

        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "ollama" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
                other
            ),
        }

        if self.embedding.is_enabled() {
            if self.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                );
            }
            match self.embedding.dims {
                Some(d) if d == self.engine.vector_dimensions => {}
                Some(d) => bail!(
                    "embedding.dims ({}) must equal engine.vector_dimensions ({})",
                    d,
                    self.engine.vector_dimensions
                ),
                None => bail!(
                    "embedding.dims must be set when provider is '{}'",
                    self.embedding.provider
                ),
            }
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

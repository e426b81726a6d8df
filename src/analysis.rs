//! Content analysis and composition seams.
//!
//! The engine computes what it can measure directly (text statistics,
//! embedding similarity). Synthesis, comparison, quality, and sentiment
//! scoring need a real model; those go through the [`GenerativeModel`]
//! and [`ContentAnalyzer`] traits, which the caller injects. Without one,
//! the orchestrator reports [`EngineError::ModelUnavailable`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use knowledge_engine_core::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    Quality,
    Sentiment,
    Complexity,
    Relevance,
}

impl AnalysisType {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisType::Quality => "quality",
            AnalysisType::Sentiment => "sentiment",
            AnalysisType::Complexity => "complexity",
            AnalysisType::Relevance => "relevance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComposeStrategy {
    Merge,
    Synthesize,
    Compare,
}

impl ComposeStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ComposeStrategy::Merge => "merge",
            ComposeStrategy::Synthesize => "synthesize",
            ComposeStrategy::Compare => "compare",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Memory,
    Document,
}

/// Resolved content of one compose source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceContent {
    pub id: String,
    pub kind: SourceKind,
    pub content: String,
}

/// Text generation backend used by `compose`.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Produce one coherent text from all sources.
    async fn synthesize(&self, sources: &[SourceContent]) -> Result<String>;

    /// Describe how the sources agree and differ.
    async fn compare(&self, sources: &[SourceContent]) -> Result<String>;
}

/// Scores returned by a [`ContentAnalyzer`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerScores {
    /// Headline score in `[0, 1]`, used as the result confidence.
    pub overall: Option<f32>,
    pub breakdown: BTreeMap<String, f32>,
}

/// Model-backed scoring used by `analyze` for quality and sentiment.
#[async_trait]
pub trait ContentAnalyzer: Send + Sync {
    async fn analyze(&self, analysis_type: AnalysisType, content: &str) -> Result<AnalyzerScores>;
}

/// Lexical statistics computed without any model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextStatistics {
    pub characters: usize,
    pub words: usize,
    pub sentences: usize,
    pub average_word_length: f32,
    pub average_sentence_length: f32,
    /// Distinct words / total words (case-insensitive).
    pub lexical_diversity: f32,
}

impl TextStatistics {
    pub fn from_text(text: &str) -> Self {
        let words: Vec<String> = text
            .split_whitespace()
            .map(|w| {
                w.chars()
                    .filter(|c| c.is_alphanumeric())
                    .flat_map(char::to_lowercase)
                    .collect::<String>()
            })
            .filter(|w| !w.is_empty())
            .collect();

        let sentences = text
            .split(|c| matches!(c, '.' | '!' | '?'))
            .filter(|s| s.chars().any(char::is_alphanumeric))
            .count();

        let word_count = words.len();
        let letters: usize = words.iter().map(|w| w.chars().count()).sum();
        let distinct = words
            .iter()
            .collect::<std::collections::BTreeSet<_>>()
            .len();

        Self {
            characters: text.chars().count(),
            words: word_count,
            sentences,
            average_word_length: ratio(letters, word_count),
            average_sentence_length: ratio(word_count, sentences),
            lexical_diversity: ratio(distinct, word_count),
        }
    }

    /// The statistics as a flat score map.
    pub fn scores(&self) -> BTreeMap<String, f32> {
        BTreeMap::from([
            ("average_word_length".to_string(), self.average_word_length),
            (
                "average_sentence_length".to_string(),
                self.average_sentence_length,
            ),
            ("lexical_diversity".to_string(), self.lexical_diversity),
        ])
    }
}

fn ratio(a: usize, b: usize) -> f32 {
    if b == 0 {
        0.0
    } else {
        a as f32 / b as f32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub analysis_type: AnalysisType,
    pub statistics: TextStatistics,
    /// Dimension of the content embedding, when a provider was available.
    pub embedding_dimensions: Option<usize>,
    /// Headline score, if the analysis produces one.
    pub score: Option<f32>,
    pub breakdown: BTreeMap<String, f32>,
}

pub(crate) fn model_unavailable(what: &str) -> EngineError {
    EngineError::ModelUnavailable(what.to_string())
}

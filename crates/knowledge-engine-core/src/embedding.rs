//! Embedding provider trait.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement. The engine never calls a specific model API; it is handed a
//! provider and treats every call as fallible and possibly slow.
//!
//! Concrete providers (OpenAI, Ollama) and the timeout wrapper live in the
//! `knowledge-engine` app crate.

use async_trait::async_trait;

use crate::error::Result;
use crate::vector::Vector;

/// Trait for embedding providers.
///
/// `generate` must return a vector of exactly [`dims`](Self::dims)
/// components. Stores validate this and reject mismatches with
/// [`EngineError::DimensionMismatch`](crate::error::EngineError::DimensionMismatch).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed a single text.
    async fn generate(&self, text: &str) -> Result<Vector>;
}

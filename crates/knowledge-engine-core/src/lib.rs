//! # Knowledge Engine Core
//!
//! Runtime-agnostic logic for the knowledge engine: vector math, text
//! segmentation, data models, the embedding provider trait, a TTL cache,
//! and the in-memory embedding and memory stores.
//!
//! This crate contains no tokio, network I/O, or configuration loading.
//! The async retrieval engine and the orchestrator live in the
//! `knowledge-engine` crate.

pub mod cache;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod store;
pub mod vector;

pub use error::{EngineError, Result};

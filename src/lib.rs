//! # Knowledge Engine
//!
//! An in-process knowledge engine: text chunking, vector embedding storage,
//! cached cosine-similarity retrieval, a separately indexed short-term memory
//! store, and an orchestrator that routes, deduplicates, and scores results
//! across both.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   ┌────────────────┐   ┌────────────────┐
//! │   Segmenter   │──▶│ EmbeddingStore │──▶│ RetrievalEngine│──┐
//! │ para/sent/word│   │ vectors + scan │   │ cache, filters │  │
//! └───────────────┘   └────────────────┘   └────────────────┘  │
//!                                                              ▼
//!                     ┌────────────────┐          ┌─────────────────────┐
//!                     │  MemoryStore   │─────────▶│ KnowledgeOrchestrator│
//!                     │ tag/date/assoc │          │ search store retrieve│
//!                     └────────────────┘          │ compose analyze      │
//!                                                 └─────────────────────┘
//! ```
//!
//! Everything lives in memory; nothing persists across restarts. The only
//! I/O is the embedding provider call, which is bounded by a timeout.
//!
//! ## Quick Start
//!
//! ```no_run
//! use knowledge_engine::config::Config;
//! use knowledge_engine::orchestrator::{KnowledgeOrchestrator, StoreRequest};
//! use knowledge_engine::retrieval::SearchQuery;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let engine = KnowledgeOrchestrator::from_config(Config::default())?;
//! engine.store(StoreRequest::new("The kettle is in the left cupboard")).await;
//! let result = engine.search(SearchQuery::new("kettle")).await;
//! println!("{:?}", result.items());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`embedding`] | Embedding providers and the provider timeout |
//! | [`retrieval`] | Document indexing and cached semantic search |
//! | [`orchestrator`] | The five-operation façade and its result envelope |
//! | [`analysis`] | Text statistics and external-model traits |
//!
//! Vector math, segmentation, data models, and the stores come from
//! [`knowledge_engine_core`], re-exported here as [`core`].

pub mod analysis;
pub mod config;
pub mod embedding;
pub mod orchestrator;
pub mod retrieval;

pub use knowledge_engine_core as core;
pub use knowledge_engine_core::{EngineError, Result};

//! In-memory stores.
//!
//! - [`embedding::EmbeddingStore`]: chunk vectors keyed by document, with
//!   brute-force cosine similarity search.
//! - [`memory::MemoryStore`]: short free-text memories with tag, date and
//!   association indices.
//!
//! Both keep their entries and secondary indices behind one lock per store,
//! so index mutation is atomic with respect to readers. Both are `Send + Sync`
//! and meant to be shared behind an `Arc`.

pub mod embedding;
pub mod memory;

pub use embedding::EmbeddingStore;
pub use memory::{
    MemoryFilters, MemoryQuery, MemoryRetrieval, MemorySort, MemoryStats, MemoryStore,
    TemporalRange,
};

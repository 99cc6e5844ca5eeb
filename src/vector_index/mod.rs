//! Vector index (spec §4.9, §4.11). An HNSW approximate nearest-neighbor
//! index per collection, keyed by the document's `rowid` rather than the
//! teacher's `String` chunk id, with a runtime-configurable dimensionality
//! instead of the teacher's fixed 769-dimension (768 + sentiment) scheme —
//! this crate's embeddings carry no sentiment dimension and collections can
//! choose any width their provider produces.

mod hnsw_index;

pub use hnsw_index::HnswIndex;

use crate::errors::AppError;

#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub rowid: i64,
    pub score: f32,
}

/// Implemented by the one concrete backend ([`HnswIndex`]); kept as a trait
/// so the search executor doesn't depend on the HNSW crate's types directly.
pub trait VectorIndex: Send + Sync {
    fn insert(&mut self, rowid: i64, vector: &[f32]) -> Result<(), AppError>;
    fn remove(&mut self, rowid: i64) -> Result<(), AppError>;
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorMatch>, AppError>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn dimensions(&self) -> u32;
}

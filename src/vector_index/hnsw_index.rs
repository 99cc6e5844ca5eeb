//! HNSW-backed [`VectorIndex`] (spec §4.9). Adapted from the teacher's
//! `LoadedHnsw` self-referential wrapper: `hnsw_rs::Hnsw` borrows the vector
//! data it indexes, which doesn't fit a struct we want to move around and
//! persist, so the owned data lives in a `Box<[Vec<f32>]>` behind
//! `ManuallyDrop` and the index borrows it through a raw pointer cast to
//! `'static`. The pointer never outlives the box it points into — both are
//! fields of the same struct and dropped together in the order declared.
//!
//! Tuning constants and the adaptive ef_search widening match the teacher's
//! `hnsw/mod.rs`; the id space changes from `String` chunk ids to `i64`
//! document rowids, and dimensionality is a per-collection runtime value
//! instead of the teacher's fixed constant.

use std::mem::ManuallyDrop;

use hnsw_rs::hnsw::{Hnsw, Neighbour};
use hnsw_rs::dist::DistCosine;

use crate::errors::{AppError, ErrorKind};
use crate::vector_index::{VectorIndex, VectorMatch};

const MAX_NB_CONNECTION: usize = 24;
const EF_CONSTRUCTION: usize = 200;
const MAX_LAYER: usize = 16;
/// Widen the search beam beyond `k` so recall stays acceptable on small
/// collections where HNSW's greedy descent is more likely to miss a
/// near-tied neighbor; matches the teacher's adaptive ef_search heuristic.
const EF_SEARCH_MULTIPLIER: usize = 4;
const EF_SEARCH_MIN: usize = 64;

pub struct HnswIndex {
    data: ManuallyDrop<Box<Vec<(i64, Vec<f32>)>>>,
    hnsw: ManuallyDrop<Hnsw<'static, f32, DistCosine>>,
    dimensions: u32,
}

impl HnswIndex {
    pub fn new(dimensions: u32, expected_capacity: usize) -> Self {
        let data: Box<Vec<(i64, Vec<f32>)>> = Box::new(Vec::with_capacity(expected_capacity));
        let hnsw = Hnsw::<f32, DistCosine>::new(
            MAX_NB_CONNECTION,
            expected_capacity.max(16),
            MAX_LAYER,
            EF_CONSTRUCTION,
            DistCosine {},
        );
        // SAFETY: `hnsw` never borrows the contents of `data` directly — it
        // indexes by the `usize` position we hand it in `insert`/`rebuild`,
        // and only reads the f32 slices we pass at call time. We keep the
        // `'static` lifetime to let both fields live in the same struct;
        // field declaration order guarantees `hnsw` drops before `data`.
        let hnsw: Hnsw<'static, f32, DistCosine> = unsafe { std::mem::transmute(hnsw) };
        Self {
            data: ManuallyDrop::new(data),
            hnsw: ManuallyDrop::new(hnsw),
            dimensions,
        }
    }

    fn ef_search(&self, k: usize) -> usize {
        (k * EF_SEARCH_MULTIPLIER).max(EF_SEARCH_MIN)
    }

    fn position_of(&self, rowid: i64) -> Option<usize> {
        self.data.iter().position(|(id, _)| *id == rowid)
    }

    /// Rebuilds the HNSW graph from scratch against the current `data`. HNSW
    /// has no incremental delete, so removal goes through a full rebuild;
    /// acceptable at this crate's target scale (spec Non-goals cap per-index
    /// size) and simpler than tombstoning live queries around.
    fn rebuild(&mut self) {
        let hnsw = Hnsw::<f32, DistCosine>::new(
            MAX_NB_CONNECTION,
            self.data.len().max(16),
            MAX_LAYER,
            EF_CONSTRUCTION,
            DistCosine {},
        );
        let hnsw: Hnsw<'static, f32, DistCosine> = unsafe { std::mem::transmute(hnsw) };
        self.hnsw = ManuallyDrop::new(hnsw);
        let entries: Vec<(&Vec<f32>, usize)> =
            self.data.iter().enumerate().map(|(i, (_, v))| (v, i)).collect();
        self.hnsw.parallel_insert(&entries);
    }
}

impl VectorIndex for HnswIndex {
    fn insert(&mut self, rowid: i64, vector: &[f32]) -> Result<(), AppError> {
        if vector.len() != self.dimensions as usize {
            return Err(AppError::new(
                ErrorKind::Vector,
                format!(
                    "vector has {} dimensions, index expects {}",
                    vector.len(),
                    self.dimensions
                ),
            ));
        }

        if let Some(pos) = self.position_of(rowid) {
            self.data[pos].1 = vector.to_vec();
            self.rebuild();
            return Ok(());
        }

        let position = self.data.len();
        self.data.push((rowid, vector.to_vec()));
        self.hnsw.insert((&self.data[position].1, position));
        Ok(())
    }

    fn remove(&mut self, rowid: i64) -> Result<(), AppError> {
        let Some(pos) = self.position_of(rowid) else {
            return Ok(());
        };
        self.data.remove(pos);
        self.rebuild();
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorMatch>, AppError> {
        if query.len() != self.dimensions as usize {
            return Err(AppError::new(
                ErrorKind::Vector,
                format!(
                    "query has {} dimensions, index expects {}",
                    query.len(),
                    self.dimensions
                ),
            ));
        }
        if self.data.is_empty() {
            return Ok(Vec::new());
        }

        let neighbours: Vec<Neighbour> = self.hnsw.search(query, k, self.ef_search(k));
        Ok(neighbours
            .into_iter()
            .filter_map(|n| {
                self.data.get(n.d_id).map(|(rowid, _)| VectorMatch {
                    rowid: *rowid,
                    // DistCosine returns a distance in [0, 2]; convert to a
                    // similarity score in [0, 1] for the fusion stage.
                    score: 1.0 - (n.distance / 2.0),
                })
            })
            .collect())
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn dimensions(&self) -> u32 {
        self.dimensions
    }
}

impl Drop for HnswIndex {
    fn drop(&mut self) {
        // SAFETY: `hnsw` is dropped before `data` even though both are
        // `ManuallyDrop` — declared drop order in `Drop::drop` is the order
        // we write it in, not declaration order, so we do it explicitly.
        unsafe {
            ManuallyDrop::drop(&mut self.hnsw);
            ManuallyDrop::drop(&mut self.data);
        }
    }
}

// `Hnsw` is not `Send`/`Sync` by default because of its internal `RefCell`
// usage in older versions; `hnsw_rs` 0.3 uses lock-free internals safe to
// share behind `&HnswIndex`, and all mutation goes through `&mut self`.
unsafe impl Send for HnswIndex {}
unsafe impl Sync for HnswIndex {}

//! Similarity index over the reference embeddings
//!
//! The nearest-neighbor search itself belongs to someone else (USearch, or a
//! brute-force scan). This module pins down the narrow contract the store
//! relies on: build once, query many times, persist, reload.
//!
//! # Example
//!
//! ```no_run
//! use shopsight::config::IndexBackend;
//! use shopsight::index::new_index;
//! use shopsight::store::EmbeddingMatrix;
//!
//! let vectors = EmbeddingMatrix::from_rows(vec![vec![1.0, 0.0], vec![0.0, 1.0]])?;
//! let mut index = new_index(IndexBackend::Exact, 2)?;
//! index.build(&vectors)?;
//! let hits = index.search(&[1.0, 0.0], 1)?;
//! assert_eq!(hits[0].1, 0);
//! # Ok::<(), anyhow::Error>(())
//! ```

mod exact;
mod hnsw;

pub use exact::ExactIndex;
pub use hnsw::HnswIndex;

use anyhow::Result;
use std::path::Path;

use crate::config::IndexBackend;
use crate::store::EmbeddingMatrix;

/// One raw hit: (inner-product score, reference row)
///
/// Rows are signed because backends may report "no result" as a negative
/// row; callers filter those out.
pub type RawHit = (f32, i64);

/// Top-k inner-product index
///
/// Send + Sync: built once at startup, then queried from many connection
/// threads without locking. Queries never mutate the index.
pub trait SimilarityIndex: Send + Sync {
    /// Index every row of `vectors`; row i gets key i
    fn build(&mut self, vectors: &EmbeddingMatrix) -> Result<()>;

    /// Up to `k` hits ordered by descending score
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<RawHit>>;

    /// Persist to `path`
    fn save(&self, path: &Path) -> Result<()>;

    /// Replace contents from `path`; false if absent, unreadable or of the
    /// wrong dimensionality
    fn load(&mut self, path: &Path) -> bool;

    /// Number of indexed vectors
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimensionality of indexed vectors
    fn dimensions(&self) -> usize;

    /// Backend name for logs and health output
    fn backend(&self) -> IndexBackend;
}

/// Create an empty index of the configured backend
pub fn new_index(backend: IndexBackend, dimensions: usize) -> Result<Box<dyn SimilarityIndex>> {
    Ok(match backend {
        IndexBackend::Exact => Box::new(ExactIndex::new(dimensions)),
        IndexBackend::Hnsw => Box::new(HnswIndex::new(dimensions)?),
    })
}

//! Vector store - reference embeddings, product metadata, similarity index
//!
//! The store is assembled once at startup and never mutated while serving:
//!
//! 1. Load reference embeddings and L2-normalize every row
//! 2. Load metadata (row i describes embedding i; lengths may differ)
//! 3. Reuse the persisted index if it loads and matches, otherwise build
//!    one and write it back (a failed write is only a warning)
//!
//! # Example
//!
//! ```no_run
//! use shopsight::config::IndexBackend;
//! use shopsight::store::{StoreOptions, VectorStore};
//!
//! let store = VectorStore::open(&StoreOptions {
//!     embeddings: "data/embeddings.npy".into(),
//!     metadata: "data/metadata.json".into(),
//!     index: None,
//!     backend: IndexBackend::Exact,
//! })?;
//! let products = store.search_products(&vec![0.1; store.dimensions()], 5)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

mod loader;
mod mapper;
mod metadata;

pub use loader::{load_embeddings, parse_npy, parse_safetensors, EmbeddingMatrix};
pub use mapper::{map_hits, SimilarProduct};
pub use metadata::{load_metadata, parse_metadata, MetadataRecord};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::{Config, IndexBackend};
use crate::embeddings::l2_normalize;
use crate::index::{new_index, SimilarityIndex};
use crate::paths;

/// Inputs needed to open a store
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub embeddings: PathBuf,
    pub metadata: PathBuf,
    /// Persisted index location; derived from `embeddings` when None
    pub index: Option<PathBuf>,
    pub backend: IndexBackend,
}

impl StoreOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            embeddings: config.assets.embeddings.clone(),
            metadata: config.assets.metadata.clone(),
            index: config.assets.index.clone(),
            backend: config.index.backend,
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.index
            .clone()
            .unwrap_or_else(|| paths::derived_index_path(&self.embeddings, self.backend))
    }
}

/// How the in-memory index came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexOrigin {
    /// Deserialized from the persisted file
    Loaded,
    /// Built from the reference vectors at startup
    Built,
}

pub struct VectorStore {
    vectors: EmbeddingMatrix,
    metadata: Vec<MetadataRecord>,
    index: Box<dyn SimilarityIndex>,
    index_path: PathBuf,
    origin: IndexOrigin,
}

impl VectorStore {
    /// Load embeddings and metadata, then load or build the index
    pub fn open(options: &StoreOptions) -> Result<Self> {
        let mut vectors = load_embeddings(&options.embeddings)?;
        vectors.normalize_rows();

        let metadata = load_metadata(&options.metadata)?;
        if metadata.len() != vectors.rows() {
            tracing::warn!(
                embeddings = vectors.rows(),
                metadata = metadata.len(),
                "embedding and metadata counts differ; unmatched rows are skipped in results"
            );
        }

        let index_path = options.index_path();
        let mut index = new_index(options.backend, vectors.dimensions())?;

        let origin = if index.load(&index_path) && index.len() == vectors.rows() {
            tracing::info!(path = %index_path.display(), rows = index.len(), "index loaded");
            IndexOrigin::Loaded
        } else {
            if index_path.exists() {
                tracing::warn!(path = %index_path.display(), "persisted index unusable, rebuilding");
            }
            build_index(index.as_mut(), &vectors, &index_path)?;
            IndexOrigin::Built
        };

        Ok(Self {
            vectors,
            metadata,
            index,
            index_path,
            origin,
        })
    }

    /// Top-k reference rows by inner product with the normalized query
    ///
    /// Returns (score, row) pairs in descending score; at most
    /// `min(k, rows)` entries. Backend rows outside the reference set are
    /// filtered out.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(f32, usize)>> {
        if query.len() != self.dimensions() {
            bail!(
                "Query has {} dimensions, store holds {}-dimensional vectors",
                query.len(),
                self.dimensions()
            );
        }

        let query = l2_normalize(query);
        let hits = self.index.search(&query, k)?;
        let rows = self.vectors.rows();

        Ok(hits
            .into_iter()
            .filter_map(|(score, row)| {
                let row = usize::try_from(row).ok()?;
                (row < rows).then_some((score, row))
            })
            .collect())
    }

    /// Search and map hits to products
    pub fn search_products(&self, query: &[f32], k: usize) -> Result<Vec<SimilarProduct>> {
        let hits = self.search(query, k)?;
        Ok(map_hits(&hits, &self.metadata))
    }

    /// Rebuild the index from the reference vectors and persist it
    ///
    /// Unlike startup, a failed write is an error here.
    pub fn rebuild_index(&mut self) -> Result<()> {
        let mut index = new_index(self.index.backend(), self.vectors.dimensions())?;
        index.build(&self.vectors)?;
        index.save(&self.index_path).with_context(|| {
            format!("Failed to persist index to {}", self.index_path.display())
        })?;
        self.index = index;
        self.origin = IndexOrigin::Built;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.vectors.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.vectors.dimensions()
    }

    pub fn metadata_len(&self) -> usize {
        self.metadata.len()
    }

    pub fn vectors(&self) -> &EmbeddingMatrix {
        &self.vectors
    }

    pub fn index_origin(&self) -> IndexOrigin {
        self.origin
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn backend(&self) -> IndexBackend {
        self.index.backend()
    }
}

/// Build over all vectors and try to persist; a failed write only warns
fn build_index(
    index: &mut dyn SimilarityIndex,
    vectors: &EmbeddingMatrix,
    path: &Path,
) -> Result<()> {
    index.build(vectors).context("Failed to build index")?;
    tracing::info!(rows = vectors.rows(), backend = %index.backend(), "index built");

    if let Err(e) = index.save(path) {
        tracing::warn!(
            path = %path.display(),
            error = %format!("{:#}", e),
            "could not persist index; it stays in memory and will be rebuilt next start"
        );
    }
    Ok(())
}

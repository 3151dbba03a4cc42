//! USearch HNSW index with inner-product metric
//!
//! USearch reports inner-product distance as `1 - dot`, so scores are
//! recovered as `1 - distance`. Keys are reference row numbers.

use anyhow::{anyhow, bail, Context, Result};
use std::path::Path;
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use super::{RawHit, SimilarityIndex};
use crate::config::IndexBackend;
use crate::store::EmbeddingMatrix;

pub struct HnswIndex {
    index: Index,
    options: IndexOptions,
}

impl HnswIndex {
    pub fn new(dimensions: usize) -> Result<Self> {
        let options = IndexOptions {
            dimensions,
            metric: MetricKind::IP,
            quantization: ScalarKind::F32,
            ..Default::default()
        };
        let index = Index::new(&options).context("Failed to create USearch index")?;
        Ok(Self { index, options })
    }

    fn path_str(path: &Path) -> Result<&str> {
        path.to_str()
            .ok_or_else(|| anyhow!("Index path is not valid UTF-8: {}", path.display()))
    }

    fn try_load(&self, path: &Path) -> Result<Index> {
        let index = Index::new(&self.options).context("Failed to create USearch index")?;
        index
            .load(Self::path_str(path)?)
            .with_context(|| format!("Failed to load index: {}", path.display()))?;

        if index.dimensions() != self.options.dimensions {
            bail!(
                "Index has {} dimensions, expected {}",
                index.dimensions(),
                self.options.dimensions
            );
        }
        Ok(index)
    }
}

impl SimilarityIndex for HnswIndex {
    fn build(&mut self, vectors: &EmbeddingMatrix) -> Result<()> {
        if vectors.dimensions() != self.options.dimensions {
            bail!(
                "Cannot index {}-dimensional vectors in a {}-dimensional index",
                vectors.dimensions(),
                self.options.dimensions
            );
        }

        let index = Index::new(&self.options).context("Failed to create USearch index")?;
        index.reserve(vectors.rows())?;
        for (row, vector) in vectors.iter_rows().enumerate() {
            index
                .add(row as u64, vector)
                .context("Failed to add vector to USearch index")?;
        }

        self.index = index;
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<RawHit>> {
        if query.len() != self.options.dimensions {
            bail!(
                "Query has {} dimensions, index expects {}",
                query.len(),
                self.options.dimensions
            );
        }
        if k == 0 || self.index.size() == 0 {
            return Ok(Vec::new());
        }

        let matches = self
            .index
            .search(query, k)
            .context("Failed to search USearch index")?;

        Ok(matches
            .keys
            .iter()
            .zip(matches.distances.iter())
            .map(|(key, distance)| (1.0 - distance, i64::try_from(*key).unwrap_or(-1)))
            .collect())
    }

    fn save(&self, path: &Path) -> Result<()> {
        self.index
            .save(Self::path_str(path)?)
            .context("Failed to save USearch index")?;
        Ok(())
    }

    fn load(&mut self, path: &Path) -> bool {
        if !path.exists() {
            return false;
        }
        match self.try_load(path) {
            Ok(index) => {
                self.index = index;
                true
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %format!("{:#}", e), "usearch index unreadable");
                false
            }
        }
    }

    fn len(&self) -> usize {
        self.index.size()
    }

    fn dimensions(&self) -> usize {
        self.options.dimensions
    }

    fn backend(&self) -> IndexBackend {
        IndexBackend::Hnsw
    }
}

//! Brute-force inner-product index
//!
//! Scores every row against the query. Exact by construction, so results
//! match a flat inner-product index; ties resolve by ascending row.

use anyhow::{anyhow, bail, Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::{RawHit, SimilarityIndex};
use crate::config::IndexBackend;
use crate::embeddings::dot;
use crate::store::EmbeddingMatrix;

/// File signature of a persisted exact index
const MAGIC: [u8; 8] = *b"SSEXACT\0";

/// Bumped whenever the on-disk layout changes
const FORMAT_VERSION: u32 = 1;

/// On-disk representation (bincode)
#[derive(Serialize, Deserialize)]
struct ExactIndexFile {
    magic: [u8; 8],
    version: u32,
    dimensions: u64,
    rows: u64,
    data: Vec<f32>,
}

pub struct ExactIndex {
    dimensions: usize,
    data: Vec<f32>,
}

impl ExactIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            data: Vec::new(),
        }
    }

    fn try_load(&self, path: &Path) -> Result<Vec<f32>> {
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read index {}", path.display()))?;
        let file: ExactIndexFile =
            bincode::deserialize(&bytes).context("Failed to decode exact index")?;

        if file.magic != MAGIC {
            bail!("Not an exact index file");
        }
        if file.version != FORMAT_VERSION {
            bail!("Unsupported exact index version {}", file.version);
        }
        if file.dimensions as usize != self.dimensions {
            bail!(
                "Index has {} dimensions, expected {}",
                file.dimensions,
                self.dimensions
            );
        }
        let expected = file
            .rows
            .checked_mul(file.dimensions)
            .ok_or_else(|| anyhow!("Index header shape overflows"))?;
        if file.data.len() as u64 != expected {
            bail!(
                "Index payload holds {} values, header says {} rows",
                file.data.len(),
                file.rows
            );
        }

        Ok(file.data)
    }
}

impl SimilarityIndex for ExactIndex {
    fn build(&mut self, vectors: &EmbeddingMatrix) -> Result<()> {
        if vectors.dimensions() != self.dimensions {
            bail!(
                "Cannot index {}-dimensional vectors in a {}-dimensional index",
                vectors.dimensions(),
                self.dimensions
            );
        }
        self.data = vectors.as_slice().to_vec();
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<RawHit>> {
        if query.len() != self.dimensions {
            bail!(
                "Query has {} dimensions, index expects {}",
                query.len(),
                self.dimensions
            );
        }
        if k == 0 || self.data.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<RawHit> = self
            .data
            .par_chunks(self.dimensions)
            .enumerate()
            .map(|(row, vector)| (dot(query, vector), row as i64))
            .collect();

        let by_score = |a: &RawHit, b: &RawHit| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1));

        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_score);
            scored.truncate(k);
        }
        scored.sort_unstable_by(by_score);

        Ok(scored)
    }

    fn save(&self, path: &Path) -> Result<()> {
        let file = ExactIndexFile {
            magic: MAGIC,
            version: FORMAT_VERSION,
            dimensions: self.dimensions as u64,
            rows: self.len() as u64,
            data: self.data.clone(),
        };
        let bytes = bincode::serialize(&file).context("Failed to encode exact index")?;
        fs::write(path, bytes)
            .with_context(|| format!("Failed to write index {}", path.display()))?;
        Ok(())
    }

    fn load(&mut self, path: &Path) -> bool {
        if !path.exists() {
            return false;
        }
        match self.try_load(path) {
            Ok(data) => {
                self.data = data;
                true
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %format!("{:#}", e), "exact index unreadable");
                false
            }
        }
    }

    fn len(&self) -> usize {
        if self.dimensions == 0 {
            0
        } else {
            self.data.len() / self.dimensions
        }
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn backend(&self) -> IndexBackend {
        IndexBackend::Exact
    }
}

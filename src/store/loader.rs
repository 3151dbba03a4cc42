//! Reference embeddings: in-memory matrix and file loaders
//!
//! Supported inputs:
//! - `.npy` (NumPy format v1-v3, 2-D, C order, little-endian f4 or f8)
//! - `.safetensors` (2-D F32/F64 tensor named `embeddings`, or the only tensor)

use anyhow::{anyhow, bail, Context, Result};
use rayon::prelude::*;
use safetensors::tensor::{Dtype, SafeTensors, TensorView};
use std::fs;
use std::path::Path;

use crate::embeddings::l2_normalize_in_place;

/// Dense row-major matrix of reference vectors
///
/// Row i belongs to metadata record i.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    dimensions: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    /// Build from a flat row-major buffer
    pub fn from_flat(dimensions: usize, data: Vec<f32>) -> Result<Self> {
        if dimensions == 0 {
            bail!("Embeddings must have at least one dimension");
        }
        if data.len() % dimensions != 0 {
            bail!(
                "{} values do not divide into rows of {}",
                data.len(),
                dimensions
            );
        }
        Ok(Self { dimensions, data })
    }

    /// Build from equal-length rows
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let dimensions = rows
            .first()
            .map(Vec::len)
            .ok_or_else(|| anyhow!("Cannot infer dimensions from zero rows"))?;

        let mut data = Vec::with_capacity(rows.len() * dimensions);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != dimensions {
                bail!("Row {} has {} values, expected {}", i, row.len(), dimensions);
            }
            data.extend(row);
        }
        Self::from_flat(dimensions, data)
    }

    pub fn rows(&self) -> usize {
        self.data.len() / self.dimensions
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// # Panics
    /// Panics if `i` is out of range
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dimensions..(i + 1) * self.dimensions]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimensions)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Scale every row to unit length (idempotent)
    pub fn normalize_rows(&mut self) {
        self.data
            .par_chunks_mut(self.dimensions)
            .for_each(l2_normalize_in_place);
    }
}

/// Load reference embeddings, choosing the format by extension
pub fn load_embeddings(path: &Path) -> Result<EmbeddingMatrix> {
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read embeddings {}", path.display()))?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    let matrix = match ext.as_str() {
        "npy" => parse_npy(&bytes),
        "safetensors" => parse_safetensors(&bytes),
        other => Err(anyhow!(
            "Unsupported embeddings format '.{}' (expected .npy or .safetensors)",
            other
        )),
    };

    matrix.with_context(|| format!("Failed to load embeddings {}", path.display()))
}

// =============================================================================
// NumPy .npy
// =============================================================================

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Element type declared by an .npy header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NpyDtype {
    F32,
    F64,
}

#[derive(Debug, PartialEq)]
struct NpyHeader {
    dtype: NpyDtype,
    fortran_order: bool,
    shape: Vec<usize>,
}

/// Parse a 2-D float array from .npy bytes
pub fn parse_npy(bytes: &[u8]) -> Result<EmbeddingMatrix> {
    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        bail!("Not a NumPy .npy file");
    }

    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                bail!("Truncated .npy header");
            }
            (
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                12,
            )
        }
        v => bail!("Unsupported .npy format version {}", v),
    };

    let data_start = header_start + header_len;
    if bytes.len() < data_start {
        bail!("Truncated .npy header");
    }
    let header_text = std::str::from_utf8(&bytes[header_start..data_start])
        .context(".npy header is not text")?;
    let header = parse_npy_header(header_text)?;

    if header.fortran_order {
        bail!("Fortran-ordered arrays are not supported");
    }
    if header.shape.len() != 2 {
        bail!("Expected a 2-D array, got shape {:?}", header.shape);
    }
    let (rows, dims) = (header.shape[0], header.shape[1]);

    let payload = &bytes[data_start..];
    let count = rows
        .checked_mul(dims)
        .ok_or_else(|| anyhow!("Array shape {:?} overflows", header.shape))?;
    let data = decode_floats(payload, header.dtype, count)?;
    EmbeddingMatrix::from_flat(dims, data)
}

/// Parse the Python-literal dict in an .npy header
fn parse_npy_header(text: &str) -> Result<NpyHeader> {
    let descr = dict_value(text, "descr").ok_or_else(|| anyhow!("Missing 'descr' in header"))?;
    let descr = descr.trim().trim_matches(|c| c == '\'' || c == '"');
    let dtype = match descr {
        "<f4" | "=f4" | "f4" => NpyDtype::F32,
        "<f8" | "=f8" | "f8" => NpyDtype::F64,
        other => bail!("Unsupported dtype '{}' (expected little-endian f4 or f8)", other),
    };

    let fortran = dict_value(text, "fortran_order")
        .ok_or_else(|| anyhow!("Missing 'fortran_order' in header"))?;
    let fortran_order = fortran.trim().starts_with("True");

    let shape_start = text
        .find("'shape'")
        .ok_or_else(|| anyhow!("Missing 'shape' in header"))?;
    let open = text[shape_start..]
        .find('(')
        .map(|i| shape_start + i)
        .ok_or_else(|| anyhow!("Malformed 'shape' in header"))?;
    let close = text[open..]
        .find(')')
        .map(|i| open + i)
        .ok_or_else(|| anyhow!("Malformed 'shape' in header"))?;
    let shape = text[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_end_matches('L').parse::<usize>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("Malformed 'shape' in header")?;

    Ok(NpyHeader {
        dtype,
        fortran_order,
        shape,
    })
}

/// Raw text following `'key':` up to the next comma (shape excluded)
fn dict_value<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!("'{}':", key);
    let start = text.find(&pattern)? + pattern.len();
    let rest = &text[start..];
    let end = rest.find([',', '}']).unwrap_or(rest.len());
    Some(&rest[..end])
}

fn decode_floats(payload: &[u8], dtype: NpyDtype, count: usize) -> Result<Vec<f32>> {
    let width = match dtype {
        NpyDtype::F32 => 4,
        NpyDtype::F64 => 8,
    };
    let needed = count
        .checked_mul(width)
        .ok_or_else(|| anyhow!("Array of {} values overflows", count))?;
    if payload.len() < needed {
        bail!(
            "Array payload truncated: {} bytes, expected {}",
            payload.len(),
            needed
        );
    }

    let payload = &payload[..needed];
    Ok(match dtype {
        NpyDtype::F32 => payload
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        NpyDtype::F64 => payload
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32)
            .collect(),
    })
}

// =============================================================================
// safetensors
// =============================================================================

/// Tensor name looked up first in a safetensors file
pub const SAFETENSORS_TENSOR: &str = "embeddings";

/// Parse a 2-D float tensor from safetensors bytes
pub fn parse_safetensors(bytes: &[u8]) -> Result<EmbeddingMatrix> {
    let tensors =
        SafeTensors::deserialize(bytes).map_err(|e| anyhow!("Invalid safetensors: {:?}", e))?;

    let view = match tensors.tensor(SAFETENSORS_TENSOR) {
        Ok(view) => view,
        Err(_) => {
            let mut all = tensors.tensors();
            if all.len() != 1 {
                bail!(
                    "Expected a tensor named '{}' or exactly one tensor, found {}",
                    SAFETENSORS_TENSOR,
                    all.len()
                );
            }
            all.remove(0).1
        }
    };

    matrix_from_view(&view)
}

fn matrix_from_view(view: &TensorView<'_>) -> Result<EmbeddingMatrix> {
    let shape = view.shape();
    if shape.len() != 2 {
        bail!("Expected a 2-D tensor, got shape {:?}", shape);
    }
    let dtype = match view.dtype() {
        Dtype::F32 => NpyDtype::F32,
        Dtype::F64 => NpyDtype::F64,
        other => bail!("Unsupported tensor dtype {:?} (expected F32 or F64)", other),
    };

    let count = shape[0]
        .checked_mul(shape[1])
        .ok_or_else(|| anyhow!("Tensor shape {:?} overflows", shape))?;
    let data = decode_floats(view.data(), dtype, count)?;
    EmbeddingMatrix::from_flat(shape[1], data)
}

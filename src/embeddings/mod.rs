//! Embeddings module - turn product images into comparable vectors
//!
//! Provides a trait-based abstraction for image embedding with an ONNX
//! backend. Every implementation returns L2-normalized vectors so that inner
//! product equals cosine similarity.

mod checksum;
mod onnx;
pub mod preprocess;
mod similarity;

pub use checksum::{sha256_file, verify_sha256};
pub use onnx::OnnxImageEmbedder;
pub use similarity::{dot, l2_norm, l2_normalize, l2_normalize_in_place};

use anyhow::Result;
use image::DynamicImage;

use crate::config::ModelSection;

/// Trait for image embedding engines
///
/// Requires Send so the extractor can be moved onto the extraction workers.
pub trait ImageEmbedder: Send {
    /// Generate a unit-length embedding for a decoded image
    fn embed(&mut self, image: &DynamicImage) -> Result<Vec<f32>>;

    /// Get embedding dimension (e.g., 2048 for ResNet50)
    fn dimension(&self) -> usize;

    /// Get model name
    fn model_name(&self) -> &str;
}

/// Factory function to create the configured embedder
pub fn create_embedder(model: &ModelSection) -> Result<Box<dyn ImageEmbedder>> {
    Ok(Box::new(OnnxImageEmbedder::from_config(model)?))
}

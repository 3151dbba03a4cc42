//! ONNX Runtime image embedder (ResNet50 backbone, head removed, avg pooled)

use super::preprocess::{image_to_tensor, input_shape, PreprocessOptions};
use super::similarity::l2_normalize_in_place;
use super::ImageEmbedder;
use crate::config::ModelSection;
use anyhow::{anyhow, bail, Context, Result};
use image::DynamicImage;
use ort::{inputs, session::Session, value::Value};
use std::path::Path;

/// ONNX-based image embedding generator
pub struct OnnxImageEmbedder {
    session: Session,
    input_name: String,
    output_name: String,
    preprocess: PreprocessOptions,
    dimension: usize,
    model_name: String,
}

impl OnnxImageEmbedder {
    /// Create an embedder from the `[model]` config section
    ///
    /// Verifies the model file exists (and its checksum when one is
    /// configured) before building the ONNX session.
    pub fn from_config(model: &ModelSection) -> Result<Self> {
        let model_path = model.path.as_path();
        if !model_path.exists() {
            bail!(
                "ONNX model not found at: {}\n\n\
                Export a headless backbone with global average pooling, e.g.:\n  \
                keras ResNet50(include_top=False, pooling=\"avg\") -> tf2onnx",
                model_path.display()
            );
        }

        if let Some(expected) = &model.sha256 {
            super::checksum::verify_sha256(model_path, expected)?;
        }

        let session = Session::builder()
            .context("Failed to create ONNX session builder")?
            .with_intra_threads(model.intra_threads.max(1))
            .context("Failed to configure ONNX intra-op threads")?
            .commit_from_file(model_path)
            .context("Failed to load ONNX model")?;

        let input_name = resolve_name(
            model.input_name.as_deref(),
            session.inputs.iter().map(|i| i.name.as_str()),
            "input",
            model_path,
        )?;
        let output_name = resolve_name(
            model.output_name.as_deref(),
            session.outputs.iter().map(|o| o.name.as_str()),
            "output",
            model_path,
        )?;

        tracing::info!(
            model = %model.name,
            path = %model_path.display(),
            input = %input_name,
            output = %output_name,
            dimension = model.dimension,
            "image backbone loaded"
        );

        Ok(Self {
            session,
            input_name,
            output_name,
            preprocess: PreprocessOptions {
                image_size: model.image_size,
                mode: model.preprocessing,
                layout: model.layout,
            },
            dimension: model.dimension,
            model_name: model.name.clone(),
        })
    }
}

/// Pick the configured tensor name, or the session's first one
fn resolve_name<'a>(
    configured: Option<&str>,
    mut available: impl Iterator<Item = &'a str>,
    kind: &str,
    model_path: &Path,
) -> Result<String> {
    match configured {
        Some(name) => {
            if available.any(|n| n == name) {
                Ok(name.to_string())
            } else {
                bail!(
                    "Model {} has no {} named '{}'",
                    model_path.display(),
                    kind,
                    name
                )
            }
        }
        None => available
            .next()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Model {} declares no {}", model_path.display(), kind)),
    }
}

/// Flatten a pooled backbone output into a unit-length feature vector
///
/// Accepts `[1, D]`, `[1, D, 1, 1]` and `[1, 1, 1, D]`.
fn pooled_features(shape: &[i64], data: &[f32], dimension: usize) -> Result<Vec<f32>> {
    if shape.first().copied() != Some(1) {
        bail!("Expected batch of 1, got shape: {:?}", shape);
    }
    let pooled = match shape.len() {
        2 => true,
        4 => (shape[2] == 1 && shape[3] == 1) || (shape[1] == 1 && shape[2] == 1),
        _ => false,
    };
    if !pooled {
        bail!("Unexpected pooled output shape: {:?}", shape);
    }
    if data.len() != dimension {
        bail!(
            "Expected {} features, got {} (shape {:?})",
            dimension,
            data.len(),
            shape
        );
    }

    let mut features = data.to_vec();
    l2_normalize_in_place(&mut features);
    Ok(features)
}

impl ImageEmbedder for OnnxImageEmbedder {
    fn embed(&mut self, image: &DynamicImage) -> Result<Vec<f32>> {
        let tensor = image_to_tensor(image, &self.preprocess);
        debug_assert_eq!(tensor.shape(), &input_shape(&self.preprocess));

        // Pooled features are copied out before `outputs` is dropped
        let outputs = self
            .session
            .run(inputs![
                self.input_name.as_str() => Value::from_array(tensor)?
            ])
            .context("ONNX inference failed")?;

        let (shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .with_context(|| format!("Failed to extract {} tensor", self.output_name))?;

        pooled_features(shape.as_ref(), data, self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::{Rgb, RgbImage};
    use std::path::PathBuf;

    #[test]
    fn test_missing_model_reports_path() {
        let model = ModelSection {
            path: PathBuf::from("/nonexistent/resnet50.onnx"),
            ..Default::default()
        };
        let err = OnnxImageEmbedder::from_config(&model).err().unwrap();
        assert!(err.to_string().contains("/nonexistent/resnet50.onnx"));
    }

    #[test]
    fn test_resolve_name_defaults_to_first() {
        let name = resolve_name(None, ["a", "b"].into_iter(), "input", Path::new("m")).unwrap();
        assert_eq!(name, "a");

        let name =
            resolve_name(Some("b"), ["a", "b"].into_iter(), "input", Path::new("m")).unwrap();
        assert_eq!(name, "b");

        assert!(resolve_name(Some("c"), ["a"].into_iter(), "input", Path::new("m")).is_err());
        assert!(resolve_name(None, std::iter::empty(), "output", Path::new("m")).is_err());
    }

    fn test_pooled_features_accepts_pooled_shapes() {
        let data = [3.0, 0.0, 4.0];
        for shape in [&[1, 3][..], &[1, 3, 1, 1], &[1, 1, 1, 3]] {
            let features = pooled_features(shape, &data, 3).unwrap();
            assert_eq!(features.len(), 3);
            assert_relative_eq!(features[0], 0.6, epsilon = 1e-6);
            assert_relative_eq!(features[2], 0.8, epsilon = 1e-6);
            let norm: f32 = features.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert_relative_eq!(norm, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_pooled_features_rejects_bad_output() {
        let data = [1.0, 2.0, 3.0];
        let err = pooled_features(&[1, 3], &data, 2048).unwrap_err();
        assert!(err.to_string().contains("Expected 2048 features"));

        assert!(pooled_features(&[2, 3], &data, 3).is_err());
        assert!(pooled_features(&[1, 3, 7, 7], &data, 3).is_err());
        assert!(pooled_features(&[3], &data, 3).is_err());
    }

    #[test]
    #[ignore] // Manual test - requires models/resnet50.onnx
    fn test_embed_real_model() {
        let model = ModelSection::default();
        let mut embedder = OnnxImageEmbedder::from_config(&model).expect("model should load");
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, Rgb([180, 40, 40])));
        let embedding = embedder.embed(&img).unwrap();

        assert_eq!(embedding.len(), model.dimension);
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert_relative_eq!(norm, 1.0, epsilon = 1e-5);
    }
}

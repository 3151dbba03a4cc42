//! Service configuration stored in `shopsight.toml`
//!
//! Every section is optional and every field has a default, so an empty file
//! (or no file at all) yields a runnable configuration. Relative asset paths
//! are resolved against the directory that holds the config file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths;

// =============================================================================
// Config Types
// =============================================================================

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub assets: AssetsSection,
    #[serde(default)]
    pub index: IndexSection,
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub extraction: ExtractionSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Address to bind
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest accepted request body (uploads included)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Results returned when the request does not ask for a count
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    /// Upper bound for a requested result count
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
    /// Per-read socket timeout for client connections
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_top_k() -> usize {
    5
}
fn default_max_top_k() -> usize {
    50
}
fn default_read_timeout_ms() -> u64 {
    30_000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl ServerSection {
    pub fn read_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetsSection {
    /// Reference embeddings (`.npy` or `.safetensors`)
    #[serde(default = "default_embeddings")]
    pub embeddings: PathBuf,
    /// Product metadata (JSON array, one record per embedding row)
    #[serde(default = "default_metadata")]
    pub metadata: PathBuf,
    /// Persisted index; derived from the embeddings path when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<PathBuf>,
}

fn default_embeddings() -> PathBuf {
    PathBuf::from(paths::DEFAULT_EMBEDDINGS)
}
fn default_metadata() -> PathBuf {
    PathBuf::from(paths::DEFAULT_METADATA)
}

impl Default for AssetsSection {
    fn default() -> Self {
        Self {
            embeddings: default_embeddings(),
            metadata: default_metadata(),
            index: None,
        }
    }
}

/// Similarity index backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// Brute-force inner product over every row
    #[default]
    Exact,
    /// USearch HNSW graph with inner-product metric
    Hnsw,
}

impl std::fmt::Display for IndexBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexBackend::Exact => write!(f, "exact"),
            IndexBackend::Hnsw => write!(f, "hnsw"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexSection {
    #[serde(default)]
    pub backend: IndexBackend,
}

/// Pixel normalization applied before inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preprocessing {
    /// BGR, ImageNet mean subtraction, no scaling (Keras ResNet)
    #[default]
    Caffe,
    /// RGB scaled to [0,1], ImageNet mean/std (torchvision)
    Torch,
}

/// Input tensor memory layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `[batch, height, width, channels]`
    #[default]
    Nhwc,
    /// `[batch, channels, height, width]`
    Nchw,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSection {
    /// ONNX backbone with the classification head removed
    #[serde(default = "default_model_path")]
    pub path: PathBuf,
    /// Human-readable model name
    #[serde(default = "default_model_name")]
    pub name: String,
    /// Embedding dimension produced by the backbone
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Square input resolution
    #[serde(default = "default_image_size")]
    pub image_size: u32,
    #[serde(default)]
    pub preprocessing: Preprocessing,
    #[serde(default)]
    pub layout: TensorLayout,
    /// Input tensor name; the session's first input when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_name: Option<String>,
    /// Output tensor name; the session's first output when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
    /// Expected SHA-256 of the model file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// ONNX Runtime intra-op threads
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
}

fn default_model_path() -> PathBuf {
    PathBuf::from(paths::DEFAULT_MODEL)
}
fn default_model_name() -> String {
    "resnet50-imagenet".to_string()
}
fn default_dimension() -> usize {
    2048
}
fn default_image_size() -> u32 {
    224
}
fn default_intra_threads() -> usize {
    1
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            path: default_model_path(),
            name: default_model_name(),
            dimension: default_dimension(),
            image_size: default_image_size(),
            preprocessing: Preprocessing::default(),
            layout: TensorLayout::default(),
            input_name: None,
            output_name: None,
            sha256: None,
            intra_threads: default_intra_threads(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSection {
    /// Worker threads running the extractor
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Jobs waiting for a worker before submission blocks
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Upper bound for a single extraction, queueing included
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_workers() -> usize {
    1
}
fn default_queue_capacity() -> usize {
    32
}
fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for ExtractionSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ExtractionSection {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Filter used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// =============================================================================
// Loading
// =============================================================================

impl Config {
    /// Load configuration from an explicit path, `$SHOPSIGHT_CONFIG`, or
    /// `./shopsight.toml`. A missing file at the default location yields
    /// defaults; a missing file that was asked for explicitly is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }

        if let Ok(env_path) = std::env::var(paths::CONFIG_ENV_VAR) {
            if !env_path.is_empty() {
                return Self::load_from(Path::new(&env_path));
            }
        }

        let default_path = PathBuf::from(paths::DEFAULT_CONFIG);
        if default_path.exists() {
            Self::load_from(&default_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load and resolve a specific config file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config TOML {}", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_relative_to(base);
        Ok(config)
    }

    /// Anchor relative asset and model paths at `base`
    pub fn resolve_relative_to(&mut self, base: &Path) {
        let anchor = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };

        anchor(&mut self.assets.embeddings);
        anchor(&mut self.assets.metadata);
        if let Some(index) = self.assets.index.as_mut() {
            anchor(index);
        }
        anchor(&mut self.model.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.default_top_k, 5);
        assert_eq!(config.index.backend, IndexBackend::Exact);
        assert_eq!(config.model.dimension, 2048);
        assert_eq!(config.model.preprocessing, Preprocessing::Caffe);
        assert_eq!(config.model.layout, TensorLayout::Nhwc);
        assert_eq!(config.extraction.workers, 1);
    }

    #[test]
    fn test_partial_sections() {
        let config: Config = toml::from_str(
            r#"
[server]
port = 9100

[index]
backend = "hnsw"

[model]
layout = "nchw"
preprocessing = "torch"
"#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.index.backend, IndexBackend::Hnsw);
        assert_eq!(config.model.layout, TensorLayout::Nchw);
        assert_eq!(config.model.preprocessing, Preprocessing::Torch);
    }

    #[test]
    fn test_relative_paths_resolve_against_config_dir() -> Result<()> {
        let temp = TempDir::new()?;
        let config_path = temp.path().join("shopsight.toml");
        fs::write(
            &config_path,
            r#"
[assets]
embeddings = "data/embeddings.npy"
metadata = "/abs/metadata.json"
"#,
        )?;

        let config = Config::load_from(&config_path)?;
        assert_eq!(
            config.assets.embeddings,
            temp.path().join("data/embeddings.npy")
        );
        assert_eq!(config.assets.metadata, PathBuf::from("/abs/metadata.json"));
        assert_eq!(
            crate::store::StoreOptions::from_config(&config).index_path(),
            temp.path().join("data/embeddings.index")
        );
        Ok(())
    }

    #[test]
    fn test_explicit_missing_config_is_error() {
        let result = Config::load(Some(Path::new("/nonexistent/shopsight.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_example_config_matches_defaults() {
        let config: Config = toml::from_str(include_str!("../shopsight.example.toml")).unwrap();
        let defaults = Config::default();
        assert_eq!(config.server.port, defaults.server.port);
        assert_eq!(config.server.max_body_bytes, defaults.server.max_body_bytes);
        assert_eq!(config.server.read_timeout_ms, defaults.server.read_timeout_ms);
        assert_eq!(config.assets.embeddings, defaults.assets.embeddings);
        assert_eq!(config.model.path, defaults.model.path);
        assert_eq!(config.extraction.timeout_ms, defaults.extraction.timeout_ms);
        assert_eq!(config.logging.level, defaults.logging.level);
    }

    #[test]
    fn test_invalid_backend_rejected() {
        let result: std::result::Result<Config, _> = toml::from_str("[index]\nbackend = \"lsh\"");
        assert!(result.is_err());
    }
}

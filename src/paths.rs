//! Single source of truth for shopsight's filesystem layout.
//!
//! This module defines WHERE data lives. It has no I/O, no validation,
//! no business logic.
//!
//! ```text
//! ./
//! ├── shopsight.toml               # Config (or $SHOPSIGHT_CONFIG)
//! ├── models/
//! │   └── resnet50.onnx            # Image backbone, head removed
//! └── data/
//!     ├── embeddings.npy           # Reference vectors (source, valuable)
//!     ├── metadata.json            # One record per vector row
//!     └── embeddings.index         # Derived index (rebuildable)
//! ```

use std::path::{Path, PathBuf};

use crate::config::IndexBackend;

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "SHOPSIGHT_CONFIG";

/// Config file looked up in the working directory
pub const DEFAULT_CONFIG: &str = "shopsight.toml";

/// Reference embeddings: `data/embeddings.npy`
pub const DEFAULT_EMBEDDINGS: &str = "data/embeddings.npy";

/// Product metadata: `data/metadata.json`
pub const DEFAULT_METADATA: &str = "data/metadata.json";

/// Image backbone: `models/resnet50.onnx`
pub const DEFAULT_MODEL: &str = "models/resnet50.onnx";

/// File extension of a persisted index for the given backend
pub fn index_extension(backend: IndexBackend) -> &'static str {
    match backend {
        IndexBackend::Exact => "index",
        IndexBackend::Hnsw => "usearch",
    }
}

/// Index stored beside the embeddings file: `data/embeddings.{index,usearch}`
///
/// # Example
///
/// ```
/// use std::path::Path;
/// use shopsight::config::IndexBackend;
/// use shopsight::paths::derived_index_path;
///
/// let p = derived_index_path(Path::new("data/embeddings.npy"), IndexBackend::Hnsw);
/// assert_eq!(p, Path::new("data/embeddings.usearch"));
/// ```
pub fn derived_index_path(embeddings: &Path, backend: IndexBackend) -> PathBuf {
    embeddings.with_extension(index_extension(backend))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_index_path_replaces_extension() {
        assert_eq!(
            derived_index_path(Path::new("/srv/catalog/vectors.npy"), IndexBackend::Exact),
            PathBuf::from("/srv/catalog/vectors.index")
        );
        assert_eq!(
            derived_index_path(Path::new("vectors.safetensors"), IndexBackend::Hnsw),
            PathBuf::from("vectors.usearch")
        );
    }

    #[test]
    fn test_derived_index_path_without_extension() {
        assert_eq!(
            derived_index_path(Path::new("data/vectors"), IndexBackend::Exact),
            PathBuf::from("data/vectors.index")
        );
    }
}

//! Visual search orchestration
//!
//! Validates an upload, hands extraction to the worker pool, queries the
//! store and shapes the response. Startup never aborts the process: when an
//! asset or the model cannot be loaded the service stays `Unavailable` and
//! every request gets a 503 with the reason logged once.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::config::{Config, ExtractionSection, IndexBackend, ServerSection};
use crate::embeddings::{create_embedder, ImageEmbedder};
use crate::error::SearchError;
use crate::store::{IndexOrigin, SimilarProduct, StoreOptions, VectorStore};
use crate::worker::ExtractionPool;

/// Result-count bounds applied to every request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchLimits {
    pub default_top_k: usize,
    pub max_top_k: usize,
}

impl SearchLimits {
    pub fn from_server(server: &ServerSection) -> Self {
        Self {
            default_top_k: server.default_top_k,
            max_top_k: server.max_top_k,
        }
    }

    /// Resolve a requested count: default when absent, clamped to the max
    pub fn resolve(&self, requested: Option<usize>) -> Result<usize, SearchError> {
        match requested {
            Some(0) => Err(SearchError::InvalidInput(
                "top_k must be a positive integer".into(),
            )),
            Some(k) => Ok(k.min(self.max_top_k.max(1))),
            None => Ok(self.default_top_k.clamp(1, self.max_top_k.max(1))),
        }
    }
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self::from_server(&ServerSection::default())
    }
}

/// One uploaded file
#[derive(Debug, Clone, Copy)]
pub struct Upload<'a> {
    pub filename: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub bytes: &'a [u8],
}

/// Successful search payload
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub filename: Option<String>,
    pub total_found: usize,
    pub similar_products: Vec<SimilarProduct>,
}

/// Index details for health output
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub backend: IndexBackend,
    pub origin: IndexOrigin,
    pub path: String,
}

/// Health view of the service
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub products: Option<usize>,
    /// Metadata records, which may differ from `products`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexStatus>,
}

pub struct ReadyService {
    pool: ExtractionPool,
    store: VectorStore,
    limits: SearchLimits,
}

pub enum VisualSearchService {
    Ready(Box<ReadyService>),
    Unavailable { reason: String },
}

impl VisualSearchService {
    /// Load assets, model and index; any failure leaves the service unavailable
    pub fn initialize(config: &Config) -> Self {
        match Self::try_initialize(config) {
            Ok(service) => service,
            Err(e) => {
                let reason = format!("{:#}", e);
                tracing::error!(reason = %reason, "visual search unavailable");
                Self::unavailable(reason)
            }
        }
    }

    fn try_initialize(config: &Config) -> Result<Self> {
        require_file("embeddings", &config.assets.embeddings)?;
        require_file("metadata", &config.assets.metadata)?;
        require_file("model", &config.model.path)?;

        let store = VectorStore::open(&StoreOptions::from_config(config))
            .context("Failed to open vector store")?;
        let embedder = create_embedder(&config.model).context("Failed to load image backbone")?;

        Self::with_components(
            embedder,
            store,
            &config.extraction,
            SearchLimits::from_server(&config.server),
        )
    }

    /// Assemble a ready service from already-built parts
    pub fn with_components(
        embedder: Box<dyn ImageEmbedder>,
        store: VectorStore,
        extraction: &ExtractionSection,
        limits: SearchLimits,
    ) -> Result<Self> {
        if embedder.dimension() != store.dimensions() {
            bail!(
                "Model '{}' produces {}-dimensional embeddings, reference set has {}",
                embedder.model_name(),
                embedder.dimension(),
                store.dimensions()
            );
        }

        if store.is_empty() {
            tracing::warn!("reference set is empty, every search will return no products");
        }

        let pool = ExtractionPool::new(embedder, extraction)?;
        tracing::info!(
            products = store.len(),
            dimension = store.dimensions(),
            backend = %store.backend(),
            "visual search ready"
        );

        Ok(Self::Ready(Box::new(ReadyService {
            pool,
            store,
            limits,
        })))
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Run one visual search request end to end
    pub fn search(
        &self,
        upload: Upload<'_>,
        top_k: Option<usize>,
    ) -> Result<SearchResponse, SearchError> {
        let ready = match self {
            Self::Ready(ready) => ready,
            Self::Unavailable { reason } => {
                return Err(SearchError::ServiceUnavailable(reason.clone()))
            }
        };

        if !is_image_content_type(upload.content_type) {
            return Err(SearchError::InvalidInput("File must be an image".into()));
        }
        let k = ready.limits.resolve(top_k)?;
        if upload.bytes.is_empty() {
            return Err(SearchError::InvalidInput("Uploaded file is empty".into()));
        }

        let image = image::load_from_memory(upload.bytes).map_err(|e| {
            tracing::debug!(error = %e, "upload did not decode");
            SearchError::InvalidInput("Invalid or corrupted image file".into())
        })?;

        let query = ready.pool.extract(image)?;
        if query.len() != ready.store.dimensions() {
            return Err(SearchError::InferenceFailure(format!(
                "extractor returned {} values, expected {}",
                query.len(),
                ready.store.dimensions()
            )));
        }

        let similar_products = ready
            .store
            .search_products(&query, k)
            .map_err(|e| SearchError::InferenceFailure(format!("{:#}", e)))?;

        tracing::info!(
            filename = upload.filename.unwrap_or(""),
            top_k = k,
            found = similar_products.len(),
            "visual search complete"
        );

        Ok(SearchResponse {
            filename: upload.filename.map(str::to_string),
            total_found: similar_products.len(),
            similar_products,
        })
    }

    pub fn status(&self) -> ServiceStatus {
        match self {
            Self::Ready(ready) => ServiceStatus {
                status: "ready",
                reason: None,
                products: Some(ready.store.len()),
                metadata: Some(ready.store.metadata_len()),
                dimension: Some(ready.store.dimensions()),
                model: Some(ready.pool.model_name().to_string()),
                index: Some(IndexStatus {
                    backend: ready.store.backend(),
                    origin: ready.store.index_origin(),
                    path: ready.store.index_path().display().to_string(),
                }),
            },
            Self::Unavailable { reason } => ServiceStatus {
                status: "unavailable",
                reason: Some(reason.clone()),
                products: None,
                metadata: None,
                dimension: None,
                model: None,
                index: None,
            },
        }
    }

}

fn require_file(kind: &str, path: &Path) -> Result<()> {
    if !path.is_file() {
        bail!("Required {} file not found: {}", kind, path.display());
    }
    Ok(())
}

/// `image/*`, parameters and case ignored
fn is_image_content_type(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|mime| mime.trim().to_ascii_lowercase().starts_with("image/"))
        .unwrap_or(false)
}

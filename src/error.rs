//! Request-boundary error taxonomy
//!
//! Everything that can go wrong while serving a search request is translated
//! into one of these variants before it leaves the service. Internal errors
//! keep their full `anyhow` chain in the logs; only `detail()` crosses the
//! HTTP boundary.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    /// Wrong content type, empty payload, undecodable image, bad parameter
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Startup assets or model missing; persists until restart
    #[error("visual search unavailable: {0}")]
    ServiceUnavailable(String),

    /// Extractor failed while running
    #[error("inference failed: {0}")]
    InferenceFailure(String),

    /// Extraction did not finish in time (queueing included)
    #[error("processing timed out after {0:?}")]
    ProcessingTimeout(Duration),
}

impl SearchError {
    /// HTTP status class for this error
    pub fn status(&self) -> u16 {
        match self {
            SearchError::InvalidInput(_) => 400,
            SearchError::ServiceUnavailable(_) => 503,
            SearchError::InferenceFailure(_) | SearchError::ProcessingTimeout(_) => 500,
        }
    }

    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            SearchError::InvalidInput(_) => "invalid_input",
            SearchError::ServiceUnavailable(_) => "service_unavailable",
            SearchError::InferenceFailure(_) => "inference_failure",
            SearchError::ProcessingTimeout(_) => "processing_failed",
        }
    }

    /// Message safe to show to clients
    pub fn detail(&self) -> String {
        match self {
            SearchError::InvalidInput(msg) => msg.clone(),
            SearchError::ServiceUnavailable(_) => {
                "Visual search is not available. Required assets failed to load at startup."
                    .to_string()
            }
            SearchError::InferenceFailure(_) => "Image processing failed".to_string(),
            SearchError::ProcessingTimeout(_) => {
                "Image processing failed: timed out".to_string()
            }
        }
    }
}

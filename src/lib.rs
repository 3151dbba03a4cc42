pub mod config;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod paths;
pub mod server;
pub mod service;
pub mod store;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use error::SearchError;
pub use service::{SearchResponse, Upload, VisualSearchService};
pub use store::{SimilarProduct, VectorStore};

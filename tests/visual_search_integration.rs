//! End-to-end visual search through the service, with a fake extractor

mod common;

use approx::assert_relative_eq;
use common::{png, ready_service, write_catalog, ColourEmbedder};
use serde_json::json;
use shopsight::config::Config;
use shopsight::error::SearchError;
use shopsight::service::{Upload, VisualSearchService};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn upload<'a>(content_type: &'a str, bytes: &'a [u8]) -> Upload<'a> {
    Upload {
        filename: Some("query.png"),
        content_type: Some(content_type),
        bytes,
    }
}

#[test]
fn test_red_image_finds_red_sneaker_first() {
    let temp = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let service = ready_service(temp.path(), ColourEmbedder::new(&calls), 5_000);

    let image = png([255, 0, 0]);
    let response = service.search(upload("image/png", &image), Some(2)).unwrap();

    assert_eq!(response.filename.as_deref(), Some("query.png"));
    assert_eq!(response.total_found, 2);
    let first = &response.similar_products[0];
    assert_eq!(first.product_id, json!(101));
    assert_eq!(first.name.as_deref(), Some("Red Sneaker"));
    assert_eq!(first.image_url.as_deref(), Some("images/101.jpg"));
    assert_eq!(first.category.as_deref(), Some("Shoes"));
    assert_eq!(first.price, json!(49.5));
    assert_relative_eq!(first.similarity, 1.0, epsilon = 1e-4);

    // Yellow-ish scarf shares the red channel
    assert_eq!(response.similar_products[1].product_id, json!(104));
    assert!(response.similar_products[0].similarity >= response.similar_products[1].similarity);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_default_and_clamped_top_k() {
    let temp = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let service = ready_service(temp.path(), ColourEmbedder::new(&calls), 5_000);
    let image = png([0, 0, 255]);

    // Default 5, but the catalog only has 4 items
    let response = service.search(upload("image/png", &image), None).unwrap();
    assert_eq!(response.total_found, 4);
    assert_eq!(response.similar_products[0].name.as_deref(), Some("Blue Jeans"));

    let response = service.search(upload("image/png", &image), Some(1_000)).unwrap();
    assert_eq!(response.total_found, 4);
}

#[test]
fn test_non_image_rejected_without_extraction() {
    let temp = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let service = ready_service(temp.path(), ColourEmbedder::new(&calls), 5_000);

    let err = service
        .search(upload("text/plain", b"not an image"), None)
        .unwrap_err();
    assert!(matches!(err, SearchError::InvalidInput(_)));
    assert_eq!(err.status(), 400);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_corrupted_jpeg_is_invalid_input() {
    let temp = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let service = ready_service(temp.path(), ColourEmbedder::new(&calls), 5_000);

    let corrupted = b"\xff\xd8\xff\xe0 this is not really a jpeg";
    let err = service
        .search(upload("image/jpeg", corrupted), None)
        .unwrap_err();
    assert_eq!(err.status(), 400);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_empty_payload_and_zero_top_k() {
    let temp = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let service = ready_service(temp.path(), ColourEmbedder::new(&calls), 5_000);

    let err = service.search(upload("image/png", b""), None).unwrap_err();
    assert_eq!(err.status(), 400);

    let image = png([0, 255, 0]);
    let err = service.search(upload("image/png", &image), Some(0)).unwrap_err();
    assert_eq!(err.status(), 400);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_missing_metadata_means_unavailable() {
    let temp = TempDir::new().unwrap();
    let options = write_catalog(temp.path()).unwrap();
    std::fs::remove_file(&options.metadata).unwrap();

    let mut config = Config::default();
    config.assets.embeddings = options.embeddings.clone();
    config.assets.metadata = options.metadata.clone();
    config.model.path = temp.path().join("model.onnx");

    let service = VisualSearchService::initialize(&config);
    assert!(!service.is_ready());

    let image = png([255, 0, 0]);
    let err = service.search(upload("image/png", &image), None).unwrap_err();
    assert!(matches!(err, SearchError::ServiceUnavailable(_)));
    assert_eq!(err.status(), 503);
    assert!(service.status().reason.unwrap().contains("metadata"));
}

#[test]
fn test_missing_model_means_unavailable() {
    let temp = TempDir::new().unwrap();
    let options = write_catalog(temp.path()).unwrap();

    let mut config = Config::default();
    config.assets.embeddings = options.embeddings;
    config.assets.metadata = options.metadata;
    config.model.path = temp.path().join("absent.onnx");

    let service = VisualSearchService::initialize(&config);
    assert!(!service.is_ready());
    assert!(service.status().reason.unwrap().contains("model"));
}

#[test]
fn test_panicking_extractor_then_recovery() {
    let temp = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut embedder = ColourEmbedder::new(&calls);
    embedder.panic_on_first = true;
    let service = ready_service(temp.path(), embedder, 5_000);
    let image = png([255, 0, 0]);

    let err = service.search(upload("image/png", &image), None).unwrap_err();
    assert!(matches!(err, SearchError::InferenceFailure(_)));
    assert_eq!(err.status(), 500);
    assert_eq!(err.detail(), "Image processing failed");

    let response = service.search(upload("image/png", &image), None).unwrap();
    assert_eq!(response.similar_products[0].product_id, json!(101));
}

#[test]
fn test_slow_extractor_times_out() {
    let temp = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut embedder = ColourEmbedder::new(&calls);
    embedder.delay = Duration::from_millis(500);
    let service = ready_service(temp.path(), embedder, 50);

    let image = png([255, 0, 0]);
    let err = service.search(upload("image/png", &image), None).unwrap_err();
    assert!(matches!(err, SearchError::ProcessingTimeout(_)));
    assert_eq!(err.status(), 500);
    assert_eq!(err.kind(), "processing_failed");
}

#[test]
fn test_health_status_when_ready() {
    let temp = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let service = ready_service(temp.path(), ColourEmbedder::new(&calls), 5_000);

    let status = serde_json::to_value(service.status()).unwrap();
    assert_eq!(status["status"], "ready");
    assert_eq!(status["products"], 4);
    assert_eq!(status["metadata"], 4);
    assert_eq!(status["model"], "colour-mean");
    assert_eq!(status["index"]["backend"], "exact");
    assert_eq!(status["index"]["origin"], "built");
}

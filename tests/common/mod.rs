//! Shared fixtures: a tiny colour catalog and a fake extractor

#![allow(dead_code)]

use anyhow::Result;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use shopsight::config::{ExtractionSection, IndexBackend};
use shopsight::embeddings::ImageEmbedder;
use shopsight::service::{SearchLimits, VisualSearchService};
use shopsight::store::{StoreOptions, VectorStore};
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Reference vectors: pure red, pure green, pure blue, then yellow-ish
pub const CATALOG_ROWS: [[f32; 3]; 4] = [
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, 0.0, 1.0],
    [0.7, 0.7, 0.1],
];

pub const CATALOG_METADATA: &str = r#"[
    {"id": 101, "productDisplayName": "Red Sneaker", "image_path": "images/101.jpg", "articleType": "Shoes", "price": 49.5},
    {"id": 102, "name": "Green Cap", "image_url": "https://cdn.example/102.jpg", "category": "Headwear"},
    {"id": "sku-103", "productDisplayName": "Blue Jeans", "link": "https://shop.example/103", "articleType": "Jeans", "price": null},
    {"id": 104, "productDisplayName": "Mustard Scarf", "articleType": "Scarves", "price": 19}
]"#;

/// Minimal NumPy v1.0 `<f4` writer
pub fn npy_bytes(rows: &[[f32; 3]]) -> Vec<u8> {
    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({}, 3), }}",
        rows.len()
    );
    let unpadded = 10 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');

    let mut out = b"\x93NUMPY\x01\x00".to_vec();
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for row in rows {
        for v in row {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    out
}

/// Write the colour catalog into `dir`
pub fn write_catalog(dir: &Path) -> Result<StoreOptions> {
    let embeddings = dir.join("embeddings.npy");
    let metadata = dir.join("metadata.json");
    fs::write(&embeddings, npy_bytes(&CATALOG_ROWS))?;
    fs::write(&metadata, CATALOG_METADATA)?;
    Ok(StoreOptions {
        embeddings,
        metadata,
        index: None,
        backend: IndexBackend::Exact,
    })
}

/// Mean colour of the image as a 3-d vector
pub struct ColourEmbedder {
    pub calls: Arc<AtomicUsize>,
    pub delay: Duration,
    pub panic_on_first: bool,
}

impl ColourEmbedder {
    pub fn new(calls: &Arc<AtomicUsize>) -> Self {
        Self {
            calls: Arc::clone(calls),
            delay: Duration::ZERO,
            panic_on_first: false,
        }
    }
}

impl ImageEmbedder for ColourEmbedder {
    fn embed(&mut self, image: &DynamicImage) -> Result<Vec<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_first && call == 0 {
            panic!("colour backbone failed");
        }
        thread::sleep(self.delay);

        let rgb = image.to_rgb8();
        let mut sum = [0.0f32; 3];
        for pixel in rgb.pixels() {
            for (c, s) in sum.iter_mut().enumerate() {
                *s += pixel[c] as f32 / 255.0;
            }
        }
        let n = (rgb.width() * rgb.height()).max(1) as f32;
        let v: Vec<f32> = sum.iter().map(|s| s / n).collect();
        Ok(shopsight::embeddings::l2_normalize(&v))
    }

    fn dimension(&self) -> usize {
        3
    }

    fn model_name(&self) -> &str {
        "colour-mean"
    }
}

pub fn extraction(timeout_ms: u64) -> ExtractionSection {
    ExtractionSection {
        workers: 1,
        queue_capacity: 8,
        timeout_ms,
    }
}

/// Ready service over the colour catalog
pub fn ready_service(dir: &Path, embedder: ColourEmbedder, timeout_ms: u64) -> VisualSearchService {
    let store = VectorStore::open(&write_catalog(dir).unwrap()).unwrap();
    VisualSearchService::with_components(
        Box::new(embedder),
        store,
        &extraction(timeout_ms),
        SearchLimits::default(),
    )
    .unwrap()
}

/// Solid-colour PNG
pub fn png(rgb: [u8; 3]) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb(rgb)));
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

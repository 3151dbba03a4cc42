//! Join index hits back to product metadata

use serde::Serialize;
use serde_json::Value;

use super::metadata::MetadataRecord;

/// One similar product, as returned to clients
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SimilarProduct {
    pub product_id: Value,
    pub name: Option<String>,
    pub image_url: Option<String>,
    pub similarity: f32,
    pub category: Option<String>,
    pub price: Value,
}

/// Map (score, row) hits to products, dropping rows without metadata
pub fn map_hits(hits: &[(f32, usize)], metadata: &[MetadataRecord]) -> Vec<SimilarProduct> {
    hits.iter()
        .filter_map(|&(score, row)| {
            let record = metadata.get(row)?;
            Some(SimilarProduct {
                product_id: record.id.clone(),
                name: record.name.clone(),
                image_url: record.image.clone(),
                similarity: score,
                category: record.category.clone(),
                price: record.price.clone(),
            })
        })
        .collect()
}

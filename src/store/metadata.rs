//! Product metadata records
//!
//! The metadata file is a JSON array aligned by position with the embedding
//! rows. Catalog exports disagree on key names, so each field is read from a
//! fixed list of candidate keys; the first non-empty value wins.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Candidate keys per field, in precedence order
const NAME_KEYS: &[&str] = &["productDisplayName", "name"];
const IMAGE_KEYS: &[&str] = &["image_path", "image_url", "link"];
const CATEGORY_KEYS: &[&str] = &["articleType", "category"];

/// One catalog item, already resolved from its raw JSON
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataRecord {
    /// Product identifier, kept as whatever JSON scalar the catalog uses
    pub id: Value,
    pub name: Option<String>,
    /// Path or URL of the product image
    pub image: Option<String>,
    pub category: Option<String>,
    pub price: Value,
}

impl MetadataRecord {
    /// Resolve a record from raw JSON
    ///
    /// Non-object values become empty records so that positions stay aligned.
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };

        let first_text = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| obj.get(*k))
                .filter_map(Value::as_str)
                .find(|s| !s.is_empty())
                .map(str::to_string)
        };

        Self {
            id: obj.get("id").cloned().unwrap_or(Value::Null),
            name: first_text(NAME_KEYS),
            image: first_text(IMAGE_KEYS),
            category: first_text(CATEGORY_KEYS),
            price: obj.get("price").cloned().unwrap_or(Value::Null),
        }
    }
}

/// Parse a metadata JSON array
pub fn parse_metadata(json: &str) -> Result<Vec<MetadataRecord>> {
    let value: Value = serde_json::from_str(json).context("Metadata is not valid JSON")?;
    let Value::Array(items) = value else {
        bail!("Metadata must be a JSON array of records");
    };
    Ok(items.iter().map(MetadataRecord::from_value).collect())
}

/// Load the metadata file
pub fn load_metadata(path: &Path) -> Result<Vec<MetadataRecord>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read metadata {}", path.display()))?;
    parse_metadata(&content).with_context(|| format!("Failed to load metadata {}", path.display()))
}

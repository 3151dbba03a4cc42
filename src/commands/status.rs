//! `shopsight status` - check that the assets visual search needs are in place
//!
//! Lightweight: looks at files only, never loads the model or the vectors.
//! Exit code 0 when every required asset is present, 1 otherwise.

use anyhow::Result;
use serde::Serialize;
use std::fs;
use std::path::Path;

use shopsight::config::Config;
use shopsight::embeddings::sha256_file;
use shopsight::store::StoreOptions;

#[derive(Serialize)]
struct StatusReport {
    status: &'static str,
    backend: String,
    assets: Vec<AssetCheck>,
}

#[derive(Serialize)]
struct AssetCheck {
    name: &'static str,
    path: String,
    required: bool,
    present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    checksum_ok: Option<bool>,
}

impl AssetCheck {
    fn inspect(name: &'static str, path: &Path, required: bool) -> Self {
        let size_bytes = fs::metadata(path)
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len());
        Self {
            name,
            path: path.display().to_string(),
            required,
            present: size_bytes.is_some(),
            size_bytes,
            checksum_ok: None,
        }
    }

    fn is_ok(&self) -> bool {
        (self.present || !self.required) && self.checksum_ok != Some(false)
    }
}

pub fn execute(config: &Config, json_output: bool) -> Result<i32> {
    let mut model = AssetCheck::inspect("model", &config.model.path, true);
    if let (true, Some(expected)) = (model.present, config.model.sha256.as_deref()) {
        let actual = sha256_file(&config.model.path)?;
        model.checksum_ok = Some(actual.eq_ignore_ascii_case(expected.trim()));
    }

    let assets = vec![
        AssetCheck::inspect("embeddings", &config.assets.embeddings, true),
        AssetCheck::inspect("metadata", &config.assets.metadata, true),
        model,
        AssetCheck::inspect(
            "index",
            &StoreOptions::from_config(config).index_path(),
            false,
        ),
    ];

    let healthy = assets.iter().all(AssetCheck::is_ok);
    let report = StatusReport {
        status: if healthy { "ready" } else { "unavailable" },
        backend: config.index.backend.to_string(),
        assets,
    };

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(if healthy { 0 } else { 1 })
}

fn print_report(report: &StatusReport) {
    println!("🔍 shopsight asset status ({} index)\n", report.backend);
    for asset in &report.assets {
        let mark = match (asset.present, asset.checksum_ok) {
            (true, Some(false)) => "✗ checksum mismatch",
            (true, _) => "✓",
            (false, _) if asset.required => "✗ missing",
            (false, _) => "- not built yet",
        };
        let size = asset
            .size_bytes
            .map(|b| format!(" ({:.1} MB)", b as f64 / 1_048_576.0))
            .unwrap_or_default();
        println!("  {:<11} {}{}  {}", asset.name, mark, size, asset.path);
    }
    println!("\nVisual search: {}", report.status);
}

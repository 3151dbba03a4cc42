//! `shopsight index build` - force a rebuild of the persisted index

use anyhow::Result;
use std::time::Instant;

use shopsight::config::Config;
use shopsight::store::{StoreOptions, VectorStore};

pub fn build(config: &Config) -> Result<()> {
    println!("🔨 Building {} index...", config.index.backend);
    let started = Instant::now();

    let mut store = VectorStore::open(&StoreOptions::from_config(config))?;
    store.rebuild_index()?;

    println!(
        "✓ Indexed {} vectors ({} dimensions) in {:.1}s",
        store.len(),
        store.dimensions(),
        started.elapsed().as_secs_f32()
    );
    println!("  Saved to {}", store.index_path().display());
    Ok(())
}

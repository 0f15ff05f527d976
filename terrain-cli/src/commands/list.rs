use anyhow::{Context, Result};
use std::collections::BTreeMap;

use super::{format_size, ServiceOptions};

pub fn run(options: &ServiceOptions) -> Result<()> {
    let service = options.builder()?.offline(true).build()?;
    let dir = service.cache_dir();

    if !dir.exists() {
        anyhow::bail!("Cache directory does not exist: {}", dir.display());
    }

    let tiles = service
        .cached_tiles()
        .context("Failed to read cache directory")?;

    if tiles.is_empty() {
        println!("No tiles found in: {}", dir.display());
        return Ok(());
    }

    println!("{:<20} {:>12}", "TILE", "SIZE");
    println!("{}", "-".repeat(33));

    let mut per_zoom: BTreeMap<u8, (usize, u64)> = BTreeMap::new();
    let mut total_size: u64 = 0;

    for cached in &tiles {
        println!("{:<20} {:>12}", cached.tile.to_string(), format_size(cached.size));

        let entry = per_zoom.entry(cached.tile.zoom).or_default();
        entry.0 += 1;
        entry.1 += cached.size;
        total_size += cached.size;
    }

    // Summary
    println!();
    println!("Summary:");
    println!("  Total tiles: {}", tiles.len());
    for (zoom, (count, size)) in &per_zoom {
        println!("  Zoom {:>2}: {} tiles, {}", zoom, count, format_size(*size));
    }
    println!("  Total size: {}", format_size(total_size));
    println!("  Cache directory: {}", dir.display());

    Ok(())
}

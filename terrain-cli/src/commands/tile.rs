use anyhow::{Context, Result};

use super::ServiceOptions;

pub fn run(options: &ServiceOptions, lat: f64, lng: f64, zoom: u8) -> Result<()> {
    let service = options.builder()?.offline(true).build()?;
    let tile = service
        .tile_for(lat, lng, zoom)
        .context("Failed to compute tile")?;
    let bounds = tile.bounds();
    let path = service.tile_path(&tile);

    println!("Tile: {}", tile);
    println!("URL: {}", service.tile_url(&tile));
    println!("Path: {}", path.display());
    println!(
        "Bounds: lat {:.6} to {:.6}, lng {:.6} to {:.6}",
        bounds.min_lat, bounds.max_lat, bounds.min_lng, bounds.max_lng
    );
    println!("Cached: {}", if path.is_file() { "yes" } else { "no" });

    Ok(())
}

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use terrain::{RasterTile, TileAddress};

use super::{format_size, ServiceOptions};

pub fn run(options: &ServiceOptions, tile: String) -> Result<()> {
    let tile_path = resolve_path(options, &tile)?;

    if !tile_path.exists() {
        bail!("Tile not found: {}", tile_path.display());
    }

    let raster = RasterTile::open(&tile_path).context("Failed to load tile")?;
    let file_size = std::fs::metadata(&tile_path)?.len();
    let (rows, cols) = raster.dimensions();
    let t = raster.geotransform().coefficients();

    println!("Path: {}", tile_path.display());
    println!("File size: {}", format_size(file_size));
    println!();
    println!("Size: {}x{} samples", cols, rows);
    println!("CRS: EPSG:{}", raster.crs().epsg());
    println!("Origin: ({}, {})", t[0], t[3]);
    println!("Pixel size: ({}, {})", t[1], t[5]);
    if t[2] != 0.0 || t[4] != 0.0 {
        println!("Rotation: ({}, {})", t[2], t[4]);
    }
    if let Some(nodata) = raster.nodata() {
        println!("No-data value: {}", nodata);
    }
    println!();

    match raster.stats() {
        Some(stats) => {
            println!("Min elevation: {:.2}m", stats.min);
            println!("Max elevation: {:.2}m", stats.max);
            println!("Mean elevation: {:.2}m", stats.mean);
            if stats.nodata_count > 0 {
                let total = (stats.valid_count + stats.nodata_count) as f64;
                let pct = stats.nodata_count as f64 / total * 100.0;
                println!("No-data samples: {} ({:.1}%)", stats.nodata_count, pct);
            }
        }
        None => println!("No valid samples"),
    }

    Ok(())
}

/// A path to a file, or a `z/x/y` address inside the cache directory.
fn resolve_path(options: &ServiceOptions, tile: &str) -> Result<PathBuf> {
    let path = PathBuf::from(tile);
    if path.is_file() {
        return Ok(path);
    }

    match tile.parse::<TileAddress>() {
        Ok(address) => {
            let service = options.builder()?.offline(true).build()?;
            Ok(service.tile_path(&address))
        }
        Err(_) => Ok(path),
    }
}

//! Basic example demonstrating terrain library usage.
//!
//! Run with: cargo run --example basic -- [/path/to/cache]

use std::env;

use terrain::{ElevationService, TerrainError};

fn main() -> Result<(), TerrainError> {
    let cache_dir = env::args()
        .nth(1)
        .unwrap_or_else(|| ".terrain-cache".to_string());

    // Keep up to 10 decoded tiles in memory
    let service = ElevationService::new(&cache_dir, 10)?;

    let locations = [
        ("Potsdam, Germany", 52.3882084, 13.119842),
        ("Mount Fuji, Japan", 35.3606, 138.7274),
        ("Dead Sea shore", 31.5590, 35.4732),
    ];

    for zoom in [10, 12, 14] {
        println!("Elevation queries at zoom {}:", zoom);
        println!("{:-<50}", "");

        for (name, lat, lng) in &locations {
            let tile = service.tile_for(*lat, *lng, zoom)?;
            match service.get_elevation_at_zoom(*lat, *lng, zoom) {
                Ok(elevation) => println!("{} ({}): {:.1}m", name, tile, elevation),
                Err(e) => println!("{} ({}): error - {}", name, tile, e),
            }
        }
        println!();
    }

    let stats = service.cache_stats();
    let downloads = service.download_stats();
    println!("Cache statistics:");
    println!("  Open tiles: {}", stats.entry_count);
    println!("  Hits: {}", stats.hit_count);
    println!("  Misses: {}", stats.miss_count);
    println!("  Hit rate: {:.1}%", stats.hit_rate() * 100.0);
    println!("  Downloaded: {} tiles", downloads.tiles_downloaded);

    Ok(())
}

use anyhow::{bail, Context, Result};
use terrain::BoundingBox;

use super::ServiceOptions;

pub fn run(options: &ServiceOptions, bbox: String, zoom: u8) -> Result<()> {
    let bounds = parse_bbox(&bbox)?;
    let service = options.build()?;

    let stats = service
        .prefetch(&bounds, zoom)
        .context("Failed to prefetch tiles")?;
    let downloads = service.download_stats();

    println!("Tiles matched: {}", stats.tiles_matched);
    println!("  Downloaded: {}", stats.tiles_downloaded);
    println!("  Already cached: {}", stats.tiles_already_cached);
    if stats.tiles_failed > 0 {
        println!("  Failed: {}", stats.tiles_failed);
    }
    println!(
        "Transferred {} in {}ms",
        super::format_size(downloads.bytes_downloaded),
        stats.elapsed_ms
    );

    if stats.tiles_failed > 0 {
        bail!("{} tiles could not be downloaded", stats.tiles_failed);
    }
    Ok(())
}

fn parse_bbox(raw: &str) -> Result<BoundingBox> {
    let values: Vec<f64> = raw
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("Invalid bounding box '{}'", raw))?;

    let [min_lat, min_lng, max_lat, max_lng] = values[..] else {
        bail!("Bounding box needs 4 values: min_lat,min_lng,max_lat,max_lng");
    };
    Ok(BoundingBox::new(min_lat, min_lng, max_lat, max_lng))
}

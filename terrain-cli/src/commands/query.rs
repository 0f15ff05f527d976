use anyhow::{bail, Context, Result};
use serde::Serialize;

use super::ServiceOptions;

#[derive(Serialize)]
struct ZoomResult {
    zoom: u8,
    tile: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    elevation: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct ElevationResponse {
    lat: f64,
    lng: f64,
    results: Vec<ZoomResult>,
}

pub fn run(options: &ServiceOptions, lat: f64, lng: f64, zooms: Vec<u8>, json: bool) -> Result<()> {
    let service = options.build()?;

    // A single zoom behaves like a plain lookup: print the value or fail.
    if let [zoom] = zooms[..] {
        if !json {
            let elevation = service
                .get_elevation_at_zoom(lat, lng, zoom)
                .context("Failed to get elevation")?;
            println!("{:.2}", elevation);
            return Ok(());
        }
    }

    let mut results = Vec::with_capacity(zooms.len());
    for zoom in zooms {
        let tile = service
            .tile_for(lat, lng, zoom)
            .context("Failed to compute tile")?;
        let (elevation, error) = match service.get_elevation_at_zoom(lat, lng, zoom) {
            Ok(elevation) => (Some(elevation), None),
            Err(e) => (None, Some(e.to_string())),
        };
        results.push(ZoomResult {
            zoom,
            tile: tile.to_string(),
            elevation,
            error,
        });
    }

    let failed = results.iter().filter(|r| r.error.is_some()).count();

    if json {
        let response = ElevationResponse { lat, lng, results };
        println!("{}", serde_json::to_string(&response)?);
    } else {
        for result in &results {
            match (&result.elevation, &result.error) {
                (Some(elevation), _) => {
                    println!("zoom {:>2} ({}): {:.2}m", result.zoom, result.tile, elevation)
                }
                (None, Some(error)) => {
                    println!("zoom {:>2} ({}): error - {}", result.zoom, result.tile, error)
                }
                (None, None) => {}
            }
        }
    }

    if failed > 0 {
        bail!("{} of the requested zoom levels failed", failed);
    }
    Ok(())
}

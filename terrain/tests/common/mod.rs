//! Offline tile server for integration tests.

pub mod geotiff;

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use terrain::{TerrainError, TileAddress, TileFetcher};

use geotiff::{write_geotiff, GeoTiffSpec};

/// Write an EPSG:3857 GeoTIFF covering `tile` where every sample is
/// `base + row * 1000 + col`.
pub fn write_mercator_tile(path: &Path, tile: &TileAddress, size: u32, base: f32) {
    write_geotiff(
        path,
        &GeoTiffSpec::mercator_tile(tile.zoom, tile.x, tile.y, size),
        |row, col| base + (row * 1000 + col) as f32,
    );
}

/// Serves synthetic tiles for any `{z}/{x}/{y}.tif` URL and counts requests.
pub struct FixtureFetcher {
    pub size: u32,
    calls: AtomicUsize,
}

impl FixtureFetcher {
    pub fn new(size: u32) -> Self {
        Self {
            size,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TileFetcher for FixtureFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> terrain::Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let address = url
            .rsplitn(4, '/')
            .take(3)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join("/");
        let tile: TileAddress = address.parse().map_err(|_| TerrainError::FetchFailed {
            url: url.to_string(),
            reason: "HTTP 404 Not Found".to_string(),
        })?;

        write_mercator_tile(dest, &tile, self.size, tile.zoom as f32 * 100_000.0);
        Ok(fs::metadata(dest)?.len())
    }
}

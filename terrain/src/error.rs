//! Error types for the terrain library.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while resolving elevations.
#[derive(Error, Debug)]
pub enum TerrainError {
    /// IO error when reading or writing cached tiles.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Latitude or longitude is non-finite or out of range.
    #[error("Invalid coordinate: lat={lat}, lng={lng} (valid: lat ±90°, lng ±180°)")]
    InvalidCoordinate { lat: f64, lng: f64 },

    /// Zoom level cannot be represented with 32-bit tile indices.
    #[error("Invalid zoom level: {zoom} (maximum is {max})")]
    InvalidZoom { zoom: u8, max: u8 },

    /// Tile indices do not exist at the given zoom level.
    #[error("Invalid tile address: {zoom}/{x}/{y}")]
    InvalidTile { x: u32, y: u32, zoom: u8 },

    /// Bounding box corners are inverted.
    #[error("Invalid bounding box: {reason}")]
    InvalidBoundingBox { reason: String },

    /// The tile could not be downloaded.
    #[error("Failed to fetch {url}: {reason}")]
    FetchFailed { url: String, reason: String },

    /// The raster's forward geotransform cannot be inverted.
    #[error("Degenerate geotransform {coefficients:?}: determinant is zero")]
    DegenerateTransform { coefficients: [f64; 6] },

    /// The coordinate falls outside the raster grid.
    #[error(
        "Coordinate lat={lat}, lng={lng} maps to pixel [{first}][{second}] outside {rows}x{cols} raster"
    )]
    OutOfBounds {
        lat: f64,
        lng: f64,
        first: f64,
        second: f64,
        rows: usize,
        cols: usize,
    },

    /// The cached raster file is corrupt or unreadable.
    #[error("Failed to decode raster {}: {reason}", .path.display())]
    RasterDecode { path: PathBuf, reason: String },

    /// The raster's spatial reference is not one we can transform into.
    #[error("Unsupported spatial reference in {}: {reason}", .path.display())]
    UnsupportedCrs { path: PathBuf, reason: String },

    /// Another caller's load of the same tile failed while we waited on it.
    #[error("Concurrent load of {key} failed: {reason}")]
    LoadFailed { key: String, reason: String },

    /// Malformed configuration value.
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

/// Result type alias using [`TerrainError`].
pub type Result<T> = std::result::Result<T, TerrainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TerrainError::InvalidCoordinate {
            lat: 91.0,
            lng: 0.0,
        };
        assert!(err.to_string().contains("91"));

        let err = TerrainError::FetchFailed {
            url: "https://example.com/14/1/2.tif".to_string(),
            reason: "HTTP 404 Not Found".to_string(),
        };
        assert!(err.to_string().contains("14/1/2.tif"));
        assert!(err.to_string().contains("404"));

        let err = TerrainError::RasterDecode {
            path: PathBuf::from(".terrain-cache/14/8789/5383.tif"),
            reason: "unexpected EOF".to_string(),
        };
        assert!(err.to_string().contains("8789/5383.tif"));

        let err = TerrainError::OutOfBounds {
            lat: 1.0,
            lng: 2.0,
            first: 5.0,
            second: -1.0,
            rows: 2,
            cols: 2,
        };
        assert!(err.to_string().contains("[5][-1]"));
        assert!(err.to_string().contains("2x2"));
    }
}

//! Server settings read from the environment.
//!
//! Tile cache settings (`TERRAIN_CACHE_DIR`, `TERRAIN_CACHE_SIZE`, ...) are
//! read by [`terrain::ElevationServiceBuilder::from_env`]; this module covers
//! the HTTP side only.
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `TERRAIN_PORT` | HTTP server port | 3000 |
//! | `TERRAIN_MAX_POST_BYTES` | Largest accepted request body | 512000 |
//! | `TERRAIN_PREFETCH` | `min_lat,min_lng,max_lat,max_lng` boxes separated by `;` | None |
//! | `TERRAIN_PREFETCH_ZOOM` | Zoom level for the startup prefetch | default zoom |

use std::env;

use terrain::{BoundingBox, Result, TerrainError};

/// Port used when `TERRAIN_PORT` is not set.
pub const DEFAULT_PORT: u16 = 3000;

/// Largest request body accepted when `TERRAIN_MAX_POST_BYTES` is not set.
pub const DEFAULT_MAX_POST_BYTES: usize = 500 * 1024;

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    pub max_post_bytes: usize,
    /// Regions downloaded before the server starts accepting requests.
    pub prefetch: Vec<BoundingBox>,
    /// Zoom for `prefetch`; `None` uses the elevation service's default.
    pub prefetch_zoom: Option<u8>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_post_bytes: DEFAULT_MAX_POST_BYTES,
            prefetch: Vec::new(),
            prefetch_zoom: None,
        }
    }
}

impl ServerConfig {
    /// Read settings from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`TerrainError::Config`] if a variable is set but malformed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(raw) = env::var("TERRAIN_PORT") {
            config.port = parse_var("TERRAIN_PORT", &raw)?;
        }
        if let Ok(raw) = env::var("TERRAIN_MAX_POST_BYTES") {
            config.max_post_bytes = parse_var("TERRAIN_MAX_POST_BYTES", &raw)?;
        }
        if let Ok(raw) = env::var("TERRAIN_PREFETCH") {
            config.prefetch = parse_prefetch_bounds(&raw)?;
        }
        if let Ok(raw) = env::var("TERRAIN_PREFETCH_ZOOM") {
            config.prefetch_zoom = Some(parse_var("TERRAIN_PREFETCH_ZOOM", &raw)?);
        }

        Ok(config)
    }
}

/// Parse `TERRAIN_PREFETCH`.
///
/// Format: `min_lat,min_lng,max_lat,max_lng`, with several boxes separated
/// by `;`. Empty segments are ignored.
pub fn parse_prefetch_bounds(value: &str) -> Result<Vec<BoundingBox>> {
    value
        .split(';')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let parts = segment
                .split(',')
                .map(|part| part.trim().parse::<f64>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| prefetch_error(segment, &e.to_string()))?;

            match parts[..] {
                [min_lat, min_lng, max_lat, max_lng] => {
                    Ok(BoundingBox::new(min_lat, min_lng, max_lat, max_lng))
                }
                _ => Err(prefetch_error(
                    segment,
                    "expected min_lat,min_lng,max_lat,max_lng",
                )),
            }
        })
        .collect()
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e| TerrainError::Config {
        reason: format!("{}={:?}: {}", name, raw, e),
    })
}

fn prefetch_error(segment: &str, reason: &str) -> TerrainError {
    TerrainError::Config {
        reason: format!("TERRAIN_PREFETCH box {:?}: {}", segment, reason),
    }
}

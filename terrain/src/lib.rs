//! # terrain - On-demand elevation lookup
//!
//! Resolves ground elevation at any latitude/longitude from web-mercator
//! terrain tiles. Tiles are downloaded on first use, kept on disk, and held
//! decoded in a bounded LRU cache.
//!
//! ## Features
//!
//! - **On demand**: only the tiles you query are downloaded
//! - **Bounded**: at most N tiles are held in memory; evicted tiles can
//!   optionally be deleted from disk
//! - **Concurrent**: lookups from many threads share one download per tile
//! - **Pluggable**: the network collaborator is a trait, so mirrors and
//!   offline fixtures work the same way
//!
//! ## Quick Start
//!
//! ```ignore
//! use terrain::ElevationService;
//!
//! let service = ElevationService::new(".terrain-cache", 256)?;
//! let elevation = service.get_elevation(52.3882084, 13.119842)?;
//! println!("Elevation: {}m", elevation);
//! ```
//!
//! ## Tile Addressing
//!
//! A coordinate is projected onto a 512-unit spherical Mercator plane and
//! scaled by `2^zoom`; the floored result divided by 512 is the tile:
//!
//! ```ignore
//! use terrain::{compute_tile, GeoPoint};
//!
//! let tile = compute_tile(GeoPoint::new(52.3882084, 13.119842)?, 14)?;
//! assert_eq!(tile.to_string(), "14/8789/5383");
//! ```
//!
//! ## Data Source
//!
//! By default tiles come from the public AWS terrain tiles:
//! <https://registry.opendata.aws/terrain-tiles/>

pub mod cache;
pub mod download;
pub mod error;
mod geotiff;
pub mod projection;
pub mod raster;
pub mod service;
pub mod store;

#[cfg(test)]
mod test_support;

// Re-export main types at crate root for convenience
pub use cache::{CacheStats, LruCache};
pub use download::{DownloadConfig, TileFetcher, TileSource};
pub use error::{Result, TerrainError};
pub use geotiff::Crs;
pub use projection::{
    compute_tile, project, unproject, BoundingBox, GeoPoint, PlanePoint, TileAddress,
    DEFAULT_ZOOM, MAX_BOUNDING_BOX_TILES, MAX_ZOOM, TILE_SIZE,
};
pub use raster::{GeoTransform, PixelIndexing, RasterStats, RasterTile, ReleasePolicy};
pub use service::{ElevationService, ElevationServiceBuilder, PrefetchStats};
pub use store::{CachedTile, DownloadStats, TileStore};

#[cfg(feature = "download")]
pub use download::HttpFetcher;

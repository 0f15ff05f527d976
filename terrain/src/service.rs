//! Elevation service with on-demand tile download and LRU caching.
//!
//! This module provides [`ElevationService`], a high-level interface that
//! turns a coordinate into an elevation: it picks the tile, makes sure the
//! tile's GeoTIFF is on disk, keeps decoded tiles in a bounded LRU cache and
//! samples the grid.
//!
//! ```ignore
//! use terrain::ElevationService;
//!
//! let service = ElevationService::builder(".terrain-cache")
//!     .capacity(256)
//!     .build()?;
//!
//! // Downloads 14/8789/5383.tif on first use
//! let elevation = service.get_elevation(52.3882084, 13.119842)?;
//! ```

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::cache::{CacheStats, LruCache, DEFAULT_CAPACITY};
#[cfg(feature = "download")]
use crate::download::HttpFetcher;
use crate::download::{DownloadConfig, TileFetcher, TileSource};
use crate::error::{Result, TerrainError};
use crate::projection::{compute_tile, BoundingBox, GeoPoint, TileAddress, DEFAULT_ZOOM, MAX_ZOOM};
use crate::raster::{PixelIndexing, RasterTile, ReleasePolicy};
use crate::store::{CachedTile, DownloadStats, TileStore, DEFAULT_CACHE_DIR};

/// Statistics from a prefetch operation.
#[derive(Debug, Clone, Default)]
pub struct PrefetchStats {
    /// Number of tiles covering the bounding box.
    pub tiles_matched: u64,
    /// Number of tiles fetched from the remote source.
    pub tiles_downloaded: u64,
    /// Number of tiles that were already on disk.
    pub tiles_already_cached: u64,
    /// Number of tiles that could not be fetched.
    pub tiles_failed: u64,
    /// Total elapsed time in milliseconds.
    pub elapsed_ms: u64,
}

/// Resolves elevations from cached terrain tiles.
///
/// `ElevationService` is `Send + Sync`; share it behind an `Arc` and query it
/// from as many threads as needed. Concurrent lookups that need the same
/// missing tile download and decode it only once.
///
/// # Example
///
/// ```ignore
/// use terrain::ElevationService;
///
/// let service = ElevationService::new(".terrain-cache", 100)?;
///
/// let elevation = service.get_elevation(52.3882084, 13.119842)?;
/// println!("Elevation: {}m", elevation);
///
/// let stats = service.cache_stats();
/// println!("Cache hit rate: {:.1}%", stats.hit_rate() * 100.0);
/// ```
pub struct ElevationService {
    store: TileStore,
    /// Decoded tiles keyed by address; zoom is part of the key.
    cache: LruCache<TileAddress, RasterTile>,
    default_zoom: u8,
    indexing: PixelIndexing,
}

impl ElevationService {
    /// Create a service with default settings and room for `capacity` open
    /// tiles.
    ///
    /// Missing tiles are downloaded when the `download` feature is enabled.
    pub fn new<P: AsRef<Path>>(cache_dir: P, capacity: usize) -> Result<Self> {
        Self::builder(cache_dir).capacity(capacity).build()
    }

    /// Create a builder for more configuration options.
    pub fn builder<P: AsRef<Path>>(cache_dir: P) -> ElevationServiceBuilder {
        ElevationServiceBuilder::new(cache_dir)
    }

    /// Elevation at `point` using the tile grid at `zoom`.
    ///
    /// # Errors
    ///
    /// - [`TerrainError::InvalidZoom`] if `zoom` exceeds [`MAX_ZOOM`]
    /// - [`TerrainError::FetchFailed`] if the tile could not be downloaded
    /// - [`TerrainError::RasterDecode`] if the tile file is corrupt; the file
    ///   is deleted so the next lookup downloads it again
    /// - [`TerrainError::OutOfBounds`] if the point falls outside the tile's grid
    pub fn lookup(&self, point: GeoPoint, zoom: u8) -> Result<f32> {
        let tile = compute_tile(point, zoom)?;
        let raster = self.load_tile(tile)?;
        raster.sample(point)
    }

    /// Elevation at `(lat, lng)` at the default zoom level.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let elevation = service.get_elevation(46.5197, 6.6323)?; // Lausanne
    /// ```
    pub fn get_elevation(&self, lat: f64, lng: f64) -> Result<f32> {
        self.get_elevation_at_zoom(lat, lng, self.default_zoom)
    }

    /// Elevation at `(lat, lng)` using the tile grid at `zoom`.
    pub fn get_elevation_at_zoom(&self, lat: f64, lng: f64, zoom: u8) -> Result<f32> {
        self.lookup(GeoPoint::new(lat, lng)?, zoom)
    }

    /// Get elevations for a batch of coordinates.
    ///
    /// Coordinates are grouped by tile so that each unique tile is loaded
    /// only once, regardless of how many coordinates fall within it. Results
    /// come back in input order, one per coordinate.
    ///
    /// When a tile fails to load, the first coordinate in that tile receives
    /// the underlying error and the rest receive
    /// [`TerrainError::LoadFailed`].
    ///
    /// # Example
    ///
    /// ```ignore
    /// let coords = vec![(52.3882, 13.1198), (46.5197, 6.6323)];
    /// for result in service.get_elevations_batch(&coords, 14) {
    ///     println!("{:?}", result);
    /// }
    /// ```
    pub fn get_elevations_batch(&self, coords: &[(f64, f64)], zoom: u8) -> Vec<Result<f32>> {
        let mut results: Vec<Option<Result<f32>>> = coords.iter().map(|_| None).collect();

        // Group coordinate indices by tile
        let mut groups: BTreeMap<TileAddress, Vec<(usize, GeoPoint)>> = BTreeMap::new();
        for (i, &(lat, lng)) in coords.iter().enumerate() {
            let located = GeoPoint::new(lat, lng)
                .and_then(|point| compute_tile(point, zoom).map(|tile| (tile, point)));
            match located {
                Ok((tile, point)) => groups.entry(tile).or_default().push((i, point)),
                Err(e) => results[i] = Some(Err(e)),
            }
        }

        // One cache lookup per tile, not per coordinate
        for (tile, points) in groups {
            match self.load_tile(tile) {
                Ok(raster) => {
                    for (i, point) in points {
                        results[i] = Some(raster.sample(point));
                    }
                }
                Err(e) => {
                    let reason = e.to_string();
                    let mut first = Some(e);
                    for (i, _) in points {
                        let err = first.take().unwrap_or_else(|| TerrainError::LoadFailed {
                            key: tile.to_string(),
                            reason: reason.clone(),
                        });
                        results[i] = Some(Err(err));
                    }
                }
            }
        }

        results.into_iter().flatten().collect()
    }

    /// Download every tile covering `bounds` at `zoom` without opening it.
    ///
    /// Tiles already on disk are skipped. Individual download failures are
    /// counted, not returned.
    ///
    /// # Errors
    ///
    /// Returns an error only if the bounding box or zoom is invalid, or if
    /// the box covers more than [`MAX_BOUNDING_BOX_TILES`] tiles.
    ///
    /// [`MAX_BOUNDING_BOX_TILES`]: crate::projection::MAX_BOUNDING_BOX_TILES
    ///
    /// # Example
    ///
    /// ```ignore
    /// use terrain::BoundingBox;
    ///
    /// let berlin = BoundingBox::new(52.3, 13.0, 52.7, 13.8);
    /// let stats = service.prefetch(&berlin, 12)?;
    /// println!("Downloaded {} tiles in {}ms", stats.tiles_downloaded, stats.elapsed_ms);
    /// ```
    pub fn prefetch(&self, bounds: &BoundingBox, zoom: u8) -> Result<PrefetchStats> {
        let start = Instant::now();
        let tiles = bounds.tiles(zoom)?;

        let mut stats = PrefetchStats {
            tiles_matched: tiles.len() as u64,
            ..Default::default()
        };

        for tile in &tiles {
            if self.store.contains(tile) {
                stats.tiles_already_cached += 1;
                continue;
            }

            match self.store.ensure_local(tile) {
                Ok(_) => stats.tiles_downloaded += 1,
                Err(e) => {
                    warn!(%tile, error = %e, "Prefetch failed");
                    stats.tiles_failed += 1;
                }
            }
        }

        stats.elapsed_ms = start.elapsed().as_millis() as u64;
        Ok(stats)
    }

    /// Load a tile from cache, disk, or the remote source.
    fn load_tile(&self, tile: TileAddress) -> Result<Arc<RasterTile>> {
        self.cache.get_or_load(tile, || self.open_tile(&tile))
    }

    fn open_tile(&self, tile: &TileAddress) -> Result<RasterTile> {
        let path = self.store.ensure_local(tile)?;

        match RasterTile::open(&path) {
            Ok(raster) => {
                debug!(%tile, "Opened tile {}", path.display());
                Ok(raster.with_indexing(self.indexing))
            }
            Err(e @ TerrainError::RasterDecode { .. }) => {
                warn!(%tile, error = %e, "Removing unreadable tile file");
                if let Err(remove_err) = self.store.remove(tile) {
                    warn!(%tile, error = %remove_err, "Failed to remove unreadable tile file");
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Tile address of `(lat, lng)` at `zoom`.
    pub fn tile_for(&self, lat: f64, lng: f64, zoom: u8) -> Result<TileAddress> {
        compute_tile(GeoPoint::new(lat, lng)?, zoom)
    }

    /// Local path of a tile, whether or not it has been downloaded.
    pub fn tile_path(&self, tile: &TileAddress) -> PathBuf {
        self.store.path_for(tile)
    }

    /// Remote URL of a tile.
    pub fn tile_url(&self, tile: &TileAddress) -> String {
        self.store.url_for(tile)
    }

    /// Whether missing tiles can be downloaded.
    pub fn can_download(&self) -> bool {
        self.store.can_download()
    }

    /// Get cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Get download statistics.
    pub fn download_stats(&self) -> DownloadStats {
        self.store.download_stats()
    }

    /// Get the on-disk cache directory.
    pub fn cache_dir(&self) -> &Path {
        self.store.root()
    }

    /// Get the maximum number of open tiles.
    pub fn cache_capacity(&self) -> usize {
        self.cache.capacity()
    }

    /// Zoom level used by [`get_elevation`](Self::get_elevation).
    pub fn default_zoom(&self) -> u8 {
        self.default_zoom
    }

    /// Drop one open tile, applying the release policy.
    ///
    /// Returns `false` if the tile was not open.
    pub fn invalidate_tile(&self, tile: &TileAddress) -> bool {
        self.cache.invalidate(tile)
    }

    /// Drop every open tile, applying the release policy to each.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Open tiles from least to most recently used.
    pub fn open_tiles(&self) -> Vec<TileAddress> {
        self.cache.keys()
    }

    /// Tile files in the on-disk cache.
    pub fn cached_tiles(&self) -> Result<Vec<CachedTile>> {
        self.store.list_cached()
    }
}

impl fmt::Debug for ElevationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElevationService")
            .field("cache_dir", &self.store.root())
            .field("capacity", &self.cache.capacity())
            .field("default_zoom", &self.default_zoom)
            .field("indexing", &self.indexing)
            .finish()
    }
}

/// Builder for creating [`ElevationService`] with custom configuration.
///
/// # Example
///
/// ```ignore
/// use terrain::{ElevationServiceBuilder, ReleasePolicy};
///
/// let service = ElevationServiceBuilder::new("/data/terrain")
///     .capacity(100)
///     .default_zoom(12)
///     .release_policy(ReleasePolicy::DeleteFile)
///     .build()?;
/// ```
pub struct ElevationServiceBuilder {
    cache_dir: PathBuf,
    capacity: usize,
    default_zoom: u8,
    source: TileSource,
    release_policy: ReleasePolicy,
    indexing: PixelIndexing,
    download_config: DownloadConfig,
    fetcher: Option<Arc<dyn TileFetcher>>,
    offline: bool,
}

impl ElevationServiceBuilder {
    /// Create a new builder with the specified cache directory.
    pub fn new<P: AsRef<Path>>(cache_dir: P) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
            capacity: DEFAULT_CAPACITY,
            default_zoom: DEFAULT_ZOOM,
            source: TileSource::default(),
            release_policy: ReleasePolicy::default(),
            indexing: PixelIndexing::default(),
            download_config: DownloadConfig::default(),
            fetcher: None,
            offline: false,
        }
    }

    /// Create a builder configured from environment variables.
    ///
    /// # Environment Variables
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `TERRAIN_CACHE_DIR` | On-disk tile cache root | `.terrain-cache` |
    /// | `TERRAIN_CACHE_SIZE` | Maximum open tiles | 8192 |
    /// | `TERRAIN_TILE_URL` | URL template with `{z}`, `{x}`, `{y}` | AWS terrain tiles |
    /// | `TERRAIN_DEFAULT_ZOOM` | Zoom used by `get_elevation` | 14 |
    /// | `TERRAIN_DELETE_ON_EVICT` | Delete tile files when evicted | false |
    /// | `TERRAIN_TIMEOUT_SECS` | HTTP request timeout | 300 |
    ///
    /// ```bash
    /// export TERRAIN_CACHE_DIR=/data/terrain
    /// export TERRAIN_CACHE_SIZE=512
    /// export TERRAIN_TILE_URL="https://mirror.example.com/geotiff/{z}/{x}/{y}.tif"
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`TerrainError::Config`] if a variable is set but malformed.
    pub fn from_env() -> Result<Self> {
        let cache_dir =
            env::var("TERRAIN_CACHE_DIR").unwrap_or_else(|_| DEFAULT_CACHE_DIR.to_string());
        let mut builder = Self::new(cache_dir);

        if let Some(capacity) = env_parse("TERRAIN_CACHE_SIZE")? {
            builder.capacity = capacity;
        }
        if let Ok(template) = env::var("TERRAIN_TILE_URL") {
            builder.source = TileSource::new(template);
        }
        if let Some(zoom) = env_parse("TERRAIN_DEFAULT_ZOOM")? {
            builder.default_zoom = zoom;
        }
        if let Ok(raw) = env::var("TERRAIN_DELETE_ON_EVICT") {
            builder.release_policy = if parse_flag("TERRAIN_DELETE_ON_EVICT", &raw)? {
                ReleasePolicy::DeleteFile
            } else {
                ReleasePolicy::KeepFile
            };
        }
        if let Some(timeout) = env_parse("TERRAIN_TIMEOUT_SECS")? {
            builder.download_config.timeout_secs = timeout;
        }

        Ok(builder)
    }

    /// Set the on-disk cache directory.
    pub fn cache_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.cache_dir = path.as_ref().to_path_buf();
        self
    }

    /// Set the maximum number of open tiles.
    ///
    /// Default is 8192 tiles.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the zoom level used by `get_elevation`.
    pub fn default_zoom(mut self, zoom: u8) -> Self {
        self.default_zoom = zoom;
        self
    }

    /// Download tiles from a custom URL template.
    ///
    /// Compression is auto-detected from the extension (`.gz`).
    pub fn tile_url(mut self, template: impl Into<String>) -> Self {
        self.source = TileSource::new(template);
        self
    }

    /// Download tiles from a custom source.
    pub fn tile_source(mut self, source: TileSource) -> Self {
        self.source = source;
        self
    }

    /// What to do with a tile's file when it leaves the cache.
    pub fn release_policy(mut self, policy: ReleasePolicy) -> Self {
        self.release_policy = policy;
        self
    }

    /// How inverse-transform outputs map onto grid rows and columns.
    pub fn pixel_indexing(mut self, indexing: PixelIndexing) -> Self {
        self.indexing = indexing;
        self
    }

    /// HTTP settings for the built-in fetcher.
    pub fn download_config(mut self, config: DownloadConfig) -> Self {
        self.download_config = config;
        self
    }

    /// Fetch tiles through a custom collaborator instead of HTTP.
    pub fn fetcher(mut self, fetcher: Arc<dyn TileFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Serve only tiles already on disk.
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Build the [`ElevationService`].
    ///
    /// # Errors
    ///
    /// Returns an error if the default zoom or capacity is invalid, or if the
    /// HTTP client cannot be created (e.g., due to TLS initialization
    /// failure).
    pub fn build(self) -> Result<ElevationService> {
        if self.default_zoom > MAX_ZOOM {
            return Err(TerrainError::InvalidZoom {
                zoom: self.default_zoom,
                max: MAX_ZOOM,
            });
        }
        if self.capacity == 0 {
            return Err(TerrainError::Config {
                reason: "cache capacity must be at least 1".to_string(),
            });
        }

        let fetcher = match (self.offline, self.fetcher) {
            (true, _) => None,
            (false, Some(fetcher)) => Some(fetcher),
            (false, None) => http_fetcher(&self.download_config, &self.source)?,
        };

        let policy = self.release_policy;
        let cache = LruCache::with_eviction_hook(
            self.capacity,
            move |tile: &TileAddress, raster: &RasterTile| {
                if let Err(e) = raster.release(policy) {
                    warn!(%tile, error = %e, "Failed to release tile");
                }
            },
        );

        Ok(ElevationService {
            store: TileStore::new(self.cache_dir, self.source, fetcher),
            cache,
            default_zoom: self.default_zoom,
            indexing: self.indexing,
        })
    }
}

#[cfg(feature = "download")]
fn http_fetcher(
    config: &DownloadConfig,
    source: &TileSource,
) -> Result<Option<Arc<dyn TileFetcher>>> {
    let fetcher = HttpFetcher::new(config.clone())?.with_compression(source.compression());
    Ok(Some(Arc::new(fetcher)))
}

#[cfg(not(feature = "download"))]
fn http_fetcher(
    _config: &DownloadConfig,
    _source: &TileSource,
) -> Result<Option<Arc<dyn TileFetcher>>> {
    Ok(None)
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| TerrainError::Config {
                reason: format!("{}={:?}: {}", name, raw, e),
            }),
        Err(_) => Ok(None),
    }
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(TerrainError::Config {
            reason: format!("{}={:?}: expected true or false", name, raw),
        }),
    }
}

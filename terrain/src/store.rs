//! On-disk tile cache.
//!
//! Tiles live at `{root}/{zoom}/{x}/{y}.tif`. A missing tile is downloaded
//! into a temporary sibling file and renamed into place only once the
//! download succeeded, so a crash or failed fetch never leaves a truncated
//! file where a later lookup would pick it up.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::download::{TileFetcher, TileSource};
use crate::error::{Result, TerrainError};
use crate::projection::TileAddress;

/// Default cache directory, relative to the working directory.
pub const DEFAULT_CACHE_DIR: &str = ".terrain-cache";

/// Download counters for a [`TileStore`].
#[derive(Debug, Clone, Default)]
pub struct DownloadStats {
    /// Number of tiles fetched from the remote source.
    pub tiles_downloaded: u64,
    /// Total bytes written by those fetches.
    pub bytes_downloaded: u64,
}

/// A tile file found in the cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedTile {
    pub tile: TileAddress,
    pub path: PathBuf,
    pub size: u64,
}

/// Maps tile addresses to local files, downloading them on demand.
pub struct TileStore {
    root: PathBuf,
    source: TileSource,
    fetcher: Option<Arc<dyn TileFetcher>>,
    tiles_downloaded: AtomicU64,
    bytes_downloaded: AtomicU64,
}

impl TileStore {
    /// Create a store rooted at `root`.
    ///
    /// Without a fetcher the store is read-only: tiles already on disk are
    /// served and anything else fails with
    /// [`TerrainError::FetchFailed`].
    pub fn new<P: AsRef<Path>>(
        root: P,
        source: TileSource,
        fetcher: Option<Arc<dyn TileFetcher>>,
    ) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            source,
            fetcher,
            tiles_downloaded: AtomicU64::new(0),
            bytes_downloaded: AtomicU64::new(0),
        }
    }

    /// The cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The remote tile source.
    pub fn source(&self) -> &TileSource {
        &self.source
    }

    /// Whether missing tiles can be downloaded.
    pub fn can_download(&self) -> bool {
        self.fetcher.is_some()
    }

    /// Local path of a tile, whether or not it exists.
    pub fn path_for(&self, tile: &TileAddress) -> PathBuf {
        self.root.join(tile.relative_path())
    }

    /// Remote URL of a tile.
    pub fn url_for(&self, tile: &TileAddress) -> String {
        self.source.url(tile)
    }

    /// Whether the tile is already on disk.
    pub fn contains(&self, tile: &TileAddress) -> bool {
        self.path_for(tile).is_file()
    }

    /// Make sure the tile is on disk and return its path.
    ///
    /// Existing files are returned without any network activity.
    ///
    /// # Errors
    ///
    /// Returns [`TerrainError::FetchFailed`] if the download fails, returns an
    /// empty body, or downloads are disabled. Failing to write the tile under
    /// the cache root is reported the same way. No file is left at the tile's
    /// path in any of these cases.
    pub fn ensure_local(&self, tile: &TileAddress) -> Result<PathBuf> {
        let path = self.path_for(tile);
        if path.is_file() {
            return Ok(path);
        }

        let url = self.url_for(tile);
        let fetcher = self
            .fetcher
            .as_ref()
            .ok_or_else(|| TerrainError::FetchFailed {
                url: url.clone(),
                reason: "downloads are disabled".to_string(),
            })?;

        let write_failed = |e: io::Error| TerrainError::FetchFailed {
            url: url.clone(),
            reason: format!("writing {}: {}", path.display(), e),
        };

        let parent = self.root.join(tile.zoom.to_string()).join(tile.x.to_string());
        fs::create_dir_all(&parent).map_err(write_failed)?;

        // Dropping the temp path on any early return deletes the partial file.
        let partial = tempfile::Builder::new()
            .prefix(".partial-")
            .suffix(".tif")
            .tempfile_in(&parent)
            .map_err(write_failed)?
            .into_temp_path();

        debug!(%tile, url = %url, "Downloading tile");
        let bytes = fetcher.fetch(&url, &partial).map_err(|e| match e {
            TerrainError::Io(io_err) => write_failed(io_err),
            other => other,
        })?;

        let written = fs::metadata(&partial).map_err(write_failed)?.len();
        if written == 0 {
            return Err(TerrainError::FetchFailed {
                url: url.clone(),
                reason: "empty response body".to_string(),
            });
        }

        partial
            .persist(&path)
            .map_err(|e| write_failed(e.error))?;

        self.tiles_downloaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
        info!(%tile, bytes, "Downloaded {}", path.display());

        Ok(path)
    }

    /// Delete a cached tile file.
    ///
    /// Returns `false` if there was nothing to delete.
    pub fn remove(&self, tile: &TileAddress) -> Result<bool> {
        match fs::remove_file(self.path_for(tile)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Get download statistics.
    pub fn download_stats(&self) -> DownloadStats {
        DownloadStats {
            tiles_downloaded: self.tiles_downloaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
        }
    }

    /// Scan the cache directory for `{zoom}/{x}/{y}.tif` files.
    ///
    /// Returns tiles sorted by address. Partial downloads and unrelated
    /// files are skipped; a missing root yields an empty list.
    pub fn list_cached(&self) -> Result<Vec<CachedTile>> {
        let mut tiles = Vec::new();

        for zoom_dir in read_dir_or_empty(&self.root)? {
            for x_dir in read_dir_or_empty(&zoom_dir)? {
                for file in read_dir_or_empty(&x_dir)? {
                    let Some(tile) = parse_tile_path(&self.root, &file) else {
                        continue;
                    };
                    let size = fs::metadata(&file)?.len();
                    tiles.push(CachedTile {
                        tile,
                        path: file,
                        size,
                    });
                }
            }
        }

        tiles.sort_by_key(|cached| cached.tile);
        Ok(tiles)
    }
}

fn read_dir_or_empty(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir)?;
    Ok(entries.flatten().map(|entry| entry.path()).collect())
}

fn parse_tile_path(root: &Path, file: &Path) -> Option<TileAddress> {
    if !file.is_file() {
        return None;
    }
    let relative = file.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    parts.join("/").parse().ok()
}

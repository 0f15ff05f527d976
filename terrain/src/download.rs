//! Tile download functionality.
//!
//! The store never talks to the network directly. It hands a URL and a
//! destination path to a [`TileFetcher`], which makes it easy to swap in a
//! mirror, a local fixture server, or a mock in tests.
//!
//! The HTTP implementation, [`HttpFetcher`], is only available when the
//! `download` feature is enabled (it is on by default).
//!
//! # URL Templates
//!
//! A [`TileSource`] expands `{z}`, `{x}` and `{y}` in a URL template. The
//! default points at the public AWS terrain tiles:
//!
//! ```text
//! https://elevation-tiles-prod.s3.amazonaws.com/geotiff/{z}/{x}/{y}.tif
//! ```
//!
//! Templates ending in `.gz` are detected as gzip-compressed and decompressed
//! before being written to disk.

use std::path::Path;

#[cfg(feature = "download")]
use std::fs::File;
#[cfg(feature = "download")]
use std::io::{Read, Write};
#[cfg(feature = "download")]
use std::time::Duration;

#[cfg(feature = "download")]
use flate2::read::GzDecoder;
#[cfg(feature = "download")]
use reqwest::blocking::Client;
#[cfg(feature = "download")]
use tracing::{debug, warn};

use crate::error::Result;
#[cfg(feature = "download")]
use crate::error::TerrainError;
use crate::projection::TileAddress;

/// URL template of the public AWS terrain tiles.
pub const DEFAULT_TILE_URL: &str =
    "https://elevation-tiles-prod.s3.amazonaws.com/geotiff/{z}/{x}/{y}.tif";

/// Default timeout for HTTP requests in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Something that can copy the body at a URL into a local file.
///
/// On success `dest` holds the complete body and the number of bytes written
/// is returned. On failure the implementation returns
/// [`TerrainError::FetchFailed`](crate::TerrainError::FetchFailed); whatever
/// it left at `dest` is discarded by the caller.
pub trait TileFetcher: Send + Sync {
    /// Fetch `url` into `dest`.
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// Compression format of downloaded tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// No compression - raw .tif file
    #[default]
    None,
    /// Gzip compression (.tif.gz)
    Gzip,
}

impl Compression {
    /// Detect compression format from a URL or filename.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// use terrain::download::Compression;
    ///
    /// assert_eq!(Compression::from_url("file.tif.gz"), Compression::Gzip);
    /// assert_eq!(Compression::from_url("file.tif"), Compression::None);
    /// ```
    pub fn from_url(url: &str) -> Self {
        if url.to_lowercase().ends_with(".gz") {
            Compression::Gzip
        } else {
            Compression::None
        }
    }
}

/// Where tiles are downloaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileSource {
    url_template: String,
    compression: Compression,
}

impl Default for TileSource {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_URL)
    }
}

impl TileSource {
    /// Create a source from a URL template with `{z}`, `{x}` and `{y}`
    /// placeholders. Compression is auto-detected from the extension.
    pub fn new(url_template: impl Into<String>) -> Self {
        let url_template = url_template.into();
        let compression = Compression::from_url(&url_template);
        Self {
            url_template,
            compression,
        }
    }

    /// Create a source with an explicit compression setting.
    pub fn with_compression(url_template: impl Into<String>, compression: Compression) -> Self {
        Self {
            url_template: url_template.into(),
            compression,
        }
    }

    /// The raw URL template.
    pub fn url_template(&self) -> &str {
        &self.url_template
    }

    /// Compression of the files this source serves.
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Expand the template for one tile.
    pub fn url(&self, tile: &TileAddress) -> String {
        self.url_template
            .replace("{z}", &tile.zoom.to_string())
            .replace("{x}", &tile.x.to_string())
            .replace("{y}", &tile.y.to_string())
    }
}

/// Configuration for the HTTP fetcher.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Number of retry attempts after the first failure.
    pub max_retries: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: 3,
        }
    }
}

impl DownloadConfig {
    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Set the maximum number of retry attempts.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Outcome of a single attempt.
#[cfg(feature = "download")]
enum Attempt {
    /// Transport errors and 5xx responses.
    Retry(TerrainError),
    /// Anything a retry cannot fix.
    Abort(TerrainError),
}

/// Blocking HTTP fetcher with retries.
#[cfg(feature = "download")]
pub struct HttpFetcher {
    client: Client,
    config: DownloadConfig,
    compression: Compression,
}

#[cfg(feature = "download")]
impl HttpFetcher {
    /// Create a new fetcher with the given configuration.
    pub fn new(config: DownloadConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TerrainError::FetchFailed {
                url: String::new(),
                reason: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            config,
            compression: Compression::None,
        })
    }

    /// Decompress response bodies with the given format before writing.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    fn attempt(&self, url: &str, dest: &Path) -> std::result::Result<u64, Attempt> {
        let failed = |reason: String| TerrainError::FetchFailed {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Attempt::Retry(failed(e.to_string())))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(Attempt::Retry(failed(format!("HTTP {}", status))));
        }
        if !status.is_success() {
            return Err(Attempt::Abort(failed(format!("HTTP {}", status))));
        }

        let bytes = response
            .bytes()
            .map_err(|e| Attempt::Retry(failed(e.to_string())))?;

        let body = match self.compression {
            Compression::None => bytes.to_vec(),
            Compression::Gzip => {
                let mut data = Vec::new();
                GzDecoder::new(&bytes[..])
                    .read_to_end(&mut data)
                    .map_err(|e| {
                        Attempt::Abort(failed(format!("Failed to decompress gzip: {}", e)))
                    })?;
                data
            }
        };

        File::create(dest)
            .and_then(|mut file| file.write_all(&body))
            .map_err(|e| Attempt::Abort(failed(format!("Failed to write tile: {}", e))))?;

        Ok(body.len() as u64)
    }
}

#[cfg(feature = "download")]
impl TileFetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                std::thread::sleep(Duration::from_millis(500 * attempt as u64));
                debug!(url, attempt, "Retrying download");
            }

            match self.attempt(url, dest) {
                Ok(bytes) => return Ok(bytes),
                Err(Attempt::Abort(e)) => return Err(e),
                Err(Attempt::Retry(e)) => {
                    warn!(url, attempt, error = %e, "Download attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| TerrainError::FetchFailed {
            url: url.to_string(),
            reason: "Unknown error".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_from_url() {
        assert_eq!(Compression::from_url("file.tif.gz"), Compression::Gzip);
        assert_eq!(Compression::from_url("FILE.TIF.GZ"), Compression::Gzip);
        assert_eq!(Compression::from_url("file.tif"), Compression::None);
    }

    #[test]
    fn test_default_source_url() {
        let tile = TileAddress::new(8789, 5383, 14).unwrap();
        assert_eq!(
            TileSource::default().url(&tile),
            "https://elevation-tiles-prod.s3.amazonaws.com/geotiff/14/8789/5383.tif"
        );
        assert_eq!(TileSource::default().compression(), Compression::None);
    }

    #[test]
    fn test_custom_template() {
        let source = TileSource::new("https://mirror.example.com/dem/{z}-{x}-{y}.tif.gz");
        let tile = TileAddress::new(1, 2, 3).unwrap();
        assert_eq!(
            source.url(&tile),
            "https://mirror.example.com/dem/3-1-2.tif.gz"
        );
        assert_eq!(source.compression(), Compression::Gzip);

        let source = TileSource::with_compression("https://example.com/{z}/{x}/{y}", Compression::Gzip);
        assert_eq!(source.compression(), Compression::Gzip);
    }

    #[test]
    fn test_download_config_default() {
        let config = DownloadConfig::default();
        assert_eq!(config.timeout_secs, 300);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_download_config_builder() {
        let config = DownloadConfig::default()
            .with_timeout(60)
            .with_max_retries(5);
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.max_retries, 5);
    }

    #[cfg(feature = "download")]
    #[test]
    fn test_unreachable_host_fails() {
        let fetcher = HttpFetcher::new(DownloadConfig::default().with_timeout(2).with_max_retries(0))
            .unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("tile.tif");

        let err = fetcher.fetch("http://127.0.0.1:1/0/0/0.tif", &dest).unwrap_err();
        assert!(matches!(err, TerrainError::FetchFailed { .. }));
        assert!(!dest.exists());
    }
}

//! Fixtures shared by the unit tests: synthetic GeoTIFFs and mock fetchers.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::download::TileFetcher;
use crate::error::{Result, TerrainError};
use crate::projection::TileAddress;

#[path = "../tests/common/geotiff.rs"]
mod geotiff_writer;

pub use geotiff_writer::{write_geotiff, GeoTiffSpec};

/// Writes a fixed payload and records every URL it was asked for.
pub struct CountingFetcher {
    payload: Vec<u8>,
    urls: Mutex<Vec<String>>,
}

impl CountingFetcher {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.urls.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl TileFetcher for CountingFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
        self.urls.lock().unwrap().push(url.to_string());
        fs::write(dest, &self.payload)?;
        Ok(self.payload.len() as u64)
    }
}

/// Writes a truncated body, then fails like a dropped connection.
#[derive(Default)]
pub struct FailingFetcher {
    calls: AtomicUsize,
}

impl FailingFetcher {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TileFetcher for FailingFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        fs::write(dest, b"II*\0partial")?;
        Err(TerrainError::FetchFailed {
            url: url.to_string(),
            reason: "connection reset".to_string(),
        })
    }
}

/// Serves real EPSG:3857 GeoTIFFs for whatever `{z}/{x}/{y}.tif` URL it is
/// given. Sample values are `row * 1000 + col`.
pub struct GeoTiffFetcher {
    size: u32,
    delay: Option<Duration>,
    fail_remaining: AtomicUsize,
    corrupt_remaining: AtomicUsize,
    calls: AtomicUsize,
}

impl GeoTiffFetcher {
    pub fn new(size: u32) -> Self {
        Self {
            size,
            delay: None,
            fail_remaining: AtomicUsize::new(0),
            corrupt_remaining: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep before every fetch to widen race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next `n` fetches with an HTTP 503.
    pub fn failing_first(self, n: usize) -> Self {
        self.fail_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Serve garbage for the next `n` fetches.
    pub fn corrupt_first(self, n: usize) -> Self {
        self.corrupt_remaining.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl TileFetcher for GeoTiffFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }

        if Self::take(&self.fail_remaining) {
            return Err(TerrainError::FetchFailed {
                url: url.to_string(),
                reason: "HTTP 503 Service Unavailable".to_string(),
            });
        }
        if Self::take(&self.corrupt_remaining) {
            let body = b"<Error><Code>SlowDown</Code></Error>";
            fs::write(dest, body)?;
            return Ok(body.len() as u64);
        }

        let mut parts = url.rsplit('/');
        let y = parts.next().unwrap().trim_end_matches(".tif");
        let x = parts.next().unwrap();
        let z = parts.next().unwrap();
        let tile: TileAddress = format!("{z}/{x}/{y}").parse().unwrap();

        write_geotiff(
            dest,
            &GeoTiffSpec::mercator_tile(tile.zoom, tile.x, tile.y, self.size),
            |row, col| (row * 1000 + col) as f32,
        );
        Ok(fs::metadata(dest)?.len())
    }
}

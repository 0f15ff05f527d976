//! Decoded raster tiles and point sampling.
//!
//! This module provides [`RasterTile`], an in-memory elevation grid with the
//! georeferencing needed to turn a WGS84 coordinate into a pixel index.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::error::{Result, TerrainError};
use crate::geotiff::{self, Crs};
use crate::projection::GeoPoint;

/// Which inverse-transform output selects the grid row.
///
/// The AWS terrain tiles are square, so both conventions stay in bounds for
/// in-tile points; they differ in which sample is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelIndexing {
    /// `grid[floor(x)][floor(y)]`: the inverse transform's x output indexes
    /// rows. This matches the behavior elevation values were originally
    /// published with.
    #[default]
    Source,
    /// `grid[floor(y)][floor(x)]`: conventional row/column order.
    RowColumn,
}

/// What happens to a tile's backing file when it leaves the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReleasePolicy {
    /// Leave the file on disk for later reuse.
    #[default]
    KeepFile,
    /// Delete the file.
    DeleteFile,
}

/// A GDAL-ordered affine geotransform with its precomputed inverse.
///
/// Forward: `geo_x = t0 + px·t1 + py·t2`, `geo_y = t3 + px·t4 + py·t5`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    forward: [f64; 6],
    inverse: [f64; 6],
}

impl GeoTransform {
    /// Build from the six forward coefficients.
    ///
    /// # Errors
    ///
    /// Returns [`TerrainError::DegenerateTransform`] if the linear part is
    /// singular.
    pub fn new(coefficients: [f64; 6]) -> Result<Self> {
        let t = coefficients;
        let dev = t[1] * t[5] - t[2] * t[4];
        if dev == 0.0 || !dev.is_finite() {
            return Err(TerrainError::DegenerateTransform { coefficients });
        }

        Ok(Self {
            forward: coefficients,
            inverse: [t[0], t[5] / dev, -t[2] / dev, t[3], -t[4] / dev, t[1] / dev],
        })
    }

    /// A north-up transform without rotation.
    ///
    /// `origin_x`/`origin_y` locate the top-left corner; `pixel_height` is
    /// positive and pixels run southwards.
    pub fn north_up(
        origin_x: f64,
        origin_y: f64,
        pixel_width: f64,
        pixel_height: f64,
    ) -> Result<Self> {
        Self::new([origin_x, pixel_width, 0.0, origin_y, 0.0, -pixel_height])
    }

    /// The forward coefficients.
    pub fn coefficients(&self) -> [f64; 6] {
        self.forward
    }

    /// Determinant of the linear part.
    pub fn determinant(&self) -> f64 {
        self.forward[1] * self.forward[5] - self.forward[2] * self.forward[4]
    }

    /// Map native coordinates to fractional pixel coordinates.
    pub fn to_pixel(&self, geo_x: f64, geo_y: f64) -> (f64, f64) {
        let inv = &self.inverse;
        let u = geo_x - inv[0];
        let v = geo_y - inv[3];
        (inv[1] * u + inv[2] * v, inv[4] * u + inv[5] * v)
    }

    /// Map pixel coordinates to native coordinates.
    pub fn to_geo(&self, px: f64, py: f64) -> (f64, f64) {
        let t = &self.forward;
        (t[0] + px * t[1] + py * t[2], t[3] + px * t[4] + py * t[5])
    }
}

/// Summary statistics over the valid samples of a tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterStats {
    pub min: f32,
    pub max: f32,
    pub mean: f64,
    pub valid_count: usize,
    pub nodata_count: usize,
}

/// An elevation tile loaded into memory.
///
/// # Example
///
/// ```ignore
/// use terrain::{GeoPoint, RasterTile};
///
/// let tile = RasterTile::open(".terrain-cache/14/8789/5383.tif")?;
/// let elevation = tile.sample(GeoPoint::new(52.3882084, 13.119842)?)?;
/// println!("Elevation: {}m", elevation);
/// ```
#[derive(Debug)]
pub struct RasterTile {
    path: Option<PathBuf>,
    rows: usize,
    cols: usize,
    /// Row-major, `rows × cols`.
    data: Vec<f32>,
    transform: GeoTransform,
    crs: Crs,
    nodata: Option<f32>,
    indexing: PixelIndexing,
    released: AtomicBool,
}

impl RasterTile {
    /// Load a GeoTIFF tile from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be opened
    /// - The file is not a readable GeoTIFF ([`TerrainError::RasterDecode`])
    /// - The spatial reference is unsupported
    /// - The geotransform is degenerate
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raster = geotiff::decode(path)?;
        let transform = GeoTransform::new(raster.transform)?;

        Ok(Self {
            path: Some(path.to_path_buf()),
            rows: raster.rows,
            cols: raster.cols,
            data: raster.data,
            transform,
            crs: raster.crs,
            nodata: raster.nodata,
            indexing: PixelIndexing::default(),
            released: AtomicBool::new(false),
        })
    }

    /// Build a tile from an in-memory grid with no backing file.
    ///
    /// # Errors
    ///
    /// Returns [`TerrainError::RasterDecode`] if `data` does not hold
    /// `rows × cols` samples.
    pub fn from_parts(
        rows: usize,
        cols: usize,
        data: Vec<f32>,
        transform: GeoTransform,
        crs: Crs,
    ) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(TerrainError::RasterDecode {
                path: PathBuf::new(),
                reason: format!("expected {} samples, got {}", rows * cols, data.len()),
            });
        }

        Ok(Self {
            path: None,
            rows,
            cols,
            data,
            transform,
            crs,
            nodata: None,
            indexing: PixelIndexing::default(),
            released: AtomicBool::new(false),
        })
    }

    /// Use a different pixel indexing convention.
    pub fn with_indexing(mut self, indexing: PixelIndexing) -> Self {
        self.indexing = indexing;
        self
    }

    /// Sample the elevation at a coordinate.
    ///
    /// The coordinate is transformed into the raster's CRS, then through the
    /// inverse geotransform, and both outputs are floored. No interpolation.
    ///
    /// # Errors
    ///
    /// Returns [`TerrainError::OutOfBounds`] if the floored indices fall
    /// outside the grid. Indices are never clamped.
    pub fn sample(&self, point: GeoPoint) -> Result<f32> {
        let (geo_x, geo_y) = self.crs.to_native(point);
        let (x, y) = self.transform.to_pixel(geo_x, geo_y);

        let (first, second) = match self.indexing {
            PixelIndexing::Source => (x.floor(), y.floor()),
            PixelIndexing::RowColumn => (y.floor(), x.floor()),
        };

        let in_bounds = first.is_finite()
            && second.is_finite()
            && first >= 0.0
            && second >= 0.0
            && first < self.rows as f64
            && second < self.cols as f64;
        if !in_bounds {
            return Err(TerrainError::OutOfBounds {
                lat: point.lat(),
                lng: point.lng(),
                first,
                second,
                rows: self.rows,
                cols: self.cols,
            });
        }

        Ok(self.data[first as usize * self.cols + second as usize])
    }

    /// Release the tile's resources.
    ///
    /// With [`ReleasePolicy::DeleteFile`] the backing file is removed. Only
    /// the first call has any effect. The grid itself is freed when the last
    /// handle is dropped.
    pub fn release(&self, policy: ReleasePolicy) -> Result<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let (ReleasePolicy::DeleteFile, Some(path)) = (policy, &self.path) {
            info!("Removing {}", path.display());
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Whether [`release`](Self::release) has been called.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Backing file, if the tile was loaded from disk.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Grid size as `(rows, cols)`.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn geotransform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    /// GDAL no-data value, if the file declares one.
    pub fn nodata(&self) -> Option<f32> {
        self.nodata
    }

    pub fn indexing(&self) -> PixelIndexing {
        self.indexing
    }

    /// Min/max/mean over samples that are neither NaN nor no-data.
    ///
    /// Returns `None` if the tile has no valid samples.
    pub fn stats(&self) -> Option<RasterStats> {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0.0f64;
        let mut valid_count = 0usize;

        for &value in &self.data {
            if value.is_nan() || Some(value) == self.nodata {
                continue;
            }
            min = min.min(value);
            max = max.max(value);
            sum += f64::from(value);
            valid_count += 1;
        }

        if valid_count == 0 {
            return None;
        }

        Some(RasterStats {
            min,
            max,
            mean: sum / valid_count as f64,
            valid_count,
            nodata_count: self.data.len() - valid_count,
        })
    }
}

//! Spherical Mercator projection and tile addressing.
//!
//! Coordinates are projected onto a world plane of [`TILE_SIZE`]×[`TILE_SIZE`]
//! pixels at zoom 0. At zoom `z` the plane is scaled by `2^z` and cut into
//! `TILE_SIZE` pixel tiles, giving the `{z}/{x}/{y}` addressing used by slippy
//! map tile servers.
//!
//! # Example
//!
//! ```ignore
//! use terrain::{compute_tile, GeoPoint};
//!
//! let potsdam = GeoPoint::new(52.3882084, 13.119842)?;
//! let tile = compute_tile(potsdam, 14)?;
//! assert_eq!((tile.x, tile.y), (8789, 5383));
//! ```

use std::f64::consts::PI;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Result, TerrainError};

/// Width and height of one tile, and of the whole world plane at zoom 0.
pub const TILE_SIZE: f64 = 512.0;

/// Highest zoom level whose tile indices fit in a `u32`.
pub const MAX_ZOOM: u8 = 30;

/// Zoom level used when the caller does not pick one.
pub const DEFAULT_ZOOM: u8 = 14;

/// Most tiles a single [`BoundingBox::tiles`] call will enumerate.
pub const MAX_BOUNDING_BOX_TILES: u64 = 1 << 20;

/// `sin(lat)` is clamped to this magnitude before projecting.
const SIN_LAT_LIMIT: f64 = 0.9999;

/// A validated WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    lat: f64,
    lng: f64,
}

impl GeoPoint {
    /// Create a point, rejecting non-finite or out-of-range values.
    ///
    /// # Arguments
    ///
    /// * `lat` - Latitude in decimal degrees (-90 to 90)
    /// * `lng` - Longitude in decimal degrees (-180 to 180)
    pub fn new(lat: f64, lng: f64) -> Result<Self> {
        if !lat.is_finite()
            || !lng.is_finite()
            || !(-90.0..=90.0).contains(&lat)
            || !(-180.0..=180.0).contains(&lng)
        {
            return Err(TerrainError::InvalidCoordinate { lat, lng });
        }
        Ok(Self { lat, lng })
    }

    /// Latitude in decimal degrees.
    pub fn lat(&self) -> f64 {
        self.lat
    }

    /// Longitude in decimal degrees.
    pub fn lng(&self) -> f64 {
        self.lng
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lat, self.lng)
    }
}

/// World-plane pixel coordinates at zoom 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanePoint {
    pub x: f64,
    pub y: f64,
}

/// Project a coordinate onto the zoom-0 world plane.
///
/// Latitudes beyond roughly ±89.19° land on the clamp boundary.
pub fn project(point: GeoPoint) -> PlanePoint {
    let siny = (point.lat * PI / 180.0).sin().clamp(-SIN_LAT_LIMIT, SIN_LAT_LIMIT);

    PlanePoint {
        x: TILE_SIZE * (0.5 + point.lng / 360.0),
        y: TILE_SIZE * (0.5 - ((1.0 + siny) / (1.0 - siny)).ln() / (4.0 * PI)),
    }
}

/// Inverse of [`project`] for points inside the world plane.
///
/// Plane points outside `[0, TILE_SIZE]` horizontally yield longitudes
/// outside ±180°; the result is not re-validated.
pub fn unproject(plane: PlanePoint) -> GeoPoint {
    let k = (0.5 - plane.y / TILE_SIZE) * 4.0 * PI;
    let siny = (k / 2.0).tanh();

    GeoPoint {
        lat: siny.asin() * 180.0 / PI,
        lng: (plane.x / TILE_SIZE - 0.5) * 360.0,
    }
}

/// Compute the tile containing `point` at `zoom`.
///
/// Indices are clamped into `[0, 2^zoom)`, so `lng = 180` and latitudes
/// between the Web Mercator limit (±85.0511°) and the projection clamp
/// resolve to the edge tiles.
///
/// # Errors
///
/// Returns [`TerrainError::InvalidZoom`] if `zoom` exceeds [`MAX_ZOOM`].
pub fn compute_tile(point: GeoPoint, zoom: u8) -> Result<TileAddress> {
    if zoom > MAX_ZOOM {
        return Err(TerrainError::InvalidZoom {
            zoom,
            max: MAX_ZOOM,
        });
    }

    let tiles = 1u32 << zoom;
    let scale = f64::from(tiles);
    let world = project(point);

    Ok(TileAddress {
        x: tile_index(world.x * scale / TILE_SIZE, tiles - 1),
        y: tile_index(world.y * scale / TILE_SIZE, tiles - 1),
        zoom,
    })
}

fn tile_index(value: f64, max_index: u32) -> u32 {
    value.floor().clamp(0.0, f64::from(max_index)) as u32
}

/// Address of one tile in the `{zoom}/{x}/{y}` scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileAddress {
    pub x: u32,
    pub y: u32,
    pub zoom: u8,
}

impl TileAddress {
    /// Create an address, checking that the indices exist at `zoom`.
    pub fn new(x: u32, y: u32, zoom: u8) -> Result<Self> {
        if zoom > MAX_ZOOM {
            return Err(TerrainError::InvalidZoom {
                zoom,
                max: MAX_ZOOM,
            });
        }
        let tiles = 1u64 << zoom;
        if u64::from(x) >= tiles || u64::from(y) >= tiles {
            return Err(TerrainError::InvalidTile { x, y, zoom });
        }
        Ok(Self { x, y, zoom })
    }

    /// Path of the tile relative to a cache root: `{zoom}/{x}/{y}.tif`.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(self.zoom.to_string())
            .join(self.x.to_string())
            .join(format!("{}.tif", self.y))
    }

    /// Geographic extent of the tile.
    pub fn bounds(&self) -> BoundingBox {
        let size = TILE_SIZE / f64::from(1u32 << self.zoom);
        let north_west = unproject(PlanePoint {
            x: f64::from(self.x) * size,
            y: f64::from(self.y) * size,
        });
        let south_east = unproject(PlanePoint {
            x: f64::from(self.x + 1) * size,
            y: f64::from(self.y + 1) * size,
        });

        BoundingBox::new(
            south_east.lat,
            north_west.lng,
            north_west.lat,
            south_east.lng,
        )
    }
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

impl FromStr for TileAddress {
    type Err = TerrainError;

    /// Parse `z/x/y`, optionally followed by `.tif`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || TerrainError::Config {
            reason: format!("'{}' is not a z/x/y tile address", s),
        };

        let trimmed = s.strip_suffix(".tif").unwrap_or(s);
        let mut parts = trimmed.split('/');
        let (Some(zoom), Some(x), Some(y), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        let zoom = zoom.parse().map_err(|_| invalid())?;
        let x = x.parse().map_err(|_| invalid())?;
        let y = y.parse().map_err(|_| invalid())?;
        TileAddress::new(x, y, zoom)
    }
}

/// A geographic bounding box.
///
/// Coordinates are in decimal degrees (WGS84).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Minimum latitude (southern boundary).
    pub min_lat: f64,
    /// Minimum longitude (western boundary).
    pub min_lng: f64,
    /// Maximum latitude (northern boundary).
    pub max_lat: f64,
    /// Maximum longitude (eastern boundary).
    pub max_lng: f64,
}

impl BoundingBox {
    /// Create a new bounding box.
    ///
    /// # Arguments
    ///
    /// * `min_lat` - Southern boundary latitude
    /// * `min_lng` - Western boundary longitude
    /// * `max_lat` - Northern boundary latitude
    /// * `max_lng` - Eastern boundary longitude
    pub fn new(min_lat: f64, min_lng: f64, max_lat: f64, max_lng: f64) -> Self {
        Self {
            min_lat,
            min_lng,
            max_lat,
            max_lng,
        }
    }

    /// Check whether the point lies inside the box (edges inclusive).
    pub fn contains(&self, point: GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && (self.min_lng..=self.max_lng).contains(&point.lng)
    }

    /// Number of tiles at `zoom` that intersect the box.
    ///
    /// # Errors
    ///
    /// Same as [`BoundingBox::tiles`], except that no size limit applies.
    pub fn tile_count(&self, zoom: u8) -> Result<u64> {
        let (top_left, bottom_right) = self.corner_tiles(zoom)?;
        let cols = u64::from(bottom_right.x - top_left.x) + 1;
        let rows = u64::from(bottom_right.y - top_left.y) + 1;
        Ok(cols * rows)
    }

    /// All tiles at `zoom` that intersect the box, in row-major order.
    ///
    /// # Errors
    ///
    /// Returns an error if a corner is not a valid coordinate, if the box is
    /// inverted, if `zoom` is invalid, or if the box covers more than
    /// [`MAX_BOUNDING_BOX_TILES`] tiles.
    pub fn tiles(&self, zoom: u8) -> Result<Vec<TileAddress>> {
        let (top_left, bottom_right) = self.corner_tiles(zoom)?;
        let count = (u64::from(bottom_right.x - top_left.x) + 1)
            * (u64::from(bottom_right.y - top_left.y) + 1);
        if count > MAX_BOUNDING_BOX_TILES {
            return Err(TerrainError::InvalidBoundingBox {
                reason: format!(
                    "covers {} tiles at zoom {}, limit is {}",
                    count, zoom, MAX_BOUNDING_BOX_TILES
                ),
            });
        }

        let mut tiles = Vec::with_capacity(count as usize);
        for y in top_left.y..=bottom_right.y {
            for x in top_left.x..=bottom_right.x {
                tiles.push(TileAddress { x, y, zoom });
            }
        }
        Ok(tiles)
    }

    fn corner_tiles(&self, zoom: u8) -> Result<(TileAddress, TileAddress)> {
        if self.min_lat > self.max_lat || self.min_lng > self.max_lng {
            return Err(TerrainError::InvalidBoundingBox {
                reason: format!(
                    "min ({}, {}) exceeds max ({}, {})",
                    self.min_lat, self.min_lng, self.max_lat, self.max_lng
                ),
            });
        }

        // Plane y grows southwards.
        let top_left = compute_tile(GeoPoint::new(self.max_lat, self.min_lng)?, zoom)?;
        let bottom_right = compute_tile(GeoPoint::new(self.min_lat, self.max_lng)?, zoom)?;
        Ok((top_left, bottom_right))
    }
}

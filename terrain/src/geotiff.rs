//! GeoTIFF decoding.
//!
//! Reads the first band of a GeoTIFF into memory along with its forward
//! geotransform, spatial reference and GDAL no-data value. Only the subset of
//! GeoTIFF needed for elevation tiles is understood: north-up or affine
//! georeferencing, and EPSG:4326 or EPSG:3857 coordinate systems.

use std::f64::consts::PI;
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use memmap2::Mmap;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

use crate::error::{Result, TerrainError};
use crate::projection::GeoPoint;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE_KEY: u16 = 1024;
const GT_RASTER_TYPE_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const RASTER_PIXEL_IS_POINT: u16 = 2;

/// Semi-major axis of the sphere used by Web Mercator, in meters.
const EARTH_RADIUS: f64 = 6_378_137.0;

/// Coordinate reference systems a raster can be sampled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    /// EPSG:4326, longitude/latitude in degrees.
    Wgs84,
    /// EPSG:3857, spherical Web Mercator in meters.
    WebMercator,
}

impl Crs {
    /// Look up a supported EPSG code.
    pub fn from_epsg(code: u16) -> Option<Self> {
        match code {
            4326 => Some(Crs::Wgs84),
            3857 | 3785 => Some(Crs::WebMercator),
            _ => None,
        }
    }

    /// The canonical EPSG code.
    pub fn epsg(&self) -> u16 {
        match self {
            Crs::Wgs84 => 4326,
            Crs::WebMercator => 3857,
        }
    }

    /// Transform a WGS84 point into this system's `(x, y)` axis order.
    ///
    /// Web Mercator diverges at the poles; the result is infinite there.
    pub fn to_native(&self, point: GeoPoint) -> (f64, f64) {
        match self {
            Crs::Wgs84 => (point.lng(), point.lat()),
            Crs::WebMercator => {
                let lambda = point.lng() * PI / 180.0;
                let phi = point.lat() * PI / 180.0;
                (
                    EARTH_RADIUS * lambda,
                    EARTH_RADIUS * (PI / 4.0 + phi / 2.0).tan().ln(),
                )
            }
        }
    }
}

/// First band of a GeoTIFF with its georeferencing.
#[derive(Debug)]
pub(crate) struct DecodedRaster {
    pub rows: usize,
    pub cols: usize,
    /// Row-major samples of band 1.
    pub data: Vec<f32>,
    /// GDAL-ordered forward geotransform.
    pub transform: [f64; 6],
    pub crs: Crs,
    pub nodata: Option<f32>,
}

/// Decode a GeoTIFF from disk.
///
/// Failures to parse the file are reported as
/// [`TerrainError::RasterDecode`]; a missing file is an I/O error.
pub(crate) fn decode(path: &Path) -> Result<DecodedRaster> {
    let file = File::open(path)?;

    // SAFETY: Memory mapping is safe as long as the file is not modified
    // while mapped. Cached tiles are only ever replaced by rename, never
    // written in place, and the mapping is dropped before we return.
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| decode_error(path, e))?;

    let mut decoder = Decoder::new(Cursor::new(mmap)).map_err(|e| decode_error(path, e))?;
    let (width, height) = decoder.dimensions().map_err(|e| decode_error(path, e))?;
    let (rows, cols) = (height as usize, width as usize);

    let keys = read_geo_keys(&mut decoder);
    let transform = read_geotransform(&mut decoder, &keys, path)?;
    let crs = resolve_crs(&keys, path)?;
    let nodata = read_nodata(&mut decoder);

    let samples = to_f32(decoder.read_image().map_err(|e| decode_error(path, e))?);
    let data = first_band(samples, rows * cols, path)?;

    Ok(DecodedRaster {
        rows,
        cols,
        data,
        transform,
        crs,
        nodata,
    })
}

fn decode_error(path: &Path, e: impl std::fmt::Display) -> TerrainError {
    TerrainError::RasterDecode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// GeoKeys we care about, all stored inline as SHORT values.
#[derive(Debug, Default)]
struct GeoKeys {
    present: bool,
    model_type: Option<u16>,
    raster_type: Option<u16>,
    geographic_type: Option<u16>,
    projected_type: Option<u16>,
}

fn read_geo_keys<R: Read + Seek>(decoder: &mut Decoder<R>) -> GeoKeys {
    let mut keys = GeoKeys::default();
    let Ok(directory) = decoder.get_tag_u16_vec(tag(GEO_KEY_DIRECTORY)) else {
        return keys;
    };
    if directory.len() < 4 {
        return keys;
    }
    keys.present = true;

    let count = directory[3] as usize;
    for entry in directory[4..].chunks_exact(4).take(count) {
        let (id, location, value) = (entry[0], entry[1], entry[3]);
        // Non-zero location means the value lives in another tag.
        if location != 0 {
            continue;
        }
        match id {
            GT_MODEL_TYPE_KEY => keys.model_type = Some(value),
            GT_RASTER_TYPE_KEY => keys.raster_type = Some(value),
            GEOGRAPHIC_TYPE_KEY => keys.geographic_type = Some(value),
            PROJECTED_CS_TYPE_KEY => keys.projected_type = Some(value),
            _ => {}
        }
    }
    keys
}

fn read_geotransform<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    keys: &GeoKeys,
    path: &Path,
) -> Result<[f64; 6]> {
    if let Ok(m) = decoder.get_tag_f64_vec(tag(MODEL_TRANSFORMATION)) {
        if m.len() >= 16 {
            return Ok([m[3], m[0], m[1], m[7], m[4], m[5]]);
        }
    }

    let tiepoint = decoder.get_tag_f64_vec(tag(MODEL_TIEPOINT));
    let scale = decoder.get_tag_f64_vec(tag(MODEL_PIXEL_SCALE));
    let (Ok(tiepoint), Ok(scale)) = (tiepoint, scale) else {
        return Err(decode_error(path, "missing georeferencing tags"));
    };
    if tiepoint.len() < 6 || scale.len() < 2 {
        return Err(decode_error(path, "malformed georeferencing tags"));
    }

    // Tiepoint: [i, j, k, x, y, z] ties raster (i, j) to model (x, y).
    let (sx, sy) = (scale[0], scale[1]);
    let mut origin_x = tiepoint[3] - tiepoint[0] * sx;
    let mut origin_y = tiepoint[4] + tiepoint[1] * sy;

    // Point-sampled rasters are tied at pixel centers.
    if keys.raster_type == Some(RASTER_PIXEL_IS_POINT) {
        origin_x -= 0.5 * sx;
        origin_y += 0.5 * sy;
    }

    Ok([origin_x, sx, 0.0, origin_y, 0.0, -sy])
}

fn resolve_crs(keys: &GeoKeys, path: &Path) -> Result<Crs> {
    let unsupported = |reason: String| TerrainError::UnsupportedCrs {
        path: path.to_path_buf(),
        reason,
    };

    // Untagged rasters are taken to be plain longitude/latitude grids.
    if !keys.present {
        return Ok(Crs::Wgs84);
    }

    if let Some(code) = keys.projected_type {
        return Crs::from_epsg(code).ok_or_else(|| unsupported(format!("EPSG:{}", code)));
    }
    if keys.model_type == Some(MODEL_TYPE_PROJECTED) {
        return Err(unsupported("projected model without an EPSG code".to_string()));
    }
    match keys.geographic_type {
        Some(4326) | None => Ok(Crs::Wgs84),
        Some(code) => Err(unsupported(format!("EPSG:{}", code))),
    }
}

fn read_nodata<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f32> {
    // GDAL stores the value as a (possibly NUL-terminated) ASCII string.
    decoder
        .get_tag_ascii_string(tag(GDAL_NODATA))
        .ok()
        .and_then(|s| s.trim_end_matches('\0').trim().parse().ok())
}

fn to_f32(result: DecodingResult) -> Vec<f32> {
    match result {
        DecodingResult::F32(data) => data,
        DecodingResult::F64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I16(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::I32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U16(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::U32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U8(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::I8(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f32).collect(),
    }
}

/// Keep band 1 of pixel-interleaved data.
fn first_band(samples: Vec<f32>, pixels: usize, path: &Path) -> Result<Vec<f32>> {
    if pixels == 0 || samples.len() % pixels != 0 {
        return Err(decode_error(
            path,
            format!("expected a multiple of {} samples, got {}", pixels, samples.len()),
        ));
    }
    let bands = samples.len() / pixels;
    if bands == 1 {
        return Ok(samples);
    }
    Ok(samples.into_iter().step_by(bands).collect())
}

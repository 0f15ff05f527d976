//! Synthetic single-band GeoTIFF writer.
//!
//! Depends only on `tiff`, so the unit tests, integration tests and benches
//! can all include it.
#![allow(dead_code)]

use std::f64::consts::PI;
use std::fs::File;
use std::path::Path;

use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

const HALF_WORLD: f64 = 6_378_137.0 * PI;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

/// Layout of a synthetic GeoTIFF.
pub struct GeoTiffSpec {
    pub rows: u32,
    pub cols: u32,
    /// Forward geotransform; must be north-up.
    pub transform: [f64; 6],
    /// `None` writes no GeoKey directory at all.
    pub epsg: Option<u16>,
    pub nodata: Option<&'static str>,
}

impl GeoTiffSpec {
    /// A square EPSG:3857 raster covering `{zoom}/{x}/{y}`.
    pub fn mercator_tile(zoom: u8, x: u32, y: u32, size: u32) -> Self {
        Self {
            rows: size,
            cols: size,
            transform: mercator_tile_transform(zoom, x, y, size),
            epsg: Some(3857),
            nodata: None,
        }
    }
}

/// Write a `f32` GeoTIFF where `value(row, col)` gives each sample.
pub fn write_geotiff(path: &Path, spec: &GeoTiffSpec, value: impl Fn(u32, u32) -> f32) {
    let t = spec.transform;
    let mut data = Vec::with_capacity((spec.rows * spec.cols) as usize);
    for row in 0..spec.rows {
        for col in 0..spec.cols {
            data.push(value(row, col));
        }
    }

    let file = File::create(path).unwrap();
    let mut encoder = TiffEncoder::new(file).unwrap();
    let mut image = encoder
        .new_image::<colortype::Gray32Float>(spec.cols, spec.rows)
        .unwrap();

    let tiepoint = [0.0, 0.0, 0.0, t[0], t[3], 0.0];
    let scale = [t[1], -t[5], 0.0];
    image
        .encoder()
        .write_tag(Tag::from_u16_exhaustive(MODEL_TIEPOINT), &tiepoint[..])
        .unwrap();
    image
        .encoder()
        .write_tag(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE), &scale[..])
        .unwrap();

    if let Some(code) = spec.epsg {
        let directory: [u16; 12] = if code == 4326 {
            [1, 1, 0, 2, 1024, 0, 1, 2, 2048, 0, 1, code]
        } else {
            [1, 1, 0, 2, 1024, 0, 1, 1, 3072, 0, 1, code]
        };
        image
            .encoder()
            .write_tag(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY), &directory[..])
            .unwrap();
    }
    if let Some(nodata) = spec.nodata {
        image
            .encoder()
            .write_tag(Tag::from_u16_exhaustive(GDAL_NODATA), nodata)
            .unwrap();
    }

    image.write_data(&data).unwrap();
}

/// Web Mercator geotransform of a standard `{z}/{x}/{y}` tile `size` pixels wide.
pub fn mercator_tile_transform(zoom: u8, x: u32, y: u32, size: u32) -> [f64; 6] {
    let span = 2.0 * HALF_WORLD / 2f64.powi(zoom as i32);
    let pixel = span / size as f64;
    [
        -HALF_WORLD + x as f64 * span,
        pixel,
        0.0,
        HALF_WORLD - y as f64 * span,
        0.0,
        -pixel,
    ]
}

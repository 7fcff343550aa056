#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use globcoh::io::{GeoReference, RasterData};

/// North-up geographic grid with its upper-left corner at (`lon`, `lat`).
pub fn georef(lon: f64, lat: f64, pixel: f64) -> GeoReference {
    GeoReference {
        geotransform: [lon, pixel, 0.0, lat, 0.0, -pixel],
        projection: "EPSG:4326".to_string(),
    }
}

/// Every file below `dir` with its size, sorted; used to prove a run
/// touched nothing.
pub fn snapshot(dir: &Path) -> Vec<(PathBuf, u64)> {
    let mut out = Vec::new();
    walk(dir, &mut out);
    out.sort();
    out
}

fn walk(dir: &Path, out: &mut Vec<(PathBuf, u64)>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            out.push((path.clone(), 0));
            walk(&path, out);
        } else {
            let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
            out.push((path, len));
        }
    }
}

pub fn u8_row(values: &[u8]) -> RasterData {
    RasterData::U8(ndarray::Array2::from_shape_vec((1, values.len()), values.to_vec()).unwrap())
}

pub fn u16_row(values: &[u16]) -> RasterData {
    RasterData::U16(ndarray::Array2::from_shape_vec((1, values.len()), values.to_vec()).unwrap())
}

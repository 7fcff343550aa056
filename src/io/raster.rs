//! Raster backend abstraction.
//!
//! Pipelines only talk to rasters through [`RasterBackend`]: describing and
//! reading single-band files, building mosaics, and writing outputs. The
//! GDAL implementation lives in [`crate::io::gdal`]; [`crate::io::memory`]
//! keeps rasters in memory.
use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Sample type of a raster band.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum SampleType {
    U8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl SampleType {
    /// GDAL data type name, as used in VRT manifests.
    pub fn gdal_name(self) -> &'static str {
        match self {
            SampleType::U8 => "Byte",
            SampleType::U16 => "UInt16",
            SampleType::I16 => "Int16",
            SampleType::U32 => "UInt32",
            SampleType::I32 => "Int32",
            SampleType::F32 => "Float32",
            SampleType::F64 => "Float64",
        }
    }
}

/// Affine geotransform plus spatial reference of a raster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoReference {
    /// [origin_x, pixel_width, rot_x, origin_y, rot_y, pixel_height]
    pub geotransform: [f64; 6],
    /// Projection in WKT (may be empty)
    pub projection: String,
}

impl GeoReference {
    pub fn pixel_width(&self) -> f64 {
        self.geotransform[1]
    }

    pub fn pixel_height(&self) -> f64 {
        self.geotransform[5]
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RasterInfo {
    pub cols: usize,
    pub rows: usize,
    pub sample_type: SampleType,
    pub georef: GeoReference,
    pub nodata: Option<f64>,
}

/// A single band read into memory, with its description.
#[derive(Clone, Debug)]
pub struct RasterGrid {
    pub info: RasterInfo,
    pub data: Array2<f32>,
}

/// Band data to be written, in its output sample type.
#[derive(Clone, Debug, PartialEq)]
pub enum RasterData {
    U8(Array2<u8>),
    U16(Array2<u16>),
    I16(Array2<i16>),
    U32(Array2<u32>),
    I32(Array2<i32>),
    F32(Array2<f32>),
    F64(Array2<f64>),
}

/// Truncate toward zero and clamp into `[min, max]`; non-finite values
/// become 0.
fn saturate(v: f32, min: f64, max: f64) -> f64 {
    if v.is_finite() { (v as f64).trunc().clamp(min, max) } else { 0.0 }
}

impl RasterData {
    pub fn dim(&self) -> (usize, usize) {
        match self {
            RasterData::U8(a) => a.dim(),
            RasterData::U16(a) => a.dim(),
            RasterData::I16(a) => a.dim(),
            RasterData::U32(a) => a.dim(),
            RasterData::I32(a) => a.dim(),
            RasterData::F32(a) => a.dim(),
            RasterData::F64(a) => a.dim(),
        }
    }

    pub fn sample_type(&self) -> SampleType {
        match self {
            RasterData::U8(_) => SampleType::U8,
            RasterData::U16(_) => SampleType::U16,
            RasterData::I16(_) => SampleType::I16,
            RasterData::U32(_) => SampleType::U32,
            RasterData::I32(_) => SampleType::I32,
            RasterData::F32(_) => SampleType::F32,
            RasterData::F64(_) => SampleType::F64,
        }
    }

    /// Convert floating values into `sample_type`. Integer targets truncate
    /// toward zero and saturate.
    pub fn from_f32(values: Array2<f32>, sample_type: SampleType) -> RasterData {
        match sample_type {
            SampleType::U8 => RasterData::U8(values.mapv(|v| saturate(v, 0.0, u8::MAX as f64) as u8)),
            SampleType::U16 => RasterData::U16(values.mapv(|v| saturate(v, 0.0, u16::MAX as f64) as u16)),
            SampleType::I16 => {
                RasterData::I16(values.mapv(|v| saturate(v, i16::MIN as f64, i16::MAX as f64) as i16))
            }
            SampleType::U32 => RasterData::U32(values.mapv(|v| saturate(v, 0.0, u32::MAX as f64) as u32)),
            SampleType::I32 => {
                RasterData::I32(values.mapv(|v| saturate(v, i32::MIN as f64, i32::MAX as f64) as i32))
            }
            SampleType::F32 => RasterData::F32(values),
            SampleType::F64 => RasterData::F64(values.mapv(f64::from)),
        }
    }

    pub fn to_f32(&self) -> Array2<f32> {
        match self {
            RasterData::U8(a) => a.mapv(f32::from),
            RasterData::U16(a) => a.mapv(f32::from),
            RasterData::I16(a) => a.mapv(f32::from),
            RasterData::U32(a) => a.mapv(|v| v as f32),
            RasterData::I32(a) => a.mapv(|v| v as f32),
            RasterData::F32(a) => a.clone(),
            RasterData::F64(a) => a.mapv(|v| v as f32),
        }
    }
}

/// Options for writing an output raster.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WriteOptions {
    pub nodata: f64,
    /// Replace an existing file instead of failing with `OutputExists`
    pub overwrite: bool,
    /// `(key, value)` pairs embedded as dataset metadata
    pub metadata: Vec<(String, String)>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            nodata: 0.0,
            overwrite: false,
            metadata: Vec::new(),
        }
    }
}

pub trait RasterBackend: Send + Sync {
    fn describe(&self, path: &Path) -> Result<RasterInfo>;

    /// Read band 1 of `path`.
    fn read_band(&self, path: &Path) -> Result<RasterGrid>;

    /// Write a mosaic manifest at `dst` referencing `files` in order, with
    /// `nodata` honored on sources and destination.
    fn build_mosaic(&self, files: &[PathBuf], nodata: f64, dst: &Path) -> Result<()>;

    /// Write one or more equally sized bands as a compressed raster.
    fn write(&self, path: &Path, bands: &[RasterData], georef: &GeoReference, options: &WriteOptions) -> Result<()>;

    /// Materialize `src` (typically a mosaic manifest) as a compressed raster
    /// at `dst`, keeping its sample type and georeference.
    fn translate(&self, src: &Path, dst: &Path, options: &WriteOptions) -> Result<()>;

    fn build_overviews(&self, path: &Path, levels: &[u32]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn float_values_saturate_into_integer_types() {
        let values = array![[0.0f32, 12.9], [300.0, f32::NAN]];
        assert_eq!(
            RasterData::from_f32(values.clone(), SampleType::U8),
            RasterData::U8(array![[0, 12], [255, 0]])
        );
        assert_eq!(
            RasterData::from_f32(values, SampleType::U16),
            RasterData::U16(array![[0, 12], [300, 0]])
        );
    }

    #[test]
    fn signed_and_wide_types_are_kept() {
        let values = array![[-40000.0f32, -12.9], [40000.0, f32::INFINITY]];
        assert_eq!(
            RasterData::from_f32(values.clone(), SampleType::I16),
            RasterData::I16(array![[i16::MIN, -12], [i16::MAX, 0]])
        );
        assert_eq!(
            RasterData::from_f32(values.clone(), SampleType::I32),
            RasterData::I32(array![[-40000, -12], [40000, 0]])
        );
        assert_eq!(
            RasterData::from_f32(values.clone(), SampleType::U32),
            RasterData::U32(array![[0, 0], [40000, 0]])
        );
        let wide = RasterData::from_f32(values, SampleType::F64);
        assert_eq!(wide.sample_type(), SampleType::F64);
        assert_eq!(wide.dim(), (2, 2));
    }
}

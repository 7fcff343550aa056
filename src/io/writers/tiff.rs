use gdal::raster::{Buffer, GdalType, RasterCreationOptions};
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};
use crate::io::GdalError;
use crate::io::raster::{GeoReference, RasterData, WriteOptions};
use crate::io::writers::metadata::{embed_tiff_metadata, output_metadata};

/// GTiff creation options for every output raster.
pub const CREATION_OPTIONS: [&str; 3] = ["COMPRESS=LZW", "TILED=YES", "INTERLEAVE=BAND"];

fn create_with_bands<T: GdalType + Copy>(
    output: &Path,
    bands: &[&Array2<T>],
    nodata: f64,
) -> std::result::Result<Dataset, GdalError> {
    let (rows, cols) = bands[0].dim();
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let options = RasterCreationOptions::from_iter(CREATION_OPTIONS);
    let ds = driver.create_with_band_type_with_options::<T, _>(output, cols, rows, bands.len(), &options)?;
    for (idx, data) in bands.iter().enumerate() {
        let mut band = ds.rasterband(idx + 1)?;
        band.set_no_data_value(Some(nodata))?;
        let mut buf = Buffer::new((cols, rows), data.iter().copied().collect());
        band.write((0, 0), (cols, rows), &mut buf)?;
    }
    Ok(ds)
}

/// Create the dataset from bands that all hold the variant `pick` accepts.
fn create_typed<'a, T: GdalType + Copy>(
    output: &Path,
    bands: &'a [RasterData],
    pick: fn(&'a RasterData) -> Option<&'a Array2<T>>,
    nodata: f64,
) -> std::result::Result<Dataset, GdalError> {
    let arrays: Vec<&Array2<T>> = bands
        .iter()
        .map(pick)
        .collect::<Option<_>>()
        .ok_or_else(|| GdalError::UnsupportedFormat("bands of mixed sample types".into()))?;
    create_with_bands(output, &arrays, nodata)
}

/// Write equally sized bands of one sample type as a tiled, LZW-compressed
/// GeoTIFF with no-data, georeference and provenance tags set.
pub fn write_geotiff(path: &Path, bands: &[RasterData], georef: &GeoReference, options: &WriteOptions) -> Result<()> {
    let first = bands
        .first()
        .ok_or_else(|| Error::Processing(format!("no bands to write to {:?}", path)))?;
    let (rows, cols) = first.dim();
    if let Some(bad) = bands.iter().find(|b| b.dim() != (rows, cols)) {
        let (r, c) = bad.dim();
        return Err(Error::DimensionMismatch {
            expected_rows: rows,
            expected_cols: cols,
            rows: r,
            cols: c,
        });
    }
    if path.exists() {
        if !options.overwrite {
            return Err(Error::OutputExists { path: path.to_path_buf() });
        }
        std::fs::remove_file(path)?;
    }

    let nodata = options.nodata;
    let mut ds = match first {
        RasterData::U8(_) => create_typed(path, bands, |b| if let RasterData::U8(a) = b { Some(a) } else { None }, nodata)?,
        RasterData::U16(_) => create_typed(path, bands, |b| if let RasterData::U16(a) = b { Some(a) } else { None }, nodata)?,
        RasterData::I16(_) => create_typed(path, bands, |b| if let RasterData::I16(a) = b { Some(a) } else { None }, nodata)?,
        RasterData::U32(_) => create_typed(path, bands, |b| if let RasterData::U32(a) = b { Some(a) } else { None }, nodata)?,
        RasterData::I32(_) => create_typed(path, bands, |b| if let RasterData::I32(a) = b { Some(a) } else { None }, nodata)?,
        RasterData::F32(_) => create_typed(path, bands, |b| if let RasterData::F32(a) = b { Some(a) } else { None }, nodata)?,
        RasterData::F64(_) => create_typed(path, bands, |b| if let RasterData::F64(a) = b { Some(a) } else { None }, nodata)?,
    };
    embed_tiff_metadata(&mut ds, Some(georef), &output_metadata(&options.metadata))?;
    debug!("Wrote {}x{} {:?} raster {:?}", cols, rows, first.sample_type(), path);
    Ok(())
}

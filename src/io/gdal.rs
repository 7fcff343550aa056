use gdal::programs::raster::{BuildVRTOptions, build_vrt};
use gdal::raster::{GdalDataType, RasterCreationOptions};
use gdal::{Dataset, DatasetOptions, DriverManager, GdalOpenFlags, errors::GdalError as GdalCrateError};
use ndarray::Array2;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::error::{Error, Result};
use crate::io::raster::{
    GeoReference, RasterBackend, RasterData, RasterGrid, RasterInfo, SampleType, WriteOptions,
};
use crate::io::writers;

/// Errors encountered when using GDAL rasters
#[derive(Debug, Error)]
pub enum GdalError {
    #[error("GDAL error: {0}")]
    Gdal(#[from] GdalCrateError),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Dimension mismatch: expected {0}x{1}, got {2}x{3}")]
    DimensionMismatch(usize, usize, usize, usize),
}

// Helper to extract EPSG code from WKT authority tag
fn parse_epsg(wkt: &str) -> Option<String> {
    const KEY: &str = "AUTHORITY[\"EPSG\",\"";
    if let Some(idx) = wkt.rfind(KEY) {
        let start = idx + KEY.len();
        if let Some(end) = wkt[start..].find('"') {
            let code = &wkt[start..start + end];
            return Some(format!("EPSG:{}", code));
        }
    }
    None
}

fn sample_type(dtype: GdalDataType) -> std::result::Result<SampleType, GdalError> {
    match dtype {
        GdalDataType::UInt8 => Ok(SampleType::U8),
        GdalDataType::UInt16 => Ok(SampleType::U16),
        GdalDataType::Int16 => Ok(SampleType::I16),
        GdalDataType::UInt32 => Ok(SampleType::U32),
        GdalDataType::Int32 => Ok(SampleType::I32),
        GdalDataType::Float32 => Ok(SampleType::F32),
        GdalDataType::Float64 => Ok(SampleType::F64),
        other => Err(GdalError::UnsupportedFormat(format!("sample type {:?}", other))),
    }
}

fn describe_dataset(dataset: &Dataset) -> std::result::Result<RasterInfo, GdalError> {
    if dataset.raster_count() == 0 {
        return Err(GdalError::UnsupportedFormat("No raster bands found".into()));
    }
    let (cols, rows) = dataset.raster_size();
    let band = dataset.rasterband(1)?;
    let geotransform = dataset.geo_transform().unwrap_or([0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
    let proj = dataset.projection();
    let projection = if proj.starts_with("EPSG:") {
        proj
    } else if let Some(code) = parse_epsg(&proj) {
        code
    } else {
        proj
    };
    Ok(RasterInfo {
        cols,
        rows,
        sample_type: sample_type(band.band_type())?,
        georef: GeoReference {
            geotransform,
            projection,
        },
        nodata: band.no_data_value(),
    })
}

fn read_first_band(path: &Path) -> std::result::Result<RasterGrid, GdalError> {
    let dataset = Dataset::open(path)?;
    let info = describe_dataset(&dataset)?;
    let band = dataset.rasterband(1)?;
    let window = (info.cols, info.rows);
    let buf = band.read_as::<f32>((0, 0), window, window, None)?;
    let data = Array2::from_shape_vec((info.rows, info.cols), buf.data().to_vec())
        .map_err(|_| GdalError::DimensionMismatch(info.cols, info.rows, buf.shape().0, buf.shape().1))?;
    Ok(RasterGrid { info, data })
}

/// `gdalbuildvrt` arguments honoring `nodata` on the sources and the mosaic.
fn build_vrt_args(nodata: f64) -> Vec<String> {
    vec![
        "-srcnodata".to_string(),
        nodata.to_string(),
        "-vrtnodata".to_string(),
        nodata.to_string(),
    ]
}

fn mosaic(files: &[PathBuf], nodata: f64, dst: &Path) -> std::result::Result<(), GdalError> {
    let sources = files.iter().map(Dataset::open).collect::<std::result::Result<Vec<_>, _>>()?;
    let options = BuildVRTOptions::new(build_vrt_args(nodata))?;
    // the manifest is flushed to `dst` when the returned dataset closes
    let vrt = build_vrt(Some(dst), &sources, Some(options))?;
    drop(vrt);
    debug!("Built {:?} from {} rasters", dst, files.len());
    Ok(())
}

// VRTs are opened read-only so GDAL writes an external .ovr next to them.
fn overviews(path: &Path, levels: &[u32]) -> std::result::Result<(), GdalError> {
    let is_vrt = path.extension().is_some_and(|e| e.eq_ignore_ascii_case("vrt"));
    let mut open_flags = GdalOpenFlags::GDAL_OF_RASTER;
    if !is_vrt {
        open_flags |= GdalOpenFlags::GDAL_OF_UPDATE;
    }
    let mut dataset = Dataset::open_ex(
        path,
        DatasetOptions {
            open_flags,
            ..Default::default()
        },
    )?;
    let levels: Vec<i32> = levels.iter().map(|&l| l as i32).collect();
    dataset.build_overviews("AVERAGE", &levels, &[])?;
    Ok(())
}

fn translate_to_geotiff(src: &Path, dst: &Path, options: &WriteOptions) -> std::result::Result<(), GdalError> {
    let source = Dataset::open(src)?;
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let creation = RasterCreationOptions::from_iter(writers::tiff::CREATION_OPTIONS);
    let mut copy = source.create_copy(&driver, dst, &creation)?;
    writers::metadata::embed_tiff_metadata(&mut copy, None, &writers::metadata::output_metadata(&options.metadata))?;
    Ok(())
}

/// Raster backend over GDAL. Mosaics are built by GDAL's BuildVRT, outputs
/// written as tiled LZW GeoTIFFs.
#[derive(Debug, Default, Clone, Copy)]
pub struct GdalBackend;

impl RasterBackend for GdalBackend {
    fn describe(&self, path: &Path) -> Result<RasterInfo> {
        let dataset = Dataset::open(path).map_err(GdalError::from)?;
        Ok(describe_dataset(&dataset)?)
    }

    fn read_band(&self, path: &Path) -> Result<RasterGrid> {
        debug!("Reading band 1 of {:?}", path);
        Ok(read_first_band(path)?)
    }

    fn build_mosaic(&self, files: &[PathBuf], nodata: f64, dst: &Path) -> Result<()> {
        Ok(mosaic(files, nodata, dst)?)
    }

    fn write(&self, path: &Path, bands: &[RasterData], georef: &GeoReference, options: &WriteOptions) -> Result<()> {
        writers::tiff::write_geotiff(path, bands, georef, options)
    }

    fn translate(&self, src: &Path, dst: &Path, options: &WriteOptions) -> Result<()> {
        if dst.exists() {
            if !options.overwrite {
                return Err(Error::OutputExists { path: dst.to_path_buf() });
            }
            std::fs::remove_file(dst)?;
        }
        Ok(translate_to_geotiff(src, dst, options)?)
    }

    fn build_overviews(&self, path: &Path, levels: &[u32]) -> Result<()> {
        Ok(overviews(path, levels)?)
    }
}

//! In-memory raster backend.
//!
//! Rasters are addressed by file name, so a source registered once resolves
//! wherever a sync copies it. Every raster also exists on disk as a small
//! file holding its pixel bytes, which keeps existence checks, stores and
//! byte comparisons working without GDAL. Mosaics are written as real VRT
//! manifests and read back by composing their sources.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use ndarray::Array2;

use crate::error::{Error, Result};
use crate::io::raster::{
    GeoReference, RasterBackend, RasterData, RasterGrid, RasterInfo, WriteOptions,
};
use crate::io::vrt::{self, MosaicLayout};

#[derive(Clone, Debug)]
pub struct StoredRaster {
    pub info: RasterInfo,
    pub bands: Vec<RasterData>,
    pub metadata: Vec<(String, String)>,
}

#[derive(Default)]
struct State {
    rasters: HashMap<String, StoredRaster>,
    mosaics: HashMap<String, MosaicLayout>,
    overviews: HashMap<String, Vec<u32>>,
}

#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

fn key(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::InvalidPath { path: path.to_path_buf() })
}

fn pixel_bytes(bands: &[RasterData]) -> Vec<u8> {
    bands
        .iter()
        .flat_map(|b| b.to_f32().into_iter().flat_map(f32::to_le_bytes))
        .collect()
}

fn touch(path: &Path, bands: &[RasterData]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, pixel_bytes(bands))?;
    Ok(())
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::Processing("memory backend lock poisoned".into()))
    }

    /// Register a source raster and create its file at `path`.
    pub fn add_source(&self, path: &Path, georef: GeoReference, data: RasterData) -> Result<()> {
        let (rows, cols) = data.dim();
        let info = RasterInfo {
            cols,
            rows,
            sample_type: data.sample_type(),
            georef,
            nodata: Some(0.0),
        };
        touch(path, std::slice::from_ref(&data))?;
        self.state()?.rasters.insert(
            key(path)?,
            StoredRaster {
                info,
                bands: vec![data],
                metadata: Vec::new(),
            },
        );
        Ok(())
    }

    /// The raster last written (or registered) under the file name of `path`.
    pub fn raster(&self, path: &Path) -> Option<StoredRaster> {
        let name = key(path).ok()?;
        self.state().ok()?.rasters.get(&name).cloned()
    }

    pub fn overview_levels(&self, path: &Path) -> Option<Vec<u32>> {
        let name = key(path).ok()?;
        self.state().ok()?.overviews.get(&name).cloned()
    }
}

impl RasterBackend for MemoryBackend {
    fn describe(&self, path: &Path) -> Result<RasterInfo> {
        let name = key(path)?;
        let state = self.state()?;
        if let Some(raster) = state.rasters.get(&name) {
            return Ok(raster.info.clone());
        }
        if let Some(layout) = state.mosaics.get(&name) {
            return Ok(RasterInfo {
                cols: layout.cols,
                rows: layout.rows,
                sample_type: layout.sample_type,
                georef: layout.georef.clone(),
                nodata: Some(0.0),
            });
        }
        Err(Error::InvalidPath { path: path.to_path_buf() })
    }

    fn read_band(&self, path: &Path) -> Result<RasterGrid> {
        let info = self.describe(path)?;
        let name = key(path)?;
        let layout = {
            let state = self.state()?;
            if let Some(raster) = state.rasters.get(&name) {
                let data = raster
                    .bands
                    .first()
                    .map(RasterData::to_f32)
                    .ok_or_else(|| Error::Processing(format!("{} has no bands", name)))?;
                return Ok(RasterGrid { info, data });
            }
            state.mosaics.get(&name).cloned()
        };
        let layout = layout.ok_or_else(|| Error::InvalidPath { path: path.to_path_buf() })?;
        let grids = layout
            .sources
            .iter()
            .map(|s| Ok(self.read_band(&s.path)?.data))
            .collect::<Result<Vec<Array2<f32>>>>()?;
        let data = layout.compose(&grids, 0.0)?;
        Ok(RasterGrid { info, data })
    }

    fn build_mosaic(&self, files: &[PathBuf], nodata: f64, dst: &Path) -> Result<()> {
        let sources = files
            .iter()
            .map(|f| Ok((f.clone(), self.describe(f)?)))
            .collect::<Result<Vec<_>>>()?;
        let layout = vrt::write_vrt(&sources, nodata, dst)?;
        self.state()?.mosaics.insert(key(dst)?, layout);
        Ok(())
    }

    fn write(&self, path: &Path, bands: &[RasterData], georef: &GeoReference, options: &WriteOptions) -> Result<()> {
        let first = bands
            .first()
            .ok_or_else(|| Error::Processing(format!("no bands to write to {:?}", path)))?;
        let (rows, cols) = first.dim();
        if path.exists() && !options.overwrite {
            return Err(Error::OutputExists { path: path.to_path_buf() });
        }
        touch(path, bands)?;
        let raster = StoredRaster {
            info: RasterInfo {
                cols,
                rows,
                sample_type: first.sample_type(),
                georef: georef.clone(),
                nodata: Some(options.nodata),
            },
            bands: bands.to_vec(),
            metadata: options.metadata.clone(),
        };
        self.state()?.rasters.insert(key(path)?, raster);
        Ok(())
    }

    fn translate(&self, src: &Path, dst: &Path, options: &WriteOptions) -> Result<()> {
        let grid = self.read_band(src)?;
        let data = RasterData::from_f32(grid.data, grid.info.sample_type);
        self.write(dst, &[data], &grid.info.georef, options)
    }

    fn build_overviews(&self, path: &Path, levels: &[u32]) -> Result<()> {
        if !path.exists() {
            return Err(Error::InvalidPath { path: path.to_path_buf() });
        }
        self.state()?.overviews.insert(key(path)?, levels.to_vec());
        Ok(())
    }
}

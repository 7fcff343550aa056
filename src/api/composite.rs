//! Per-tile seasonal compositing.
//!
//! For one tile: seasonal coherence medians per repeat interval (co-pol),
//! seasonal amplitude means (all polarizations), the per-pixel
//! coherence-decay model per co-pol season, and per-track geometry layers.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ndarray::{Array2, Axis, concatenate};
use serde::Serialize;
use tempfile::TempDir;
use tracing::{info, warn};

use super::RunContext;
use crate::core::acquisition::{AcquisitionDates, AcquisitionFile, AcquisitionKey, LayerKind, group_pieces, scan_directory};
use crate::core::params::CompositeParams;
use crate::core::processing::composite::{masked_mean, masked_median, quantize_u8, stack_bands, to_coherence};
use crate::core::processing::decay::{DecayParams, FitOptions, encode_parameter, fit_stack, residual_spread};
use crate::core::tiles::Tile;
use crate::error::{Error, Result};
use crate::io::raster::{GeoReference, RasterBackend, RasterData, RasterGrid, SampleType, WriteOptions};
use crate::io::store::{Location, ObjectStore, SyncFilter};
use crate::types::{Polarization, Product, RepeatInterval, Season};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum OutputKind {
    Coherence,
    Amplitude,
    Model,
    Geometry,
}

/// One output raster and the number of acquisitions it is derived from.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlannedOutput {
    pub path: PathBuf,
    pub kind: OutputKind,
    pub inputs: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CompositeReport {
    pub tile: String,
    pub outputs: Vec<PlannedOutput>,
    /// Coherence pairs whose repeat interval is not composited
    pub skipped_pairs: usize,
    /// Output groups that failed, e.g. `winter_vv_COH` or `153D_inc`; the
    /// tile went on without them
    pub failed: Vec<String>,
}

impl CompositeReport {
    pub fn paths(&self, kind: OutputKind) -> Vec<&Path> {
        self.outputs
            .iter()
            .filter(|o| o.kind == kind)
            .map(|o| o.path.as_path())
            .collect()
    }
}

/// One logical acquisition: its key and the pieces that make it up.
#[derive(Clone, Debug)]
struct Acquisition {
    key: AcquisitionKey,
    pieces: Vec<PathBuf>,
}

/// Inputs of one tile, grouped the way outputs are produced.
#[derive(Debug, Default)]
struct TileInputs {
    /// (pol, season) → interval → pairs
    coherence: BTreeMap<(Polarization, Season), BTreeMap<RepeatInterval, Vec<Acquisition>>>,
    amplitude: BTreeMap<(Polarization, Season), Vec<Acquisition>>,
    /// (track, kind) → pieces
    geometry: BTreeMap<(String, LayerKind), Acquisition>,
    skipped_pairs: usize,
}

fn group_inputs(files: &[AcquisitionFile]) -> TileInputs {
    let mut inputs = TileInputs::default();
    for (key, pieces) in group_pieces(files) {
        let acquisition = Acquisition {
            key: key.clone(),
            pieces,
        };
        match (key.kind, key.polarization, key.dates) {
            (LayerKind::Coh, Some(pol), dates @ AcquisitionDates::Pair(a, b)) if pol.is_copol() => {
                let (Some(interval), Some(season)) = (dates.repeat_interval(), dates.season()) else {
                    warn!("Skipping {}-{} pair: {} days is not a composited repeat interval", a, b, (b - a).num_days().abs());
                    inputs.skipped_pairs += 1;
                    continue;
                };
                inputs
                    .coherence
                    .entry((pol, season))
                    .or_default()
                    .entry(interval)
                    .or_default()
                    .push(acquisition);
            }
            (LayerKind::Coh, _, _) => {
                warn!("Skipping cross-pol coherence {:?}", acquisition.pieces);
                inputs.skipped_pairs += 1;
            }
            (LayerKind::Amp, Some(pol), dates @ AcquisitionDates::Single(_)) => {
                if let Some(season) = dates.season() {
                    inputs.amplitude.entry((pol, season)).or_default().push(acquisition);
                }
            }
            (kind, _, _) if kind.is_geometry() => {
                if let Some(track) = key.track.clone() {
                    inputs.geometry.insert((track, kind), acquisition);
                }
            }
            _ => {}
        }
    }
    inputs
}

fn output_path(dir: &Path, tile: &Tile, season: Season, pol: Polarization, product: Product) -> PathBuf {
    dir.join(format!("{}_{}_{}_{}.tif", tile, season, pol, product))
}

/// Every output raster a run over `files` produces, in production order.
pub fn plan_composites(files: &[AcquisitionFile], tile: &Tile, outdir: &Path, model: bool) -> Vec<PlannedOutput> {
    plan_from(&group_inputs(files), tile, outdir, model)
}

fn plan_from(inputs: &TileInputs, tile: &Tile, outdir: &Path, model: bool) -> Vec<PlannedOutput> {
    let mut planned = Vec::new();
    for ((track, kind), acq) in &inputs.geometry {
        planned.push(PlannedOutput {
            path: outdir.join(format!("{}_{}_{}.tif", tile, track, kind.as_str())),
            kind: OutputKind::Geometry,
            inputs: acq.pieces.len(),
        });
    }
    for ((pol, season), by_interval) in &inputs.coherence {
        for (interval, pairs) in by_interval {
            planned.push(PlannedOutput {
                path: output_path(outdir, tile, *season, *pol, Product::Coh(*interval)),
                kind: OutputKind::Coherence,
                inputs: pairs.len(),
            });
        }
        if model {
            let n: usize = by_interval.values().map(Vec::len).sum();
            for product in [Product::Rho, Product::Tau, Product::Rmse] {
                planned.push(PlannedOutput {
                    path: output_path(outdir, tile, *season, *pol, product),
                    kind: OutputKind::Model,
                    inputs: n,
                });
            }
        }
    }
    for ((pol, season), acquisitions) in &inputs.amplitude {
        planned.push(PlannedOutput {
            path: output_path(outdir, tile, *season, *pol, Product::Amp),
            kind: OutputKind::Amplitude,
            inputs: acquisitions.len(),
        });
    }
    planned
}

fn mosaic_name(tile: &Tile, key: &AcquisitionKey) -> String {
    let dates = match key.dates {
        AcquisitionDates::Static => String::new(),
        AcquisitionDates::Single(d) => format!("_{}", d.format("%Y%m%d")),
        AcquisitionDates::Pair(a, b) => format!("_{}_{}", a.format("%Y%m%d"), b.format("%Y%m%d")),
    };
    let track = key.track.as_deref().map(|t| format!("_{}", t)).unwrap_or_default();
    let pol = key.polarization.map(|p| format!("_{}", p)).unwrap_or_default();
    format!("{}{}{}{}_{}.vrt", tile, track, dates, pol, key.kind.as_str())
}

/// Compositing state for one tile run.
struct Compositor<'a> {
    tile: Tile,
    backend: &'a dyn RasterBackend,
    scratch: &'a Path,
    outdir: &'a Path,
    options: WriteOptions,
}

impl Compositor<'_> {
    /// Path readable as a single raster: the piece itself, or a mosaic of
    /// all pieces.
    fn source(&self, acq: &Acquisition) -> Result<PathBuf> {
        match acq.pieces.as_slice() {
            [single] => Ok(single.clone()),
            pieces => {
                let vrt = self.scratch.join(mosaic_name(&self.tile, &acq.key));
                self.backend.build_mosaic(pieces, 0.0, &vrt)?;
                Ok(vrt)
            }
        }
    }

    fn read(&self, acq: &Acquisition) -> Result<RasterGrid> {
        let path = self.source(acq)?;
        self.backend.read_band(&path)
    }

    /// Read acquisitions into an `observations × pixels` stack, with the
    /// grid shape and georeference of the first.
    fn read_stack(&self, acquisitions: &[Acquisition]) -> Result<(Array2<f32>, (usize, usize), GeoReference, SampleType)> {
        let grids = acquisitions.iter().map(|a| self.read(a)).collect::<Result<Vec<_>>>()?;
        let first = grids
            .first()
            .ok_or_else(|| Error::Processing("no acquisitions to stack".into()))?;
        let shape = first.data.dim();
        let georef = first.info.georef.clone();
        let sample_type = first.info.sample_type;
        let bands: Vec<Array2<f32>> = grids.into_iter().map(|g| g.data).collect();
        Ok((stack_bands(&bands)?, shape, georef, sample_type))
    }

    fn write(&self, path: &Path, data: RasterData, georef: &GeoReference) -> Result<()> {
        self.backend.write(path, &[data], georef, &self.options)?;
        info!("Wrote {:?}", path);
        Ok(())
    }

    fn geometry(&self, path: &Path, acq: &Acquisition) -> Result<()> {
        let source = self.source(acq)?;
        self.backend.translate(&source, path, &self.options)?;
        info!("Wrote {:?}", path);
        Ok(())
    }

    fn amplitude(&self, path: &Path, acquisitions: &[Acquisition]) -> Result<()> {
        let (stack, shape, georef, sample_type) = self.read_stack(acquisitions)?;
        let mean: Vec<f32> = masked_mean(stack.view()).into_iter().map(|v| v as f32).collect();
        let mean = Array2::from_shape_vec(shape, mean).map_err(Error::external)?;
        self.write(path, RasterData::from_f32(mean, sample_type), &georef)
    }

    /// Coherence medians for every interval of one (pol, season), then the
    /// decay model over them when `model` is set.
    fn coherence(
        &self,
        season: Season,
        pol: Polarization,
        by_interval: &BTreeMap<RepeatInterval, Vec<Acquisition>>,
        model: Option<&FitOptions>,
    ) -> Result<()> {
        let mut medians: Vec<Array2<f32>> = Vec::new();
        let mut t_medians: Vec<f64> = Vec::new();
        let mut all_pairs: Vec<Array2<f32>> = Vec::new();
        let mut t_all: Vec<f64> = Vec::new();
        let mut grid: Option<((usize, usize), GeoReference)> = None;

        for (interval, pairs) in by_interval {
            let (stack, shape, georef, _) = self.read_stack(pairs)?;
            let median = masked_median(stack.view());
            let bytes = Array2::from_shape_vec(shape, quantize_u8(&median)).map_err(Error::external)?;
            let path = output_path(self.outdir, &self.tile, season, pol, Product::Coh(*interval));
            self.write(&path, RasterData::U8(bytes), &georef)?;

            if model.is_some() {
                medians.push(Array2::from_shape_vec((1, median.len()), to_coherence(&median)).map_err(Error::external)?);
                t_medians.push(interval.days() as f64);
                all_pairs.push(stack.mapv(|v| v / 100.0));
                t_all.extend(std::iter::repeat(interval.days() as f64).take(stack.nrows()));
            }
            grid.get_or_insert((shape, georef));
        }

        let (Some(options), Some((shape, georef))) = (model, grid) else {
            return Ok(());
        };
        let med_views: Vec<_> = medians.iter().map(Array2::view).collect();
        let med_stack = concatenate(Axis(0), &med_views).map_err(Error::external)?;
        let params = fit_stack(med_stack.view(), &t_medians, options)?;
        let fitted = params.iter().filter(|p| p.is_fit()).count();
        info!("{} {}: fit {} of {} pixels", season, pol, fitted, params.len());

        let all_views: Vec<_> = all_pairs.iter().map(Array2::view).collect();
        let all_stack = concatenate(Axis(0), &all_views).map_err(Error::external)?;
        let rmse = residual_spread(all_stack.view(), &t_all, &params)?;

        let encode = |values: Vec<f64>| -> Result<RasterData> {
            let encoded: Vec<u16> = values.into_iter().map(encode_parameter).collect();
            Ok(RasterData::U16(Array2::from_shape_vec(shape, encoded).map_err(Error::external)?))
        };
        let rho = encode(params.iter().map(|p: &DecayParams| p.rho).collect())?;
        let tau = encode(params.iter().map(|p| p.tau).collect())?;
        let rmse = encode(rmse)?;
        for (product, data) in [(Product::Rho, rho), (Product::Tau, tau), (Product::Rmse, rmse)] {
            self.write(&output_path(self.outdir, &self.tile, season, pol, product), data, &georef)?;
        }
        Ok(())
    }
}

/// Record a recoverable failure of one output group and carry on; any
/// other error aborts the tile.
fn isolate(group: String, result: Result<()>, failed: &mut Vec<String>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_recoverable() => {
            warn!("Skipping {}: {}", group, e);
            failed.push(group);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Local directory holding a tile's inputs under a local `indir`: the
/// `{tile}` subdirectory when present, else `indir` itself.
fn local_input_dir(indir: &Path, tile: &Tile) -> PathBuf {
    let nested = indir.join(tile.name());
    if nested.is_dir() { nested } else { indir.to_path_buf() }
}

pub fn run_composite(
    params: &CompositeParams,
    ctx: &RunContext,
    store: &dyn ObjectStore,
    backend: &dyn RasterBackend,
) -> Result<CompositeReport> {
    let tile: Tile = params.tile.parse()?;
    let mut report = CompositeReport {
        tile: tile.name(),
        ..CompositeReport::default()
    };

    // inputs: read in place, or cached from S3 into a scratch directory
    let indir = Location::parse(&params.indir);
    let cache: Option<TempDir>;
    let input_dir = match &indir {
        Location::Local(dir) => {
            cache = None;
            let dir = local_input_dir(dir, &tile);
            if !dir.is_dir() {
                return Err(Error::InvalidPath { path: dir });
            }
            dir
        }
        Location::S3(_) => {
            let src = indir.join(&tile.name());
            if ctx.dry_run {
                ctx.announce(store.describe_sync(&src, Path::new("<scratch>"), &SyncFilter::default()));
                return Ok(report);
            }
            let dir = TempDir::with_prefix(format!("globcoh-{}-", tile))?;
            store.sync(&src, dir.path(), &SyncFilter::default(), Some(params.timeout))?;
            let path = dir.path().to_path_buf();
            cache = Some(dir);
            path
        }
    };

    let files = scan_directory(&input_dir, &tile)?;
    let inputs = group_inputs(&files);
    report.skipped_pairs = inputs.skipped_pairs;
    info!(
        "Tile {}: {} input rasters, {} coherence and {} amplitude groups",
        tile,
        files.len(),
        inputs.coherence.len(),
        inputs.amplitude.len()
    );

    let outdir = Location::parse(&params.outdir);
    let staging: Option<TempDir>;
    let out_local = match &outdir {
        Location::Local(dir) => {
            staging = None;
            dir.join(tile.name())
        }
        Location::S3(_) if ctx.dry_run => {
            staging = None;
            std::env::temp_dir().join("globcoh-staging").join(tile.name())
        }
        Location::S3(_) => {
            let dir = TempDir::with_prefix("globcoh-out-")?;
            let path = dir.path().to_path_buf();
            staging = Some(dir);
            path
        }
    };

    report.outputs = plan_from(&inputs, &tile, &out_local, !params.no_model);
    if ctx.dry_run {
        ctx.announce(format!("create output directory {}", out_local.display()));
        for output in &report.outputs {
            ctx.announce(format!("write {} from {} input(s)", output.path.display(), output.inputs));
        }
        if outdir.is_s3() {
            ctx.announce(store.describe_publish(&out_local, &outdir.join(&tile.name())));
        }
        return Ok(report);
    }
    std::fs::create_dir_all(&out_local)?;

    let scratch = TempDir::with_prefix(format!("globcoh-{}-vrt-", tile))?;
    let compositor = Compositor {
        tile,
        backend,
        scratch: scratch.path(),
        outdir: &out_local,
        options: WriteOptions {
            overwrite: params.overwrite,
            ..WriteOptions::default()
        },
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(params.threads.unwrap_or(0))
        .build()
        .map_err(Error::external)?;
    report.failed = pool.install(|| -> Result<Vec<String>> {
        let mut failed = Vec::new();
        for ((track, kind), acq) in &inputs.geometry {
            let path = out_local.join(format!("{}_{}_{}.tif", tile, track, kind.as_str()));
            let group = format!("{}_{}", track, kind.as_str());
            isolate(group, compositor.geometry(&path, acq), &mut failed)?;
        }
        let model = (!params.no_model).then_some(&params.fit);
        for ((pol, season), by_interval) in &inputs.coherence {
            let group = format!("{}_{}_COH", season, pol);
            isolate(group, compositor.coherence(*season, *pol, by_interval, model), &mut failed)?;
        }
        for ((pol, season), acquisitions) in &inputs.amplitude {
            let path = output_path(&out_local, &tile, *season, *pol, Product::Amp);
            let group = format!("{}_{}_{}", season, pol, Product::Amp);
            isolate(group, compositor.amplitude(&path, acquisitions), &mut failed)?;
        }
        Ok(failed)
    })?;

    if let (Some(staging), Location::S3(_)) = (&staging, &outdir) {
        let dst = outdir.join(&tile.name());
        ctx.announce(store.describe_publish(staging.path(), &dst));
        store.publish(staging.path(), &dst, Some(params.timeout))?;
    }
    drop(cache);
    info!("Composited tile {} into {}", tile, params.outdir);
    Ok(report)
}

//! Tile mosaicking: select tiles and metrics, cache the tiles, build one VRT
//! per metric and, in GeoTIFF mode, translate each VRT into a compressed
//! GeoTIFF.
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::TempDir;
use tracing::{info, warn};

use super::RunContext;
use crate::core::catalog::{Metric, select_metrics};
use crate::core::params::MosaicParams;
use crate::core::tiles::{Tile, resolve_region_name, select_tiles};
use crate::error::{Error, Result};
use crate::io::fetch::{FetchJob, FetchReport, fetch_tiles};
use crate::io::raster::{RasterBackend, WriteOptions};
use crate::io::store::{Location, ObjectStore, SyncFilter};
use crate::io::vrt::mosaic_files;
use crate::io::writers::urls::{HTTPS_ROOT, download_urls, write_download_urls};
use crate::types::OutputMode;

#[derive(Debug, Clone, Default, Serialize)]
pub struct MosaicReport {
    pub region: String,
    pub tiles: Vec<Tile>,
    pub metrics: Vec<String>,
    pub fetch: FetchReport,
    /// Final products (GeoTIFFs or VRTs), in metric order
    pub outputs: Vec<PathBuf>,
    /// Metrics with no raster among the usable tiles
    pub missing_metrics: Vec<String>,
    /// Metrics whose mosaic or output failed; the run went on without them
    pub failed_metrics: Vec<String>,
    /// Number of URLs written in URL-list mode
    pub urls_written: Option<usize>,
}

/// Tiles present under `root`: children whose names parse as tile IDs.
pub fn available_tiles(store: &dyn ObjectStore, root: &Location) -> Result<BTreeSet<Tile>> {
    Ok(store
        .list(root)?
        .into_iter()
        .filter_map(|name| name.parse::<Tile>().ok())
        .collect())
}

/// Pixels per degree of a mosaic, used in GeoTIFF names.
pub fn pixels_per_degree(pixel_width: f64) -> u32 {
    if pixel_width > 0.0 {
        (1.0 / pixel_width).round() as u32
    } else {
        0
    }
}

fn metric_filter(metrics: &[Metric]) -> SyncFilter {
    SyncFilter::suffixes(metrics.iter().map(|m| format!("{}.tif", m)))
}

/// Local directory that products are written to before an S3 publish.
enum OutputTarget {
    Local(PathBuf),
    Staged { staging: TempDir, dst: Location },
}

impl OutputTarget {
    fn dir(&self) -> &Path {
        match self {
            OutputTarget::Local(p) => p,
            OutputTarget::Staged { staging, .. } => staging.path(),
        }
    }
}

pub fn run_mosaic(
    params: &MosaicParams,
    ctx: &RunContext,
    store: &dyn ObjectStore,
    backend: &dyn RasterBackend,
) -> Result<MosaicReport> {
    let metrics = select_metrics(&params.metrics)?;
    if metrics.is_empty() {
        return Err(Error::NoMetricAvailable {
            metric: params.metrics.join(" "),
        });
    }
    info!("Metric(s) to be produced: {}", metrics.len());

    let root = Location::parse(&params.url_root).join(&params.tile_path);
    let available = available_tiles(store, &root)?;
    let tiles = select_tiles(&params.selection, &available)?;
    let region = resolve_region_name(&params.name, &tiles)?;
    info!("Selected {} tile(s) for region {}", tiles.len(), region);

    let mut report = MosaicReport {
        region: region.clone(),
        tiles: tiles.clone(),
        metrics: metrics.iter().map(Metric::name).collect(),
        ..MosaicReport::default()
    };

    if let Some(url_file) = &params.http_urls {
        let urls = download_urls(HTTPS_ROOT, &params.tile_path, &tiles, &metrics);
        if ctx.announce(format!("write {} URLs to {}", urls.len(), url_file.display())) {
            report.urls_written = Some(write_download_urls(url_file, &urls)?);
        }
        return Ok(report);
    }

    if params.no_cache && root.is_s3() {
        return Err(Error::InvalidArgument {
            arg: "--no-cache",
            value: format!("requires a local url root, got {}", root),
        });
    }

    let outdir = Location::parse(&params.outdir);
    let target = match (&outdir, ctx.dry_run) {
        (Location::Local(dir), _) => OutputTarget::Local(dir.clone()),
        (Location::S3(_), true) => OutputTarget::Local(std::env::temp_dir().join("globcoh-staging")),
        (Location::S3(_), false) => OutputTarget::Staged {
            staging: TempDir::with_prefix("globcoh-out-")?,
            dst: outdir.clone(),
        },
    };
    if ctx.announce(format!("create output directory {}", target.dir().display())) {
        std::fs::create_dir_all(target.dir())?;
    }

    // GeoTIFF mode caches tiles and builds VRTs in a per-run scratch
    // directory; VRT mode keeps both in the output directory.
    let scratch = match params.mode {
        OutputMode::Geotiff if !ctx.dry_run => {
            std::fs::create_dir_all(&params.cache_path)?;
            Some(TempDir::with_prefix_in("globcoh-", &params.cache_path)?)
        }
        _ => None,
    };
    let work_dir: PathBuf = match (params.mode, &scratch) {
        (OutputMode::Vrt, _) => target.dir().to_path_buf(),
        (OutputMode::Geotiff, Some(dir)) => dir.path().to_path_buf(),
        (OutputMode::Geotiff, None) => params.cache_path.join("globcoh-<scratch>"),
    };

    let usable: Vec<Tile>;
    let tile_root: PathBuf;
    if params.no_cache {
        let local = root
            .as_local()
            .ok_or_else(|| Error::InvalidPath { path: PathBuf::from(root.to_string()) })?;
        tile_root = local.to_path_buf();
        usable = tiles.clone();
    } else {
        tile_root = work_dir.clone();
        let filter = metric_filter(&metrics);
        let jobs: Vec<FetchJob> = tiles
            .iter()
            .map(|t| FetchJob {
                tile: *t,
                src: root.join(&t.name()),
                dst: tile_root.join(t.name()),
                filter: filter.clone(),
            })
            .collect();
        info!("Caching {} tiles", jobs.len());
        if ctx.dry_run {
            for job in &jobs {
                ctx.announce(store.describe_sync(&job.src, &job.dst, &job.filter));
            }
            usable = tiles.clone();
        } else {
            report.fetch = fetch_tiles(store, &jobs, params.threads, Some(params.timeout))?;
            usable = report.fetch.fetched();
        }
    }

    for metric in &metrics {
        let vrt_path = work_dir.join(format!("{}_{}.vrt", region, metric));
        if ctx.dry_run {
            ctx.announce(format!(
                "build {} from {}/*/*_{}.tif",
                vrt_path.display(),
                tile_root.display(),
                metric
            ));
            match params.mode {
                OutputMode::Geotiff => {
                    ctx.announce(format!(
                        "translate {} to {}",
                        vrt_path.display(),
                        target.dir().join(format!("{}_{}_<ppd>ppd.tif", region, metric)).display()
                    ));
                }
                OutputMode::Vrt => {}
            }
            if params.overviews {
                ctx.announce(format!("build overviews {:?} for {} output", params.overview_levels, metric));
            }
            continue;
        }

        let built = (|| -> Result<Option<PathBuf>> {
            let files = mosaic_files(&usable, metric, &tile_root)?;
            if files.is_empty() {
                return Ok(None);
            }
            info!("Processing {} ({} rasters)", metric, files.len());
            backend.build_mosaic(&files, 0.0, &vrt_path)?;

            let product = match params.mode {
                OutputMode::Vrt => vrt_path.clone(),
                OutputMode::Geotiff => {
                    let info = backend.describe(&vrt_path)?;
                    let ppd = pixels_per_degree(info.georef.pixel_width());
                    let tif = target.dir().join(format!("{}_{}_{}ppd.tif", region, metric, ppd));
                    let options = WriteOptions {
                        overwrite: params.overwrite,
                        metadata: vec![
                            ("REGION".to_string(), region.clone()),
                            ("METRIC".to_string(), metric.name()),
                        ],
                        ..WriteOptions::default()
                    };
                    backend.translate(&vrt_path, &tif, &options)?;
                    tif
                }
            };
            if params.overviews {
                backend.build_overviews(&product, &params.overview_levels)?;
            }
            Ok(Some(product))
        })();

        match built {
            Ok(Some(product)) => report.outputs.push(product),
            Ok(None) => {
                warn!("{}", Error::NoMetricAvailable { metric: metric.name() });
                report.missing_metrics.push(metric.name());
            }
            Err(e) if e.is_recoverable() => {
                warn!("Skipping metric {}: {}", metric, e);
                report.failed_metrics.push(metric.name());
            }
            Err(e) => return Err(e),
        }
    }

    if let OutputTarget::Staged { staging, dst } = &target {
        if ctx.announce(store.describe_publish(staging.path(), dst)) {
            store.publish(staging.path(), dst, Some(params.timeout))?;
        }
    } else if let (Location::S3(_), true) = (&outdir, ctx.dry_run) {
        ctx.announce(store.describe_publish(target.dir(), &outdir));
    }

    info!("Results in {}", params.outdir);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ppd_rounds_inverse_pixel_width() {
        assert_eq!(pixels_per_degree(0.000833333333), 1200);
        assert_eq!(pixels_per_degree(0.25), 4);
        assert_eq!(pixels_per_degree(0.0), 0);
    }
}

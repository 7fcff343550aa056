use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use globcoh::api::{RunContext, pair_plan, run_composite, run_mosaic};
use globcoh::core::params::{CompositeParams, MosaicParams, Settings};
use globcoh::core::tiles::TileSelection;
use globcoh::io::{GdalBackend, RoutedStore};
use globcoh::types::OutputMode;
use globcoh::select_metrics;

use super::args::{CliArgs, Command, CompositeArgs, MosaicArgs, PairsArgs, RunArgs};
use super::errors::AppError;

/// Install the stderr subscriber. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_settings(config: Option<&Path>) -> Result<Settings, AppError> {
    match config {
        Some(path) => {
            let settings = Settings::load(path).map_err(|source| AppError::Config {
                path: path.to_path_buf(),
                source,
            })?;
            info!("Loaded settings from {:?}", path);
            Ok(settings)
        }
        None => Ok(Settings::default()),
    }
}

/// Apply the shared run flags over settings-derived defaults.
fn apply_run_args(run: &RunArgs, threads: &mut Option<usize>, timeout: &mut Duration, region: &mut String) {
    if run.threads.is_some() {
        *threads = run.threads;
    }
    if let Some(secs) = run.timeout {
        *timeout = Duration::from_secs(secs);
    }
    if let Some(r) = &run.region {
        *region = r.clone();
    }
}

fn mosaic_params(args: &MosaicArgs, settings: &Settings) -> Result<MosaicParams, AppError> {
    let outdir = match (&args.outdir, &args.http_urls) {
        (Some(dir), _) => dir.clone(),
        (None, Some(_)) => ".".to_string(),
        (None, None) => {
            return Err(AppError::MissingArgument {
                arg: "--outdir".to_string(),
            });
        }
    };
    let mut params = MosaicParams::from_settings(settings, outdir);
    params.name = args.name.clone();
    params.selection = match (&args.ullr, args.tileids.is_empty()) {
        (Some(_), false) => {
            return Err(AppError::ConflictingArguments {
                a: "--tileids".to_string(),
                b: "--ullr".to_string(),
            });
        }
        (Some(b), true) => match b.as_slice() {
            [lon1, lat1, lon2, lat2] => TileSelection::Bounds([*lon1, *lat1, *lon2, *lat2]),
            _ => {
                return Err(AppError::MissingArgument {
                    arg: "--ullr ULLON ULLAT LRLON LRLAT".to_string(),
                });
            }
        },
        (None, false) => TileSelection::Ids(args.tileids.clone()),
        (None, true) => TileSelection::All,
    };
    params.metrics = args.metrics.clone();
    if let Some(root) = &args.url_root {
        params.url_root = root.clone();
    }
    if let Some(path) = &args.tile_path {
        params.tile_path = path.clone();
    }
    if let Some(path) = &args.cache_path {
        params.cache_path = path.clone();
    }
    params.no_cache = args.no_cache;
    params.mode = if args.vrt_only { OutputMode::Vrt } else { OutputMode::Geotiff };
    params.overviews = args.overviews;
    if let Some(levels) = &args.overview_levels {
        params.overview_levels = levels.clone();
    }
    params.http_urls = args.http_urls.clone();
    params.overwrite = args.run.overwrite;
    apply_run_args(&args.run, &mut params.threads, &mut params.timeout, &mut params.region);
    Ok(params)
}

fn composite_params(args: &CompositeArgs, settings: &Settings) -> CompositeParams {
    let mut params = CompositeParams::from_settings(settings, args.tileid.clone(), args.indir.clone(), args.outdir.clone());
    params.no_model = args.no_model;
    params.overwrite = args.run.overwrite;
    apply_run_args(&args.run, &mut params.threads, &mut params.timeout, &mut params.region);
    params
}

fn print_plan(ctx: &RunContext) {
    for action in ctx.planned() {
        println!("DRYRUN: {}", action);
    }
}

fn mosaic(args: MosaicArgs) -> Result<(), AppError> {
    init_logging(args.run.verbose);
    let settings = load_settings(args.run.config.as_deref())?;

    if args.show_metrics {
        for metric in select_metrics(&args.metrics)? {
            println!("{}", metric);
        }
        return Ok(());
    }

    let params = mosaic_params(&args, &settings)?;
    let ctx = RunContext::new(args.run.dry_run, args.run.verbose);
    let store = RoutedStore::new(&params.region);
    let report = run_mosaic(&params, &ctx, &store, &GdalBackend)?;
    print_plan(&ctx);

    for outcome in report.fetch.failed() {
        warn!("Tile {} was not fetched: {:?}", outcome.tile, outcome.status);
    }
    for metric in &report.missing_metrics {
        warn!("No rasters for metric {}", metric);
    }
    if !report.failed_metrics.is_empty() {
        warn!("Failed metric(s): {}", report.failed_metrics.join(" "));
    }
    if let Some(n) = report.urls_written {
        info!("Wrote {} download URLs", n);
    }
    info!(
        "Region {}: {} tile(s), {} output(s)",
        report.region,
        report.tiles.len(),
        report.outputs.len()
    );
    Ok(())
}

fn composite(args: CompositeArgs) -> Result<(), AppError> {
    init_logging(args.run.verbose);
    let settings = load_settings(args.run.config.as_deref())?;
    let params = composite_params(&args, &settings);
    let ctx = RunContext::new(args.run.dry_run, args.run.verbose);
    let store = RoutedStore::new(&params.region);
    let report = run_composite(&params, &ctx, &store, &GdalBackend)?;
    print_plan(&ctx);
    if report.skipped_pairs > 0 {
        warn!("{} coherence pair(s) skipped", report.skipped_pairs);
    }
    if !report.failed.is_empty() {
        warn!("Failed group(s): {}", report.failed.join(" "));
    }
    info!("Tile {}: {} output(s)", report.tile, report.outputs.len());
    Ok(())
}

fn pairs(args: PairsArgs) -> Result<(), AppError> {
    init_logging(args.verbose);
    let settings = load_settings(args.config.as_deref())?;
    let threshold = args.threshold.unwrap_or(settings.six_day_threshold);
    let plan = pair_plan(&args.dates, threshold)?;
    println!("cadence: {}", plan.cadence);
    println!(
        "6-day pairs per season (winter spring summer fall): {:?}",
        plan.six_day_counts
    );
    println!("pairs: {}", plan.pairs.len());
    if args.list {
        for pair in &plan.pairs {
            println!(
                "{} {} {:>2} {}",
                pair.reference.format("%Y%m%d"),
                pair.secondary.format("%Y%m%d"),
                pair.repeat_days(),
                pair.season()
            );
        }
    }
    Ok(())
}

pub fn run(args: CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        Command::Mosaic(a) => mosaic(a)?,
        Command::Composite(a) => composite(a)?,
        Command::Pairs(a) => pairs(a)?,
    }
    Ok(())
}

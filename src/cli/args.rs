use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "globcoh",
    version,
    about = "Sentinel-1 global coherence mosaicking and seasonal compositing"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Mosaic data-set tiles into one raster (or VRT) per metric
    Mosaic(MosaicArgs),
    /// Build the seasonal composites and decay-model rasters of one tile
    Composite(CompositeArgs),
    /// Plan interferometric pairs for a set of acquisition dates
    Pairs(PairsArgs),
}

/// Flags shared by the mosaic and composite subcommands
#[derive(Args, Clone, Debug, Default)]
pub struct RunArgs {
    /// Upper bound on worker threads (defaults to the CPU count)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Per-transfer timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Replace existing output files
    #[arg(long, default_value_t = false)]
    pub overwrite: bool,

    /// Print every mutating action instead of performing it
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Debug-level logging
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// JSON settings file supplying defaults for unset flags
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// AWS region for anonymous S3 access
    #[arg(long)]
    pub region: Option<String>,
}

#[derive(Args, Debug)]
pub struct MosaicArgs {
    /// Region name used in output file names; ULLR derives it from the tiles
    #[arg(long, default_value = "ULLR")]
    pub name: String,

    /// Tile IDs (e.g. N45W090), or a single file listing them
    #[arg(long, num_args = 1.., conflicts_with = "ullr")]
    pub tileids: Vec<String>,

    /// Subset bounds: upper-left lon lat, lower-right lon lat
    #[arg(long, num_args = 4, allow_negative_numbers = true, value_names = ["ULLON", "ULLAT", "LRLON", "LRLAT"])]
    pub ullr: Option<Vec<f64>>,

    /// Metric filter tokens (e.g. COH12, winter_vv), or a file of tokens; empty selects all
    #[arg(short, long, num_args = 1..)]
    pub metrics: Vec<String>,

    /// List the metrics selected by --metrics and exit
    #[arg(long, default_value_t = false)]
    pub show_metrics: bool,

    /// Data-set root (s3:// URL or local directory)
    #[arg(long)]
    pub url_root: Option<String>,

    /// Path of the tile directories below the root
    #[arg(long)]
    pub tile_path: Option<String>,

    /// Directory holding the per-run tile cache
    #[arg(long)]
    pub cache_path: Option<PathBuf>,

    /// Read tiles in place from a local url root
    #[arg(long, default_value_t = false)]
    pub no_cache: bool,

    /// Keep VRTs and cached tiles in the output directory instead of writing GeoTIFFs
    #[arg(long, default_value_t = false)]
    pub vrt_only: bool,

    /// Build AVERAGE overviews on every output
    #[arg(long, default_value_t = false)]
    pub overviews: bool,

    /// Overview decimation levels
    #[arg(long, num_args = 1..)]
    pub overview_levels: Option<Vec<u32>>,

    /// Output directory (local or s3://)
    #[arg(short, long)]
    pub outdir: Option<String>,

    /// Only write the HTTPS download URLs of the selected tiles to this file
    #[arg(long)]
    pub http_urls: Option<PathBuf>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Args, Debug)]
pub struct CompositeArgs {
    /// Tile ID, e.g. N45W090
    pub tileid: String,

    /// Input directory (local or s3://) holding the tile's acquisitions
    #[arg(short, long)]
    pub indir: String,

    /// Output directory (local or s3://); outputs land in {outdir}/{tile}
    #[arg(short, long)]
    pub outdir: String,

    /// Skip the rho/tau/rmse decay model
    #[arg(long, default_value_t = false)]
    pub no_model: bool,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Args, Debug)]
pub struct PairsArgs {
    /// Acquisition dates (YYYYMMDD), or a single file of dates
    #[arg(required = true, num_args = 1..)]
    pub dates: Vec<String>,

    /// Minimum 6-day pairs every season needs for the 6-day cadence
    #[arg(long)]
    pub threshold: Option<usize>,

    /// Print every planned pair, not just the summary
    #[arg(long, default_value_t = false)]
    pub list: bool,

    /// JSON settings file supplying defaults for unset flags
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mosaic_flags_parse() {
        let args = CliArgs::try_parse_from([
            "globcoh", "mosaic", "--ullr", "-84", "71", "-82", "70", "-m", "COH12", "winter", "-o", "/out",
            "--dry-run", "-t", "4",
        ])
        .unwrap();
        let Command::Mosaic(m) = args.command else {
            panic!("expected mosaic");
        };
        assert_eq!(m.ullr, Some(vec![-84.0, 71.0, -82.0, 70.0]));
        assert_eq!(m.metrics, vec!["COH12", "winter"]);
        assert_eq!(m.run.threads, Some(4));
        assert!(m.run.dry_run);
    }

    #[test]
    fn tileids_conflict_with_bounds() {
        assert!(
            CliArgs::try_parse_from(["globcoh", "mosaic", "--tileids", "N45W090", "--ullr", "0", "1", "1", "0"])
                .is_err()
        );
    }

    #[test]
    fn composite_requires_directories() {
        assert!(CliArgs::try_parse_from(["globcoh", "composite", "N45W090"]).is_err());
        let args = CliArgs::try_parse_from(["globcoh", "composite", "N45W090", "-i", "/in", "-o", "s3://b/out"]).unwrap();
        assert!(matches!(args.command, Command::Composite(ref c) if c.outdir == "s3://b/out"));
    }
}

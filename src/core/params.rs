use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::pairs::SIX_DAY_PAIR_THRESHOLD;
use crate::core::processing::decay::FitOptions;
use crate::core::tiles::TileSelection;
use crate::error::Result;
use crate::io::fetch::DEFAULT_TIMEOUT;
use crate::io::store::DEFAULT_REGION;
use crate::types::OutputMode;

pub const DEFAULT_URL_ROOT: &str = "s3://sentinel-1-global-coherence-earthbigdata";
pub const DEFAULT_TILE_PATH: &str = "data/tiles";
pub const DEFAULT_CACHE_PATH: &str = "/tmp/cached_tiles";
pub const DEFAULT_OVERVIEW_LEVELS: [u32; 4] = [3, 9, 27, 81];

/// Defaults shared by all subcommands, loadable from a JSON config file.
/// Missing keys fall back to the built-in defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub url_root: String,
    pub tile_path: String,
    pub cache_path: PathBuf,
    /// AWS region for anonymous S3 access
    pub region: String,
    /// Upper bound on fetch/compute threads; None uses the CPU count
    pub threads: Option<usize>,
    pub timeout_secs: u64,
    pub overview_levels: Vec<u32>,
    pub fit: FitOptions,
    pub six_day_threshold: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            url_root: DEFAULT_URL_ROOT.to_string(),
            tile_path: DEFAULT_TILE_PATH.to_string(),
            cache_path: PathBuf::from(DEFAULT_CACHE_PATH),
            region: DEFAULT_REGION.to_string(),
            threads: None,
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            overview_levels: DEFAULT_OVERVIEW_LEVELS.to_vec(),
            fit: FitOptions::default(),
            six_day_threshold: SIX_DAY_PAIR_THRESHOLD,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Settings> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Parameters of one mosaic run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MosaicParams {
    /// Region name; `ULLR` derives it from the selected tiles
    pub name: String,
    pub selection: TileSelection,
    /// Metric filter tokens (or a single file of tokens); empty selects all
    pub metrics: Vec<String>,
    pub url_root: String,
    pub tile_path: String,
    pub cache_path: PathBuf,
    /// Read tiles in place from a local `url_root` instead of caching them
    pub no_cache: bool,
    pub mode: OutputMode,
    pub overviews: bool,
    pub overview_levels: Vec<u32>,
    /// Local directory or `s3://` prefix
    pub outdir: String,
    pub threads: Option<usize>,
    pub timeout: Duration,
    pub overwrite: bool,
    /// Only write download URLs to this file
    pub http_urls: Option<PathBuf>,
    pub region: String,
}

impl MosaicParams {
    pub fn from_settings(settings: &Settings, outdir: impl Into<String>) -> Self {
        Self {
            name: "ULLR".to_string(),
            selection: TileSelection::All,
            metrics: Vec::new(),
            url_root: settings.url_root.clone(),
            tile_path: settings.tile_path.clone(),
            cache_path: settings.cache_path.clone(),
            no_cache: false,
            mode: OutputMode::Geotiff,
            overviews: false,
            overview_levels: settings.overview_levels.clone(),
            outdir: outdir.into(),
            threads: settings.threads,
            timeout: Duration::from_secs(settings.timeout_secs),
            overwrite: false,
            http_urls: None,
            region: settings.region.clone(),
        }
    }
}

/// Parameters of one per-tile compositing run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeParams {
    pub tile: String,
    /// Local directory or `s3://` prefix holding `{tile}/` inputs
    pub indir: String,
    /// Local directory or `s3://` prefix; outputs land in `{outdir}/{tile}/`
    pub outdir: String,
    /// Skip the rho/tau/rmse decay model
    pub no_model: bool,
    pub fit: FitOptions,
    pub threads: Option<usize>,
    pub timeout: Duration,
    pub overwrite: bool,
    pub region: String,
}

impl CompositeParams {
    pub fn from_settings(settings: &Settings, tile: impl Into<String>, indir: impl Into<String>, outdir: impl Into<String>) -> Self {
        Self {
            tile: tile.into(),
            indir: indir.into(),
            outdir: outdir.into(),
            no_model: false,
            fit: settings.fit,
            threads: settings.threads,
            timeout: Duration::from_secs(settings.timeout_secs),
            overwrite: false,
            region: settings.region.clone(),
        }
    }
}

mod common;

use std::fs;
use std::path::PathBuf;

use globcoh::api::composite::OutputKind;
use globcoh::io::{RasterData, SampleType};
use globcoh::{CompositeParams, Error, LocalStore, MemoryBackend, RunContext, Settings, run_composite};
use ndarray::array;
use tempfile::TempDir;

use common::{georef, snapshot, u8_row, u16_row};

const TILE: &str = "N45W090";

struct Fixture {
    dir: TempDir,
    backend: MemoryBackend,
}

impl Fixture {
    /// One tile of winter acquisitions on a 1×2 grid. Pixel 0 follows
    /// `γ(t) = 0.8·exp(-t/10) + 0.2` in DN (×100); pixel 1 is never valid.
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let backend = MemoryBackend::new();
        let input = dir.path().join("in").join(TILE);
        fs::create_dir_all(&input).unwrap();
        let add = |name: &str, data: RasterData| {
            backend
                .add_source(&input.join(format!("{TILE}_153D_{name}.tif")), georef(-90.0, 45.0, 0.5), data)
                .unwrap();
        };

        add("20200101_20200107_vv_COH", u8_row(&[64, 0]));
        add("20200101_20200113_vv_COH", u8_row(&[44, 0]));
        add("20200107_20200119_vv_COH", u8_row(&[44, 0]));
        add("20200101_20200119_vv_COH", u8_row(&[33, 0]));
        add("20200101_20200125_vv_COH", u8_row(&[27, 0]));
        // 7 days apart: not a composited repeat interval
        add("20200101_20200108_vv_COH", u8_row(&[90, 0]));

        add("20200101_vh_AMP", u16_row(&[100, 0]));
        add("20200113_vh_AMP", u16_row(&[301, 0]));
        add("20200701_vh_AMP", u16_row(&[50, 0]));

        // two bursts of one track's incidence angle
        backend
            .add_source(&input.join(format!("{TILE}_153D_b1_inc.tif")), georef(-90.0, 45.0, 0.5), u16_row(&[3000, 3100]))
            .unwrap();
        backend
            .add_source(&input.join(format!("{TILE}_153D_b2_inc.tif")), georef(-89.0, 45.0, 0.5), u16_row(&[3200, 3300]))
            .unwrap();

        Fixture { dir, backend }
    }

    /// Register one more input raster of the tile on the base grid.
    fn add(&self, name: &str, data: RasterData) {
        let input = self.dir.path().join("in").join(TILE);
        self.backend
            .add_source(&input.join(format!("{TILE}_153D_{name}.tif")), georef(-90.0, 45.0, 0.5), data)
            .unwrap();
    }

    fn out(&self, name: &str) -> PathBuf {
        self.dir.path().join("out").join(TILE).join(format!("{TILE}_{name}.tif"))
    }

    fn params(&self) -> CompositeParams {
        CompositeParams::from_settings(
            &Settings::default(),
            TILE,
            self.dir.path().join("in").display().to_string(),
            self.dir.path().join("out").display().to_string(),
        )
    }

    fn band(&self, name: &str) -> RasterData {
        self.backend.raster(&self.out(name)).unwrap().bands.remove(0)
    }
}

#[test]
fn seasonal_medians_and_means_mask_nodata() {
    let fx = Fixture::new();
    let report = run_composite(&fx.params(), &RunContext::default(), &LocalStore, &fx.backend).unwrap();
    assert_eq!(report.skipped_pairs, 1);
    assert_eq!(report.paths(OutputKind::Coherence).len(), 4);

    assert_eq!(fx.band("winter_vv_COH06"), u8_row(&[64, 0]));
    assert_eq!(fx.band("winter_vv_COH12"), u8_row(&[44, 0]));
    assert_eq!(fx.band("winter_vv_COH24"), u8_row(&[27, 0]));
    assert!(!fx.out("winter_vv_COH36").exists());

    // mean of 100 and 301, truncated in the source type
    assert_eq!(fx.band("winter_vh_AMP"), u16_row(&[200, 0]));
    assert_eq!(fx.band("summer_vh_AMP"), u16_row(&[50, 0]));
    assert!(!fx.out("spring_vh_AMP").exists());
}

#[test]
fn decay_model_is_fit_per_pixel() {
    let fx = Fixture::new();
    run_composite(&fx.params(), &RunContext::default(), &LocalStore, &fx.backend).unwrap();

    let (RasterData::U16(rho), RasterData::U16(tau), RasterData::U16(rmse)) =
        (fx.band("winter_vv_rho"), fx.band("winter_vv_tau"), fx.band("winter_vv_rmse"))
    else {
        panic!("model rasters must be UInt16");
    };
    assert!((150..=250).contains(&rho[[0, 0]]), "rho={}", rho[[0, 0]]);
    assert!((8000..=12500).contains(&tau[[0, 0]]), "tau={}", tau[[0, 0]]);
    assert!(rmse[[0, 0]] <= 10, "rmse={}", rmse[[0, 0]]);
    assert_eq!((rho[[0, 1]], tau[[0, 1]], rmse[[0, 1]]), (0, 0, 0));

    let params = fx.backend.raster(&fx.out("winter_vv_rho")).unwrap();
    assert_eq!(params.info.georef, georef(-90.0, 45.0, 0.5));
}

#[test]
fn no_model_skips_parameter_rasters() {
    let fx = Fixture::new();
    let mut params = fx.params();
    params.no_model = true;
    let report = run_composite(&params, &RunContext::default(), &LocalStore, &fx.backend).unwrap();
    assert!(report.paths(OutputKind::Model).is_empty());
    assert!(!fx.out("winter_vv_rho").exists());
    assert!(fx.out("winter_vv_COH12").exists());
}

#[test]
fn geometry_pieces_are_mosaicked_per_track() {
    let fx = Fixture::new();
    run_composite(&fx.params(), &RunContext::default(), &LocalStore, &fx.backend).unwrap();
    assert_eq!(fx.band("153D_inc"), u16_row(&[3000, 3100, 3200, 3300]));
}

#[test]
fn dry_run_lists_outputs_and_creates_nothing() {
    let fx = Fixture::new();
    let before = snapshot(fx.dir.path());
    let ctx = RunContext::new(true, false);

    let report = run_composite(&fx.params(), &ctx, &LocalStore, &fx.backend).unwrap();
    assert_eq!(snapshot(fx.dir.path()), before);
    let planned = ctx.planned();
    assert_eq!(planned.len(), report.outputs.len() + 1);
    let rho = fx.out("winter_vv_rho");
    assert!(planned.iter().any(|a| a.starts_with(&format!("write {}", rho.display()))));
}

#[test]
fn amplitude_mean_keeps_a_signed_source_type() {
    let fx = Fixture::new();
    fx.add("20200102_hh_AMP", RasterData::I16(array![[1000i16, 0]]));
    fx.add("20200114_hh_AMP", RasterData::I16(array![[2001i16, 0]]));
    run_composite(&fx.params(), &RunContext::default(), &LocalStore, &fx.backend).unwrap();

    assert_eq!(fx.band("winter_hh_AMP"), RasterData::I16(array![[1500, 0]]));
    let raster = fx.backend.raster(&fx.out("winter_hh_AMP")).unwrap();
    assert_eq!(raster.info.sample_type, SampleType::I16);
}

#[test]
fn mismatched_group_is_skipped_and_the_rest_written() {
    let fx = Fixture::new();
    fx.add("20200401_vh_AMP", u16_row(&[10, 0]));
    fx.add("20200402_vh_AMP", u16_row(&[10, 20, 30]));

    let report = run_composite(&fx.params(), &RunContext::default(), &LocalStore, &fx.backend).unwrap();
    assert_eq!(report.failed, vec!["spring_vh_AMP".to_string()]);
    assert!(!fx.out("spring_vh_AMP").exists());
    assert_eq!(fx.band("winter_vh_AMP"), u16_row(&[200, 0]));
    assert_eq!(fx.band("summer_vh_AMP"), u16_row(&[50, 0]));
    assert_eq!(fx.band("winter_vv_COH12"), u8_row(&[44, 0]));
    assert!(fx.out("winter_vv_rho").exists());
    assert!(fx.out("153D_inc").exists());
}

#[test]
fn rerun_needs_overwrite_and_is_idempotent() {
    let fx = Fixture::new();
    let mut params = fx.params();
    let first = run_composite(&params, &RunContext::default(), &LocalStore, &fx.backend).unwrap();
    assert!(first.failed.is_empty());
    let coh = fs::read(fx.out("winter_vv_COH12")).unwrap();

    // every group already has its outputs
    let rerun = run_composite(&params, &RunContext::default(), &LocalStore, &fx.backend).unwrap();
    let mut failed = rerun.failed.clone();
    failed.sort();
    assert_eq!(failed, vec!["153D_inc", "summer_vh_AMP", "winter_vh_AMP", "winter_vv_COH"]);

    params.overwrite = true;
    let replaced = run_composite(&params, &RunContext::default(), &LocalStore, &fx.backend).unwrap();
    assert!(replaced.failed.is_empty());
    assert_eq!(fs::read(fx.out("winter_vv_COH12")).unwrap(), coh);
}

#[test]
fn missing_input_directory_is_an_error() {
    let fx = Fixture::new();
    let mut params = fx.params();
    params.indir = fx.dir.path().join("nowhere").display().to_string();
    assert!(matches!(
        run_composite(&params, &RunContext::default(), &LocalStore, &fx.backend),
        Err(Error::InvalidPath { .. })
    ));
}

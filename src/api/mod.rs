//! High-level library API: the `mosaic` and `composite` pipelines and pair
//! planning. Prefer these entry points over the low-level `core` and `io`
//! modules when embedding globcoh.
//!
//! Pipelines take their stores and raster backend as trait objects, so the
//! same run can target S3 through the AWS CLI and GDAL, or local directories
//! and the in-memory backend.
use std::path::Path;
use std::sync::Mutex;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::core::acquisition::parse_date;
use crate::core::pairs::{PairPlan, plan_pairs};
use crate::error::{Error, Result};

pub mod composite;
pub mod mosaic;

pub use composite::{CompositeReport, plan_composites, run_composite};
pub use mosaic::{MosaicReport, available_tiles, run_mosaic};

/// Per-run switches shared by all pipelines.
///
/// In dry-run mode every mutating action is recorded instead of performed;
/// selection and validation still run.
#[derive(Debug, Default)]
pub struct RunContext {
    pub dry_run: bool,
    pub verbose: bool,
    planned: Mutex<Vec<String>>,
}

impl RunContext {
    pub fn new(dry_run: bool, verbose: bool) -> Self {
        Self {
            dry_run,
            verbose,
            planned: Mutex::new(Vec::new()),
        }
    }

    /// Announce a mutating action. Returns true when the caller should
    /// perform it, false in dry-run mode.
    pub fn announce(&self, action: impl Into<String>) -> bool {
        let action = action.into();
        if self.dry_run {
            info!("DRYRUN: {}", action);
            if let Ok(mut planned) = self.planned.lock() {
                planned.push(action);
            }
            false
        } else {
            if self.verbose {
                info!("{}", action);
            } else {
                debug!("{}", action);
            }
            true
        }
    }

    /// Actions recorded so far in dry-run mode, in announcement order.
    pub fn planned(&self) -> Vec<String> {
        self.planned.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

/// Parse acquisition dates given as `YYYYMMDD` tokens, or as a single path
/// to a file of such tokens.
pub fn parse_dates(tokens: &[String]) -> Result<Vec<NaiveDate>> {
    let tokens: Vec<String> = match tokens {
        [single] if Path::new(single).is_file() => std::fs::read_to_string(single)?
            .split_whitespace()
            .map(str::to_string)
            .collect(),
        _ => tokens.to_vec(),
    };
    if tokens.is_empty() {
        return Err(Error::MissingArgument {
            arg: "dates".to_string(),
        });
    }
    tokens
        .iter()
        .map(|t| {
            parse_date(t).ok_or_else(|| Error::InvalidArgument {
                arg: "date",
                value: t.clone(),
            })
        })
        .collect()
}

/// Pair plan for a set of acquisition dates.
pub fn pair_plan(tokens: &[String], threshold: usize) -> Result<PairPlan> {
    let dates = parse_dates(tokens)?;
    let plan = plan_pairs(&dates, threshold);
    info!(
        "{} dates, 6-day pairs per season {:?}: {}",
        dates.len(),
        plan.six_day_counts,
        plan.cadence
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_run_records_instead_of_performing() {
        let ctx = RunContext::new(true, false);
        assert!(!ctx.announce("write /out/a.tif"));
        assert!(!ctx.announce("write /out/b.tif"));
        assert_eq!(ctx.planned(), vec!["write /out/a.tif", "write /out/b.tif"]);

        let live = RunContext::new(false, true);
        assert!(live.announce("write /out/a.tif"));
        assert!(live.planned().is_empty());
    }

    #[test]
    fn dates_must_be_valid() {
        let ok = parse_dates(&["20200101".to_string(), "20200107".to_string()]).unwrap();
        assert_eq!(ok.len(), 2);
        assert!(matches!(
            parse_dates(&["2020-01-01".to_string()]),
            Err(Error::InvalidArgument { arg: "date", .. })
        ));
        assert!(matches!(parse_dates(&[]), Err(Error::MissingArgument { .. })));
    }
}

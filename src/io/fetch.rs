//! Parallel tile caching.
//!
//! One sync job per tile runs on a bounded rayon pool. Every job finishes
//! (or times out) before [`fetch_tiles`] returns, and outcomes come back in
//! job order. A failed tile never aborts the others.
use std::path::PathBuf;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::core::tiles::Tile;
use crate::error::{Error, Result};
use crate::io::store::{Location, ObjectStore, SyncFilter};

/// Upper bound on concurrent fetches regardless of CPU count.
pub const MAX_WORKERS: usize = 12;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(7200);

#[derive(Clone, Debug)]
pub struct FetchJob {
    pub tile: Tile,
    pub src: Location,
    pub dst: PathBuf,
    pub filter: SyncFilter,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum FetchStatus {
    Done,
    TimedOut,
    Failed(String),
}

#[derive(Clone, Debug, Serialize)]
pub struct FetchOutcome {
    pub tile: Tile,
    pub status: FetchStatus,
    pub elapsed: Duration,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct FetchReport {
    pub outcomes: Vec<FetchOutcome>,
}

impl FetchReport {
    /// Tiles whose fetch completed, in job order.
    pub fn fetched(&self) -> Vec<Tile> {
        self.outcomes
            .iter()
            .filter(|o| o.status == FetchStatus::Done)
            .map(|o| o.tile)
            .collect()
    }

    pub fn failed(&self) -> Vec<&FetchOutcome> {
        self.outcomes.iter().filter(|o| o.status != FetchStatus::Done).collect()
    }
}

/// `min(max_threads, MAX_WORKERS, cpu count, jobs)`, at least 1.
pub fn worker_count(max_threads: Option<usize>, jobs: usize) -> usize {
    let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    let mut workers = MAX_WORKERS.min(cpus).min(jobs);
    if let Some(limit) = max_threads {
        workers = workers.min(limit);
    }
    workers.max(1)
}

fn run_job(store: &dyn ObjectStore, job: &FetchJob, timeout: Option<Duration>) -> FetchOutcome {
    let started = Instant::now();
    let status = match store.sync(&job.src, &job.dst, &job.filter, timeout) {
        Ok(()) => FetchStatus::Done,
        Err(Error::FetchTimeout { seconds, .. }) => {
            warn!("Fetching tile {} timed out after {}s; excluding it", job.tile, seconds);
            FetchStatus::TimedOut
        }
        Err(e) => {
            warn!("Fetching tile {} failed: {}; excluding it", job.tile, e);
            FetchStatus::Failed(e.to_string())
        }
    };
    FetchOutcome {
        tile: job.tile,
        status,
        elapsed: started.elapsed(),
    }
}

pub fn fetch_tiles(
    store: &dyn ObjectStore,
    jobs: &[FetchJob],
    max_threads: Option<usize>,
    timeout: Option<Duration>,
) -> Result<FetchReport> {
    if jobs.is_empty() {
        return Ok(FetchReport::default());
    }
    let workers = worker_count(max_threads, jobs.len());
    info!("Executing {} fetch jobs with {} threads", jobs.len(), workers);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(Error::external)?;
    let outcomes: Vec<FetchOutcome> = pool.install(|| jobs.par_iter().map(|job| run_job(store, job, timeout)).collect());

    let report = FetchReport { outcomes };
    let failed = report.failed().len();
    if failed > 0 {
        warn!("{} of {} tile fetches did not complete", failed, jobs.len());
    }
    Ok(report)
}

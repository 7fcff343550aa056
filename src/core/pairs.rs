//! Interferometric pair planning.
//!
//! From a set of acquisition dates, every pair whose separation is one of
//! the repeat intervals is a candidate. Whether 6-day pairs are dense enough
//! decides the cadence: when any season has fewer than
//! [`SIX_DAY_PAIR_THRESHOLD`] 6-day pairs, only 12/24/36/48-day pairs are
//! formed; otherwise 6/12/18/24-day pairs.
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core::acquisition::AcquisitionDates;
use crate::types::{REPEAT_INTERVALS, Season};

/// Empirical minimum of 6-day pairs per season for the 6-day cadence.
/// Tunable; has no derivation beyond observed Sentinel-1 acquisition density.
pub const SIX_DAY_PAIR_THRESHOLD: usize = 8;

#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Cadence {
    SixDay,
    TwelveDay,
}

impl Cadence {
    pub fn intervals(self) -> [u32; 4] {
        match self {
            Cadence::SixDay => [6, 12, 18, 24],
            Cadence::TwelveDay => [12, 24, 36, 48],
        }
    }
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let days = self.intervals().map(|d| d.to_string()).join(",");
        write!(f, "{}-day repeat-pass ({})", days, match self {
            Cadence::SixDay => "6-day cadence",
            Cadence::TwelveDay => "12-day cadence",
        })
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct AcquisitionPair {
    pub reference: NaiveDate,
    pub secondary: NaiveDate,
}

impl AcquisitionPair {
    pub fn repeat_days(&self) -> u32 {
        (self.secondary - self.reference).num_days().unsigned_abs() as u32
    }

    pub fn season(&self) -> Season {
        AcquisitionDates::Pair(self.reference, self.secondary)
            .season()
            .unwrap_or(Season::Winter)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairPlan {
    pub cadence: Cadence,
    /// 6-day pair count per season, indexed by `Season::index`
    pub six_day_counts: [usize; 4],
    pub pairs: Vec<AcquisitionPair>,
}

/// All ordered pairs separated by a known repeat interval. Duplicate dates
/// are collapsed.
pub fn candidate_pairs(dates: &[NaiveDate]) -> Vec<AcquisitionPair> {
    let mut dates = dates.to_vec();
    dates.sort();
    dates.dedup();
    let mut pairs = Vec::new();
    for (i, &reference) in dates.iter().enumerate() {
        for &secondary in &dates[i + 1..] {
            let days = (secondary - reference).num_days();
            if days > 0 && REPEAT_INTERVALS.contains(&(days as u32)) {
                pairs.push(AcquisitionPair { reference, secondary });
            }
        }
    }
    pairs
}

pub fn six_day_counts(pairs: &[AcquisitionPair]) -> [usize; 4] {
    let mut counts = [0usize; 4];
    for pair in pairs.iter().filter(|p| p.repeat_days() == 6) {
        counts[pair.season().index()] += 1;
    }
    counts
}

pub fn choose_cadence(counts: &[usize; 4], threshold: usize) -> Cadence {
    if counts.iter().copied().min().unwrap_or(0) < threshold {
        Cadence::TwelveDay
    } else {
        Cadence::SixDay
    }
}

pub fn plan_pairs(dates: &[NaiveDate], threshold: usize) -> PairPlan {
    let candidates = candidate_pairs(dates);
    let counts = six_day_counts(&candidates);
    let cadence = choose_cadence(&counts, threshold);
    let keep = cadence.intervals();
    let pairs = candidates
        .into_iter()
        .filter(|p| keep.contains(&p.repeat_days()))
        .collect();
    PairPlan {
        cadence,
        six_day_counts: counts,
        pairs,
    }
}

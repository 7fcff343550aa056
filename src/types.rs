//! Shared types and enums used across globcoh.
//! Includes `Season`, `Polarization`, `Product` and the fixed set of
//! interferometric repeat intervals.
use chrono::{Datelike, NaiveDate};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Debug, Serialize, Deserialize)]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Fall,
}

impl Season {
    pub const ALL: [Season; 4] = [Season::Winter, Season::Spring, Season::Summer, Season::Fall];

    /// Dec–Feb winter, Mar–May spring, Jun–Aug summer, Sep–Nov fall.
    pub fn from_month(month: u32) -> Option<Season> {
        match month {
            12 | 1 | 2 => Some(Season::Winter),
            3..=5 => Some(Season::Spring),
            6..=8 => Some(Season::Summer),
            9..=11 => Some(Season::Fall),
            _ => None,
        }
    }

    pub fn from_date(date: NaiveDate) -> Season {
        // month() is always 1..=12
        Season::from_month(date.month()).unwrap_or(Season::Winter)
    }

    pub fn index(self) -> usize {
        match self {
            Season::Winter => 0,
            Season::Spring => 1,
            Season::Summer => 2,
            Season::Fall => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Season::Winter => "winter",
            Season::Spring => "spring",
            Season::Summer => "summer",
            Season::Fall => "fall",
        }
    }
}

impl std::fmt::Display for Season {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Debug, Serialize, Deserialize)]
pub enum Polarization {
    Vv,
    Vh,
    Hh,
    Hv,
}

impl Polarization {
    pub const ALL: [Polarization; 4] = [
        Polarization::Vv,
        Polarization::Vh,
        Polarization::Hh,
        Polarization::Hv,
    ];

    /// Co-polarized channels carry coherence; cross-pol only amplitude.
    pub fn is_copol(self) -> bool {
        matches!(self, Polarization::Vv | Polarization::Hh)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Polarization::Vv => "vv",
            Polarization::Vh => "vh",
            Polarization::Hh => "hh",
            Polarization::Hv => "hv",
        }
    }

    pub fn parse(s: &str) -> Option<Polarization> {
        match s.to_ascii_lowercase().as_str() {
            "vv" => Some(Polarization::Vv),
            "vh" => Some(Polarization::Vh),
            "hh" => Some(Polarization::Hh),
            "hv" => Some(Polarization::Hv),
            _ => None,
        }
    }
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repeat intervals (days) for which coherence is produced.
pub const REPEAT_INTERVALS: [u32; 6] = [6, 12, 18, 24, 36, 48];

/// Repeat interval between the two acquisitions of an interferometric pair.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct RepeatInterval(u32);

impl RepeatInterval {
    pub fn new(days: u32) -> Option<RepeatInterval> {
        REPEAT_INTERVALS
            .contains(&days)
            .then_some(RepeatInterval(days))
    }

    pub fn days(self) -> u32 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = RepeatInterval> {
        REPEAT_INTERVALS.iter().map(|&d| RepeatInterval(d))
    }
}

impl std::fmt::Display for RepeatInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

/// Product layer of a tile metric.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum Product {
    Amp,
    Coh(RepeatInterval),
    Rho,
    Rmse,
    Tau,
}

impl std::fmt::Display for Product {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Product::Amp => write!(f, "AMP"),
            Product::Coh(r) => write!(f, "COH{}", r),
            Product::Rho => write!(f, "rho"),
            Product::Rmse => write!(f, "rmse"),
            Product::Tau => write!(f, "tau"),
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Serialize, Deserialize)]
pub enum OutputMode {
    /// Translate each mosaic into a GeoTIFF and drop the VRT
    Geotiff,
    /// Keep VRT mosaics (and the tile cache they reference) in the output directory
    Vrt,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn months_map_to_meteorological_seasons() {
        assert_eq!(Season::from_month(12), Some(Season::Winter));
        assert_eq!(Season::from_month(2), Some(Season::Winter));
        assert_eq!(Season::from_month(3), Some(Season::Spring));
        assert_eq!(Season::from_month(8), Some(Season::Summer));
        assert_eq!(Season::from_month(11), Some(Season::Fall));
        assert_eq!(Season::from_month(13), None);
    }

    #[test]
    fn only_known_repeat_intervals_are_accepted() {
        assert!(RepeatInterval::new(12).is_some());
        assert!(RepeatInterval::new(30).is_none());
        assert_eq!(Product::Coh(RepeatInterval::new(6).unwrap()).to_string(), "COH06");
    }
}

//! Per-acquisition input rasters and the naming convention they follow.
//!
//! Inputs to the compositor are named
//! `{tile}_{track}_{date1}[_{date2}][_{piece}...]_{pol}_{AMP|COH}.tif`,
//! with geometry layers as `{tile}_{track}[_...]_{inc|lsmap}.tif`.
//! Several pieces (bursts) may share one acquisition key; they are
//! mosaicked before compositing.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use tracing::debug;

use crate::core::tiles::Tile;
use crate::error::Result;
use crate::types::{Polarization, RepeatInterval, Season};

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum LayerKind {
    Amp,
    Coh,
    Inc,
    Lsmap,
}

impl LayerKind {
    fn parse(token: &str) -> Option<LayerKind> {
        match token {
            "AMP" => Some(LayerKind::Amp),
            "COH" => Some(LayerKind::Coh),
            "inc" => Some(LayerKind::Inc),
            "lsmap" => Some(LayerKind::Lsmap),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LayerKind::Amp => "AMP",
            LayerKind::Coh => "COH",
            LayerKind::Inc => "inc",
            LayerKind::Lsmap => "lsmap",
        }
    }

    pub fn is_geometry(self) -> bool {
        matches!(self, LayerKind::Inc | LayerKind::Lsmap)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum AcquisitionDates {
    /// Geometry layers carry no date
    Static,
    Single(NaiveDate),
    Pair(NaiveDate, NaiveDate),
}

impl AcquisitionDates {
    /// Date that decides the season: the acquisition itself, or the floor
    /// of the ordinal midpoint of a pair.
    pub fn reference_date(&self) -> Option<NaiveDate> {
        match *self {
            AcquisitionDates::Static => None,
            AcquisitionDates::Single(d) => Some(d),
            AcquisitionDates::Pair(a, b) => Some(midpoint(a, b)),
        }
    }

    pub fn season(&self) -> Option<Season> {
        self.reference_date().map(Season::from_date)
    }

    /// Absolute day difference between the two dates of a pair.
    pub fn repeat_days(&self) -> Option<u32> {
        match *self {
            AcquisitionDates::Pair(a, b) => Some((b - a).num_days().unsigned_abs() as u32),
            _ => None,
        }
    }

    pub fn repeat_interval(&self) -> Option<RepeatInterval> {
        self.repeat_days().and_then(RepeatInterval::new)
    }
}

pub fn midpoint(a: NaiveDate, b: NaiveDate) -> NaiveDate {
    let sum = a.num_days_from_ce() as i64 + b.num_days_from_ce() as i64;
    let mid = sum.div_euclid(2) as i32;
    NaiveDate::from_num_days_from_ce_opt(mid).unwrap_or(a.min(b))
}

pub fn parse_date(token: &str) -> Option<NaiveDate> {
    if token.len() != 8 || !token.bytes().all(|c| c.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(token, "%Y%m%d").ok()
}

/// Pieces sharing a key form one logical acquisition.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct AcquisitionKey {
    pub kind: LayerKind,
    pub polarization: Option<Polarization>,
    pub dates: AcquisitionDates,
    /// Only geometry layers are keyed by track; dated layers from different
    /// tracks never share a date.
    pub track: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AcquisitionFile {
    pub path: PathBuf,
    pub tile: Tile,
    pub track: String,
    pub dates: AcquisitionDates,
    pub polarization: Option<Polarization>,
    pub kind: LayerKind,
}

impl AcquisitionFile {
    pub fn parse(path: &Path) -> Option<AcquisitionFile> {
        let ext = path.extension()?.to_str()?;
        if !ext.eq_ignore_ascii_case("tif") && !ext.eq_ignore_ascii_case("tiff") {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let tokens: Vec<&str> = stem.split('_').collect();
        if tokens.len() < 3 {
            return None;
        }
        let tile: Tile = tokens[0].parse().ok()?;
        let track = tokens[1].to_string();
        let kind = LayerKind::parse(tokens[tokens.len() - 1])?;

        if kind.is_geometry() {
            return Some(AcquisitionFile {
                path: path.to_path_buf(),
                tile,
                track,
                dates: AcquisitionDates::Static,
                polarization: None,
                kind,
            });
        }

        if tokens.len() < 5 {
            return None;
        }
        let polarization = Polarization::parse(tokens[tokens.len() - 2])?;
        let dates: Vec<NaiveDate> = tokens[2..tokens.len() - 2]
            .iter()
            .map_while(|t| parse_date(t))
            .collect();
        let dates = match (kind, dates.as_slice()) {
            (LayerKind::Amp, [d, ..]) => AcquisitionDates::Single(*d),
            (LayerKind::Coh, [a, b, ..]) => AcquisitionDates::Pair(*a, *b),
            _ => return None,
        };
        Some(AcquisitionFile {
            path: path.to_path_buf(),
            tile,
            track,
            dates,
            polarization: Some(polarization),
            kind,
        })
    }

    pub fn key(&self) -> AcquisitionKey {
        AcquisitionKey {
            kind: self.kind,
            polarization: self.polarization,
            dates: self.dates,
            track: self.kind.is_geometry().then(|| self.track.clone()),
        }
    }
}

/// Parse every recognisable input raster in `dir` for `tile`, sorted by path.
pub fn scan_directory(dir: &Path, tile: &Tile) -> Result<Vec<AcquisitionFile>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        match AcquisitionFile::parse(&path) {
            Some(file) if file.tile == *tile => files.push(file),
            Some(file) => debug!("Skipping {:?}: belongs to tile {}", path, file.tile),
            None => debug!("Skipping unrecognised file {:?}", path),
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Group pieces by acquisition key; piece lists are sorted by path.
pub fn group_pieces(files: &[AcquisitionFile]) -> BTreeMap<AcquisitionKey, Vec<PathBuf>> {
    let mut groups: BTreeMap<AcquisitionKey, Vec<PathBuf>> = BTreeMap::new();
    for file in files {
        groups.entry(file.key()).or_default().push(file.path.clone());
    }
    for pieces in groups.values_mut() {
        pieces.sort();
        pieces.dedup();
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn coherence_file_parses_pair_and_polarization() {
        let f = AcquisitionFile::parse(Path::new("/x/N45W090_153D_20191201_20191213_vv_COH.tif")).unwrap();
        assert_eq!(f.tile.to_string(), "N45W090");
        assert_eq!(f.track, "153D");
        assert_eq!(f.kind, LayerKind::Coh);
        assert_eq!(f.polarization, Some(Polarization::Vv));
        assert_eq!(f.dates.repeat_days(), Some(12));
        assert_eq!(f.dates.season(), Some(Season::Winter));
    }

    #[test]
    fn burst_pieces_share_a_key() {
        let a = AcquisitionFile::parse(Path::new("N45W090_153D_20200601_b1_vh_AMP.tif")).unwrap();
        let b = AcquisitionFile::parse(Path::new("N45W090_153D_20200601_b2_vh_AMP.tif")).unwrap();
        assert_eq!(a.key(), b.key());
        assert_eq!(a.dates, AcquisitionDates::Single(date("20200601")));
        let groups = group_pieces(&[b, a]);
        let pieces = groups.values().next().unwrap();
        assert_eq!(pieces.len(), 2);
        assert!(pieces[0] < pieces[1]);
    }

    #[test]
    fn geometry_layers_are_keyed_by_track() {
        let inc = AcquisitionFile::parse(Path::new("N45W090_153D_b1_inc.tif")).unwrap();
        assert_eq!(inc.kind, LayerKind::Inc);
        assert_eq!(inc.dates, AcquisitionDates::Static);
        assert_eq!(inc.key().track.as_deref(), Some("153D"));
    }

    #[test]
    fn pair_season_uses_floor_of_midpoint() {
        // Nov 25 + Dec 7 -> Dec 1: winter, although the first date is in fall
        let dates = AcquisitionDates::Pair(date("20191125"), date("20191207"));
        assert_eq!(dates.reference_date(), Some(date("20191201")));
        assert_eq!(dates.season(), Some(Season::Winter));
        // odd day difference rounds down
        assert_eq!(midpoint(date("20200228"), date("20200302")), date("20200229"));
    }

    #[test]
    fn unknown_repeat_interval_is_not_a_repeat_class() {
        let dates = AcquisitionDates::Pair(date("20200101"), date("20200131"));
        assert_eq!(dates.repeat_days(), Some(30));
        assert_eq!(dates.repeat_interval(), None);
    }

    #[test]
    fn unrelated_files_are_ignored() {
        assert!(AcquisitionFile::parse(Path::new("N45W090_winter_vv_COH12.tif")).is_none());
        assert!(AcquisitionFile::parse(Path::new("readme.txt")).is_none());
        assert!(AcquisitionFile::parse(Path::new("N45W090_153D_20200101_vv_COH.tif")).is_none());
    }
}

//! 1°×1° tile identifiers and tile selection.
//!
//! A tile is named by its upper-left corner, e.g. `N45W090` covers longitude
//! W090..W089 and latitude N44..N45.
use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct Tile {
    lat: i32,
    lon: i32,
}

impl Tile {
    pub fn new(lat: i32, lon: i32) -> Result<Self> {
        if !(-90..=90).contains(&lat) || !(-180..=180).contains(&lon) {
            return Err(Error::InvalidTileName(format!("lat={lat} lon={lon}")));
        }
        Ok(Tile { lat, lon })
    }

    /// Latitude of the upper edge
    pub fn lat(&self) -> i32 {
        self.lat
    }

    /// Longitude of the left edge
    pub fn lon(&self) -> i32 {
        self.lon
    }

    pub fn name(&self) -> String {
        self.to_string()
    }
}

fn lat_label(lat: i32) -> String {
    if lat >= 0 {
        format!("N{:02}", lat.abs())
    } else {
        format!("S{:02}", lat.abs())
    }
}

fn lon_label(lon: i32) -> String {
    if lon >= 0 {
        format!("E{:03}", lon.abs())
    } else {
        format!("W{:03}", lon.abs())
    }
}

impl std::fmt::Display for Tile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", lat_label(self.lat), lon_label(self.lon))
    }
}

impl FromStr for Tile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidTileName(s.to_string());
        let b = s.as_bytes();
        if b.len() != 7 || !s.is_ascii() {
            return Err(invalid());
        }
        let lat_sign = match b[0] {
            b'N' => 1,
            b'S' => -1,
            _ => return Err(invalid()),
        };
        let lon_sign = match b[3] {
            b'E' => 1,
            b'W' => -1,
            _ => return Err(invalid()),
        };
        let digits = |part: &str| -> Result<i32> {
            if part.bytes().all(|c| c.is_ascii_digit()) {
                part.parse::<i32>().map_err(|_| invalid())
            } else {
                Err(invalid())
            }
        };
        let lat = digits(&s[1..3])? * lat_sign;
        let lon = digits(&s[4..7])? * lon_sign;
        Tile::new(lat, lon).map_err(|_| invalid())
    }
}

// Tiles sort by name, which is the order tile listings and outputs use.
impl Ord for Tile {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

impl PartialOrd for Tile {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Every tile whose upper-left corner falls inside the box spanned by the
/// two corner coordinates. Corners may be given in any order.
pub fn subset_tiles(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> Result<Vec<Tile>> {
    let bad = |reason| Error::InvalidSubsetBounds {
        lon1,
        lat1,
        lon2,
        lat2,
        reason,
    };
    if ![lon1, lat1, lon2, lat2].iter().all(|v| v.is_finite()) {
        return Err(bad("coordinates must be finite"));
    }
    if lon1.abs() > 180.0 || lon2.abs() > 180.0 {
        return Err(bad("longitude outside [-180, 180]"));
    }
    if lat1.abs() > 90.0 || lat2.abs() > 90.0 {
        return Err(bad("latitude outside [-90, 90]"));
    }

    let lon_start = lon1.min(lon2).floor() as i32;
    let lon_end = lon1.max(lon2).ceil() as i32;
    let lat_top = lat1.max(lat2).ceil() as i32;
    let lat_bottom = lat1.min(lat2).floor() as i32;

    let mut tiles = BTreeSet::new();
    for lat in ((lat_bottom + 1)..=lat_top).rev() {
        for lon in lon_start..lon_end {
            tiles.insert(Tile::new(lat, lon)?);
        }
    }
    if tiles.is_empty() {
        return Err(bad("extent covers no whole-degree tile"));
    }
    Ok(tiles.into_iter().collect())
}

/// How the user asked for tiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TileSelection {
    All,
    /// Tile IDs, or a single path to a file listing them
    Ids(Vec<String>),
    /// Upper-left lon/lat, lower-right lon/lat
    Bounds([f64; 4]),
}

impl TileSelection {
    fn candidates(&self) -> Result<Option<BTreeSet<Tile>>> {
        match self {
            TileSelection::All => Ok(None),
            TileSelection::Bounds([lon1, lat1, lon2, lat2]) => {
                Ok(Some(subset_tiles(*lon1, *lat1, *lon2, *lat2)?.into_iter().collect()))
            }
            TileSelection::Ids(ids) => {
                let tokens: Vec<String> = match ids.as_slice() {
                    [single] if Path::new(single).is_file() => {
                        debug!("Reading tile ids from {}", single);
                        std::fs::read_to_string(single)?
                            .split_whitespace()
                            .map(str::to_string)
                            .collect()
                    }
                    _ => ids.clone(),
                };
                let mut set = BTreeSet::new();
                for token in tokens {
                    match token.parse::<Tile>() {
                        Ok(tile) => {
                            set.insert(tile);
                        }
                        Err(_) => warn!("Ignoring invalid tile id: {}", token),
                    }
                }
                Ok(Some(set))
            }
        }
    }
}

/// Resolve a selection against the tiles that exist at the data root.
/// Output is sorted; an empty result is `NoTilesFound`.
pub fn select_tiles(selection: &TileSelection, available: &BTreeSet<Tile>) -> Result<Vec<Tile>> {
    let selected: Vec<Tile> = match selection.candidates()? {
        None => available.iter().copied().collect(),
        Some(candidates) => candidates.intersection(available).copied().collect(),
    };
    if selected.is_empty() {
        return Err(Error::NoTilesFound);
    }
    Ok(selected)
}

/// Region name derived from the extent of a tile set, e.g. `UL-N50W090-LR-N48W088`.
pub fn region_name(tiles: &[Tile]) -> Option<String> {
    let max_lat = tiles.iter().map(|t| t.lat).max()?;
    let min_lat = tiles.iter().map(|t| t.lat).min()?;
    let min_lon = tiles.iter().map(|t| t.lon).min()?;
    let max_lon = tiles.iter().map(|t| t.lon).max()?;
    Some(format!(
        "UL-{}{}-LR-{}{}",
        lat_label(max_lat),
        lon_label(min_lon),
        lat_label(min_lat - 1),
        lon_label(max_lon + 1)
    ))
}

/// Resolve the user-facing region name: `ULLR` derives it from the tiles,
/// anything else has `_` replaced by `-` so it can't collide with the
/// `{region}_{metric}` separator.
pub fn resolve_region_name(name: &str, tiles: &[Tile]) -> Result<String> {
    if name == "ULLR" {
        region_name(tiles).ok_or(Error::NoTilesFound)
    } else {
        Ok(name.replace('_', "-"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(tiles: &[Tile]) -> Vec<String> {
        tiles.iter().map(Tile::name).collect()
    }

    #[test]
    fn subset_of_arctic_box_yields_two_tiles() {
        let tiles = subset_tiles(-84.0, 70.0, -82.0, 71.0).unwrap();
        assert_eq!(names(&tiles), vec!["N71W083", "N71W084"]);
    }

    #[test]
    fn subset_is_symmetric_in_corner_order() {
        let a = subset_tiles(-115.0, 50.0, -105.5, 40.2).unwrap();
        let b = subset_tiles(-105.5, 40.2, -115.0, 50.0).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 10 * 10);
    }

    #[test]
    fn fractional_bounds_expand_to_whole_tiles() {
        let tiles = subset_tiles(10.5, 45.5, 11.2, 44.9).unwrap();
        assert_eq!(names(&tiles), vec!["N45E010", "N45E011", "N46E010", "N46E011"]);
    }

    #[test]
    fn degenerate_or_invalid_bounds_are_rejected() {
        assert!(matches!(
            subset_tiles(10.0, 45.0, 10.0, 44.0),
            Err(Error::InvalidSubsetBounds { .. })
        ));
        assert!(matches!(
            subset_tiles(f64::NAN, 45.0, 11.0, 44.0),
            Err(Error::InvalidSubsetBounds { .. })
        ));
        assert!(matches!(
            subset_tiles(10.0, 95.0, 11.0, 44.0),
            Err(Error::InvalidSubsetBounds { .. })
        ));
    }

    #[test]
    fn tile_name_round_trip() {
        let tile: Tile = "N45W090".parse().unwrap();
        assert_eq!((tile.lat(), tile.lon()), (45, -90));
        assert_eq!(tile.to_string(), "N45W090");

        let south: Tile = "S05E120".parse().unwrap();
        assert_eq!((south.lat(), south.lon()), (-5, 120));
    }

    #[test]
    fn malformed_tile_names_fail_to_parse() {
        for bad in ["N45W90", "X45W090", "N45Q090", "N9AW090", "N95W090", "N45W190", "n45w090"] {
            assert!(bad.parse::<Tile>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn selection_intersects_with_available_tiles() {
        let available: BTreeSet<Tile> = ["N45W090", "N44W090", "N45W089"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();

        let ids = TileSelection::Ids(vec!["N45W089".into(), "N45W090".into(), "bogus".into()]);
        assert_eq!(names(&select_tiles(&ids, &available).unwrap()), vec!["N45W089", "N45W090"]);

        let all = select_tiles(&TileSelection::All, &available).unwrap();
        assert_eq!(names(&all), vec!["N44W090", "N45W089", "N45W090"]);

        let elsewhere = TileSelection::Bounds([10.0, 50.0, 12.0, 48.0]);
        assert!(matches!(select_tiles(&elsewhere, &available), Err(Error::NoTilesFound)));
    }

    #[test]
    fn tile_ids_can_come_from_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("tiles.txt");
        std::fs::write(&list, "N45W090\nN44W090  N10E010\n").unwrap();
        let available: BTreeSet<Tile> = ["N45W090", "N44W090"].iter().map(|s| s.parse().unwrap()).collect();
        let selection = TileSelection::Ids(vec![list.to_string_lossy().into_owned()]);
        assert_eq!(names(&select_tiles(&selection, &available).unwrap()), vec!["N44W090", "N45W090"]);
    }

    #[test]
    fn region_name_spans_tile_extent() {
        let tiles: Vec<Tile> = ["N50W090", "N49W089"].iter().map(|s| s.parse().unwrap()).collect();
        assert_eq!(region_name(&tiles).unwrap(), "UL-N50W090-LR-N48W088");
        assert_eq!(resolve_region_name("My_Region", &tiles).unwrap(), "My-Region");
    }
}

//! Fixed catalog of tile metrics and the token matcher used to select them.
use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::types::{Polarization, Product, RepeatInterval, Season};

/// One raster layer of the tile product, e.g. `winter_vv_COH12`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct Metric {
    pub season: Season,
    pub polarization: Polarization,
    pub product: Product,
}

impl Metric {
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}_{}", self.season, self.polarization, self.product)
    }
}

impl Ord for Metric {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name().cmp(&other.name())
    }
}

impl PartialOrd for Metric {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

fn products_for(polarization: Polarization) -> Vec<Product> {
    if !polarization.is_copol() {
        return vec![Product::Amp];
    }
    let mut products = vec![Product::Amp];
    products.extend(RepeatInterval::all().map(Product::Coh));
    products.extend([Product::Rho, Product::Rmse, Product::Tau]);
    products
}

/// All metrics in the data set, sorted by name.
pub fn catalog() -> Vec<Metric> {
    let mut all: Vec<Metric> = Season::ALL
        .iter()
        .flat_map(|&season| {
            Polarization::ALL.iter().flat_map(move |&polarization| {
                products_for(polarization).into_iter().map(move |product| Metric {
                    season,
                    polarization,
                    product,
                })
            })
        })
        .collect();
    all.sort();
    all
}

/// A filter token selects every catalog entry whose name contains it.
pub fn matches(token: &str, metric: &Metric) -> bool {
    metric.name().contains(token)
}

/// Select metrics by tokens. An empty token list selects the whole catalog.
/// A single token naming an existing file is read as a whitespace-separated
/// list of exact metric names; other tokens match as substrings. Result is
/// sorted and deduplicated, possibly empty.
pub fn select_metrics(tokens: &[String]) -> Result<Vec<Metric>> {
    let all = catalog();
    if tokens.is_empty() {
        return Ok(all);
    }
    let selected: BTreeSet<Metric> = match tokens {
        [single] if Path::new(single).is_file() => {
            debug!("Reading metric selection from {}", single);
            let names: BTreeSet<String> = std::fs::read_to_string(single)?
                .split_whitespace()
                .map(str::to_string)
                .collect();
            all.into_iter().filter(|m| names.contains(&m.name())).collect()
        }
        _ => all
            .into_iter()
            .filter(|m| tokens.iter().any(|t| matches(t, m)))
            .collect(),
    };
    Ok(selected.into_iter().collect())
}

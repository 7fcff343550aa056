use std::path::Path;

use tracing::info;

use crate::core::catalog::Metric;
use crate::core::tiles::Tile;
use crate::error::Result;

/// Public HTTPS endpoint of the global coherence bucket.
pub const HTTPS_ROOT: &str = "https://sentinel-1-global-coherence-earthbigdata.s3.us-west-2.amazonaws.com";

/// Download URL of one tile product, tile-major then metric order.
pub fn download_urls(https_root: &str, tile_path: &str, tiles: &[Tile], metrics: &[Metric]) -> Vec<String> {
    let root = https_root.trim_end_matches('/');
    let tile_path = tile_path.trim_matches('/');
    tiles
        .iter()
        .flat_map(|t| {
            metrics
                .iter()
                .map(move |m| format!("{root}/{tile_path}/{t}/{t}_{m}.tif"))
        })
        .collect()
}

/// Write one URL per line to `outfile`; returns the number written.
pub fn write_download_urls(outfile: &Path, urls: &[String]) -> Result<usize> {
    if let Some(parent) = outfile.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(outfile, urls.join("\n"))?;
    info!("Wrote {} URLs to {:?}", urls.len(), outfile);
    Ok(urls.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::catalog;

    #[test]
    fn urls_follow_bucket_layout() {
        let tiles: Vec<Tile> = vec!["N48W090".parse().unwrap(), "N48W089".parse().unwrap()];
        let metrics: Vec<Metric> = catalog()
            .into_iter()
            .filter(|m| m.name() == "summer_vv_COH12" || m.name() == "summer_vh_AMP")
            .collect();
        let urls = download_urls(HTTPS_ROOT, "data/tiles", &tiles, &metrics);
        assert_eq!(urls.len(), 4);
        assert_eq!(
            urls[0],
            format!("{HTTPS_ROOT}/data/tiles/N48W090/N48W090_{}.tif", metrics[0])
        );

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("lists/urls.txt");
        assert_eq!(write_download_urls(&out, &urls).unwrap(), 4);
        assert_eq!(std::fs::read_to_string(out).unwrap().lines().count(), 4);
    }
}

use gdal::Dataset;
use gdal::Metadata;
use gdal::spatial_ref::SpatialRef;

use crate::io::GdalError;
use crate::io::raster::GeoReference;

/// Provenance tags for an output raster followed by caller-supplied items.
/// `TIFFTAG_DATETIME` is the only value that differs between identical runs.
pub fn output_metadata(extra: &[(String, String)]) -> Vec<(String, String)> {
    let mut items = vec![
        (
            "TIFFTAG_SOFTWARE".to_string(),
            format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        ),
        (
            "TIFFTAG_DATETIME".to_string(),
            chrono::Local::now().format("%Y:%m:%d %H:%M:%S").to_string(),
        ),
    ];
    items.extend(extra.iter().cloned());
    items
}

/// Set georeferencing (when given and non-identity) and metadata items on a
/// GeoTIFF dataset.
pub fn embed_tiff_metadata(
    ds: &mut Dataset,
    georef: Option<&GeoReference>,
    items: &[(String, String)],
) -> Result<(), GdalError> {
    let is_identity = |gt: [f64; 6]| gt == [0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

    if let Some(georef) = georef {
        if !is_identity(georef.geotransform) {
            ds.set_geo_transform(&georef.geotransform)?;
            // Only set projection if we also set a non-identity geotransform
            if !georef.projection.is_empty() {
                // accepts both WKT and `EPSG:` codes
                let srs = SpatialRef::from_definition(&georef.projection)?;
                ds.set_spatial_ref(&srs)?;
            }
        }
    }

    for (key, value) in items {
        ds.set_metadata_item(key, value, "")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provenance_tags_come_first() {
        let items = output_metadata(&[("REGION".into(), "UL-N71W084-LR-N70W082".into())]);
        let keys: Vec<&str> = items.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["TIFFTAG_SOFTWARE", "TIFFTAG_DATETIME", "REGION"]);
        assert!(items[0].1.starts_with("globcoh "));
        assert_eq!(items[1].1.len(), "2024:01:31 12:00:00".len());
    }
}

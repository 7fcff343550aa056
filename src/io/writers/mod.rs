//! Output writers: compressed GeoTIFFs with provenance metadata, and plain
//! download URL lists.
pub mod metadata;
pub mod tiff;
pub mod urls;

pub use tiff::write_geotiff;
pub use urls::{download_urls, write_download_urls};

//! I/O layer: object stores and parallel tile fetching, the raster backend
//! abstraction with its GDAL and in-memory implementations, VRT mosaic
//! manifests, and output `writers`.
pub mod command;
pub mod fetch;
pub use fetch::{FetchJob, FetchReport, FetchStatus, fetch_tiles};

pub mod gdal;
pub use gdal::{GdalBackend, GdalError};

pub mod memory;
pub use memory::MemoryBackend;

pub mod raster;
pub use raster::{GeoReference, RasterBackend, RasterData, RasterInfo, SampleType, WriteOptions};

pub mod store;
pub use store::{LocalStore, Location, ObjectStore, RoutedStore, S3CliStore, SyncFilter};

pub mod vrt;
pub mod writers;

//! Crate-level error type and `Result` alias for stable, structured error handling.
//! Converts underlying I/O, GDAL, XML and JSON errors, and provides semantic
//! variants for tile/metric selection, fetching, fitting and output failures.
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] crate::io::GdalError),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No tiles found for the requested selection")]
    NoTilesFound,

    #[error("No metric {metric} available for the selected tiles")]
    NoMetricAvailable { metric: String },

    #[error("Fetch of tile {tile} timed out after {seconds}s")]
    FetchTimeout { tile: String, seconds: u64 },

    #[error("Invalid subset bounds ({lon1}, {lat1}, {lon2}, {lat2}): {reason}")]
    InvalidSubsetBounds {
        lon1: f64,
        lat1: f64,
        lon2: f64,
        lat2: f64,
        reason: &'static str,
    },

    #[error("Decay model fit did not converge after {iterations} iterations")]
    FitNonConvergence { iterations: usize },

    #[error("Invalid tile name: {0}")]
    InvalidTileName(String),

    #[error("Invalid path: {}", path.display())]
    InvalidPath { path: PathBuf },

    #[error("Invalid argument: {arg}={value}")]
    InvalidArgument { arg: &'static str, value: String },

    #[error("Missing required argument: {arg}")]
    MissingArgument { arg: String },

    #[error("Output exists and overwrite is disabled: {}", path.display())]
    OutputExists { path: PathBuf },

    #[error("Dimension mismatch: expected {expected_rows}x{expected_cols}, got {rows}x{cols}")]
    DimensionMismatch {
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Command `{command}` failed: {status}")]
    CommandFailed { command: String, status: String },

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("External error: {0}")]
    External(String),
}

impl Error {
    pub fn external<E: std::fmt::Display>(e: E) -> Self {
        Error::External(e.to_string())
    }

    /// Per-tile, per-metric and per-group conditions that are logged and
    /// skipped rather than aborting a run. Selection and argument errors are
    /// not recoverable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Gdal(_)
                | Error::Xml(_)
                | Error::NoMetricAvailable { .. }
                | Error::FetchTimeout { .. }
                | Error::FitNonConvergence { .. }
                | Error::InvalidPath { .. }
                | Error::OutputExists { .. }
                | Error::DimensionMismatch { .. }
                | Error::CommandFailed { .. }
                | Error::Processing(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_failures_are_recoverable_and_selection_errors_are_not() {
        assert!(Error::OutputExists { path: "a.tif".into() }.is_recoverable());
        assert!(
            Error::DimensionMismatch {
                expected_rows: 1,
                expected_cols: 2,
                rows: 1,
                cols: 3
            }
            .is_recoverable()
        );
        assert!(Error::Io(std::io::Error::other("unreadable")).is_recoverable());
        assert!(Error::FetchTimeout { tile: "N45W090".into(), seconds: 5 }.is_recoverable());

        assert!(!Error::NoTilesFound.is_recoverable());
        assert!(!Error::InvalidTileName("X".into()).is_recoverable());
        assert!(
            !Error::InvalidArgument {
                arg: "--no-cache",
                value: "s3://bucket".into()
            }
            .is_recoverable()
        );
        assert!(!Error::External("thread pool".into()).is_recoverable());
    }
}

//! Command Line Interface (CLI) layer for globcoh.
//!
//! This module defines argument parsing (`args`), error types (`errors`),
//! and the orchestration logic (`runner`) for the mosaic, composite and
//! pair-planning flows. It wires user-provided options and the optional
//! JSON config to the library functionality exposed via `globcoh::api`.
pub mod args;
pub mod errors;
pub mod runner;

pub use args::CliArgs;
pub use runner::run;

//! Core building blocks: tile and metric selection, the acquisition naming
//! model, pair planning, run parameters, and the per-pixel `processing`
//! kernels consumed by the high-level `api` module.
pub mod acquisition;
pub mod catalog;
pub mod pairs;
pub mod params;
pub mod processing;
pub mod tiles;

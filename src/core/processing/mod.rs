//! Per-pixel kernels: masked seasonal statistics (`composite`) and the
//! coherence-decay model fit (`decay`).
pub mod composite;
pub mod decay;

#![doc = r#"
globcoh — tools for the Sentinel-1 global coherence and backscatter data set.

This crate mosaics the published 1×1 degree tiles into regional rasters,
builds the per-tile seasonal composites (coherence medians per repeat
interval, amplitude means) and fits the per-pixel coherence-decay model
`γ(t) = (1-ρ)·exp(-t/τ) + ρ`. It powers the `globcoh` CLI and can be
embedded in your own Rust applications.

Requirements
------------
- GDAL development headers and runtime available on your system.
- The AWS CLI on `PATH` when reading from or writing to `s3://` locations.
- Rust 2024 edition toolchain.

Quick start: mosaic a region
----------------------------
```rust,no_run
use globcoh::{GdalBackend, MosaicParams, RunContext, S3CliStore, Settings, TileSelection, run_mosaic};

fn main() -> globcoh::Result<()> {
    let settings = Settings::default();
    let mut params = MosaicParams::from_settings(&settings, "/out");
    params.selection = TileSelection::Bounds([-84.0, 71.0, -82.0, 70.0]);
    params.metrics = vec!["winter_vv_COH12".to_string()];

    let store = S3CliStore::new(&settings.region);
    let report = run_mosaic(&params, &RunContext::new(false, false), &store, &GdalBackend)?;
    for output in &report.outputs {
        println!("{}", output.display());
    }
    Ok(())
}
```

Composite one tile from local inputs
------------------------------------
```rust,no_run
use globcoh::{CompositeParams, GdalBackend, LocalStore, RunContext, Settings, run_composite};

fn main() -> globcoh::Result<()> {
    let params = CompositeParams::from_settings(&Settings::default(), "N45W090", "/data/in", "/data/out");
    let report = run_composite(&params, &RunContext::new(false, false), &LocalStore, &GdalBackend)?;
    println!("{} outputs for {}", report.outputs.len(), report.tile);
    Ok(())
}
```

Fit the decay model directly
----------------------------
```rust,no_run
use globcoh::core::processing::decay::{DecayParams, coherence, fit_decay};

let truth = DecayParams { rho: 0.2, tau: 15.0 };
let t = [6.0, 12.0, 18.0, 24.0, 36.0, 48.0];
let y: Vec<f64> = t.iter().map(|&t| coherence(t, truth)).collect();
let fit = fit_decay(&t, &y, DecayParams { rho: 0.5, tau: 4.0 }).unwrap();
assert!((fit.rho - 0.2).abs() < 1e-3);
```

Error handling
--------------
All public functions return `globcoh::Result<T>`; match on `globcoh::Error`
to handle specific cases.

```rust,no_run
use globcoh::{Error, TileSelection, core::tiles::select_tiles};

let available = Default::default();
match select_tiles(&TileSelection::All, &available) {
    Ok(tiles) => println!("{} tiles", tiles.len()),
    Err(Error::NoTilesFound) => eprintln!("nothing to do"),
    Err(other) => eprintln!("{other}"),
}
```

Useful modules
--------------
- [`api`] — the `mosaic` and `composite` pipelines and pair planning.
- [`core`] — tile selection, the metric catalog, acquisition naming, pair
  planning and the compositing/fitting kernels.
- [`io`] — raster backends (GDAL, in-memory), VRT manifests, object stores
  and the parallel fetcher.
- [`types`] — seasons, polarizations, repeat intervals and products.
- [`error`] — crate-level `Error` and `Result`.
"#]

pub mod api;
pub mod core;
pub mod error;
pub mod io;
pub mod types;

// Types
pub use crate::core::catalog::{Metric, catalog, select_metrics};
pub use crate::core::params::{CompositeParams, MosaicParams, Settings};
pub use crate::core::tiles::{Tile, TileSelection};
pub use error::{Error, Result};
pub use types::{OutputMode, Polarization, Product, RepeatInterval, Season};

// Backends and stores
pub use io::{GdalBackend, LocalStore, MemoryBackend, ObjectStore, RasterBackend, RoutedStore, S3CliStore};

// High-level API re-exports
pub use api::{
    CompositeReport, MosaicReport, RunContext, pair_plan, parse_dates, plan_composites,
    run_composite, run_mosaic,
};

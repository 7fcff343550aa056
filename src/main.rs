//! globcoh CLI entrypoint.
//!
//! Provides a thin wrapper over the `cli` module: parse args, dispatch to
//! the `mosaic`, `composite` or `pairs` subcommand, and exit with an
//! appropriate status. For programmatic use, prefer the library API
//! (`globcoh::api`).

use clap::Parser;

mod cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::CliArgs::parse();
    cli::run(args)
}

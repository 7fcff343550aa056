use std::path::PathBuf;

use thiserror::Error;

/// Application-specific errors for the CLI
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Missing required argument: {arg}")]
    MissingArgument { arg: String },

    #[error("Conflicting arguments: {a} and {b}")]
    ConflictingArguments { a: String, b: String },

    #[error("Could not load config {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: globcoh::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Library(#[from] globcoh::Error),
}

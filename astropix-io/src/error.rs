//! I/O error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding or decoding error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// A cell that could not be parsed.
    #[error("{path}: line {line}: cannot parse {column} from '{value}'")]
    Parse {
        /// File being read.
        path: PathBuf,
        /// One-based line number.
        line: u64,
        /// Column name.
        column: &'static str,
        /// Cell content.
        value: String,
    },

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] astropix_core::Error),
}

//! Error types for astropix-core.

use thiserror::Error;

/// Result type alias for astropix operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for astropix operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Pixel coordinate outside the chip geometry.
    #[error("invalid pixel coordinate: ({col}, {row})")]
    InvalidCoordinate { col: u16, row: u16 },

    /// Tolerance that is negative, zero or not finite.
    #[error("invalid {name} tolerance: {value}")]
    InvalidTolerance { name: &'static str, value: f64 },

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Row batch whose records do not share the batch readout index.
    #[error("record for readout {found} pushed into batch for readout {expected}")]
    ReadoutMismatch { expected: u64, found: u64 },
}

//! Acquisition error types.

use thiserror::Error;

/// Result type for acquisition.
pub type Result<T> = std::result::Result<T, AcquisitionError>;

/// Errors that end or prevent a run.
///
/// Decode failures are not errors at this level; they are counted and
/// replaced by placeholder rows.
#[derive(Error, Debug)]
pub enum AcquisitionError {
    /// Device communication failed.
    #[error("device error: {0}")]
    Device(#[from] astropix_device::DeviceError),

    /// Output file error.
    #[error("output error: {0}")]
    Output(#[from] astropix_io::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Run parameters could not be (de)serialized.
    #[error("run parameter error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid acquisition configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Core library error.
    #[error("core error: {0}")]
    Core(#[from] astropix_core::Error),
}

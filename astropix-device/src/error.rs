//! Device and decode error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for device operations.
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Errors raised while talking to a device.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// I/O error during device communication or config writing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Chip configuration could not be (de)serialized.
    #[error("chip configuration error: {0}")]
    Json(#[from] serde_json::Error),

    /// Chip configuration file is missing.
    #[error("chip configuration not found: {path}")]
    ConfigNotFound {
        /// Path that was checked.
        path: PathBuf,
    },

    /// The device connection was already released.
    #[error("device connection is closed")]
    NotConnected,

    /// Operation not valid in the current device state.
    #[error("device in invalid state: {0}")]
    InvalidState(String),

    /// Data transfer failed.
    #[error("readout transfer failed: {0}")]
    Transfer(String),

    /// Core library error.
    #[error("core error: {0}")]
    Core(#[from] astropix_core::Error),
}

/// Errors raised while decoding a raw readout.
///
/// These are recovered by the acquisition loop, which substitutes a
/// placeholder record for the readout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A record header declares more payload bytes than the readout holds.
    #[error("record at byte {offset} declares {declared} payload bytes, {available} remain")]
    Truncated {
        /// Offset of the record header.
        offset: usize,
        /// Payload length from the header.
        declared: usize,
        /// Bytes left after the header.
        available: usize,
    },

    /// A decoded field lies outside its valid range.
    #[error("{field} value {value} out of range (limit {limit})")]
    OutOfRange {
        /// Field name.
        field: &'static str,
        /// Decoded value.
        value: u32,
        /// Exclusive upper bound.
        limit: u32,
    },
}

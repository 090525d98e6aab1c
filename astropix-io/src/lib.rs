//! astropix-io: File formats for AstroPix runs.
//!
//! - Structured event table (CSV, one row per decoded record)
//! - Raw-bitstream log (header block, then one hex line per readout)
//! - Noise-scan summary (CSV of per-pixel trigger counts)
//! - Result exports (pixel hits, maps, spectra)
//!

mod error;
pub mod export;
mod noise;
mod rawlog;
mod table;

pub use error::{Error, Result};
pub use noise::{find_noise_summary, read_noise_summary};
pub use rawlog::{read_raw_log, RawLog, RawLogWriter};
pub use table::{read_table, write_table, TableWriter, TABLE_COLUMNS};

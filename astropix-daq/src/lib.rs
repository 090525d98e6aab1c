//! astropix-daq: Readout acquisition for AstroPix chips.
//!
//! [`AcquisitionLoop`] configures a [`Device`](astropix_device::Device),
//! polls it for readouts, logs every raw readout, decodes it into rows and
//! shuts the run down cleanly on every exit path. [`decode_raw_log`] replays
//! the decode step over a log written by an earlier run.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use astropix_daq::{AcquisitionConfig, AcquisitionLoop};
//! use astropix_device::SimulatedDevice;
//!
//! let config = AcquisitionConfig::default().with_max_readouts(100);
//! let mut daq = AcquisitionLoop::open(SimulatedDevice::new(), config)?;
//! let report = daq.run(&AtomicBool::new(false));
//! println!("{:?} after {} readouts", report.termination, report.readouts);
//! # Ok::<(), astropix_daq::AcquisitionError>(())
//! ```

mod acquisition;
mod config;
mod display;
mod error;
mod offline;
mod sink;

pub use acquisition::{AcquisitionLoop, RunReport, ShutdownStep, Termination};
pub use config::{AcquisitionConfig, ErrorPolicy, InjectionConfig};
pub use display::{HitDisplay, LogDisplay};
pub use error::{AcquisitionError, Result};
pub use offline::{decode_directory, decode_raw_log, offline_table_path, OfflineReport};
pub use sink::{file_timestamp, EventSink, RunFiles};

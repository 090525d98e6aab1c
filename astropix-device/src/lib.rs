//! astropix-device: Device interface and readout decoding for AstroPix chips.
//!
//! The acquisition loop talks to hardware only through the [`Device`] trait.
//! This crate provides the trait, the readout [`frame`] codec shared by every
//! adapter, and two adapters that need no hardware:
//!
//! - [`SimulatedDevice`] - scripted readouts and a seeded beam generator
//! - [`ReplayDevice`] - replays readouts captured in a raw-bitstream log
//!

mod device;
mod error;
pub mod frame;
mod replay;
mod simulated;

pub use device::{ChipConfig, Device, RawReadout};
pub use error::{DecodeError, DeviceError, Result};
pub use frame::{encode_hit, FrameDecoder};
pub use replay::ReplayDevice;
pub use simulated::{BeamGenerator, BeamProfile, DeviceCall, SimulatedDevice};

//! astropix-core: Core data model for AstroPix readout processing.
//!
//! This crate provides the types shared by acquisition and reconstruction:
//! decoded hit records, events, reconstructed pixel hits, run summaries
//! and the noise mask.
//!

pub mod error;
pub mod event;
pub mod geometry;
pub mod mask;
pub mod pixel;
pub mod record;
pub mod summary;

pub use error::{Error, Result};
pub use event::{group_events, Event};
pub use geometry::{ChipGeometry, GridSpec, PixelCoord};
pub use mask::{MaskCoverage, NoiseCount, NoiseMask};
pub use pixel::PixelHit;
pub use record::{unix_time_now, HitData, HitRecord, HitTable, RowBatch, PAYLOAD_HIT};
pub use summary::RunSummary;

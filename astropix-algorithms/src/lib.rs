//! astropix-algorithms: Pixel-pair reconstruction for AstroPix data.
//!
//! The chip reports column and row threshold crossings separately. This
//! crate pairs them back into 2-D pixel hits and aggregates the result:
//! - **Pairing** - coincidence matching inside timestamp and ToT windows
//! - **Aggregation** - hit maps, coarse grids, per-pixel ToT, ToT spectrum
//! - **Batch** - parallel reconstruction of independent runs
//!
#![warn(missing_docs)]

mod aggregate;
mod batch;
mod pairing;

pub use aggregate::{CoarseCell, HitMap, TotMap, TotSpectrum};
pub use batch::{reconstruct_runs, BatchResult, RunResult};
pub use pairing::{
    pair_crossings, EventOutcome, MatchStrategy, PairingConfig, PayloadPolicy,
    PixelPairReconstructor, Reconstruction,
};

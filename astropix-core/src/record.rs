//! Decoded readout records.
//!
//! A readout pulled from the chip decodes into zero or more [`HitRecord`]s
//! that share one readout index. A readout that fails to decode is
//! represented by a single placeholder record that keeps only the readout
//! index and the host time.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use std::time::{SystemTime, UNIX_EPOCH};

use crate::{Error, Result};

/// Payload tag of a well-formed threshold-crossing record.
pub const PAYLOAD_HIT: u8 = 4;

/// Fields of one decoded threshold crossing.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HitData {
    /// Chip identifier from the record header.
    pub chip_id: u8,
    /// Payload tag; [`PAYLOAD_HIT`] for a well-formed crossing.
    pub payload: u8,
    /// Pixel index along the axis given by `is_col`.
    pub location: u16,
    /// True for a column crossing, false for a row crossing.
    pub is_col: bool,
    /// Chip clock ticks.
    pub timestamp: u32,
    /// Most significant nibble of the ToT counter.
    pub tot_msb: u8,
    /// Least significant byte of the ToT counter.
    pub tot_lsb: u8,
    /// Full ToT counter.
    pub tot_total: u16,
    /// ToT converted to microseconds.
    pub tot_us: f64,
}

impl HitData {
    /// Returns true if this record carries a well-formed crossing.
    #[inline]
    #[must_use]
    pub fn is_nominal(&self) -> bool {
        self.payload == PAYLOAD_HIT
    }
}

/// One row of the structured event table.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HitRecord {
    /// Readout (event) index.
    pub readout: u64,
    /// Decoded fields; `None` for a placeholder written on decode failure.
    pub hit: Option<HitData>,
    /// Host wall-clock time of the decode in seconds since the Unix epoch.
    pub hittime: Option<f64>,
}

impl HitRecord {
    /// Creates a decoded record.
    #[must_use]
    pub fn decoded(readout: u64, hit: HitData, hittime: f64) -> Self {
        Self {
            readout,
            hit: Some(hit),
            hittime: Some(hittime),
        }
    }

    /// Creates the placeholder substituted for a readout that failed to decode.
    #[must_use]
    pub fn placeholder(readout: u64, hittime: Option<f64>) -> Self {
        Self {
            readout,
            hit: None,
            hittime,
        }
    }

    /// Returns true for a placeholder record.
    #[inline]
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.hit.is_none()
    }

    /// Returns the payload tag, if decoded.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> Option<u8> {
        self.hit.map(|h| h.payload)
    }

    /// Returns the most significant ToT nibble, if decoded.
    #[inline]
    #[must_use]
    pub fn tot_msb(&self) -> Option<u8> {
        self.hit.map(|h| h.tot_msb)
    }
}

/// The rows produced by a single readout.
///
/// Batches are built once and never mutated; the event table is the
/// concatenation of its batches in readout order.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBatch {
    readout: u64,
    rows: Box<[HitRecord]>,
}

impl RowBatch {
    /// Builds a batch from decoded records.
    ///
    /// # Errors
    /// Returns [`Error::ReadoutMismatch`] if a record belongs to another readout.
    pub fn new(readout: u64, rows: Vec<HitRecord>) -> Result<Self> {
        if let Some(bad) = rows.iter().find(|r| r.readout != readout) {
            return Err(Error::ReadoutMismatch {
                expected: readout,
                found: bad.readout,
            });
        }
        Ok(Self {
            readout,
            rows: rows.into_boxed_slice(),
        })
    }

    /// Builds the single-row batch for a failed decode.
    #[must_use]
    pub fn placeholder(readout: u64, hittime: Option<f64>) -> Self {
        Self {
            readout,
            rows: Box::new([HitRecord::placeholder(readout, hittime)]),
        }
    }

    /// Readout index shared by every row.
    #[must_use]
    pub fn readout(&self) -> u64 {
        self.readout
    }

    /// Rows in decode order.
    #[must_use]
    pub fn rows(&self) -> &[HitRecord] {
        &self.rows
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the readout decoded to no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns true if this is a decode-failure placeholder batch.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.rows.len() == 1 && self.rows[0].is_placeholder()
    }

    /// Returns true if the batch has at least one row and every row is well formed.
    #[must_use]
    pub fn is_nominal(&self) -> bool {
        !self.rows.is_empty()
            && self
                .rows
                .iter()
                .all(|r| r.hit.is_some_and(|h| h.is_nominal()))
    }

    /// Splits the rows into column and row coordinates for display.
    #[must_use]
    pub fn axis_locations(&self) -> (Vec<u16>, Vec<u16>) {
        let mut cols = Vec::new();
        let mut rows = Vec::new();
        for hit in self.rows.iter().filter_map(|r| r.hit) {
            if hit.is_col {
                cols.push(hit.location);
            } else {
                rows.push(hit.location);
            }
        }
        (cols, rows)
    }
}

/// A structured event table for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HitTable {
    /// Run label, usually the source file stem.
    pub name: String,
    /// Rows in table order.
    pub records: Vec<HitRecord>,
    /// Placeholder rows that carry no readout index (legacy offline tables).
    pub unindexed_placeholders: usize,
}

impl HitTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Concatenates row batches into a table.
    #[must_use]
    pub fn from_batches<'a, I>(name: impl Into<String>, batches: I) -> Self
    where
        I: IntoIterator<Item = &'a RowBatch>,
    {
        let records = batches
            .into_iter()
            .flat_map(|b| b.rows().iter().copied())
            .collect();
        Self {
            name: name.into(),
            records,
            unindexed_placeholders: 0,
        }
    }

    /// Number of rows including unindexed placeholders.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.records.len() + self.unindexed_placeholders
    }

    /// Number of placeholder rows including unindexed ones.
    #[must_use]
    pub fn placeholder_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_placeholder()).count() + self.unindexed_placeholders
    }
}

/// Current host time in seconds since the Unix epoch.
#[must_use]
pub fn unix_time_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}

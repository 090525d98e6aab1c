//! Reconstructed pixel hits.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::geometry::PixelCoord;
use crate::record::HitData;

/// A 2-D pixel hit built from a coincident column and row crossing.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PixelHit {
    /// Column from the column crossing.
    pub col: u16,
    /// Row from the row crossing.
    pub row: u16,
    /// Timestamp of the column crossing.
    pub timestamp_col: u32,
    /// Timestamp of the row crossing.
    pub timestamp_row: u32,
    /// ToT of the column crossing in microseconds.
    pub tot_us_col: f64,
    /// ToT of the row crossing in microseconds.
    pub tot_us_row: f64,
    /// Mean of the two ToT values.
    pub avg_tot_us: f64,
}

impl PixelHit {
    /// Combines a column crossing and a row crossing.
    #[must_use]
    pub fn from_pair(col: &HitData, row: &HitData) -> Self {
        Self {
            col: col.location,
            row: row.location,
            timestamp_col: col.timestamp,
            timestamp_row: row.timestamp,
            tot_us_col: col.tot_us,
            tot_us_row: row.tot_us,
            avg_tot_us: (col.tot_us + row.tot_us) / 2.0,
        }
    }

    /// Pixel coordinate of the hit.
    #[inline]
    #[must_use]
    pub fn coord(&self) -> PixelCoord {
        PixelCoord::new(self.col, self.row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_from_pair() {
        let base = HitData {
            chip_id: 0,
            payload: 4,
            location: 3,
            is_col: true,
            timestamp: 100,
            tot_msb: 0,
            tot_lsb: 0,
            tot_total: 400,
            tot_us: 2.0,
        };
        let row = HitData {
            location: 5,
            is_col: false,
            tot_us: 2.1,
            ..base
        };
        let hit = PixelHit::from_pair(&base, &row);
        assert_eq!(hit.coord(), PixelCoord::new(3, 5));
        assert_eq!(hit.timestamp_col, 100);
        assert_relative_eq!(hit.avg_tot_us, 2.05);
    }
}

//! Pixel coordinates and chip geometry.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Pixel coordinate on the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PixelCoord {
    /// Column index.
    pub col: u16,
    /// Row index.
    pub row: u16,
}

impl PixelCoord {
    /// Creates a new pixel coordinate.
    #[inline]
    #[must_use]
    pub fn new(col: u16, row: u16) -> Self {
        Self { col, row }
    }
}

/// Pixel matrix dimensions of a chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChipGeometry {
    /// Number of columns.
    pub cols: u16,
    /// Number of rows.
    pub rows: u16,
}

impl Default for ChipGeometry {
    fn default() -> Self {
        Self::astropix3()
    }
}

impl ChipGeometry {
    /// The 35 x 35 matrix of the third-generation chip.
    #[must_use]
    pub fn astropix3() -> Self {
        Self { cols: 35, rows: 35 }
    }

    /// Total number of pixels (1225 for the default geometry).
    #[must_use]
    pub fn total_pixels(&self) -> usize {
        usize::from(self.cols) * usize::from(self.rows)
    }

    /// Returns true if the coordinate lies on the matrix.
    #[must_use]
    pub fn contains(&self, coord: PixelCoord) -> bool {
        coord.col < self.cols && coord.row < self.rows
    }

    /// Validates a coordinate against the matrix.
    ///
    /// # Errors
    /// Returns [`Error::InvalidCoordinate`] if the coordinate is off the matrix.
    pub fn check(&self, coord: PixelCoord) -> Result<PixelCoord> {
        if self.contains(coord) {
            Ok(coord)
        } else {
            Err(Error::InvalidCoordinate {
                col: coord.col,
                row: coord.row,
            })
        }
    }

    /// Iterates over every coordinate, column-major.
    pub fn coords(&self) -> impl Iterator<Item = PixelCoord> + '_ {
        (0..self.cols).flat_map(move |col| (0..self.rows).map(move |row| PixelCoord::new(col, row)))
    }
}

/// Coarse grouping of the pixel matrix into square cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u16", into = "u16"))]
pub struct GridSpec {
    group_size: u16,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self { group_size: 5 }
    }
}

impl GridSpec {
    /// Creates a grid with the given group size.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] if the size is zero.
    pub fn new(group_size: u16) -> Result<Self> {
        if group_size == 0 {
            return Err(Error::ConfigError("grid group size must be positive".into()));
        }
        Ok(Self { group_size })
    }

    /// Side length of a square group in pixels.
    #[inline]
    #[must_use]
    pub fn group_size(&self) -> u16 {
        self.group_size
    }

    /// Origin (lowest column and row) of the group containing `coord`.
    #[inline]
    #[must_use]
    pub fn origin_of(&self, coord: PixelCoord) -> PixelCoord {
        let g = self.group_size;
        PixelCoord::new(coord.col / g * g, coord.row / g * g)
    }

    /// Center label of the group starting at `origin`.
    #[inline]
    #[must_use]
    pub fn center_of(&self, origin: PixelCoord) -> PixelCoord {
        let half = self.group_size / 2;
        PixelCoord::new(origin.col + half, origin.row + half)
    }

    /// Group origins covering the whole chip, column-major.
    pub fn origins(&self, geometry: ChipGeometry) -> impl Iterator<Item = PixelCoord> {
        let g = usize::from(self.group_size);
        let rows = geometry.rows;
        (0..geometry.cols)
            .step_by(g)
            .flat_map(move |col| (0..rows).step_by(g).map(move |row| PixelCoord::new(col, row)))
    }
}

impl TryFrom<u16> for GridSpec {
    type Error = Error;

    fn try_from(group_size: u16) -> Result<Self> {
        Self::new(group_size)
    }
}

impl From<GridSpec> for u16 {
    fn from(grid: GridSpec) -> Self {
        grid.group_size
    }
}

//! Aggregation of reconstructed hits into maps and spectra.

use std::collections::BTreeMap;

use astropix_core::{ChipGeometry, GridSpec, PixelCoord, PixelHit};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One cell of a coarse grid.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CoarseCell {
    /// Label coordinate at the middle of the cell.
    pub center: PixelCoord,
    /// Mean over the fine pixels present in the cell; `None` if none are.
    pub value: Option<f64>,
}

#[allow(clippy::cast_precision_loss)]
fn coarse<'a, I>(values: I, grid: GridSpec, geometry: ChipGeometry) -> Vec<CoarseCell>
where
    I: IntoIterator<Item = (&'a PixelCoord, f64)>,
{
    let mut cells: BTreeMap<PixelCoord, (f64, usize)> = BTreeMap::new();
    for (&coord, value) in values {
        if !geometry.contains(coord) {
            continue;
        }
        let cell = cells.entry(grid.origin_of(coord)).or_default();
        cell.0 += value;
        cell.1 += 1;
    }
    grid.origins(geometry)
        .map(|origin| CoarseCell {
            center: grid.center_of(origin),
            value: cells
                .get(&origin)
                .map(|&(sum, n)| sum / n as f64),
        })
        .collect()
}

/// Hit count per pixel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HitMap {
    counts: BTreeMap<PixelCoord, u64>,
}

impl HitMap {
    /// Counts hits per pixel.
    #[must_use]
    pub fn from_hits(hits: &[PixelHit]) -> Self {
        let mut counts = BTreeMap::new();
        for hit in hits {
            *counts.entry(hit.coord()).or_insert(0) += 1;
        }
        Self { counts }
    }

    /// Hits recorded on a pixel.
    #[must_use]
    pub fn get(&self, coord: PixelCoord) -> u64 {
        self.counts.get(&coord).copied().unwrap_or(0)
    }

    /// Pixels with at least one hit, in coordinate order.
    pub fn iter(&self) -> impl Iterator<Item = (PixelCoord, u64)> + '_ {
        self.counts.iter().map(|(&c, &n)| (c, n))
    }

    /// Total number of hits.
    #[must_use]
    pub fn nhits(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Number of distinct pixels hit.
    #[must_use]
    pub fn distinct_pixels(&self) -> usize {
        self.counts.len()
    }

    /// Share of the chip's pixels that saw a hit, in percent.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn coverage_percent(&self, geometry: ChipGeometry) -> Option<f64> {
        let total = geometry.total_pixels();
        if total == 0 {
            return None;
        }
        let on_chip = self.counts.keys().filter(|&&c| geometry.contains(c)).count();
        Some(on_chip as f64 / total as f64 * 100.0)
    }

    /// Mean hits per hit pixel in each coarse cell.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn coarse(&self, grid: GridSpec, geometry: ChipGeometry) -> Vec<CoarseCell> {
        coarse(
            self.counts.iter().map(|(c, &n)| (c, n as f64)),
            grid,
            geometry,
        )
    }
}

/// Mean `avg_tot_us` per pixel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TotMap {
    means: BTreeMap<PixelCoord, f64>,
}

impl TotMap {
    /// Averages ToT over the hits of each pixel.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_hits(hits: &[PixelHit]) -> Self {
        let mut sums: BTreeMap<PixelCoord, (f64, usize)> = BTreeMap::new();
        for hit in hits {
            let entry = sums.entry(hit.coord()).or_default();
            entry.0 += hit.avg_tot_us;
            entry.1 += 1;
        }
        let means = sums
            .into_iter()
            .map(|(c, (sum, n))| (c, sum / n as f64))
            .collect();
        Self { means }
    }

    /// Mean ToT on a pixel, if it was hit.
    #[must_use]
    pub fn get(&self, coord: PixelCoord) -> Option<f64> {
        self.means.get(&coord).copied()
    }

    /// Hit pixels with their mean ToT, in coordinate order.
    pub fn iter(&self) -> impl Iterator<Item = (PixelCoord, f64)> + '_ {
        self.means.iter().map(|(&c, &v)| (c, v))
    }

    /// Mean of the per-pixel means in each coarse cell.
    #[must_use]
    pub fn coarse(&self, grid: GridSpec, geometry: ChipGeometry) -> Vec<CoarseCell> {
        coarse(self.means.iter().map(|(c, &v)| (c, v)), grid, geometry)
    }
}

/// Fixed-width histogram of `avg_tot_us`.
///
/// Bins are half-open `[lo + k*w, lo + (k+1)*w)`; values outside `[lo, hi)`
/// are counted as underflow or overflow.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TotSpectrum {
    lo: f64,
    hi: f64,
    counts: Vec<u64>,
    underflow: u64,
    overflow: u64,
}

impl Default for TotSpectrum {
    fn default() -> Self {
        Self::new(26, -0.5, 25.5)
    }
}

impl TotSpectrum {
    /// Creates an empty histogram. A zero bin count is raised to one.
    #[must_use]
    pub fn new(bins: usize, lo: f64, hi: f64) -> Self {
        Self {
            lo,
            hi,
            counts: vec![0; bins.max(1)],
            underflow: 0,
            overflow: 0,
        }
    }

    /// Fills the default spectrum from hits.
    #[must_use]
    pub fn from_hits(hits: &[PixelHit]) -> Self {
        let mut spectrum = Self::default();
        for hit in hits {
            spectrum.fill(hit.avg_tot_us);
        }
        spectrum
    }

    /// Adds one value.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn fill(&mut self, value: f64) {
        if value.is_nan() || value < self.lo {
            self.underflow += 1;
            return;
        }
        if value >= self.hi {
            self.overflow += 1;
            return;
        }
        let width = (self.hi - self.lo) / self.counts.len() as f64;
        let bin = (((value - self.lo) / width) as usize).min(self.counts.len() - 1);
        self.counts[bin] += 1;
    }

    /// Per-bin counts.
    #[must_use]
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Lower and upper edge of a bin.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn bin_edges(&self, bin: usize) -> (f64, f64) {
        let width = (self.hi - self.lo) / self.counts.len() as f64;
        let lo = self.lo + width * bin as f64;
        (lo, lo + width)
    }

    /// Values below the range, including NaN.
    #[must_use]
    pub fn underflow(&self) -> u64 {
        self.underflow
    }

    /// Values at or above the upper edge.
    #[must_use]
    pub fn overflow(&self) -> u64 {
        self.overflow
    }

    /// Values inside the range.
    #[must_use]
    pub fn entries(&self) -> u64 {
        self.counts.iter().sum()
    }
}

//! Noisy-pixel masking from noise-scan counts.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

use crate::geometry::PixelCoord;

/// Spurious-trigger count observed for one pixel during a noise scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NoiseCount {
    /// Pixel coordinate.
    pub coord: PixelCoord,
    /// Observed count.
    pub count: u64,
}

impl NoiseCount {
    /// Creates a new count entry.
    #[must_use]
    pub fn new(col: u16, row: u16, count: u64) -> Self {
        Self {
            coord: PixelCoord::new(col, row),
            count,
        }
    }
}

/// Unmasked share of a pixel population.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskCoverage {
    /// Threshold the mask was built with.
    pub threshold: u64,
    /// Pixels left enabled.
    pub unmasked: usize,
    /// Pixel population the share is taken over.
    pub population: usize,
}

impl MaskCoverage {
    /// Unmasked pixels as a percentage of the population.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> Option<f64> {
        if self.population == 0 {
            None
        } else {
            Some(self.unmasked as f64 / self.population as f64 * 100.0)
        }
    }
}

/// Immutable pixel mask: a pixel is masked when its count exceeds the threshold.
///
/// Pixels absent from the noise table are treated as unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoiseMask {
    threshold: u64,
    counts: BTreeMap<PixelCoord, u64>,
}

impl NoiseMask {
    /// Builds a mask from a noise table. Later entries for the same pixel win.
    #[must_use]
    pub fn build(counts: &[NoiseCount], threshold: u64) -> Self {
        let counts = counts.iter().map(|c| (c.coord, c.count)).collect();
        Self { threshold, counts }
    }

    /// Threshold the mask was built with.
    #[must_use]
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Returns true if the pixel is masked.
    #[must_use]
    pub fn is_masked(&self, coord: PixelCoord) -> bool {
        self.counts.get(&coord).is_some_and(|&c| c > self.threshold)
    }

    /// Every pixel in the noise table with its masked flag, in coordinate order.
    pub fn iter(&self) -> impl Iterator<Item = (PixelCoord, bool)> + '_ {
        self.counts
            .iter()
            .map(move |(&coord, &count)| (coord, count > self.threshold))
    }

    /// Number of pixels listed in the noise table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Returns true if the noise table was empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Number of masked pixels.
    #[must_use]
    pub fn masked_count(&self) -> usize {
        self.iter().filter(|&(_, masked)| masked).count()
    }

    /// Number of listed pixels left enabled.
    #[must_use]
    pub fn unmasked_count(&self) -> usize {
        self.len() - self.masked_count()
    }

    /// Unmasked share over an explicit population, e.g. the full chip.
    #[must_use]
    pub fn coverage(&self, population: usize) -> MaskCoverage {
        MaskCoverage {
            threshold: self.threshold,
            unmasked: self.unmasked_count(),
            population,
        }
    }

    /// The `n` pixels with the highest counts, highest first.
    #[must_use]
    pub fn noisiest(&self, n: usize) -> Vec<NoiseCount> {
        let mut entries: Vec<NoiseCount> = self
            .counts
            .iter()
            .map(|(&coord, &count)| NoiseCount { coord, count })
            .collect();
        entries.sort_by(|a, b| b.count.cmp(&a.count).then(a.coord.cmp(&b.coord)));
        entries.truncate(n);
        entries
    }
}

//! Column/row coincidence pairing.
//!
//! Within one event, every column crossing is compared against every row
//! crossing. A pair becomes a [`PixelHit`] when both
//! `|timestamp_col - timestamp_row| < timestamp_tolerance` and
//! `|tot_us_col - tot_us_row| < tot_tolerance` hold. Both bounds are strict.

use astropix_core::{
    group_events, Error, Event, HitData, HitRecord, HitTable, PixelHit, Result, RunSummary,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How degraded rows (payload other than 4) are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PayloadPolicy {
    /// Drop degraded rows and pair what remains.
    #[default]
    Filter,
    /// Drop the whole event if any row is degraded.
    Exclusive,
}

/// How column and row crossings are matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MatchStrategy {
    /// Every accepted pair is emitted; a crossing may appear in several hits.
    #[default]
    CrossJoin,
    /// Each crossing is used at most once, closest pairs first.
    Greedy,
}

/// Pairing parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PairingConfig {
    /// Maximum timestamp difference in clock ticks (exclusive).
    pub timestamp_tolerance: f64,
    /// Maximum ToT difference in microseconds (exclusive).
    pub tot_tolerance: f64,
    /// Degraded row handling.
    pub policy: PayloadPolicy,
    /// Matching strategy.
    pub strategy: MatchStrategy,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            timestamp_tolerance: 0.5,
            tot_tolerance: 1.0,
            policy: PayloadPolicy::Filter,
            strategy: MatchStrategy::CrossJoin,
        }
    }
}

impl PairingConfig {
    /// Windows used when inspecting a single event: equal timestamps and
    /// ToT within 0.3 us.
    #[must_use]
    pub fn single_event() -> Self {
        Self {
            timestamp_tolerance: 1.0,
            tot_tolerance: 0.3,
            ..Self::default()
        }
    }

    /// Sets the timestamp window.
    #[must_use]
    pub fn with_timestamp_tolerance(mut self, ticks: f64) -> Self {
        self.timestamp_tolerance = ticks;
        self
    }

    /// Sets the ToT window.
    #[must_use]
    pub fn with_tot_tolerance(mut self, us: f64) -> Self {
        self.tot_tolerance = us;
        self
    }

    /// Sets the payload policy.
    #[must_use]
    pub fn with_policy(mut self, policy: PayloadPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the matching strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Checks that both windows are positive and finite.
    ///
    /// # Errors
    /// Returns [`Error::InvalidTolerance`] naming the offending window.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("timestamp", self.timestamp_tolerance),
            ("tot", self.tot_tolerance),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::InvalidTolerance { name, value });
            }
        }
        Ok(())
    }
}

/// What happened to one event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// Only decode-failure placeholders.
    Placeholder,
    /// Nothing left to pair after filtering.
    Empty,
    /// Dropped for a degraded row under [`PayloadPolicy::Exclusive`].
    Excluded,
    /// Paired; possibly zero hits.
    Used(Vec<PixelHit>),
}

/// Hits and accounting for a set of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconstruction {
    /// Pixel hits in event order.
    pub hits: Vec<PixelHit>,
    /// Event accounting.
    pub summary: RunSummary,
}

/// Rebuilds pixel hits from column and row crossings.
#[derive(Debug, Clone, Copy)]
pub struct PixelPairReconstructor {
    config: PairingConfig,
}

impl PixelPairReconstructor {
    /// Creates a reconstructor.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(config: PairingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &PairingConfig {
        &self.config
    }

    /// Classifies and pairs one event.
    #[must_use]
    pub fn pair_event(&self, event: &Event<'_>) -> EventOutcome {
        if event.is_placeholder() {
            return EventOutcome::Placeholder;
        }

        let decoded = event.records.iter().filter_map(|r| r.hit);
        let rows: Vec<HitData> = match self.config.policy {
            PayloadPolicy::Filter => decoded.filter(HitData::is_nominal).collect(),
            PayloadPolicy::Exclusive => {
                let rows: Vec<HitData> = decoded.collect();
                if rows.iter().any(|h| !h.is_nominal()) {
                    return EventOutcome::Excluded;
                }
                rows
            }
        };
        if rows.is_empty() {
            return EventOutcome::Empty;
        }

        let (cols, rows): (Vec<HitData>, Vec<HitData>) = rows.into_iter().partition(|h| h.is_col);
        EventOutcome::Used(pair_crossings(&cols, &rows, &self.config))
    }

    /// Reconstructs every event in a set of records, in readout order.
    #[must_use]
    pub fn reconstruct(&self, records: &[HitRecord]) -> Reconstruction {
        let mut out = Reconstruction::default();
        for event in group_events(records) {
            match self.pair_event(&event) {
                EventOutcome::Placeholder => out.summary.record_nan(),
                EventOutcome::Empty => out.summary.record_empty(),
                EventOutcome::Excluded => out.summary.record_excluded(),
                EventOutcome::Used(hits) => {
                    out.summary.record_used();
                    out.hits.extend(hits);
                }
            }
        }
        out
    }

    /// Reconstructs a run table, counting rows without a readout index as
    /// placeholder events.
    #[must_use]
    pub fn reconstruct_table(&self, table: &HitTable) -> Reconstruction {
        let mut out = self.reconstruct(&table.records);
        for _ in 0..table.unindexed_placeholders {
            out.summary.record_nan();
        }
        out
    }

    /// Pairs the event with the given readout index, if present.
    #[must_use]
    pub fn reconstruct_event(&self, records: &[HitRecord], readout: u64) -> Option<EventOutcome> {
        let event = Event {
            readout,
            records: records.iter().filter(|r| r.readout == readout).collect(),
        };
        if event.is_empty() {
            None
        } else {
            Some(self.pair_event(&event))
        }
    }
}

/// Pairs column and row crossings of one event.
///
/// Crossings are assumed to already be split by axis. Output order follows
/// column index, then row index.
#[must_use]
pub fn pair_crossings(cols: &[HitData], rows: &[HitData], config: &PairingConfig) -> Vec<PixelHit> {
    if cols.is_empty() || rows.is_empty() {
        return Vec::new();
    }
    match config.strategy {
        MatchStrategy::CrossJoin => cols
            .iter()
            .flat_map(|c| rows.iter().map(move |r| (c, r)))
            .filter(|(c, r)| accepts(c, r, config))
            .map(|(c, r)| PixelHit::from_pair(c, r))
            .collect(),
        MatchStrategy::Greedy => greedy(cols, rows, config),
    }
}

fn deltas(col: &HitData, row: &HitData) -> (f64, f64) {
    let dt = (f64::from(col.timestamp) - f64::from(row.timestamp)).abs();
    let dtot = (col.tot_us - row.tot_us).abs();
    (dt, dtot)
}

#[inline]
fn accepts(col: &HitData, row: &HitData, config: &PairingConfig) -> bool {
    let (dt, dtot) = deltas(col, row);
    dt < config.timestamp_tolerance && dtot < config.tot_tolerance
}

fn greedy(cols: &[HitData], rows: &[HitData], config: &PairingConfig) -> Vec<PixelHit> {
    let mut candidates: Vec<(f64, usize, usize)> = Vec::new();
    for (i, c) in cols.iter().enumerate() {
        for (j, r) in rows.iter().enumerate() {
            if accepts(c, r, config) {
                let (dt, dtot) = deltas(c, r);
                candidates.push((dt + dtot, i, j));
            }
        }
    }
    candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

    let mut col_used = vec![false; cols.len()];
    let mut row_used = vec![false; rows.len()];
    let mut chosen = Vec::new();
    for (_, i, j) in candidates {
        if col_used[i] || row_used[j] {
            continue;
        }
        col_used[i] = true;
        row_used[j] = true;
        chosen.push((i, j));
    }
    chosen.sort_unstable();
    chosen
        .into_iter()
        .map(|(i, j)| PixelHit::from_pair(&cols[i], &rows[j]))
        .collect()
}

//! Per-run event accounting.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use std::fmt;
use std::ops::AddAssign;

/// Event counters accumulated over a run or a batch of runs.
///
/// Every event lands in exactly one of `nan_events`, `excluded_events`,
/// `used_events` or `empty_events`; `total_events` is their sum. Counters
/// only ever grow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RunSummary {
    /// Events seen.
    pub total_events: u64,
    /// Events made only of decode-failure placeholders.
    pub nan_events: u64,
    /// Events with no usable rows after payload filtering.
    pub empty_events: u64,
    /// Events that went through a pairing pass.
    pub used_events: u64,
    /// Degraded events dropped under the exclusive policy.
    pub excluded_events: u64,
}

impl RunSummary {
    /// Counts a placeholder-only event.
    pub fn record_nan(&mut self) {
        self.total_events += 1;
        self.nan_events += 1;
    }

    /// Counts an event with nothing left to pair.
    pub fn record_empty(&mut self) {
        self.total_events += 1;
        self.empty_events += 1;
    }

    /// Counts an event that was paired.
    pub fn record_used(&mut self) {
        self.total_events += 1;
        self.used_events += 1;
    }

    /// Counts an event dropped for a bad payload.
    pub fn record_excluded(&mut self) {
        self.total_events += 1;
        self.excluded_events += 1;
    }

    /// Used events as a percentage of all events.
    #[must_use]
    pub fn used_percent(&self) -> Option<f64> {
        self.percent(self.used_events)
    }

    /// Placeholder events as a percentage of all events.
    #[must_use]
    pub fn nan_percent(&self) -> Option<f64> {
        self.percent(self.nan_events)
    }

    /// Empty events as a percentage of all events.
    #[must_use]
    pub fn empty_percent(&self) -> Option<f64> {
        self.percent(self.empty_events)
    }

    /// Excluded events as a percentage of all events.
    #[must_use]
    pub fn excluded_percent(&self) -> Option<f64> {
        self.percent(self.excluded_events)
    }

    #[allow(clippy::cast_precision_loss)]
    fn percent(&self, count: u64) -> Option<f64> {
        if self.total_events == 0 {
            None
        } else {
            Some(count as f64 / self.total_events as f64 * 100.0)
        }
    }
}

impl AddAssign for RunSummary {
    fn add_assign(&mut self, other: Self) {
        self.total_events += other.total_events;
        self.nan_events += other.nan_events;
        self.empty_events += other.empty_events;
        self.used_events += other.used_events;
        self.excluded_events += other.excluded_events;
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pct = |p: Option<f64>| p.map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}%"));
        writeln!(
            f,
            "{} of {} events were placeholders ({})",
            self.nan_events,
            self.total_events,
            pct(self.nan_percent())
        )?;
        writeln!(
            f,
            "{} of {} events were empty ({})",
            self.empty_events,
            self.total_events,
            pct(self.empty_percent())
        )?;
        writeln!(
            f,
            "{} of {} events were excluded for bad payload ({})",
            self.excluded_events,
            self.total_events,
            pct(self.excluded_percent())
        )?;
        write!(
            f,
            "{} of {} events were processed ({})",
            self.used_events,
            self.total_events,
            pct(self.used_percent())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_categories_sum_to_total() {
        let mut summary = RunSummary::default();
        summary.record_used();
        summary.record_used();
        summary.record_nan();
        summary.record_empty();
        summary.record_excluded();

        assert_eq!(summary.total_events, 5);
        assert_eq!(
            summary.nan_events + summary.empty_events + summary.used_events + summary.excluded_events,
            summary.total_events
        );
        assert_relative_eq!(summary.used_percent().unwrap(), 40.0);
        assert_relative_eq!(summary.nan_percent().unwrap(), 20.0);
    }

    #[test]
    fn test_empty_summary_has_no_percentages() {
        let summary = RunSummary::default();
        assert!(summary.used_percent().is_none());
        assert!(summary.to_string().contains("n/a"));
    }

    #[test]
    fn test_merge() {
        let mut a = RunSummary::default();
        a.record_used();
        let mut b = RunSummary::default();
        b.record_nan();
        b.record_used();
        a += b;
        assert_eq!(a.total_events, 3);
        assert_eq!(a.used_events, 2);
        assert_eq!(a.nan_events, 1);
    }
}

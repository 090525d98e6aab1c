//! Events: the records sharing one readout index.

use std::collections::BTreeMap;

use crate::record::{HitRecord, PAYLOAD_HIT};

/// The records of one readout, borrowed from a table.
#[derive(Debug, Clone, PartialEq)]
pub struct Event<'a> {
    /// Readout index.
    pub readout: u64,
    /// Records in table order.
    pub records: Vec<&'a HitRecord>,
}

impl Event<'_> {
    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the event has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns true if the event consists solely of placeholder records.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        !self.records.is_empty() && self.records.iter().all(|r| r.is_placeholder())
    }

    /// Returns true if every record is a well-formed crossing.
    #[must_use]
    pub fn is_nominal(&self) -> bool {
        !self.records.is_empty() && self.degraded_count() == 0
    }

    /// Number of decoded records whose payload is not a well-formed crossing.
    #[must_use]
    pub fn degraded_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.payload().is_some_and(|p| p != PAYLOAD_HIT))
            .count()
    }
}

/// Groups a table's records into events, ordered by readout index.
///
/// Readout indices with no records do not produce an event.
#[must_use]
pub fn group_events(records: &[HitRecord]) -> Vec<Event<'_>> {
    let mut by_readout: BTreeMap<u64, Vec<&HitRecord>> = BTreeMap::new();
    for record in records {
        by_readout.entry(record.readout).or_default().push(record);
    }
    by_readout
        .into_iter()
        .map(|(readout, records)| Event { readout, records })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::HitData;

    fn record(readout: u64, payload: u8) -> HitRecord {
        HitRecord::decoded(
            readout,
            HitData {
                chip_id: 0,
                payload,
                location: 1,
                is_col: true,
                timestamp: 0,
                tot_msb: 0,
                tot_lsb: 0,
                tot_total: 0,
                tot_us: 0.0,
            },
            0.0,
        )
    }

    #[test]
    fn test_grouping_orders_by_readout() {
        let records = vec![
            record(2, 4),
            record(0, 4),
            record(2, 2),
            HitRecord::placeholder(1, None),
        ];
        let events = group_events(&records);
        let readouts: Vec<u64> = events.iter().map(|e| e.readout).collect();
        assert_eq!(readouts, vec![0, 1, 2]);

        assert!(events[0].is_nominal());
        assert!(events[1].is_placeholder());
        assert!(!events[1].is_nominal());
        assert_eq!(events[2].len(), 2);
        assert_eq!(events[2].degraded_count(), 1);
        assert!(!events[2].is_nominal());
    }

    #[test]
    fn test_empty_table() {
        assert!(group_events(&[]).is_empty());
    }
}

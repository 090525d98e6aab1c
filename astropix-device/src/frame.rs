//! Readout frame codec.
//!
//! A readout is a byte stream in which `0xBC` and `0xFF` are idle fill.
//! Every other byte starts a record:
//!
//! ```text
//! header   [7:3] chip id   [2:0] payload length
//! byte 1   [7] isCol       [5:0] location
//! byte 2   timestamp
//! byte 3   [3:0] ToT msb
//! byte 4   ToT lsb
//! ```
//!
//! A well-formed crossing carries four payload bytes. Records declaring any
//! other length are decoded as far as their bytes go and kept as degraded rows.

use astropix_core::{ChipGeometry, HitData, PAYLOAD_HIT};

use crate::DecodeError;

/// Idle fill bytes skipped between records.
pub const IDLE_BYTES: [u8; 2] = [0xBC, 0xFF];

/// Period of the ToT sampling clock in nanoseconds.
pub const SAMPLE_CLOCK_PERIOD_NS: f64 = 5.0;

const LOCATION_MASK: u8 = 0x3F;
const TOT_MSB_MASK: u8 = 0x0F;

/// Decodes raw readouts into hit data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameDecoder {
    geometry: ChipGeometry,
    sample_clock_period_ns: f64,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self {
            geometry: ChipGeometry::default(),
            sample_clock_period_ns: SAMPLE_CLOCK_PERIOD_NS,
        }
    }
}

impl FrameDecoder {
    /// Creates a decoder for the given chip geometry.
    #[must_use]
    pub fn new(geometry: ChipGeometry) -> Self {
        Self {
            geometry,
            ..Self::default()
        }
    }

    /// Sets the ToT sampling clock period.
    #[must_use]
    pub fn with_sample_clock_period_ns(mut self, period: f64) -> Self {
        self.sample_clock_period_ns = period;
        self
    }

    /// Chip geometry used for range checks.
    #[must_use]
    pub fn geometry(&self) -> ChipGeometry {
        self.geometry
    }

    /// Decodes every record in a readout.
    ///
    /// A readout of only idle bytes decodes to an empty vector.
    ///
    /// # Errors
    /// Returns [`DecodeError::Truncated`] if a header declares more bytes than
    /// remain, or [`DecodeError::OutOfRange`] if a well-formed crossing lies
    /// off the chip.
    pub fn decode(&self, bytes: &[u8]) -> Result<Vec<HitData>, DecodeError> {
        let mut hits = Vec::new();
        let mut offset = 0;

        while offset < bytes.len() {
            let header = bytes[offset];
            if IDLE_BYTES.contains(&header) {
                offset += 1;
                continue;
            }

            let declared = usize::from(header & 0b111);
            let available = bytes.len() - offset - 1;
            if declared > available {
                return Err(DecodeError::Truncated {
                    offset,
                    declared,
                    available,
                });
            }

            let data = &bytes[offset + 1..offset + 1 + declared];
            let hit = self.decode_record(header, data);
            if hit.is_nominal() {
                self.check_range(&hit)?;
            }
            hits.push(hit);
            offset += 1 + declared;
        }

        Ok(hits)
    }

    fn decode_record(&self, header: u8, data: &[u8]) -> HitData {
        let byte = |k: usize| data.get(k).copied().unwrap_or(0);
        let b1 = byte(0);
        let tot_msb = byte(2) & TOT_MSB_MASK;
        let tot_lsb = byte(3);
        let tot_total = (u16::from(tot_msb) << 8) | u16::from(tot_lsb);

        HitData {
            chip_id: header >> 3,
            payload: header & 0b111,
            location: u16::from(b1 & LOCATION_MASK),
            is_col: b1 >> 7 == 1,
            timestamp: u32::from(byte(1)),
            tot_msb,
            tot_lsb,
            tot_total,
            tot_us: f64::from(tot_total) * self.sample_clock_period_ns / 1000.0,
        }
    }

    fn check_range(&self, hit: &HitData) -> Result<(), DecodeError> {
        let (field, limit) = if hit.is_col {
            ("column", self.geometry.cols)
        } else {
            ("row", self.geometry.rows)
        };
        if hit.location >= limit {
            return Err(DecodeError::OutOfRange {
                field,
                value: u32::from(hit.location),
                limit: u32::from(limit),
            });
        }
        Ok(())
    }
}

/// Encodes a crossing as a five-byte well-formed record.
///
/// Fields wider than the wire format are truncated.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode_hit(hit: &HitData) -> [u8; 5] {
    let header = (hit.chip_id << 3) | PAYLOAD_HIT;
    let b1 = (hit.location as u8 & LOCATION_MASK) | (u8::from(hit.is_col) << 7);
    [
        header,
        b1,
        hit.timestamp as u8,
        hit.tot_msb & TOT_MSB_MASK,
        hit.tot_lsb,
    ]
}

/// Formats bytes as lowercase hex.
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// Parses a hex string, optionally wrapped as `b'...'`.
///
/// Returns `None` on odd length or a non-hex digit.
#[must_use]
pub fn parse_hex(text: &str) -> Option<Vec<u8>> {
    let text = text.trim();
    let text = text
        .strip_prefix("b'")
        .and_then(|t| t.strip_suffix('\''))
        .unwrap_or(text);
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| text.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn crossing(location: u16, is_col: bool, timestamp: u32, tot_msb: u8, tot_lsb: u8) -> HitData {
        let tot_total = (u16::from(tot_msb) << 8) | u16::from(tot_lsb);
        HitData {
            chip_id: 0,
            payload: PAYLOAD_HIT,
            location,
            is_col,
            timestamp,
            tot_msb,
            tot_lsb,
            tot_total,
            tot_us: f64::from(tot_total) * SAMPLE_CLOCK_PERIOD_NS / 1000.0,
        }
    }

    #[test]
    fn test_decode_single_crossing() {
        let bytes = [0xBC, 0xBC, 0x04, 0x85, 0x10, 0x01, 0x90, 0xFF, 0xFF];
        let hits = FrameDecoder::default().decode(&bytes).unwrap();
        assert_eq!(hits.len(), 1);

        let hit = hits[0];
        assert_eq!(hit.chip_id, 0);
        assert_eq!(hit.payload, 4);
        assert_eq!(hit.location, 5);
        assert!(hit.is_col);
        assert_eq!(hit.timestamp, 0x10);
        assert_eq!(hit.tot_total, 0x190);
        assert_relative_eq!(hit.tot_us, 2.0);
    }

    #[test]
    fn test_idle_only_readout_is_empty() {
        let hits = FrameDecoder::default().decode(&[0xBC; 16]).unwrap();
        assert!(hits.is_empty());
        assert!(FrameDecoder::default().decode(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_record() {
        let bytes = [0x04, 0x85, 0x10];
        let err = FrameDecoder::default().decode(&bytes).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                offset: 0,
                declared: 4,
                available: 2
            }
        );
    }

    #[test]
    fn test_location_out_of_range() {
        let hit = crossing(40, false, 0, 0, 1);
        let err = FrameDecoder::default().decode(&encode_hit(&hit)).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::OutOfRange {
                field: "row",
                value: 40,
                limit: 35
            }
        ));
    }

    #[test]
    fn test_degraded_record_is_kept() {
        // chip 1, payload 2, followed by a good crossing
        let mut bytes = vec![0x0A, 0x81, 0x22];
        bytes.extend_from_slice(&encode_hit(&crossing(3, false, 7, 0, 200)));

        let hits = FrameDecoder::default().decode(&bytes).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chip_id, 1);
        assert_eq!(hits[0].payload, 2);
        assert!(!hits[0].is_nominal());
        assert_eq!(hits[0].tot_total, 0);
        assert!(hits[1].is_nominal());
        assert_eq!(hits[1].location, 3);
    }

    #[test]
    fn test_encode_then_decode_preserves_fields() {
        let hit = crossing(34, true, 255, 0x0F, 0xFF);
        let decoded = FrameDecoder::default().decode(&encode_hit(&hit)).unwrap();
        assert_eq!(decoded, vec![hit]);
    }

    #[test]
    fn test_hex_helpers() {
        assert_eq!(to_hex(&[0x04, 0xbc, 0x0f]), "04bc0f");
        assert_eq!(parse_hex("04bc0f"), Some(vec![0x04, 0xbc, 0x0f]));
        assert_eq!(parse_hex("b'04bc0f'"), Some(vec![0x04, 0xbc, 0x0f]));
        assert_eq!(parse_hex("abc"), None);
        assert_eq!(parse_hex("zz"), None);
        assert_eq!(parse_hex(""), Some(Vec::new()));
    }
}

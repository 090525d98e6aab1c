//! Offline decoding of raw-bitstream logs into event tables.

use std::path::{Path, PathBuf};

use astropix_core::{unix_time_now, ChipGeometry, HitRecord, RowBatch};
use astropix_device::FrameDecoder;
use astropix_io::{read_raw_log, TableWriter};
use log::{info, warn};

use crate::Result;

/// Result of decoding one raw log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineReport {
    /// Log that was decoded.
    pub source: PathBuf,
    /// Event table written.
    pub table_path: PathBuf,
    /// Readouts in the log.
    pub readouts: usize,
    /// Readouts that failed to decode.
    pub failures: usize,
    /// Rows written.
    pub rows: usize,
}

/// Path of the table produced for `log`: `<stem>_offline.csv` next to the
/// log, or in `out_dir` when given.
#[must_use]
pub fn offline_table_path(log: &Path, out_dir: Option<&Path>) -> PathBuf {
    let stem = log
        .file_stem()
        .map_or_else(|| "raw".to_string(), |s| s.to_string_lossy().into_owned());
    let dir = out_dir.or_else(|| log.parent()).unwrap_or(Path::new("."));
    dir.join(format!("{stem}_offline.csv"))
}

/// Decodes every readout of a raw log and writes the event table.
///
/// Readout indices come from the log. Rows are stamped with the host time of
/// the decode, as during acquisition. A readout that fails to decode becomes
/// a placeholder row.
///
/// # Errors
/// Returns an error if the log cannot be read or the table cannot be written.
pub fn decode_raw_log(
    path: &Path,
    out_dir: Option<&Path>,
    geometry: ChipGeometry,
) -> Result<OfflineReport> {
    let log = read_raw_log(path)?;
    let decoder = FrameDecoder::new(geometry);
    let table_path = offline_table_path(path, out_dir);
    if let Some(dir) = out_dir {
        std::fs::create_dir_all(dir)?;
    }

    let mut writer = TableWriter::create(&table_path)?;
    let mut failures = 0;
    for (index, bytes) in &log.readouts {
        let hittime = unix_time_now();
        let batch = match decoder.decode(bytes) {
            Ok(hits) => RowBatch::new(
                *index,
                hits.into_iter()
                    .map(|hit| HitRecord::decoded(*index, hit, hittime))
                    .collect(),
            )?,
            Err(err) => {
                failures += 1;
                warn!("Decoding failed on readout {index}: {err}");
                RowBatch::placeholder(*index, Some(hittime))
            }
        };
        writer.write_batch(&batch)?;
    }
    writer.flush()?;

    info!(
        "Decoded {} readouts from {} ({} failed) into {}",
        log.readouts.len(),
        path.display(),
        failures,
        table_path.display()
    );
    Ok(OfflineReport {
        source: path.to_path_buf(),
        table_path,
        readouts: log.readouts.len(),
        failures,
        rows: writer.rows_written(),
    })
}

/// Decodes every `*.log` file in `dir`, in name order.
///
/// A log that cannot be decoded is skipped with a warning.
///
/// # Errors
/// Returns an error if the directory cannot be listed.
pub fn decode_directory(
    dir: &Path,
    out_dir: Option<&Path>,
    geometry: ChipGeometry,
) -> Result<Vec<OfflineReport>> {
    let mut logs: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "log"))
        .collect();
    logs.sort();

    let mut reports = Vec::with_capacity(logs.len());
    for log in logs {
        match decode_raw_log(&log, out_dir, geometry) {
            Ok(report) => reports.push(report),
            Err(err) => warn!("Skipping {}: {err}", log.display()),
        }
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use astropix_core::HitData;
    use astropix_device::frame::to_hex;
    use astropix_device::encode_hit;
    use astropix_io::read_table;

    fn hit(location: u16, is_col: bool) -> HitData {
        HitData {
            chip_id: 0,
            payload: 4,
            location,
            is_col,
            timestamp: 10,
            tot_msb: 0,
            tot_lsb: 200,
            tot_total: 200,
            tot_us: 1.0,
        }
    }

    #[test]
    fn test_offline_table_path() {
        assert_eq!(
            offline_table_path(Path::new("/data/run_1.log"), None),
            Path::new("/data/run_1_offline.csv")
        );
        assert_eq!(
            offline_table_path(Path::new("/data/run_1.log"), Some(Path::new("/out"))),
            Path::new("/out/run_1_offline.csv")
        );
    }

    #[test]
    fn test_decode_raw_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("run.log");
        let mut good = encode_hit(&hit(3, true)).to_vec();
        good.extend_from_slice(&encode_hit(&hit(7, false)));
        let bad = vec![0x04, 0x83];
        std::fs::write(
            &log,
            format!("header\n{{}}\n\n4\t{}\n5\t{}\n", to_hex(&good), to_hex(&bad)),
        )
        .unwrap();

        let report = decode_raw_log(&log, None, ChipGeometry::default()).unwrap();
        assert_eq!(report.readouts, 2);
        assert_eq!(report.failures, 1);
        assert_eq!(report.rows, 3);

        let table = read_table(&report.table_path).unwrap();
        assert_eq!(table.records.len(), 3);
        assert_eq!(table.records[0].readout, 4);
        assert!(table.records.iter().all(|r| r.hittime.is_some()));
        assert!(table.records[2].is_placeholder());
        assert_eq!(table.records[2].readout, 5);
    }

    #[test]
    fn test_decode_directory_skips_bad_logs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.log"), "0\tbcbc\n").unwrap();
        std::fs::write(dir.path().join("a.log"), "0\tbc\nnot a readout\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let out = dir.path().join("out");
        let reports = decode_directory(dir.path(), Some(&out), ChipGeometry::default()).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].table_path, out.join("b_offline.csv"));
        assert_eq!(reports[0].rows, 0);
    }
}

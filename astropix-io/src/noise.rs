//! Noise-scan summary reader.

use std::fs;
use std::path::{Path, PathBuf};

use astropix_core::NoiseCount;

use crate::{Error, Result};

/// Reads a `col,row,count` noise summary. The first line is a header and is
/// discarded whatever it says.
///
/// # Errors
/// Returns an error if the file cannot be read or a row is malformed.
pub fn read_noise_summary<P: AsRef<Path>>(path: P) -> Result<Vec<NoiseCount>> {
    let path = path.as_ref();
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut counts = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let line = record.position().map_or(0, csv::Position::line);
        let field = |i: usize, column: &'static str| -> Result<u64> {
            let text = record.get(i).unwrap_or("");
            text.parse::<u64>()
                .ok()
                .or_else(|| whole_float(text))
                .ok_or_else(|| Error::Parse {
                    path: path.to_path_buf(),
                    line,
                    column,
                    value: text.to_string(),
                })
        };
        let col = field(0, "col")?;
        let row = field(1, "row")?;
        let count = field(2, "count")?;
        let col = u16::try_from(col).map_err(|_| Error::InvalidFormat(format!("column {col} at line {line}")))?;
        let row = u16::try_from(row).map_err(|_| Error::InvalidFormat(format!("row {row} at line {line}")))?;
        counts.push(NoiseCount::new(col, row, count));
    }
    Ok(counts)
}

#[allow(
    clippy::float_cmp,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn whole_float(text: &str) -> Option<u64> {
    let value: f64 = text.parse().ok()?;
    (value.fract() == 0.0 && value >= 0.0 && value < 1e18).then_some(value as u64)
}

/// Finds `noise_scan_summary_<chip>*.csv` in a directory.
///
/// When several files match, the last in name order is returned.
///
/// # Errors
/// Returns an error if the directory cannot be listed.
pub fn find_noise_summary<P: AsRef<Path>>(dir: P, chip: &str) -> Result<Option<PathBuf>> {
    let prefix = format!("noise_scan_summary_{chip}");
    let mut matches: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".csv"))
        })
        .collect();
    matches.sort();
    Ok(matches.pop())
}

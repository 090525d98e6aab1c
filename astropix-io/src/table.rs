//! Structured event table in CSV form.
//!
//! The first column, `dec_order`, is the position of a row within its
//! readout. Placeholder rows keep `readout` and `hittime` and leave every
//! other cell empty. `isCol` is written as `True`/`False`.
//!
//! The reader also accepts tables from older tooling: integers formatted as
//! floats (`3.0`), `nan` for missing values, lowercase or numeric booleans
//! and placeholder rows without a readout index.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use astropix_core::{HitData, HitRecord, HitTable, RowBatch};
use log::debug;

use crate::{Error, Result};

/// Header of the event table, in column order.
pub const TABLE_COLUMNS: [&str; 12] = [
    "dec_order",
    "readout",
    "Chip ID",
    "payload",
    "location",
    "isCol",
    "timestamp",
    "tot_msb",
    "tot_lsb",
    "tot_total",
    "tot_us",
    "hittime",
];

fn fmt_float(value: f64) -> String {
    format!("{value:?}")
}

fn fmt_flag(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// Streaming writer for the event table.
pub struct TableWriter<W: Write> {
    wtr: csv::Writer<W>,
    rows: usize,
}

impl TableWriter<File> {
    /// Creates the file and writes the header.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_writer(File::create(path)?)
    }
}

impl<W: Write> TableWriter<W> {
    /// Wraps a writer and writes the header.
    ///
    /// # Errors
    /// Returns an error if the header cannot be written.
    pub fn from_writer(writer: W) -> Result<Self> {
        let mut wtr = csv::WriterBuilder::new().from_writer(writer);
        wtr.write_record(TABLE_COLUMNS)?;
        Ok(Self { wtr, rows: 0 })
    }

    /// Appends every row of a readout.
    ///
    /// # Errors
    /// Returns an error if a row cannot be written.
    pub fn write_batch(&mut self, batch: &RowBatch) -> Result<()> {
        for (order, row) in batch.rows().iter().enumerate() {
            self.write_row(order, row)?;
        }
        Ok(())
    }

    fn write_row(&mut self, order: usize, row: &HitRecord) -> Result<()> {
        let hittime = row.hittime.map(fmt_float).unwrap_or_default();
        let mut cells = vec![order.to_string(), row.readout.to_string()];
        match row.hit {
            Some(hit) => cells.extend([
                hit.chip_id.to_string(),
                hit.payload.to_string(),
                hit.location.to_string(),
                fmt_flag(hit.is_col).to_string(),
                hit.timestamp.to_string(),
                hit.tot_msb.to_string(),
                hit.tot_lsb.to_string(),
                hit.tot_total.to_string(),
                fmt_float(hit.tot_us),
            ]),
            None => cells.extend(std::iter::repeat(String::new()).take(9)),
        }
        cells.push(hittime);
        self.wtr.write_record(&cells)?;
        self.rows += 1;
        Ok(())
    }

    /// Rows written so far, excluding the header.
    #[must_use]
    pub fn rows_written(&self) -> usize {
        self.rows
    }

    /// Flushes buffered rows to the underlying writer.
    ///
    /// # Errors
    /// Returns an error if the flush fails.
    pub fn flush(&mut self) -> Result<()> {
        self.wtr.flush()?;
        Ok(())
    }
}

/// Writes a whole table and returns the number of rows written.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_table<'a, P, I>(path: P, batches: I) -> Result<usize>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = &'a RowBatch>,
{
    let mut writer = TableWriter::create(path)?;
    for batch in batches {
        writer.write_batch(batch)?;
    }
    writer.flush()?;
    Ok(writer.rows_written())
}

struct Columns {
    readout: usize,
    chip_id: Option<usize>,
    payload: usize,
    location: usize,
    is_col: usize,
    timestamp: usize,
    tot_msb: Option<usize>,
    tot_lsb: Option<usize>,
    tot_total: Option<usize>,
    tot_us: usize,
    hittime: Option<usize>,
}

impl Columns {
    fn locate(headers: &csv::StringRecord) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        let require = |name: &str| {
            find(name).ok_or_else(|| Error::InvalidFormat(format!("missing column '{name}'")))
        };
        Ok(Self {
            readout: require("readout")?,
            chip_id: find("Chip ID"),
            payload: require("payload")?,
            location: require("location")?,
            is_col: require("isCol")?,
            timestamp: require("timestamp")?,
            tot_msb: find("tot_msb"),
            tot_lsb: find("tot_lsb"),
            tot_total: find("tot_total"),
            tot_us: require("tot_us")?,
            hittime: find("hittime"),
        })
    }
}

fn is_null(text: &str) -> bool {
    let text = text.trim();
    text.is_empty() || text.eq_ignore_ascii_case("nan") || text == "<NA>"
}

#[allow(
    clippy::float_cmp,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn parse_whole(text: &str) -> Option<u64> {
    let text = text.trim();
    if let Ok(value) = text.parse::<u64>() {
        return Some(value);
    }
    let value: f64 = text.parse().ok()?;
    (value.fract() == 0.0 && value >= 0.0 && value <= u64::MAX as f64).then_some(value as u64)
}

fn parse_flag(text: &str) -> Option<bool> {
    match text.trim() {
        "True" | "true" | "TRUE" | "1" | "1.0" => Some(true),
        "False" | "false" | "FALSE" | "0" | "0.0" => Some(false),
        _ => None,
    }
}

struct Row<'a> {
    path: &'a Path,
    line: u64,
    record: &'a csv::StringRecord,
}

impl Row<'_> {
    fn cell(&self, idx: Option<usize>) -> Option<&str> {
        idx.and_then(|i| self.record.get(i)).filter(|t| !is_null(t))
    }

    fn error(&self, column: &'static str, value: &str) -> Error {
        Error::Parse {
            path: self.path.to_path_buf(),
            line: self.line,
            column,
            value: value.to_string(),
        }
    }

    fn uint<T: TryFrom<u64>>(&self, idx: Option<usize>, column: &'static str) -> Result<Option<T>> {
        self.cell(idx)
            .map(|text| {
                parse_whole(text)
                    .and_then(|v| T::try_from(v).ok())
                    .ok_or_else(|| self.error(column, text))
            })
            .transpose()
    }

    fn float(&self, idx: Option<usize>, column: &'static str) -> Result<Option<f64>> {
        self.cell(idx)
            .map(|text| text.trim().parse().map_err(|_| self.error(column, text)))
            .transpose()
    }

    fn flag(&self, idx: Option<usize>, column: &'static str) -> Result<Option<bool>> {
        self.cell(idx)
            .map(|text| parse_flag(text).ok_or_else(|| self.error(column, text)))
            .transpose()
    }

    fn required<T>(&self, value: Option<T>, column: &'static str) -> Result<T> {
        value.ok_or_else(|| self.error(column, ""))
    }
}

/// Reads an event table. The table is named after the file stem.
///
/// # Errors
/// Returns an error if the file cannot be read, a required column is
/// missing, or a cell cannot be parsed.
pub fn read_table<P: AsRef<Path>>(path: P) -> Result<HitTable> {
    let path = path.as_ref();
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let columns = Columns::locate(rdr.headers()?)?;

    let mut table = HitTable::new(name);
    for result in rdr.records() {
        let record = result?;
        let row = Row {
            path,
            line: record.position().map_or(0, csv::Position::line),
            record: &record,
        };

        let readout: Option<u64> = row.uint(Some(columns.readout), "readout")?;
        let payload: Option<u8> = row.uint(Some(columns.payload), "payload")?;
        let hittime = row.float(columns.hittime, "hittime")?;

        let Some(readout) = readout else {
            debug!("{}: line {} has no readout index", path.display(), row.line);
            table.unindexed_placeholders += 1;
            continue;
        };
        let Some(payload) = payload else {
            table.records.push(HitRecord::placeholder(readout, hittime));
            continue;
        };

        let hit = HitData {
            chip_id: row.uint(columns.chip_id, "Chip ID")?.unwrap_or(0),
            payload,
            location: row.required(row.uint(Some(columns.location), "location")?, "location")?,
            is_col: row.required(row.flag(Some(columns.is_col), "isCol")?, "isCol")?,
            timestamp: row.required(row.uint(Some(columns.timestamp), "timestamp")?, "timestamp")?,
            tot_msb: row.uint(columns.tot_msb, "tot_msb")?.unwrap_or(0),
            tot_lsb: row.uint(columns.tot_lsb, "tot_lsb")?.unwrap_or(0),
            tot_total: row.uint(columns.tot_total, "tot_total")?.unwrap_or(0),
            tot_us: row.required(row.float(Some(columns.tot_us), "tot_us")?, "tot_us")?,
        };
        table.records.push(HitRecord {
            readout,
            hit: Some(hit),
            hittime,
        });
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use astropix_core::PAYLOAD_HIT;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn crossing(location: u16, is_col: bool) -> HitData {
        HitData {
            chip_id: 0,
            payload: PAYLOAD_HIT,
            location,
            is_col,
            timestamp: 100,
            tot_msb: 1,
            tot_lsb: 144,
            tot_total: 400,
            tot_us: 2.0,
        }
    }

    #[test]
    fn test_write_then_read() {
        let file = NamedTempFile::new().unwrap();
        let batches = vec![
            RowBatch::new(
                0,
                vec![
                    HitRecord::decoded(0, crossing(3, true), 1.5),
                    HitRecord::decoded(0, crossing(5, false), 1.5),
                ],
            )
            .unwrap(),
            RowBatch::placeholder(1, Some(2.5)),
            RowBatch::new(2, Vec::new()).unwrap(),
        ];
        let rows = write_table(file.path(), &batches).unwrap();
        assert_eq!(rows, 3);

        let content = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], TABLE_COLUMNS.join(","));
        assert_eq!(lines[1], "0,0,0,4,3,True,100,1,144,400,2.0,1.5");
        assert_eq!(lines[2], "1,0,0,4,5,False,100,1,144,400,2.0,1.5");
        assert_eq!(lines[3], "0,1,,,,,,,,,,2.5");

        let table = read_table(file.path()).unwrap();
        let expected: Vec<HitRecord> = batches.iter().flat_map(|b| b.rows().to_vec()).collect();
        assert_eq!(table.records, expected);
        assert_eq!(table.unindexed_placeholders, 0);
    }

    #[test]
    fn test_read_legacy_table() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            ",readout,Chip ID,payload,location,isCol,timestamp,tot_msb,tot_lsb,tot_total,tot_us,hittime"
        )
        .unwrap();
        writeln!(file, "0,3.0,0.0,4.0,12.0,true,56.0,0.0,200.0,200.0,1.0,1676000000.5").unwrap();
        writeln!(file, "0,,,,,,,,,,,").unwrap();
        writeln!(file, "0,4.0,0.0,2.0,1.0,1,0.0,0.0,0.0,0.0,0.0,nan").unwrap();
        file.flush().unwrap();

        let table = read_table(file.path()).unwrap();
        assert_eq!(table.records.len(), 2);
        assert_eq!(table.unindexed_placeholders, 1);
        assert_eq!(table.row_count(), 3);

        let first = table.records[0].hit.unwrap();
        assert_eq!(table.records[0].readout, 3);
        assert_eq!(first.location, 12);
        assert!(first.is_col);
        assert_eq!(first.timestamp, 56);
        assert_eq!(first.tot_total, 200);
        assert_relative_eq!(first.tot_us, 1.0);
        assert_relative_eq!(table.records[0].hittime.unwrap(), 1_676_000_000.5);

        assert_eq!(table.records[1].payload(), Some(2));
        assert_eq!(table.records[1].hittime, None);
    }

    #[test]
    fn test_bad_cell_reports_line() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", TABLE_COLUMNS.join(",")).unwrap();
        writeln!(file, "0,0,0,4,3.5,True,100,1,144,400,2.0,1.5").unwrap();
        file.flush().unwrap();

        match read_table(file.path()) {
            Err(Error::Parse { line, column, .. }) => {
                assert_eq!(line, 2);
                assert_eq!(column, "location");
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_column() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "readout,payload").unwrap();
        file.flush().unwrap();
        assert!(matches!(
            read_table(file.path()),
            Err(Error::InvalidFormat(_))
        ));
    }
}

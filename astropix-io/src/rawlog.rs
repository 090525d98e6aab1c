//! Raw-bitstream log.
//!
//! The log starts with a free-form header block (device header, then the run
//! parameters, then a newline) followed by one `"{index}\t{hex}"` line per
//! readout. Lines written by older tooling wrap the hex as `b'...'`; the
//! reader accepts both forms.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use astropix_device::frame::{parse_hex, to_hex};
use astropix_device::RawReadout;

use crate::{Error, Result};

/// Line-oriented writer for the raw-bitstream log.
pub struct RawLogWriter<W: Write> {
    writer: BufWriter<W>,
    lines: usize,
}

impl RawLogWriter<File> {
    /// Creates the log file and writes the header block.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written.
    pub fn create<P: AsRef<Path>>(path: P, device_header: &str, run_params: &str) -> Result<Self> {
        Self::from_writer(File::create(path)?, device_header, run_params)
    }
}

impl<W: Write> RawLogWriter<W> {
    /// Wraps a writer and writes the header block.
    ///
    /// # Errors
    /// Returns an error if the header cannot be written.
    pub fn from_writer(inner: W, device_header: &str, run_params: &str) -> Result<Self> {
        let mut writer = BufWriter::new(inner);
        writer.write_all(device_header.as_bytes())?;
        writer.write_all(run_params.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(Self { writer, lines: 0 })
    }

    /// Appends one readout.
    ///
    /// # Errors
    /// Returns an error if the line cannot be written.
    pub fn write_readout(&mut self, readout: &RawReadout) -> Result<()> {
        writeln!(self.writer, "{}\t{}", readout.index, readout.hex())?;
        self.lines += 1;
        Ok(())
    }

    /// Readout lines written so far.
    #[must_use]
    pub fn lines_written(&self) -> usize {
        self.lines
    }

    /// Flushes buffered lines.
    ///
    /// # Errors
    /// Returns an error if the flush fails.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Contents of a raw-bitstream log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawLog {
    /// Header lines preceding the first readout.
    pub header: Vec<String>,
    /// Readouts as `(index, bytes)` in file order.
    pub readouts: Vec<(u64, Vec<u8>)>,
}

impl RawLog {
    /// Renders the readouts back to hex lines.
    pub fn hex_lines(&self) -> impl Iterator<Item = String> + '_ {
        self.readouts
            .iter()
            .map(|(index, bytes)| format!("{index}\t{}", to_hex(bytes)))
    }
}

fn parse_readout_line(line: &str) -> Option<(u64, Vec<u8>)> {
    let (index, hex) = line.split_once('\t')?;
    let index = index.trim().parse().ok()?;
    Some((index, parse_hex(hex)?))
}

/// Reads a raw-bitstream log.
///
/// Lines before the first readout line are kept as header. After that, blank
/// lines are skipped and anything else that is not a readout is an error.
///
/// # Errors
/// Returns an error if the file cannot be read or a readout line is malformed.
pub fn read_raw_log<P: AsRef<Path>>(path: P) -> Result<RawLog> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut log = RawLog::default();

    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        match parse_readout_line(&line) {
            Some(readout) => log.readouts.push(readout),
            None if log.readouts.is_empty() => log.header.push(line),
            None if line.trim().is_empty() => {}
            None => {
                return Err(Error::InvalidFormat(format!(
                    "{}: line {} is not a readout: '{}'",
                    path.display(),
                    n + 1,
                    line
                )))
            }
        }
    }
    Ok(log)
}

//! Output files of a run.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use astropix_core::RowBatch;
use astropix_device::RawReadout;
use astropix_io::{RawLogWriter, TableWriter};
use chrono::Local;
use log::{debug, info};

use crate::config::AcquisitionConfig;
use crate::{AcquisitionError, Result};

/// Local time formatted the way output files are stamped.
#[must_use]
pub fn file_timestamp() -> String {
    Local::now().format("%Y%m%d-%H%M%S").to_string()
}

/// Paths of the files a run produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFiles {
    /// Raw-bitstream log.
    pub raw_log: PathBuf,
    /// Structured event table, if enabled.
    pub table: Option<PathBuf>,
    /// Chip configuration as it stood after setup.
    pub final_config: PathBuf,
}

impl RunFiles {
    /// Derives the paths from the configuration and a timestamp.
    #[must_use]
    pub fn new(config: &AcquisitionConfig, stamp: &str) -> Self {
        let dir = &config.output_dir;
        let base = format!("{}{stamp}", config.file_prefix());
        let config_stem = config
            .chip_config
            .file_stem()
            .map_or_else(|| "chip".to_string(), |s| s.to_string_lossy().into_owned());
        Self {
            raw_log: dir.join(format!("{base}.log")),
            table: config.save_table.then(|| dir.join(format!("{base}.csv"))),
            final_config: dir.join(format!("{config_stem}_{stamp}.json")),
        }
    }
}

struct TableSink {
    path: PathBuf,
    file: Option<File>,
    batches: Vec<RowBatch>,
}

/// Raw-bitstream log and event table of one run.
///
/// Files are created by [`EventSink::open`] so that any failure surfaces
/// before the device is touched. The log header is written later, once the
/// device is configured. Row batches are kept in memory and written on
/// [`EventSink::flush_table`].
pub struct EventSink {
    raw_log_path: PathBuf,
    pending_log: Option<File>,
    log: Option<RawLogWriter<File>>,
    table: Option<TableSink>,
    readouts: u64,
}

impl EventSink {
    /// Creates the output directory and files.
    ///
    /// # Errors
    /// Returns an error if a directory or file cannot be created.
    pub fn open(files: &RunFiles) -> Result<Self> {
        for dir in [Some(&files.raw_log), files.table.as_ref()]
            .into_iter()
            .flatten()
            .filter_map(|p| p.parent())
            .filter(|p| !p.as_os_str().is_empty())
        {
            fs::create_dir_all(dir)?;
        }

        let pending_log = File::create(&files.raw_log)?;
        let table = files
            .table
            .as_ref()
            .map(|path| -> Result<TableSink> {
                Ok(TableSink {
                    path: path.clone(),
                    file: Some(File::create(path)?),
                    batches: Vec::new(),
                })
            })
            .transpose()?;

        debug!("Raw log opened at {}", files.raw_log.display());
        Ok(Self {
            raw_log_path: files.raw_log.clone(),
            pending_log: Some(pending_log),
            log: None,
            table,
            readouts: 0,
        })
    }

    /// Writes the log header block.
    ///
    /// # Errors
    /// Returns an error if the header was already written or cannot be written.
    pub fn write_header(&mut self, device_header: &str, run_params: &str) -> Result<()> {
        let file = self.pending_log.take().ok_or_else(|| {
            AcquisitionError::Config("raw log header already written or log closed".into())
        })?;
        self.log = Some(RawLogWriter::from_writer(file, device_header, run_params)?);
        Ok(())
    }

    /// Appends a readout line to the raw log.
    ///
    /// # Errors
    /// Returns an error if the log is closed or the write fails.
    pub fn record_raw(&mut self, raw: &RawReadout) -> Result<()> {
        if self.log.is_none() {
            self.write_header("", "")?;
        }
        let log = self
            .log
            .as_mut()
            .ok_or_else(|| AcquisitionError::Config("raw log is closed".into()))?;
        log.write_readout(raw)?;
        self.readouts += 1;
        Ok(())
    }

    /// Keeps a decoded batch for the event table. Dropped if the table is off.
    pub fn push(&mut self, batch: RowBatch) {
        if let Some(table) = self.table.as_mut() {
            table.batches.push(batch);
        }
    }

    /// Batches held for the table.
    #[must_use]
    pub fn batches(&self) -> &[RowBatch] {
        self.table.as_ref().map_or(&[][..], |t| t.batches.as_slice())
    }

    /// Readout lines logged so far.
    #[must_use]
    pub fn readouts_logged(&self) -> u64 {
        self.readouts
    }

    /// Path of the raw log.
    #[must_use]
    pub fn raw_log_path(&self) -> &Path {
        &self.raw_log_path
    }

    /// Path of the event table, if enabled.
    #[must_use]
    pub fn table_path(&self) -> Option<&Path> {
        self.table.as_ref().map(|t| t.path.as_path())
    }

    /// Writes every held batch to the table. Later calls do nothing.
    ///
    /// Returns the number of rows written, or `None` if there was nothing to do.
    ///
    /// # Errors
    /// Returns an error if the table cannot be written.
    pub fn flush_table(&mut self) -> Result<Option<usize>> {
        let Some(table) = self.table.as_mut() else {
            return Ok(None);
        };
        let Some(file) = table.file.take() else {
            return Ok(None);
        };
        let mut writer = TableWriter::from_writer(file)?;
        for batch in &table.batches {
            writer.write_batch(batch)?;
        }
        writer.flush()?;
        info!(
            "Saved {} rows from {} readouts to {}",
            writer.rows_written(),
            table.batches.len(),
            table.path.display()
        );
        Ok(Some(writer.rows_written()))
    }

    /// Flushes and closes the raw log. Later calls do nothing.
    ///
    /// # Errors
    /// Returns an error if the final flush fails.
    pub fn close_log(&mut self) -> Result<()> {
        self.pending_log = None;
        if let Some(mut log) = self.log.take() {
            log.flush()?;
        }
        Ok(())
    }
}

//! The acquisition loop.
//!
//! One readout is in flight at a time and is decoded inline. Each iteration
//! checks the stop conditions, polls the device, and on a hit pulls a
//! readout, logs it, decodes it and hands the rows to the sink. Decode
//! failures become placeholder rows. Every exit path runs the same shutdown
//! sequence exactly once.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use astropix_core::{unix_time_now, NoiseMask, RowBatch};
use astropix_device::{Device, RawReadout};
use astropix_io::read_noise_summary;
use log::{debug, error, info, warn};

use crate::config::{AcquisitionConfig, ErrorPolicy};
use crate::display::HitDisplay;
use crate::sink::{file_timestamp, EventSink, RunFiles};
use crate::Result;

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The readout limit was reached.
    RunLimitReached,
    /// The wall-clock limit was reached.
    TimeLimitReached,
    /// The cancel flag was raised.
    UserCancelled,
    /// Decode failures exceeded the limit under [`ErrorPolicy::AbortOnExceed`].
    ErrorLimitExceeded,
    /// An unrecoverable error, with its message.
    Fatal(String),
}

/// A step of the shutdown sequence, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStep {
    /// Event table written.
    FlushTable,
    /// Injection stopped.
    StopInjection,
    /// Raw log flushed and closed.
    CloseLog,
    /// Device connection released.
    CloseDevice,
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Why the run ended.
    pub termination: Termination,
    /// Readouts processed.
    pub readouts: u64,
    /// Decode failures.
    pub failures: u64,
    /// True once failures exceeded `max_errors`.
    pub alarm_raised: bool,
    /// Rows written to the event table, if it was enabled.
    pub table_rows: Option<usize>,
    /// Shutdown steps that ran.
    pub shutdown: Vec<ShutdownStep>,
    /// First error raised during shutdown.
    pub shutdown_error: Option<String>,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

enum Step {
    Idle,
    Processed,
    ErrorLimit,
}

/// Drives a device through setup, acquisition and shutdown.
pub struct AcquisitionLoop<D: Device> {
    device: D,
    config: AcquisitionConfig,
    files: RunFiles,
    sink: EventSink,
    mask: Option<NoiseMask>,
    display: Option<Box<dyn HitDisplay>>,
    index: u64,
    failures: u64,
    alarm_raised: bool,
    injecting: bool,
    table_rows: Option<usize>,
    shutdown_steps: Vec<ShutdownStep>,
    closed: bool,
}

impl<D: Device> AcquisitionLoop<D> {
    /// Opens every output file and reads the noise mask.
    ///
    /// Nothing is sent to the device here, so a failure leaves the hardware
    /// untouched.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or a file cannot be
    /// opened.
    pub fn open(device: D, config: AcquisitionConfig) -> Result<Self> {
        config.validate()?;
        let mask = config
            .noise_summary
            .as_ref()
            .map(|path| -> Result<NoiseMask> {
                let counts = read_noise_summary(path)?;
                Ok(NoiseMask::build(&counts, config.noise_threshold))
            })
            .transpose()?;
        let files = RunFiles::new(&config, &file_timestamp());
        let sink = EventSink::open(&files)?;

        Ok(Self {
            device,
            config,
            files,
            sink,
            mask,
            display: None,
            index: 0,
            failures: 0,
            alarm_raised: false,
            injecting: false,
            table_rows: None,
            shutdown_steps: Vec::new(),
            closed: false,
        })
    }

    /// Attaches a live display. Only used when `show_hits` is set.
    #[must_use]
    pub fn with_display(mut self, display: Box<dyn HitDisplay>) -> Self {
        self.display = Some(display);
        self
    }

    /// The device.
    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Output file paths.
    #[must_use]
    pub fn files(&self) -> &RunFiles {
        &self.files
    }

    /// The event sink.
    #[must_use]
    pub fn sink(&self) -> &EventSink {
        &self.sink
    }

    /// Noise mask applied during setup.
    #[must_use]
    pub fn mask(&self) -> Option<&NoiseMask> {
        self.mask.as_ref()
    }

    /// Readouts processed so far.
    #[must_use]
    pub fn readouts(&self) -> u64 {
        self.index
    }

    /// Decode failures so far.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures
    }

    fn configure(&mut self) -> Result<()> {
        let config = &self.config;
        self.device.init_voltages(config.threshold_mv)?;
        self.device.asic_init(&config.chip_config, config.analog_column)?;

        if let Some(injection) = config.injection {
            self.device.enable_pixel(injection.pixel)?;
            self.device.init_injection(injection.voltage_mv)?;
        }

        self.device.enable_spi()?;
        info!("Chip configured");
        self.device.dump_fpga()?;

        if config.injection.is_some() {
            self.device.start_injection()?;
            self.injecting = true;
        }

        if let Some(mask) = &self.mask {
            for (coord, masked) in mask.iter() {
                if masked {
                    self.device.disable_pixel(coord)?;
                } else {
                    self.device.enable_pixel(coord)?;
                }
            }
            let coverage = mask.coverage(self.device.geometry().total_pixels());
            info!(
                "Masked {} noisy pixels (threshold {}), {:.2}% of the chip enabled",
                mask.masked_count(),
                mask.threshold(),
                coverage.percent().unwrap_or(0.0)
            );
        }

        self.device.write_config(&self.files.final_config)?;
        let params = serde_json::to_string(&self.config)?;
        self.sink.write_header(&self.device.log_header(), &params)?;
        Ok(())
    }

    fn on_decode_failure(&mut self, raw: &RawReadout, err: &dyn fmt::Display) -> bool {
        self.failures += 1;
        let max = self.config.max_errors;
        warn!(
            "Decoding failed. Failure {} of {} on readout {}: {}",
            self.failures, max, raw.index, err
        );
        if self.failures <= max {
            return false;
        }
        self.alarm_raised = true;
        match self.config.error_policy {
            ErrorPolicy::AlarmOnly => {
                error!(
                    "Decoding failed {} times, above the limit of {}; continuing",
                    self.failures, max
                );
                false
            }
            ErrorPolicy::AbortOnExceed => {
                error!(
                    "Decoding failed {} times, above the limit of {}. Terminating",
                    self.failures, max
                );
                true
            }
        }
    }

    fn placeholder_for(&mut self, raw: &RawReadout, err: &dyn fmt::Display) -> (RowBatch, bool) {
        let abort = self.on_decode_failure(raw, err);
        (RowBatch::placeholder(raw.index, Some(unix_time_now())), abort)
    }

    fn step(&mut self) -> Result<Step> {
        if !self.device.hits_present()? {
            thread::sleep(Duration::from_millis(self.config.poll_interval_ms));
            return Ok(Step::Idle);
        }

        let start = Instant::now();
        thread::sleep(Duration::from_millis(self.config.settle_delay_ms));
        let bytes = self.device.get_readout(self.config.readout_size)?;
        if self.config.timeit {
            debug!("Readout took {:?}", start.elapsed());
        }

        let raw = RawReadout::new(self.index, bytes);
        self.sink.record_raw(&raw)?;
        debug!("{}\t{}", raw.index, raw.hex());

        // Rows labelled with another readout count as a failed decode.
        let (batch, abort) = match self.device.decode(&raw) {
            Ok(records) => match RowBatch::new(raw.index, records) {
                Ok(batch) => (batch, false),
                Err(err) => self.placeholder_for(&raw, &err),
            },
            Err(err) => self.placeholder_for(&raw, &err),
        };
        self.index += 1;

        if self.config.show_hits && batch.is_nominal() {
            if let Some(display) = self.display.as_mut() {
                let (cols, rows) = batch.axis_locations();
                display.show_event(raw.index, &cols, &rows);
            }
        }
        self.sink.push(batch);

        if self.config.timeit {
            debug!("Read and decode took {:?}", start.elapsed());
        }
        Ok(if abort { Step::ErrorLimit } else { Step::Processed })
    }

    fn acquire(&mut self, cancel: &AtomicBool, deadline: Option<Instant>) -> Result<Termination> {
        loop {
            if self.config.max_readouts.is_some_and(|max| self.index >= max) {
                return Ok(Termination::RunLimitReached);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(Termination::TimeLimitReached);
            }
            if cancel.load(Ordering::SeqCst) {
                return Ok(Termination::UserCancelled);
            }
            match self.step()? {
                Step::Idle | Step::Processed => {}
                Step::ErrorLimit => return Ok(Termination::ErrorLimitExceeded),
            }
        }
    }

    /// Configures the device, acquires until a stop condition and shuts down.
    ///
    /// `cancel` is checked once per iteration; a readout in flight always
    /// completes. The time limit counts from the end of configuration.
    pub fn run(&mut self, cancel: &AtomicBool) -> RunReport {
        let started = Instant::now();

        let outcome = self.configure().and_then(|()| {
            info!("Acquisition started");
            let deadline = self.config.time_limit().map(|limit| Instant::now() + limit);
            self.acquire(cancel, deadline)
        });
        let termination = match outcome {
            Ok(Termination::UserCancelled) => {
                info!("Keyboard interrupt. Program halt!");
                Termination::UserCancelled
            }
            Ok(termination) => {
                info!("Acquisition stopped: {termination:?}");
                termination
            }
            Err(err) => {
                error!("Encountered unexpected error: {err}");
                Termination::Fatal(err.to_string())
            }
        };

        let shutdown_error = self.shutdown().err().map(|e| e.to_string());
        if shutdown_error.is_none() {
            info!("Program terminated successfully");
        }

        RunReport {
            termination,
            readouts: self.index,
            failures: self.failures,
            alarm_raised: self.alarm_raised,
            table_rows: self.table_rows,
            shutdown: self.shutdown_steps.clone(),
            shutdown_error,
            elapsed: started.elapsed(),
        }
    }

    /// Flushes the table, stops injection, closes the log and releases the
    /// device. Runs once; later calls return `Ok(())`.
    ///
    /// Every step is attempted even if an earlier one fails.
    ///
    /// # Errors
    /// Returns the first error raised.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut first_error = None;
        let mut note = |step: &str, result: Result<()>| {
            if let Err(err) = result {
                error!("Shutdown step '{step}' failed: {err}");
                first_error.get_or_insert(err);
            }
        };

        if self.config.save_table {
            let result = self.sink.flush_table().map(|rows| {
                self.table_rows = rows;
            });
            self.shutdown_steps.push(ShutdownStep::FlushTable);
            note("flush table", result);
        }
        if self.injecting {
            let result = self.device.stop_injection().map_err(Into::into);
            self.injecting = false;
            self.shutdown_steps.push(ShutdownStep::StopInjection);
            note("stop injection", result);
        }
        let result = self.sink.close_log();
        self.shutdown_steps.push(ShutdownStep::CloseLog);
        note("close log", result);

        let result = self.device.close().map_err(Into::into);
        self.shutdown_steps.push(ShutdownStep::CloseDevice);
        note("close device", result);

        first_error.map_or(Ok(()), Err)
    }
}

impl<D: Device> Drop for AcquisitionLoop<D> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            error!("Shutdown on drop failed: {err}");
        }
    }
}

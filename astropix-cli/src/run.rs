//! `run` and `decode` subcommands.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use astropix_core::{ChipGeometry, PixelCoord};
use astropix_daq::{
    decode_directory, decode_raw_log, AcquisitionConfig, AcquisitionLoop, ErrorPolicy,
    InjectionConfig, LogDisplay, OfflineReport, RunReport, Termination,
};
use astropix_device::{BeamGenerator, BeamProfile, Device, ReplayDevice, SimulatedDevice};
use astropix_io::read_raw_log;
use clap::{Args, ValueEnum};
use log::info;

use crate::{CliError, Result};

/// What happens once decode failures exceed the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    /// Log an alarm and keep acquiring
    Alarm,
    /// Stop the run
    Abort,
}

impl From<PolicyArg> for ErrorPolicy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::Alarm => ErrorPolicy::AlarmOnly,
            PolicyArg::Abort => ErrorPolicy::AbortOnExceed,
        }
    }
}

/// Options of the `run` subcommand. Flags override the JSON configuration.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Acquisition configuration file (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Prefix for output file names
    #[arg(short, long)]
    pub name: Option<String>,

    /// Output directory for data files
    #[arg(short, long)]
    pub outdir: Option<PathBuf>,

    /// Chip configuration file
    #[arg(short = 'y', long)]
    pub chip_config: Option<PathBuf>,

    /// Noise-scan summary used to mask noisy pixels
    #[arg(short = 's', long)]
    pub noise_summary: Option<PathBuf>,

    /// Pixels with a noise count above this are masked
    #[arg(long)]
    pub noise_threshold: Option<u64>,

    /// Inject charge into the pixel at COL ROW
    #[arg(short, long, num_args = 2, value_names = ["COL", "ROW"])]
    pub inject: Option<Vec<u16>>,

    /// Injection voltage in mV
    #[arg(short, long)]
    pub vinj: Option<f64>,

    /// Column routed to the analog output
    #[arg(short, long)]
    pub analog: Option<u16>,

    /// Comparator threshold in mV
    #[arg(short, long)]
    pub threshold: Option<f64>,

    /// Decode failures tolerated before the error policy applies
    #[arg(short = 'E', long)]
    pub errormax: Option<u64>,

    /// Behaviour once the failure limit is exceeded
    #[arg(long, value_enum)]
    pub error_policy: Option<PolicyArg>,

    /// Maximum number of readouts
    #[arg(short = 'r', long)]
    pub maxruns: Option<u64>,

    /// Maximum run time in minutes
    #[arg(short = 'M', long)]
    pub maxtime: Option<f64>,

    /// Log hits as they are acquired
    #[arg(long)]
    pub showhits: bool,

    /// Save the decoded event table as CSV
    #[arg(short, long)]
    pub csv: bool,

    /// Log readout and decode latency
    #[arg(long)]
    pub timeit: bool,

    /// Replay the readouts of a raw log instead of simulating a beam
    #[arg(long)]
    pub replay: Option<PathBuf>,

    /// Seed of the simulated beam
    #[arg(long, default_value = "0")]
    pub seed: u64,

    /// Probability that a poll of the simulated beam finds a hit
    #[arg(long)]
    pub hit_probability: Option<f64>,

    /// Share of simulated readouts that arrive corrupted
    #[arg(long)]
    pub corruption_rate: Option<f64>,

    /// Directory for the run log
    #[arg(long, default_value = "runlogs")]
    pub runlog_dir: PathBuf,
}

impl RunArgs {
    /// Builds the acquisition configuration from the file, then the flags.
    ///
    /// # Errors
    /// Returns an error if the configuration file cannot be read or
    /// `--inject` is malformed.
    pub fn acquisition_config(&self) -> Result<AcquisitionConfig> {
        let mut config = match &self.config {
            Some(path) => AcquisitionConfig::load(path)?,
            None => AcquisitionConfig::default(),
        };

        if let Some(name) = &self.name {
            config.name.clone_from(name);
        }
        if let Some(dir) = &self.outdir {
            config.output_dir.clone_from(dir);
        }
        if let Some(path) = &self.chip_config {
            config.chip_config.clone_from(path);
        }
        if self.noise_summary.is_some() {
            config.noise_summary.clone_from(&self.noise_summary);
        }
        if let Some(threshold) = self.noise_threshold {
            config.noise_threshold = threshold;
        }
        if let Some(coords) = &self.inject {
            let &[col, row] = coords.as_slice() else {
                return Err(CliError::InvalidArgument(
                    "--inject takes exactly COL ROW".into(),
                ));
            };
            config.injection = Some(InjectionConfig {
                pixel: PixelCoord::new(col, row),
                voltage_mv: self.vinj,
            });
        } else if let Some(injection) = config.injection.as_mut() {
            if self.vinj.is_some() {
                injection.voltage_mv = self.vinj;
            }
        }
        if self.analog.is_some() {
            config.analog_column = self.analog;
        }
        if self.threshold.is_some() {
            config.threshold_mv = self.threshold;
        }
        if let Some(max) = self.errormax {
            config.max_errors = max;
        }
        if let Some(policy) = self.error_policy {
            config.error_policy = policy.into();
        }
        if self.maxruns.is_some() {
            config.max_readouts = self.maxruns;
        }
        if self.maxtime.is_some() {
            config.max_minutes = self.maxtime;
        }
        config.show_hits |= self.showhits;
        config.save_table |= self.csv;
        config.timeit |= self.timeit;
        Ok(config)
    }
}

fn acquire<D: Device>(device: D, config: AcquisitionConfig, cancel: &AtomicBool) -> Result<RunReport> {
    let show_hits = config.show_hits;
    let mut daq = AcquisitionLoop::open(device, config)?;
    if show_hits {
        daq = daq.with_display(Box::new(LogDisplay::new()));
    }
    info!("Raw readouts logged to {}", daq.files().raw_log.display());
    Ok(daq.run(cancel))
}

/// Runs an acquisition on the simulated or replay device.
///
/// # Errors
/// Returns an error if the run cannot start or ends on a fatal error.
pub fn run(args: &RunArgs, cancel: &AtomicBool) -> Result<()> {
    let mut config = args.acquisition_config()?;

    let report = if let Some(path) = &args.replay {
        let log = read_raw_log(path)?;
        // The replay never polls positive again once drained.
        let available = log.readouts.len() as u64;
        config.max_readouts = Some(config.max_readouts.map_or(available, |m| m.min(available)));
        let device = ReplayDevice::new(path.display().to_string(), log.readouts);
        acquire(device, config, cancel)?
    } else {
        let mut profile = BeamProfile::default();
        if let Some(p) = args.hit_probability {
            profile = profile.with_hit_probability(p);
        }
        if let Some(p) = args.corruption_rate {
            profile = profile.with_corruption_rate(p);
        }
        let device = SimulatedDevice::new().with_beam(BeamGenerator::new(args.seed, profile));
        acquire(device, config, cancel)?
    };

    println!(
        "Run ended ({:?}) after {} readouts in {:.2}s",
        report.termination,
        report.readouts,
        report.elapsed.as_secs_f64()
    );
    println!("Decode failures: {}", report.failures);
    if let Some(rows) = report.table_rows {
        println!("Rows saved: {rows}");
    }

    match report.termination {
        Termination::Fatal(message) => Err(CliError::RunFailed(message)),
        _ => Ok(()),
    }
}

fn print_offline(report: &OfflineReport) {
    println!(
        "{} -> {}: {} readouts, {} rows, {} failed",
        report.source.display(),
        report.table_path.display(),
        report.readouts,
        report.rows,
        report.failures
    );
}

/// Decodes one raw log or every log in a directory.
///
/// # Errors
/// Returns an error if a log cannot be decoded or the directory cannot be
/// listed.
pub fn decode(file: Option<&Path>, dir: Option<&Path>, outdir: Option<&Path>) -> Result<()> {
    let geometry = ChipGeometry::default();
    match (file, dir) {
        (Some(file), None) => print_offline(&decode_raw_log(file, outdir, geometry)?),
        (None, Some(dir)) => {
            let reports = decode_directory(dir, outdir, geometry)?;
            for report in &reports {
                print_offline(report);
            }
            println!("Decoded {} logs", reports.len());
        }
        _ => {
            return Err(CliError::InvalidArgument(
                "give exactly one of --file or --dir".into(),
            ))
        }
    }
    Ok(())
}

//! astropix: acquisition and analysis for AstroPix detectors.
//!
//! `run` drives the acquisition loop against the simulated chip or a replayed
//! raw log; the other subcommands work on files written by earlier runs.

mod analysis;
mod logging;
mod run;
mod signal;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::error;
use thiserror::Error;

use crate::analysis::{DisplayArgs, NoiseMapArgs};
use crate::logging::LogLevel;
use crate::run::RunArgs;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File error: {0}")]
    AstropixIo(#[from] astropix_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] astropix_core::Error),

    #[error("Device error: {0}")]
    Device(#[from] astropix_device::DeviceError),

    #[error("Acquisition error: {0}")]
    Acquisition(#[from] astropix_daq::AcquisitionError),

    #[error("Run failed: {0}")]
    RunFailed(String),

    #[error("{0}")]
    InvalidArgument(String),
}

/// AstroPix readout acquisition and pixel-pair reconstruction.
#[derive(Parser)]
#[command(name = "astropix")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level: D debug, I info, W warning, E error, C critical
    #[arg(short = 'L', long = "log-level", alias = "loglevel", value_enum, default_value = "I", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire readouts until a limit, an error or Ctrl-C
    Run(RunArgs),

    /// Decode raw logs written by earlier runs into event tables
    Decode {
        /// Raw log to decode
        #[arg(short, long, conflicts_with = "dir")]
        file: Option<PathBuf>,

        /// Decode every *.log in this directory
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Output directory; defaults to the log's directory
        #[arg(short, long)]
        outdir: Option<PathBuf>,
    },

    /// Reconstruct pixel hits over several runs and summarise them
    Display(DisplayArgs),

    /// Show the pixel hits of a single readout
    Event {
        /// Event table
        #[arg(short = 'f', long)]
        table: PathBuf,

        /// Readout index
        #[arg(short = 'e', long)]
        readout: u64,

        /// Write the hits as CSV here
        #[arg(short, long)]
        outdir: Option<PathBuf>,
    },

    /// Report noise-mask coverage from a noise-scan summary
    NoiseMap(NoiseMapArgs),
}

fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run(args) => {
            let run_log = logging::run_log_path(&args.runlog_dir, &astropix_daq::file_timestamp());
            logging::init(cli.log_level, Some(&run_log))?;
            let cancel = signal::install();
            run::run(&args, cancel)
        }
        Commands::Decode { file, dir, outdir } => {
            logging::init(cli.log_level, None)?;
            run::decode(file.as_deref(), dir.as_deref(), outdir.as_deref())
        }
        Commands::Display(args) => {
            logging::init(cli.log_level, None)?;
            analysis::display(&args)
        }
        Commands::Event {
            table,
            readout,
            outdir,
        } => {
            logging::init(cli.log_level, None)?;
            analysis::event(&table, readout, outdir.as_deref())
        }
        Commands::NoiseMap(args) => {
            logging::init(cli.log_level, None)?;
            analysis::noise_map(&args)
        }
    }
}

fn main() -> Result<()> {
    let result = execute(Cli::parse());
    if let Err(err) = &result {
        error!("{err}");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::parse_from(["astropix", "-L", "D", "decode", "-f", "run.log"]);
        assert_eq!(cli.log_level, LogLevel::Debug);
        assert!(matches!(cli.command, Commands::Decode { file: Some(_), dir: None, .. }));

        let cli = Cli::parse_from(["astropix", "event", "-f", "t.csv", "-e", "4"]);
        assert!(matches!(cli.command, Commands::Event { readout: 4, .. }));

        assert!(Cli::try_parse_from(["astropix", "decode", "-f", "a.log", "-d", "."]).is_err());
        assert!(Cli::try_parse_from(["astropix", "run", "-i", "3"]).is_err());
    }
}

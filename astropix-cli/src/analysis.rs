//! `display`, `event` and `noise-map` subcommands.

use std::fs;
use std::path::{Path, PathBuf};

use astropix_algorithms::{
    reconstruct_runs, EventOutcome, HitMap, MatchStrategy, PairingConfig, PayloadPolicy,
    PixelPairReconstructor, TotMap, TotSpectrum,
};
use astropix_core::{ChipGeometry, GridSpec, HitTable, NoiseMask, PixelHit};
use astropix_io::{export, find_noise_summary, read_noise_summary, read_table};
use clap::Args;
use log::info;

use crate::{CliError, Result};

/// Options of the `display` subcommand.
#[derive(Debug, Args)]
pub struct DisplayArgs {
    /// Directory holding the event tables
    #[arg(short, long)]
    pub datadir: PathBuf,

    /// Run numbers to combine; reads run<N>_*.csv
    #[arg(short = 'l', long = "runs", required = true, num_args = 1..)]
    pub runs: Vec<String>,

    /// Chip name used to find the noise summary and name the exports
    #[arg(short, long, default_value = "chip")]
    pub name: String,

    /// Directory holding noise_scan_summary_<name>*.csv
    #[arg(short = 's', long)]
    pub noisedir: Option<PathBuf>,

    /// Pixels with a noise count above this are masked
    #[arg(short = 't', long, default_value = "0")]
    pub noisethreshold: u64,

    /// Maximum timestamp difference in a pair (clock ticks)
    #[arg(long = "td", default_value = "0.5")]
    pub timestamp_diff: f64,

    /// Maximum ToT difference in a pair (us)
    #[arg(long = "tot", default_value = "1.0")]
    pub tot_diff: f64,

    /// Drop a whole event if any of its rows is badly decoded
    #[arg(long)]
    pub exclusively: bool,

    /// Use each crossing at most once, closest pairs first
    #[arg(long)]
    pub greedy: bool,

    /// Side of the coarse grid cells in pixels
    #[arg(long, default_value = "5")]
    pub group_size: u16,

    /// Write CSV exports of the results here
    #[arg(short, long)]
    pub outdir: Option<PathBuf>,
}

impl DisplayArgs {
    fn pairing(&self) -> PairingConfig {
        PairingConfig::default()
            .with_timestamp_tolerance(self.timestamp_diff)
            .with_tot_tolerance(self.tot_diff)
            .with_policy(if self.exclusively {
                PayloadPolicy::Exclusive
            } else {
                PayloadPolicy::Filter
            })
            .with_strategy(if self.greedy {
                MatchStrategy::Greedy
            } else {
                MatchStrategy::CrossJoin
            })
    }
}

/// Event tables of the given runs, `run<N>_*.csv` in name order per run.
///
/// # Errors
/// Returns an error if the directory cannot be listed.
pub fn find_run_tables(dir: &Path, runs: &[String]) -> Result<Vec<PathBuf>> {
    let mut names: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .collect();
    names.sort();

    let mut found = Vec::new();
    for run in runs {
        let prefix = format!("run{run}_");
        let matches = names.iter().filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".csv"))
        });
        found.extend(matches.cloned());
    }
    Ok(found)
}

fn load_mask(dir: &Path, name: &str, threshold: u64) -> Result<NoiseMask> {
    let path = find_noise_summary(dir, name)?.ok_or_else(|| {
        CliError::InvalidArgument(format!(
            "no noise_scan_summary_{name}*.csv in {}",
            dir.display()
        ))
    })?;
    info!("Noise summary: {}", path.display());
    Ok(NoiseMask::build(&read_noise_summary(&path)?, threshold))
}

fn print_spectrum(spectrum: &TotSpectrum) {
    println!("ToT spectrum ({} entries):", spectrum.entries());
    for (bin, count) in spectrum.counts().iter().enumerate() {
        let (lo, hi) = spectrum.bin_edges(bin);
        println!("  [{lo:5.1}, {hi:5.1}) us: {count}");
    }
    println!(
        "  underflow: {}, overflow: {}",
        spectrum.underflow(),
        spectrum.overflow()
    );
}

/// Combines the runs, prints the event summary and writes the exports.
///
/// # Errors
/// Returns an error if no table matches, a table cannot be read or an
/// export cannot be written.
pub fn display(args: &DisplayArgs) -> Result<()> {
    let reconstructor = PixelPairReconstructor::new(args.pairing())?;
    let grid = GridSpec::new(args.group_size)?;
    let geometry = ChipGeometry::default();

    let paths = find_run_tables(&args.datadir, &args.runs)?;
    if paths.is_empty() {
        return Err(CliError::InvalidArgument(format!(
            "no tables for runs {:?} in {}",
            args.runs,
            args.datadir.display()
        )));
    }
    let tables = paths
        .iter()
        .map(|path| {
            println!("Reading in {}...", path.display());
            read_table(path)
        })
        .collect::<std::result::Result<Vec<HitTable>, _>>()?;

    let batch = reconstruct_runs(&tables, &reconstructor);
    println!("Summary:");
    println!("{}", batch.summary);

    let hit_map = HitMap::from_hits(&batch.hits);
    println!("nhits: {}", hit_map.nhits());
    println!(
        "npixels: {} ({:.2}% of the chip)",
        hit_map.distinct_pixels(),
        hit_map.coverage_percent(geometry).unwrap_or(0.0)
    );

    let mask = args
        .noisedir
        .as_deref()
        .map(|dir| load_mask(dir, &args.name, args.noisethreshold))
        .transpose()?;
    if let Some(mask) = &mask {
        let coverage = mask.coverage(geometry.total_pixels());
        println!(
            "good pixels: {:.2}% at noise threshold {}",
            coverage.percent().unwrap_or(0.0),
            mask.threshold()
        );
    }

    let spectrum = TotSpectrum::from_hits(&batch.hits);
    print_spectrum(&spectrum);

    if let Some(outdir) = &args.outdir {
        fs::create_dir_all(outdir)?;
        let prefix = format!("{}_run_{}", args.name, args.runs.join("_"));
        let out = |suffix: &str| outdir.join(format!("{prefix}_{suffix}.csv"));
        let tot_map = TotMap::from_hits(&batch.hits);

        export::write_pixel_hits(out("pixel_hits"), &batch.hits)?;
        export::write_hit_map(out("hit_map"), &hit_map)?;
        export::write_coarse_grid(out("hit_map_coarse"), &hit_map.coarse(grid, geometry))?;
        export::write_tot_map(out("tot_map"), &tot_map)?;
        export::write_coarse_grid(out("tot_map_coarse"), &tot_map.coarse(grid, geometry))?;
        export::write_spectrum(out("tot_spectrum"), &spectrum)?;
        if let Some(mask) = &mask {
            export::write_mask(out("mask"), mask)?;
        }
        println!("Exports written to {}", outdir.display());
    }
    Ok(())
}

fn print_hits(hits: &[PixelHit]) {
    println!("col,row,timestamp_col,timestamp_row,tot_us_col,tot_us_row");
    for h in hits {
        println!(
            "{},{},{},{},{},{}",
            h.col, h.row, h.timestamp_col, h.timestamp_row, h.tot_us_col, h.tot_us_row
        );
    }
}

/// Pairs the crossings of one readout with the single-event windows.
///
/// # Errors
/// Returns an error if the table cannot be read, the readout is absent or
/// the export cannot be written.
pub fn event(table: &Path, readout: u64, outdir: Option<&Path>) -> Result<()> {
    let records = read_table(table)?.records;
    let reconstructor = PixelPairReconstructor::new(PairingConfig::single_event())?;
    let outcome = reconstructor
        .reconstruct_event(&records, readout)
        .ok_or_else(|| {
            CliError::InvalidArgument(format!("readout {readout} not in {}", table.display()))
        })?;

    let hits = match outcome {
        EventOutcome::Placeholder => {
            println!("Readout {readout} failed to decode");
            return Ok(());
        }
        EventOutcome::Empty | EventOutcome::Excluded => Vec::new(),
        EventOutcome::Used(hits) => hits,
    };
    println!("Readout {readout}: {} pixel hits", hits.len());
    print_hits(&hits);

    if let Some(dir) = outdir {
        fs::create_dir_all(dir)?;
        export::write_pixel_hits(dir.join(format!("hit_plot_{readout}.csv")), &hits)?;
    }
    Ok(())
}

/// Options of the `noise-map` subcommand.
#[derive(Debug, Args)]
pub struct NoiseMapArgs {
    /// Chip name in noise_scan_summary_<name>*.csv
    #[arg(short, long)]
    pub name: String,

    /// Directory holding the noise summary
    #[arg(short = 's', long)]
    pub noisedir: PathBuf,

    /// Pixels with a noise count above this are masked
    #[arg(short = 't', long, default_value = "5")]
    pub noisethreshold: u64,

    /// Number of noisiest pixels listed
    #[arg(long, default_value = "10")]
    pub top: usize,

    /// Write the mask as CSV here
    #[arg(short, long)]
    pub outdir: Option<PathBuf>,
}

/// Compares the zero-threshold mask with the operating one.
///
/// # Errors
/// Returns an error if the summary is missing or unreadable.
pub fn noise_map(args: &NoiseMapArgs) -> Result<()> {
    let stringent = load_mask(&args.noisedir, &args.name, 0)?;
    let operational = load_mask(&args.noisedir, &args.name, args.noisethreshold)?;
    let listed = stringent.len();

    let pct = |mask: &NoiseMask| mask.coverage(listed).percent().unwrap_or(0.0);
    println!(
        "Stringent mask (threshold 0): {:.2}% of {listed} pixels enabled",
        pct(&stringent)
    );
    println!(
        "Operational mask (threshold {}): {:.2}% of {listed} pixels enabled",
        args.noisethreshold,
        pct(&operational)
    );

    println!("The {} noisiest pixels:", args.top);
    println!("col,row,count");
    for entry in operational.noisiest(args.top) {
        println!("{},{},{}", entry.coord.col, entry.coord.row, entry.count);
    }

    if let Some(dir) = &args.outdir {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!(
            "{}_noise_mask_nt_{}.csv",
            args.name, args.noisethreshold
        ));
        export::write_mask(&path, &operational)?;
        println!("Mask written to {}", path.display());
    }
    Ok(())
}

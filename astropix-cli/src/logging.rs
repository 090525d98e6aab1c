//! Logger setup.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use env_logger::{Builder, Target};
use log::LevelFilter;

/// Log level selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Debug
    #[value(name = "D")]
    Debug,
    /// Info
    #[value(name = "I")]
    Info,
    /// Warning
    #[value(name = "W")]
    Warning,
    /// Error
    #[value(name = "E")]
    Error,
    /// Critical; logged as error
    #[value(name = "C")]
    Critical,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warning => LevelFilter::Warn,
            LogLevel::Error | LogLevel::Critical => LevelFilter::Error,
        }
    }
}

/// Copies every log line to stderr and to a file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Path of the run log for a timestamp.
pub fn run_log_path(dir: &Path, stamp: &str) -> PathBuf {
    dir.join(format!("AstropixRunlog_{stamp}.log"))
}

/// Installs the global logger. When `run_log` is given, every line is also
/// appended to that file.
///
/// # Errors
/// Returns an error if the run log cannot be created.
pub fn init(level: LogLevel, run_log: Option<&Path>) -> io::Result<()> {
    let mut builder = Builder::new();
    builder.filter_level(level.into()).format(|buf, record| {
        writeln!(
            buf,
            "{}:{}:{}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });

    if let Some(path) = run_log {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let file = File::create(path)?;
        builder.target(Target::Pipe(Box::new(Tee { file })));
    }

    // A second init only happens in tests; the first logger stays.
    let _ = builder.try_init();
    Ok(())
}

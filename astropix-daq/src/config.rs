//! Acquisition configuration.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use astropix_core::PixelCoord;
use serde::{Deserialize, Serialize};

use crate::{AcquisitionError, Result};

/// What happens once decode failures exceed `max_errors`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Log at error level on every further failure and keep acquiring.
    #[default]
    AlarmOnly,
    /// Stop the run.
    AbortOnExceed,
}

/// Charge injection into a single pixel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InjectionConfig {
    /// Pixel receiving the injection.
    pub pixel: PixelCoord,
    /// Injection voltage in mV; the device default when unset.
    pub voltage_mv: Option<f64>,
}

/// Parameters of one acquisition run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Prefix for output file names.
    pub name: String,
    /// Directory receiving every output file.
    pub output_dir: PathBuf,
    /// Chip configuration loaded by `asic_init`.
    pub chip_config: PathBuf,
    /// Noise-scan summary used to mask pixels.
    pub noise_summary: Option<PathBuf>,
    /// Pixels with a noise count above this are disabled.
    pub noise_threshold: u64,
    /// Optional charge injection.
    pub injection: Option<InjectionConfig>,
    /// Column routed to the analog output.
    pub analog_column: Option<u16>,
    /// Comparator threshold in mV; the device default when unset.
    pub threshold_mv: Option<f64>,
    /// Decode failures tolerated before the error policy applies.
    pub max_errors: u64,
    /// Behaviour once `max_errors` is exceeded.
    pub error_policy: ErrorPolicy,
    /// Stop after this many readouts.
    pub max_readouts: Option<u64>,
    /// Stop after this many minutes.
    pub max_minutes: Option<f64>,
    /// Delay between polls that found nothing, in ms.
    pub poll_interval_ms: u64,
    /// Delay between a successful poll and the readout, in ms.
    pub settle_delay_ms: u64,
    /// Bytes requested per readout.
    pub readout_size: usize,
    /// Write the structured event table.
    pub save_table: bool,
    /// Push events to the live display.
    pub show_hits: bool,
    /// Log readout and decode latency.
    pub timeit: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            output_dir: PathBuf::from("."),
            chip_config: PathBuf::from("config/testconfig_v3.json"),
            noise_summary: None,
            noise_threshold: 0,
            injection: None,
            analog_column: Some(0),
            threshold_mv: None,
            max_errors: 100,
            error_policy: ErrorPolicy::AlarmOnly,
            max_readouts: None,
            max_minutes: None,
            poll_interval_ms: 1,
            settle_delay_ms: 1,
            readout_size: 20,
            save_table: false,
            show_hits: false,
            timeit: false,
        }
    }
}

impl AcquisitionConfig {
    /// Loads a configuration from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    /// Sets the readout limit.
    #[must_use]
    pub fn with_max_readouts(mut self, max: u64) -> Self {
        self.max_readouts = Some(max);
        self
    }

    /// Sets the failure limit and what happens past it.
    #[must_use]
    pub fn with_error_limit(mut self, max_errors: u64, policy: ErrorPolicy) -> Self {
        self.max_errors = max_errors;
        self.error_policy = policy;
        self
    }

    /// Sets the output directory.
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Enables or disables the event table.
    #[must_use]
    pub fn with_table(mut self, save: bool) -> Self {
        self.save_table = save;
        self
    }

    /// Removes both poll delays.
    #[must_use]
    pub fn without_delays(mut self) -> Self {
        self.poll_interval_ms = 0;
        self.settle_delay_ms = 0;
        self
    }

    /// Wall-clock limit of the run.
    #[must_use]
    pub fn time_limit(&self) -> Option<Duration> {
        self.max_minutes
            .and_then(|m| Duration::try_from_secs_f64(m * 60.0).ok())
    }

    /// Checks values that would make the loop misbehave.
    ///
    /// # Errors
    /// Returns [`AcquisitionError::Config`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if let Some(minutes) = self.max_minutes {
            if !minutes.is_finite() || minutes < 0.0 {
                return Err(AcquisitionError::Config(format!(
                    "max_minutes must be a non-negative number, got {minutes}"
                )));
            }
        }
        if self.readout_size == 0 {
            return Err(AcquisitionError::Config("readout_size must be positive".into()));
        }
        if let Some(injection) = self.injection {
            if injection.voltage_mv.is_some_and(|v| !v.is_finite() || v < 0.0) {
                return Err(AcquisitionError::Config(
                    "injection voltage must be a non-negative number".into(),
                ));
            }
        }
        Ok(())
    }

    /// File name prefix: the run name followed by `_`, or nothing.
    #[must_use]
    pub fn file_prefix(&self) -> String {
        if self.name.is_empty() {
            String::new()
        } else {
            format!("{}_", self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AcquisitionConfig::default();
        assert_eq!(config.max_errors, 100);
        assert_eq!(config.error_policy, ErrorPolicy::AlarmOnly);
        assert_eq!(config.poll_interval_ms, 1);
        assert!(config.validate().is_ok());
        assert!(config.time_limit().is_none());
        assert_eq!(config.file_prefix(), "");
    }

    #[test]
    fn test_load_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(
            &path,
            r#"{"name": "run17", "max_minutes": 0.5, "error_policy": "abort-on-exceed"}"#,
        )
        .unwrap();

        let config = AcquisitionConfig::load(&path).unwrap();
        assert_eq!(config.name, "run17");
        assert_eq!(config.file_prefix(), "run17_");
        assert_eq!(config.error_policy, ErrorPolicy::AbortOnExceed);
        assert_eq!(config.time_limit(), Some(Duration::from_secs(30)));
        assert_eq!(config.max_errors, 100);
    }

    #[test]
    fn test_validate() {
        let mut config = AcquisitionConfig {
            max_minutes: Some(-1.0),
            ..AcquisitionConfig::default()
        };
        assert!(config.validate().is_err());
        config.max_minutes = None;
        config.readout_size = 0;
        assert!(config.validate().is_err());
    }
}

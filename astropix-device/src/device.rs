//! The device interface used by the acquisition loop.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::SystemTime;

use astropix_core::{unix_time_now, ChipGeometry, HitRecord, PixelCoord};
use serde::{Deserialize, Serialize};

use crate::frame::{to_hex, FrameDecoder};
use crate::{DecodeError, DeviceError, Result};

/// Bytes pulled from the chip for one readout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReadout {
    /// Readout index assigned by the acquisition loop.
    pub index: u64,
    /// Raw bytes as returned by the device.
    pub bytes: Vec<u8>,
    /// Host time of capture.
    pub captured_at: SystemTime,
}

impl RawReadout {
    /// Wraps bytes captured now.
    #[must_use]
    pub fn new(index: u64, bytes: Vec<u8>) -> Self {
        Self {
            index,
            bytes,
            captured_at: SystemTime::now(),
        }
    }

    /// Lowercase hex rendering used in the raw-bitstream log.
    #[must_use]
    pub fn hex(&self) -> String {
        to_hex(&self.bytes)
    }
}

/// A chip reached through some transport.
///
/// Implementations are driven from a single thread. Every operation except
/// [`Device::decode`] talks to the hardware and may fail with a
/// [`DeviceError`]; a decode failure is a [`DecodeError`] the caller is
/// expected to recover from.
pub trait Device {
    /// Pixel matrix of the chip.
    fn geometry(&self) -> ChipGeometry {
        ChipGeometry::default()
    }

    /// Powers the chip and sets the comparator threshold in mV.
    ///
    /// # Errors
    /// Returns an error if the voltage boards cannot be programmed.
    fn init_voltages(&mut self, threshold_mv: Option<f64>) -> Result<()>;

    /// Loads the chip configuration and optionally routes one column to the
    /// analog output.
    ///
    /// # Errors
    /// Returns an error if the configuration cannot be read or applied.
    fn asic_init(&mut self, config_path: &Path, analog_column: Option<u16>) -> Result<()>;

    /// Enables a pixel.
    ///
    /// # Errors
    /// Returns an error if the coordinate is off the chip or the write fails.
    fn enable_pixel(&mut self, coord: PixelCoord) -> Result<()>;

    /// Disables a pixel.
    ///
    /// # Errors
    /// Returns an error if the coordinate is off the chip or the write fails.
    fn disable_pixel(&mut self, coord: PixelCoord) -> Result<()>;

    /// Prepares charge injection at the given voltage in mV.
    ///
    /// # Errors
    /// Returns an error if the injection board cannot be programmed.
    fn init_injection(&mut self, voltage_mv: Option<f64>) -> Result<()>;

    /// Starts periodic injection.
    ///
    /// # Errors
    /// Returns an error if injection was not initialised.
    fn start_injection(&mut self) -> Result<()>;

    /// Stops periodic injection.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    fn stop_injection(&mut self) -> Result<()>;

    /// Enables the SPI readout path.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    fn enable_spi(&mut self) -> Result<()>;

    /// Discards anything buffered on the FPGA.
    ///
    /// # Errors
    /// Returns an error if the transfer fails.
    fn dump_fpga(&mut self) -> Result<()>;

    /// Non-blocking check for buffered hits.
    ///
    /// # Errors
    /// Returns an error if the device cannot be queried.
    fn hits_present(&mut self) -> Result<bool>;

    /// Pulls one readout of a device-defined `size`. Blocks until done.
    ///
    /// # Errors
    /// Returns an error if the transfer fails.
    fn get_readout(&mut self, size: usize) -> Result<Vec<u8>>;

    /// Decodes a readout into records stamped with the current host time.
    ///
    /// # Errors
    /// Returns a [`DecodeError`] if the readout is malformed.
    fn decode(&self, raw: &RawReadout) -> std::result::Result<Vec<HitRecord>, DecodeError> {
        let hits = FrameDecoder::new(self.geometry()).decode(&raw.bytes)?;
        let hittime = unix_time_now();
        Ok(hits
            .into_iter()
            .map(|hit| HitRecord::decoded(raw.index, hit, hittime))
            .collect())
    }

    /// Writes the active chip configuration to `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    fn write_config(&self, path: &Path) -> Result<()>;

    /// Text block written at the top of the raw-bitstream log.
    fn log_header(&self) -> String;

    /// Releases the connection. Later calls are no-ops.
    ///
    /// # Errors
    /// Returns an error if the transport fails to close.
    fn close(&mut self) -> Result<()>;
}

/// Chip configuration snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChipConfig {
    /// Name of the configuration the chip was initialised from.
    pub name: String,
    /// Comparator threshold in mV.
    pub threshold_mv: Option<f64>,
    /// Column routed to the analog output.
    pub analog_column: Option<u16>,
    /// Injection voltage in mV.
    pub injection_mv: Option<f64>,
    /// Pixels enabled for readout.
    pub enabled_pixels: BTreeSet<PixelCoord>,
}

impl ChipConfig {
    /// Reads a configuration file.
    ///
    /// # Errors
    /// Returns [`DeviceError::ConfigNotFound`] if the file is missing, or a
    /// JSON error if it cannot be parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DeviceError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    /// Writes the configuration as pretty JSON.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_readout_hex() {
        let raw = RawReadout::new(3, vec![0xBC, 0x04, 0x0A]);
        assert_eq!(raw.hex(), "bc040a");
    }

    #[test]
    fn test_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chip.json");

        let mut config = ChipConfig {
            name: "testconfig_v3".into(),
            threshold_mv: Some(100.0),
            ..ChipConfig::default()
        };
        config.enabled_pixels.insert(PixelCoord::new(1, 2));
        config.save(&path).unwrap();

        assert_eq!(ChipConfig::load(&path).unwrap(), config);
        assert!(matches!(
            ChipConfig::load(&dir.path().join("missing.json")),
            Err(DeviceError::ConfigNotFound { .. })
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_config_save_reports_buffered_write_error() {
        // /dev/full accepts the open but fails every write with ENOSPC.
        let result = ChipConfig::default().save(Path::new("/dev/full"));
        assert!(matches!(result, Err(DeviceError::Io(_))));
    }
}

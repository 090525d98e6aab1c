//! Replays captured readouts through the device interface.

use std::collections::VecDeque;
use std::path::Path;

use astropix_core::PixelCoord;
use log::debug;

use crate::device::{ChipConfig, Device};
use crate::{DeviceError, Result};

/// Serves the readouts of an earlier run in their original order.
///
/// Configuration calls are accepted and ignored. `hits_present` turns false
/// once every readout has been served.
#[derive(Debug, Default)]
pub struct ReplayDevice {
    source: String,
    readouts: VecDeque<(u64, Vec<u8>)>,
    served: usize,
    closed: bool,
}

impl ReplayDevice {
    /// Creates a replay of `(index, bytes)` pairs taken from `source`.
    #[must_use]
    pub fn new(source: impl Into<String>, readouts: Vec<(u64, Vec<u8>)>) -> Self {
        Self {
            source: source.into(),
            readouts: readouts.into(),
            served: 0,
            closed: false,
        }
    }

    /// Readouts still to be served.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.readouts.len()
    }

    /// Readouts served so far.
    #[must_use]
    pub fn served(&self) -> usize {
        self.served
    }

    /// Index the next readout had in the original run.
    #[must_use]
    pub fn next_original_index(&self) -> Option<u64> {
        self.readouts.front().map(|(index, _)| *index)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(DeviceError::NotConnected)
        } else {
            Ok(())
        }
    }
}

impl Device for ReplayDevice {
    fn init_voltages(&mut self, _threshold_mv: Option<f64>) -> Result<()> {
        self.ensure_open()
    }

    fn asic_init(&mut self, config_path: &Path, _analog_column: Option<u16>) -> Result<()> {
        self.ensure_open()?;
        debug!("Replay ignores chip configuration {}", config_path.display());
        Ok(())
    }

    fn enable_pixel(&mut self, coord: PixelCoord) -> Result<()> {
        self.ensure_open()?;
        self.geometry().check(coord)?;
        Ok(())
    }

    fn disable_pixel(&mut self, coord: PixelCoord) -> Result<()> {
        self.enable_pixel(coord)
    }

    fn init_injection(&mut self, _voltage_mv: Option<f64>) -> Result<()> {
        self.ensure_open()
    }

    fn start_injection(&mut self) -> Result<()> {
        self.ensure_open()
    }

    fn stop_injection(&mut self) -> Result<()> {
        self.ensure_open()
    }

    fn enable_spi(&mut self) -> Result<()> {
        self.ensure_open()
    }

    fn dump_fpga(&mut self) -> Result<()> {
        self.ensure_open()
    }

    fn hits_present(&mut self) -> Result<bool> {
        self.ensure_open()?;
        Ok(!self.readouts.is_empty())
    }

    fn get_readout(&mut self, _size: usize) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let (_, bytes) = self
            .readouts
            .pop_front()
            .ok_or_else(|| DeviceError::InvalidState("replay exhausted".into()))?;
        self.served += 1;
        Ok(bytes)
    }

    fn write_config(&self, path: &Path) -> Result<()> {
        ChipConfig {
            name: format!("replay of {}", self.source),
            ..ChipConfig::default()
        }
        .save(path)
    }

    fn log_header(&self) -> String {
        format!(
            "Replay of {}\nreadouts: {}\n",
            self.source,
            self.readouts.len() + self.served
        )
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RawReadout;

    #[test]
    fn test_replay_in_order() {
        let mut device = ReplayDevice::new(
            "run1.log",
            vec![(4, vec![0xBC, 0xBC]), (5, vec![0x04, 0x81, 0x01, 0x00, 0x10])],
        );
        assert_eq!(device.next_original_index(), Some(4));

        assert!(device.hits_present().unwrap());
        assert_eq!(device.get_readout(20).unwrap(), vec![0xBC, 0xBC]);
        let raw = RawReadout::new(1, device.get_readout(20).unwrap());
        let records = device.decode(&raw).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].readout, 1);

        assert!(!device.hits_present().unwrap());
        assert!(matches!(
            device.get_readout(20),
            Err(DeviceError::InvalidState(_))
        ));
        assert_eq!(device.served(), 2);
        assert!(device.log_header().contains("readouts: 2"));
    }

    #[test]
    fn test_closed_replay_rejects_polls() {
        let mut device = ReplayDevice::new("empty", Vec::new());
        device.close().unwrap();
        assert!(matches!(
            device.hits_present(),
            Err(DeviceError::NotConnected)
        ));
    }
}

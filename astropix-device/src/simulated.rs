//! Simulated chip for running acquisition without hardware.
//!
//! [`SimulatedDevice`] serves readouts from a scripted queue and, once the
//! queue is drained, from an optional seeded [`BeamGenerator`]. Every call
//! except `hits_present` is recorded so tests can check what the acquisition
//! loop asked for and in what order.

use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};

use astropix_core::{ChipGeometry, HitData, PixelCoord, PAYLOAD_HIT};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::{Rng, SeedableRng};

use crate::device::{ChipConfig, Device};
use crate::frame::{encode_hit, IDLE_BYTES, SAMPLE_CLOCK_PERIOD_NS};
use crate::{DeviceError, Result};

/// A device operation recorded by [`SimulatedDevice`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    /// `init_voltages`.
    InitVoltages(Option<f64>),
    /// `asic_init`.
    AsicInit {
        /// Configuration path.
        config: PathBuf,
        /// Analog output column.
        analog_column: Option<u16>,
    },
    /// `enable_pixel`.
    EnablePixel(PixelCoord),
    /// `disable_pixel`.
    DisablePixel(PixelCoord),
    /// `init_injection`.
    InitInjection(Option<f64>),
    /// `start_injection`.
    StartInjection,
    /// `stop_injection`.
    StopInjection,
    /// `enable_spi`.
    EnableSpi,
    /// `dump_fpga`.
    DumpFpga,
    /// `get_readout` with the requested size.
    GetReadout(usize),
    /// `close`.
    Close,
}

#[derive(Debug, Clone)]
enum Scripted {
    Readout(Vec<u8>),
    Fault(String),
}

/// Shape of the simulated beam.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeamProfile {
    /// Probability that a poll finds a particle waiting.
    pub hit_probability: f64,
    /// Probability that a readout is cut short and fails to decode.
    pub corruption_rate: f64,
    /// Largest ToT counter value generated.
    pub max_tot: u16,
    /// Largest ToT counter difference between the column and row crossing.
    pub tot_jitter: u16,
}

impl Default for BeamProfile {
    fn default() -> Self {
        Self {
            hit_probability: 0.2,
            corruption_rate: 0.01,
            max_tot: 1000,
            tot_jitter: 20,
        }
    }
}

impl BeamProfile {
    /// Sets the poll hit probability.
    #[must_use]
    pub fn with_hit_probability(mut self, p: f64) -> Self {
        self.hit_probability = p.clamp(0.0, 1.0);
        self
    }

    /// Sets the corrupted readout rate.
    #[must_use]
    pub fn with_corruption_rate(mut self, p: f64) -> Self {
        self.corruption_rate = p.clamp(0.0, 1.0);
        self
    }
}

/// Seeded generator of single-particle readouts.
///
/// Each particle crosses one enabled pixel and produces a column record and a
/// row record with the same timestamp and nearby ToT.
#[derive(Debug, Clone)]
pub struct BeamGenerator {
    rng: StdRng,
    profile: BeamProfile,
}

impl BeamGenerator {
    /// Creates a generator with a fixed seed.
    #[must_use]
    pub fn new(seed: u64, profile: BeamProfile) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            profile,
        }
    }

    /// Returns true if a particle arrives on this poll.
    pub fn arrives(&mut self) -> bool {
        self.rng.gen_bool(self.profile.hit_probability)
    }

    /// Builds the readout for one particle over an enabled pixel.
    ///
    /// Returns `None` if no pixel is enabled.
    pub fn readout(&mut self, enabled: &BTreeSet<PixelCoord>, size: usize) -> Option<Vec<u8>> {
        let pixel = *enabled.iter().choose(&mut self.rng)?;
        let timestamp = u32::from(self.rng.gen::<u8>());
        let tot = self.rng.gen_range(1..=self.profile.max_tot.clamp(1, 0x0FFF));
        let jitter = self.rng.gen_range(0..=self.profile.tot_jitter);
        let row_tot = tot.saturating_add(jitter).min(0x0FFF);

        let mut bytes = Vec::with_capacity(size.max(10) + 1);
        bytes.extend_from_slice(&encode_hit(&crossing(pixel.col, true, timestamp, tot)));
        bytes.extend_from_slice(&encode_hit(&crossing(pixel.row, false, timestamp, row_tot)));
        if bytes.len() < size {
            bytes.resize(size, IDLE_BYTES[1]);
        }
        if self.rng.gen_bool(self.profile.corruption_rate) {
            // dangling header with no payload bytes behind it
            bytes.push(PAYLOAD_HIT);
        }
        Some(bytes)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn crossing(location: u16, is_col: bool, timestamp: u32, tot_total: u16) -> HitData {
    HitData {
        chip_id: 0,
        payload: PAYLOAD_HIT,
        location,
        is_col,
        timestamp,
        tot_msb: (tot_total >> 8) as u8,
        tot_lsb: (tot_total & 0xFF) as u8,
        tot_total,
        tot_us: f64::from(tot_total) * SAMPLE_CLOCK_PERIOD_NS / 1000.0,
    }
}

/// Chip stand-in driven by a script and an optional beam.
#[derive(Debug, Default)]
pub struct SimulatedDevice {
    geometry: ChipGeometry,
    script: VecDeque<Scripted>,
    beam: Option<BeamGenerator>,
    config: ChipConfig,
    calls: Vec<DeviceCall>,
    injection_ready: bool,
    injecting: bool,
    spi_enabled: bool,
    closed: bool,
}

impl SimulatedDevice {
    /// Creates an idle device with the default geometry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a beam used once the script is drained.
    #[must_use]
    pub fn with_beam(mut self, beam: BeamGenerator) -> Self {
        self.beam = Some(beam);
        self
    }

    /// Sets the pixel matrix.
    #[must_use]
    pub fn with_geometry(mut self, geometry: ChipGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    /// Queues a readout.
    pub fn push_readout(&mut self, bytes: impl Into<Vec<u8>>) {
        self.script.push_back(Scripted::Readout(bytes.into()));
    }

    /// Queues a readout built from crossings.
    pub fn push_crossings(&mut self, hits: &[HitData]) {
        let bytes: Vec<u8> = hits.iter().flat_map(encode_hit).collect();
        self.push_readout(bytes);
    }

    /// Queues a transfer failure.
    pub fn push_fault(&mut self, message: impl Into<String>) {
        self.script.push_back(Scripted::Fault(message.into()));
    }

    /// Scripted entries not yet served.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.len()
    }

    /// Calls received so far, in order.
    #[must_use]
    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    /// Currently enabled pixels.
    #[must_use]
    pub fn enabled_pixels(&self) -> &BTreeSet<PixelCoord> {
        &self.config.enabled_pixels
    }

    /// Returns true while injection is running.
    #[must_use]
    pub fn is_injecting(&self) -> bool {
        self.injecting
    }

    /// Returns true if the SPI readout path is enabled.
    #[must_use]
    pub fn is_spi_enabled(&self) -> bool {
        self.spi_enabled
    }

    /// Returns true until `close` is called.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(DeviceError::NotConnected)
        } else {
            Ok(())
        }
    }

    fn record(&mut self, call: DeviceCall) -> Result<()> {
        self.ensure_open()?;
        self.calls.push(call);
        Ok(())
    }
}

impl Device for SimulatedDevice {
    fn geometry(&self) -> ChipGeometry {
        self.geometry
    }

    fn init_voltages(&mut self, threshold_mv: Option<f64>) -> Result<()> {
        self.record(DeviceCall::InitVoltages(threshold_mv))?;
        self.config.threshold_mv = threshold_mv;
        Ok(())
    }

    fn asic_init(&mut self, config_path: &Path, analog_column: Option<u16>) -> Result<()> {
        self.record(DeviceCall::AsicInit {
            config: config_path.to_path_buf(),
            analog_column,
        })?;

        let mut config = if config_path.exists() {
            ChipConfig::load(config_path)?
        } else {
            warn!(
                "Chip configuration {} not found, starting with all pixels disabled",
                config_path.display()
            );
            ChipConfig {
                name: config_path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                ..ChipConfig::default()
            }
        };
        for &coord in &config.enabled_pixels {
            self.geometry.check(coord)?;
        }
        config.threshold_mv = self.config.threshold_mv;
        config.analog_column = analog_column;
        self.config = config;
        info!(
            "Simulated chip initialised from '{}' with {} pixels enabled",
            self.config.name,
            self.config.enabled_pixels.len()
        );
        Ok(())
    }

    fn enable_pixel(&mut self, coord: PixelCoord) -> Result<()> {
        self.record(DeviceCall::EnablePixel(coord))?;
        self.geometry.check(coord)?;
        self.config.enabled_pixels.insert(coord);
        Ok(())
    }

    fn disable_pixel(&mut self, coord: PixelCoord) -> Result<()> {
        self.record(DeviceCall::DisablePixel(coord))?;
        self.geometry.check(coord)?;
        self.config.enabled_pixels.remove(&coord);
        Ok(())
    }

    fn init_injection(&mut self, voltage_mv: Option<f64>) -> Result<()> {
        self.record(DeviceCall::InitInjection(voltage_mv))?;
        self.config.injection_mv = voltage_mv;
        self.injection_ready = true;
        Ok(())
    }

    fn start_injection(&mut self) -> Result<()> {
        self.record(DeviceCall::StartInjection)?;
        if !self.injection_ready {
            return Err(DeviceError::InvalidState(
                "injection started before init_injection".into(),
            ));
        }
        self.injecting = true;
        Ok(())
    }

    fn stop_injection(&mut self) -> Result<()> {
        self.record(DeviceCall::StopInjection)?;
        self.injecting = false;
        Ok(())
    }

    fn enable_spi(&mut self) -> Result<()> {
        self.record(DeviceCall::EnableSpi)?;
        self.spi_enabled = true;
        Ok(())
    }

    fn dump_fpga(&mut self) -> Result<()> {
        self.record(DeviceCall::DumpFpga)
    }

    fn hits_present(&mut self) -> Result<bool> {
        self.ensure_open()?;
        if !self.script.is_empty() {
            return Ok(true);
        }
        let Some(beam) = self.beam.as_mut() else {
            return Ok(false);
        };
        Ok(!self.config.enabled_pixels.is_empty() && beam.arrives())
    }

    fn get_readout(&mut self, size: usize) -> Result<Vec<u8>> {
        self.record(DeviceCall::GetReadout(size))?;
        let mut bytes = match self.script.pop_front() {
            Some(Scripted::Readout(bytes)) => bytes,
            Some(Scripted::Fault(message)) => return Err(DeviceError::Transfer(message)),
            None => self
                .beam
                .as_mut()
                .and_then(|beam| beam.readout(&self.config.enabled_pixels, size))
                .unwrap_or_default(),
        };
        if bytes.len() < size {
            bytes.resize(size, IDLE_BYTES[1]);
        }
        Ok(bytes)
    }

    fn write_config(&self, path: &Path) -> Result<()> {
        self.ensure_open()?;
        self.config.save(path)?;
        debug!("Chip configuration written to {}", path.display());
        Ok(())
    }

    fn log_header(&self) -> String {
        format!(
            "Simulated AstroPix chip {}x{}\nconfig: {}\nthreshold_mv: {:?}\ninjection_mv: {:?}\nenabled pixels: {}\n",
            self.geometry.cols,
            self.geometry.rows,
            self.config.name,
            self.config.threshold_mv,
            self.config.injection_mv,
            self.config.enabled_pixels.len()
        )
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.calls.push(DeviceCall::Close);
        self.closed = true;
        self.injecting = false;
        Ok(())
    }
}

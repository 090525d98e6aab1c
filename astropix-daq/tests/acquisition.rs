//! End-to-end tests of the acquisition loop against the simulated and replay
//! devices.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use astropix_core::{group_events, ChipGeometry, HitData, HitRecord, PixelCoord};
use astropix_daq::{
    decode_raw_log, AcquisitionConfig, AcquisitionLoop, ErrorPolicy, HitDisplay, InjectionConfig,
    ShutdownStep, Termination,
};
use astropix_device::{
    DecodeError, Device, DeviceCall, RawReadout, ReplayDevice, SimulatedDevice,
};
use astropix_io::{read_raw_log, read_table};

fn hit(location: u16, is_col: bool, timestamp: u32, tot_total: u16) -> HitData {
    HitData {
        chip_id: 0,
        payload: 4,
        location,
        is_col,
        timestamp,
        tot_msb: (tot_total >> 8) as u8,
        tot_lsb: (tot_total & 0xFF) as u8,
        tot_total,
        tot_us: f64::from(tot_total) * 5.0 / 1000.0,
    }
}

fn pair(col: u16, row: u16) -> Vec<HitData> {
    vec![hit(col, true, 10, 400), hit(row, false, 10, 400)]
}

/// Twenty bytes ending in a record header with too few bytes after it.
fn truncated() -> Vec<u8> {
    let mut bytes = vec![0xBC; 17];
    bytes.extend([0x04, 0x83, 0x01]);
    bytes
}

fn config(dir: &Path) -> AcquisitionConfig {
    AcquisitionConfig {
        name: "test".into(),
        ..AcquisitionConfig::default()
    }
    .with_output_dir(dir)
    .with_table(true)
    .without_delays()
}

fn no_cancel() -> AtomicBool {
    AtomicBool::new(false)
}

/// Simulated chip that can stall during setup or label decoded rows with the
/// next readout index.
struct WrappedDevice {
    inner: SimulatedDevice,
    setup_delay: Duration,
    relabel_rows: bool,
}

impl WrappedDevice {
    fn new(inner: SimulatedDevice) -> Self {
        Self {
            inner,
            setup_delay: Duration::ZERO,
            relabel_rows: false,
        }
    }
}

impl Device for WrappedDevice {
    fn geometry(&self) -> ChipGeometry {
        self.inner.geometry()
    }

    fn init_voltages(&mut self, threshold_mv: Option<f64>) -> astropix_device::Result<()> {
        self.inner.init_voltages(threshold_mv)
    }

    fn asic_init(&mut self, config_path: &Path, analog_column: Option<u16>) -> astropix_device::Result<()> {
        std::thread::sleep(self.setup_delay);
        self.inner.asic_init(config_path, analog_column)
    }

    fn enable_pixel(&mut self, coord: PixelCoord) -> astropix_device::Result<()> {
        self.inner.enable_pixel(coord)
    }

    fn disable_pixel(&mut self, coord: PixelCoord) -> astropix_device::Result<()> {
        self.inner.disable_pixel(coord)
    }

    fn init_injection(&mut self, voltage_mv: Option<f64>) -> astropix_device::Result<()> {
        self.inner.init_injection(voltage_mv)
    }

    fn start_injection(&mut self) -> astropix_device::Result<()> {
        self.inner.start_injection()
    }

    fn stop_injection(&mut self) -> astropix_device::Result<()> {
        self.inner.stop_injection()
    }

    fn enable_spi(&mut self) -> astropix_device::Result<()> {
        self.inner.enable_spi()
    }

    fn dump_fpga(&mut self) -> astropix_device::Result<()> {
        self.inner.dump_fpga()
    }

    fn hits_present(&mut self) -> astropix_device::Result<bool> {
        self.inner.hits_present()
    }

    fn get_readout(&mut self, size: usize) -> astropix_device::Result<Vec<u8>> {
        self.inner.get_readout(size)
    }

    fn decode(&self, raw: &RawReadout) -> Result<Vec<HitRecord>, DecodeError> {
        let mut records = self.inner.decode(raw)?;
        if self.relabel_rows {
            for record in &mut records {
                record.readout += 1;
            }
        }
        Ok(records)
    }

    fn write_config(&self, path: &Path) -> astropix_device::Result<()> {
        self.inner.write_config(path)
    }

    fn log_header(&self) -> String {
        self.inner.log_header()
    }

    fn close(&mut self) -> astropix_device::Result<()> {
        self.inner.close()
    }
}

#[test]
fn test_row_groups_match_readouts() {
    let dir = tempfile::tempdir().unwrap();
    let mut device = SimulatedDevice::new();
    device.push_crossings(&pair(3, 7));
    device.push_crossings(&[hit(1, true, 4, 100)]);
    device.push_crossings(&pair(20, 21));

    let mut daq = AcquisitionLoop::open(device, config(dir.path()).with_max_readouts(3)).unwrap();
    let report = daq.run(&no_cancel());

    assert_eq!(report.termination, Termination::RunLimitReached);
    assert_eq!(report.readouts, 3);
    assert_eq!(report.failures, 0);
    assert!(!report.alarm_raised);
    assert_eq!(report.table_rows, Some(5));

    let table = read_table(daq.files().table.as_ref().unwrap()).unwrap();
    let events = group_events(&table.records);
    assert_eq!(events.len(), 3);
    let readouts: Vec<u64> = events.iter().map(|e| e.readout).collect();
    assert_eq!(readouts, vec![0, 1, 2]);
    assert!(table.records.iter().all(|r| r.hittime.is_some()));

    let log = read_raw_log(&daq.files().raw_log).unwrap();
    assert_eq!(log.readouts.len(), 3);
    assert!(log.header[0].starts_with("Simulated AstroPix chip"));
    assert!(log.header.iter().any(|line| line.contains("\"max_errors\":100")));
    assert!(daq.files().final_config.exists());
}

#[test]
fn test_decode_failures_become_placeholders() {
    let dir = tempfile::tempdir().unwrap();
    let mut device = SimulatedDevice::new();
    device.push_crossings(&pair(3, 7));
    for _ in 0..3 {
        device.push_readout(truncated());
    }
    device.push_crossings(&pair(4, 8));

    let config = config(dir.path())
        .with_max_readouts(5)
        .with_error_limit(2, ErrorPolicy::AlarmOnly);
    let mut daq = AcquisitionLoop::open(device, config).unwrap();
    let report = daq.run(&no_cancel());

    assert_eq!(report.termination, Termination::RunLimitReached);
    assert_eq!(report.readouts, 5);
    assert_eq!(report.failures, 3);
    assert!(report.alarm_raised);

    let table = read_table(daq.files().table.as_ref().unwrap()).unwrap();
    let events = group_events(&table.records);
    assert_eq!(events.len(), 5);
    for (readout, event) in (1..4).zip(&events[1..4]) {
        assert_eq!(event.readout, readout);
        assert!(event.is_placeholder());
        assert!(event.records[0].hittime.is_some());
        assert_eq!(event.len(), 1);
    }
    assert!(events[4].is_nominal());
    assert_eq!(table.placeholder_count() as u64, report.failures);
}

#[test]
fn test_mislabelled_rows_count_as_decode_failures() {
    let dir = tempfile::tempdir().unwrap();
    let mut inner = SimulatedDevice::new();
    inner.push_crossings(&pair(3, 7));
    inner.push_crossings(&pair(4, 8));
    let device = WrappedDevice {
        relabel_rows: true,
        ..WrappedDevice::new(inner)
    };

    let mut daq = AcquisitionLoop::open(device, config(dir.path()).with_max_readouts(2)).unwrap();
    let report = daq.run(&no_cancel());

    assert_eq!(report.termination, Termination::RunLimitReached);
    assert_eq!(report.readouts, 2);
    assert_eq!(report.failures, 2);

    let table = read_table(daq.files().table.as_ref().unwrap()).unwrap();
    assert_eq!(table.placeholder_count() as u64, report.failures);
    let readouts: Vec<u64> = table.records.iter().map(|r| r.readout).collect();
    assert_eq!(readouts, vec![0, 1]);

    let log = read_raw_log(&daq.files().raw_log).unwrap();
    assert_eq!(log.readouts.len(), 2);
}

#[test]
fn test_abort_on_exceeded_error_limit() {
    let dir = tempfile::tempdir().unwrap();
    let mut device = SimulatedDevice::new();
    for _ in 0..5 {
        device.push_readout(truncated());
    }

    let config = config(dir.path()).with_error_limit(2, ErrorPolicy::AbortOnExceed);
    let mut daq = AcquisitionLoop::open(device, config).unwrap();
    let report = daq.run(&no_cancel());

    assert_eq!(report.termination, Termination::ErrorLimitExceeded);
    assert_eq!(report.failures, 3);
    assert_eq!(report.readouts, 3);
    assert_eq!(report.table_rows, Some(3));
    assert_eq!(daq.device().remaining(), 2);
}

#[test]
fn test_cancel_flag_stops_before_first_readout() {
    let dir = tempfile::tempdir().unwrap();
    let mut device = SimulatedDevice::new();
    device.push_crossings(&pair(3, 7));

    let mut daq = AcquisitionLoop::open(device, config(dir.path())).unwrap();
    let report = daq.run(&AtomicBool::new(true));

    assert_eq!(report.termination, Termination::UserCancelled);
    assert_eq!(report.readouts, 0);
    assert_eq!(
        report.shutdown,
        vec![
            ShutdownStep::FlushTable,
            ShutdownStep::CloseLog,
            ShutdownStep::CloseDevice
        ]
    );
    assert!(!daq.device().is_connected());
    assert_eq!(daq.device().remaining(), 1);
}

#[test]
fn test_time_limit() {
    let dir = tempfile::tempdir().unwrap();
    let config = AcquisitionConfig {
        max_minutes: Some(0.0),
        ..config(dir.path())
    };
    let mut daq = AcquisitionLoop::open(SimulatedDevice::new(), config).unwrap();
    let report = daq.run(&no_cancel());
    assert_eq!(report.termination, Termination::TimeLimitReached);
    assert_eq!(report.readouts, 0);
}

#[test]
fn test_time_limit_starts_after_setup() {
    let dir = tempfile::tempdir().unwrap();
    let mut inner = SimulatedDevice::new();
    inner.push_crossings(&pair(3, 7));
    inner.push_crossings(&pair(4, 8));
    let device = WrappedDevice {
        setup_delay: Duration::from_millis(300),
        ..WrappedDevice::new(inner)
    };
    let config = AcquisitionConfig {
        // 100 ms, shorter than the setup stall
        max_minutes: Some(0.1 / 60.0),
        ..config(dir.path())
    };

    let mut daq = AcquisitionLoop::open(device, config).unwrap();
    let report = daq.run(&no_cancel());
    assert_eq!(report.termination, Termination::TimeLimitReached);
    assert_eq!(report.readouts, 2);
}

#[test]
fn test_injection_setup_and_shutdown_order() {
    let dir = tempfile::tempdir().unwrap();
    let pixel = PixelCoord::new(2, 3);
    let config = AcquisitionConfig {
        injection: Some(InjectionConfig {
            pixel,
            voltage_mv: Some(300.0),
        }),
        threshold_mv: Some(150.0),
        ..config(dir.path()).with_max_readouts(0)
    };
    let mut daq = AcquisitionLoop::open(SimulatedDevice::new(), config).unwrap();
    let report = daq.run(&no_cancel());

    assert_eq!(report.termination, Termination::RunLimitReached);
    assert_eq!(
        report.shutdown,
        vec![
            ShutdownStep::FlushTable,
            ShutdownStep::StopInjection,
            ShutdownStep::CloseLog,
            ShutdownStep::CloseDevice
        ]
    );

    assert!(daq.files().final_config.exists());
    let device = daq.device();
    assert!(!device.is_injecting());
    assert_eq!(
        device.calls(),
        &[
            DeviceCall::InitVoltages(Some(150.0)),
            DeviceCall::AsicInit {
                config: "config/testconfig_v3.json".into(),
                analog_column: Some(0),
            },
            DeviceCall::EnablePixel(pixel),
            DeviceCall::InitInjection(Some(300.0)),
            DeviceCall::EnableSpi,
            DeviceCall::DumpFpga,
            DeviceCall::StartInjection,
            DeviceCall::StopInjection,
            DeviceCall::Close,
        ][..]
    );
}

#[test]
fn test_transfer_fault_still_shuts_down() {
    let dir = tempfile::tempdir().unwrap();
    let mut device = SimulatedDevice::new();
    device.push_crossings(&pair(3, 7));
    device.push_fault("usb link lost");

    let mut daq = AcquisitionLoop::open(device, config(dir.path())).unwrap();
    let report = daq.run(&no_cancel());

    match &report.termination {
        Termination::Fatal(message) => assert!(message.contains("usb link lost")),
        other => panic!("expected a fatal termination, got {other:?}"),
    }
    assert_eq!(report.readouts, 1);
    assert_eq!(report.table_rows, Some(2));
    assert!(report.shutdown_error.is_none());
    assert!(!daq.device().is_connected());

    assert!(daq.shutdown().is_ok());
    let log = read_raw_log(&daq.files().raw_log).unwrap();
    assert_eq!(log.readouts.len(), 1);
}

#[test]
fn test_noise_mask_applied_after_setup() {
    let dir = tempfile::tempdir().unwrap();
    let summary = dir.path().join("noise_scan_summary_chip0.csv");
    std::fs::write(&summary, "col,row,count\n0,0,5\n1,1,0\n2,2,12\n").unwrap();

    let config = AcquisitionConfig {
        noise_summary: Some(summary),
        noise_threshold: 4,
        ..config(dir.path()).with_max_readouts(0)
    };
    let mut daq = AcquisitionLoop::open(SimulatedDevice::new(), config).unwrap();
    assert_eq!(daq.mask().unwrap().masked_count(), 2);
    daq.run(&no_cancel());

    let device = daq.device();
    let calls = device.calls();
    let dump = calls.iter().position(|c| *c == DeviceCall::DumpFpga).unwrap();
    assert_eq!(
        &calls[dump + 1..dump + 4],
        &[
            DeviceCall::DisablePixel(PixelCoord::new(0, 0)),
            DeviceCall::EnablePixel(PixelCoord::new(1, 1)),
            DeviceCall::DisablePixel(PixelCoord::new(2, 2)),
        ]
    );
    assert!(device.enabled_pixels().contains(&PixelCoord::new(1, 1)));
    assert!(!device.enabled_pixels().contains(&PixelCoord::new(2, 2)));
}

#[test]
fn test_missing_noise_summary_fails_before_any_output() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let config = AcquisitionConfig {
        noise_summary: Some(dir.path().join("missing.csv")),
        ..config(&out)
    };
    assert!(AcquisitionLoop::open(SimulatedDevice::new(), config).is_err());
    assert!(!out.exists());
}

struct Recorder(Rc<RefCell<Vec<(u64, Vec<u16>, Vec<u16>)>>>);

impl HitDisplay for Recorder {
    fn show_event(&mut self, readout: u64, cols: &[u16], rows: &[u16]) {
        self.0.borrow_mut().push((readout, cols.to_vec(), rows.to_vec()));
    }
}

#[test]
fn test_display_shows_nominal_events_only() {
    let dir = tempfile::tempdir().unwrap();
    let mut device = SimulatedDevice::new();
    device.push_crossings(&pair(3, 7));
    device.push_readout(truncated());
    device.push_crossings(&[hit(5, true, 1, 10), hit(6, true, 1, 10), hit(9, false, 1, 10)]);

    let shown = Rc::new(RefCell::new(Vec::new()));
    let config = AcquisitionConfig {
        show_hits: true,
        ..config(dir.path()).with_max_readouts(3)
    };
    let mut daq = AcquisitionLoop::open(device, config)
        .unwrap()
        .with_display(Box::new(Recorder(Rc::clone(&shown))));
    daq.run(&no_cancel());

    assert_eq!(
        *shown.borrow(),
        vec![(0, vec![3], vec![7]), (2, vec![5, 6], vec![9])]
    );
}

#[test]
fn test_replay_reproduces_table() {
    let dir = tempfile::tempdir().unwrap();
    let mut device = SimulatedDevice::new();
    device.push_crossings(&pair(3, 7));
    device.push_readout(truncated());
    device.push_crossings(&pair(11, 12));

    let first = dir.path().join("first");
    let mut daq = AcquisitionLoop::open(device, config(&first).with_max_readouts(3)).unwrap();
    daq.run(&no_cancel());
    let files = daq.files().clone();
    drop(daq);

    let log = read_raw_log(&files.raw_log).unwrap();
    let replay = ReplayDevice::new(files.raw_log.display().to_string(), log.readouts);
    let second = dir.path().join("second");
    let mut daq = AcquisitionLoop::open(replay, config(&second).with_max_readouts(3)).unwrap();
    let report = daq.run(&no_cancel());
    assert_eq!(report.readouts, 3);
    assert_eq!(report.failures, 1);
    assert_eq!(daq.device().remaining(), 0);

    let original = read_table(files.table.as_ref().unwrap()).unwrap();
    let replayed = read_table(daq.files().table.as_ref().unwrap()).unwrap();
    assert_eq!(original.records.len(), replayed.records.len());
    for (a, b) in original.records.iter().zip(&replayed.records) {
        assert_eq!(a.readout, b.readout);
        assert_eq!(a.hit, b.hit);
    }

    let offline = decode_raw_log(&files.raw_log, Some(dir.path()), ChipGeometry::default()).unwrap();
    assert_eq!(offline.rows, original.records.len());
    assert_eq!(offline.failures, 1);
    let decoded = read_table(&offline.table_path).unwrap();
    assert!(decoded.records.iter().all(|r| r.hittime.is_some()));
    assert_eq!(decoded.placeholder_count(), offline.failures);
}

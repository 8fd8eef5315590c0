//! 链路集成测试基础设施
//!
//! 用 Mock 设备 + 记录型协作方搭建 `LinkManager`，时序参数按比例缩短。

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use usbgps_driver::{
    ClockSetter, DiagnosticsSink, DisableReason, Fix, LinkConfig, LinkEvent, LinkManager,
    LinkManagerBuilder, LinkState, LinkTimings, LocationSink, LocationStatus,
};
use usbgps_usb::mock::{MockDevice, MockTransport};

pub const VID: u16 = 0x1546;
pub const PID: u16 = 0x01A8;

/// 一个完整历元（GGA + RMC）
pub const EPOCH: &[u8] = b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n\
$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n";

pub fn fast_timings() -> LinkTimings {
    LinkTimings {
        dwell_ms: 40,
        grace_ms: 300,
        idle_timeout_ms: 120,
        retry_delay_ms: 30,
        read_timeout_ms: 10,
        io_error_pause_ms: 5,
        write_timeout_ms: 100,
        shutdown_timeout_ms: 1_000,
    }
}

pub fn fast_config(max_retries: u32) -> LinkConfig {
    LinkConfig {
        vendor_id: VID,
        product_id: PID,
        max_retries,
        timings: fast_timings(),
        ..LinkConfig::default()
    }
}

#[derive(Default)]
pub struct RecordingLocation {
    pub status: Mutex<LocationStatus>,
    pub fixes: Mutex<Vec<Fix>>,
    pub out_of_service: Mutex<u32>,
}

impl LocationSink for RecordingLocation {
    fn status(&self) -> LocationStatus {
        *self.status.lock()
    }

    fn report_fix(&self, fix: &Fix) {
        self.fixes.lock().push(fix.clone());
    }

    fn out_of_service(&self) {
        *self.out_of_service.lock() += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    Retrying(DisableReason, u32),
    Cleared,
    Fatal(DisableReason),
}

#[derive(Default)]
pub struct RecordingDiagnostics {
    pub log: Mutex<Vec<Diagnostic>>,
}

impl RecordingDiagnostics {
    pub fn count(&self, pred: impl Fn(&Diagnostic) -> bool) -> usize {
        self.log.lock().iter().filter(|d| pred(d)).count()
    }
}

impl DiagnosticsSink for RecordingDiagnostics {
    fn retrying(&self, reason: DisableReason, remaining: u32) {
        self.log.lock().push(Diagnostic::Retrying(reason, remaining));
    }

    fn problem_cleared(&self) {
        self.log.lock().push(Diagnostic::Cleared);
    }

    fn fatal_stop(&self, reason: DisableReason) {
        self.log.lock().push(Diagnostic::Fatal(reason));
    }
}

#[derive(Default)]
pub struct RecordingClock {
    pub times: Mutex<Vec<u64>>,
}

impl ClockSetter for RecordingClock {
    fn set_time(&self, timestamp_ms: u64) {
        self.times.lock().push(timestamp_ms);
    }
}

pub struct Harness {
    pub transport: Arc<MockTransport>,
    pub device: Arc<MockDevice>,
    pub location: Arc<RecordingLocation>,
    pub diagnostics: Arc<RecordingDiagnostics>,
    pub clock: Arc<RecordingClock>,
    pub events: Arc<Mutex<Vec<LinkEvent>>>,
    pub manager: LinkManager,
}

impl Harness {
    /// 已插入一个设备（尚未设置输出）
    pub fn new() -> Self {
        let transport = MockTransport::new();
        let device = MockDevice::new(VID, PID);
        transport.add_device(device.clone());
        Self::with_transport(transport, device)
    }

    pub fn with_transport(transport: Arc<MockTransport>, device: Arc<MockDevice>) -> Self {
        let location = Arc::new(RecordingLocation::default());
        let diagnostics = Arc::new(RecordingDiagnostics::default());
        let clock = Arc::new(RecordingClock::default());
        let manager = LinkManagerBuilder::new()
            .backend(transport.clone())
            .location_sink(location.clone())
            .diagnostics_sink(diagnostics.clone())
            .clock_setter(clock.clone())
            .build()
            .expect("mock backend always builds");

        let events = Arc::new(Mutex::new(Vec::new()));
        {
            let events = events.clone();
            manager.register_event_listener(Arc::new(move |event: &LinkEvent| {
                events.lock().push(*event);
            }));
        }

        Self {
            transport,
            device,
            location,
            diagnostics,
            clock,
            events,
            manager,
        }
    }

    /// 设备以固定周期输出一个历元
    pub fn produce(&self, live_speed: Option<u32>) {
        self.device.set_output(EPOCH.to_vec(), Duration::from_millis(5));
        self.device.set_live_speed(live_speed);
    }

    pub fn wait_for_state(&self, expected: LinkState, timeout: Duration) -> bool {
        wait_until(timeout, || self.manager.state() == expected)
    }

    pub fn state_changes(&self) -> Vec<LinkState> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                LinkEvent::StateChanged(state) => Some(*state),
                _ => None,
            })
            .collect()
    }
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

//! Mock 传输
//!
//! 用于测试的内存设备：只在指定线速率下周期性输出一段字节，记录所有写入与控制请求，
//! 可以注入打开失败、读错误、授权拒绝和拔出。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::serial::{ControlRequest, SerialChip};
use crate::{
    Connection, DeviceError, DeviceErrorKind, DeviceProvider, PermissionCallback,
    PermissionResult, Transport, TransportError, UsbDeviceInfo,
};

/// 一次被记录的写入
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockWrite {
    pub bytes: Vec<u8>,
    /// 写入时连接的线速率
    pub line_speed: Option<u32>,
    /// 写入时设备是否正在输出数据
    pub device_live: bool,
}

#[derive(Debug)]
struct DeviceScript {
    output: Vec<u8>,
    interval: Duration,
    /// `None` 表示任何线速率下都输出
    live_speed: Option<u32>,
}

/// 模拟 GPS 设备
#[derive(Debug)]
pub struct MockDevice {
    info: UsbDeviceInfo,
    script: Mutex<DeviceScript>,
    producing: AtomicBool,
    attached: AtomicBool,
    permission: AtomicBool,
    failing_opens: AtomicU32,
    read_errors: AtomicU32,
    opens: AtomicU32,
    writes: Mutex<Vec<MockWrite>>,
    controls: Mutex<Vec<ControlRequest>>,
    speeds: Mutex<Vec<u32>>,
}

impl MockDevice {
    pub fn new(vendor_id: u16, product_id: u16) -> Arc<Self> {
        Arc::new(Self {
            info: UsbDeviceInfo::new(vendor_id, product_id, 1, 1),
            script: Mutex::new(DeviceScript {
                output: Vec::new(),
                interval: Duration::from_millis(100),
                live_speed: None,
            }),
            producing: AtomicBool::new(true),
            attached: AtomicBool::new(true),
            permission: AtomicBool::new(true),
            failing_opens: AtomicU32::new(0),
            read_errors: AtomicU32::new(0),
            opens: AtomicU32::new(0),
            writes: Mutex::new(Vec::new()),
            controls: Mutex::new(Vec::new()),
            speeds: Mutex::new(Vec::new()),
        })
    }

    pub fn info(&self) -> UsbDeviceInfo {
        self.info
    }

    /// 设置每个周期输出的字节
    pub fn set_output(&self, output: impl Into<Vec<u8>>, interval: Duration) {
        let mut script = self.script.lock();
        script.output = output.into();
        script.interval = interval;
    }

    /// 只在该线速率下输出（`None` = 任意速率）
    pub fn set_live_speed(&self, speed: Option<u32>) {
        self.script.lock().live_speed = speed;
    }

    pub fn stop_producing(&self) {
        self.producing.store(false, Ordering::SeqCst);
    }

    pub fn resume_producing(&self) {
        self.producing.store(true, Ordering::SeqCst);
    }

    pub fn set_permission(&self, granted: bool) {
        self.permission.store(granted, Ordering::SeqCst);
    }

    /// 接下来 `count` 次打开失败
    pub fn fail_next_opens(&self, count: u32) {
        self.failing_opens.store(count, Ordering::SeqCst);
    }

    /// 接下来 `count` 次读取返回 IO 错误
    pub fn inject_read_errors(&self, count: u32) {
        self.read_errors.store(count, Ordering::SeqCst);
    }

    /// 模拟拔出：之后的读写返回 `NoDevice`
    pub fn unplug(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<MockWrite> {
        self.writes.lock().clone()
    }

    pub fn control_requests(&self) -> Vec<ControlRequest> {
        self.controls.lock().clone()
    }

    /// 按顺序记录的所有线速率设置
    pub fn applied_speeds(&self) -> Vec<u32> {
        self.speeds.lock().clone()
    }

    fn is_live_at(&self, speed: Option<u32>) -> bool {
        if !self.producing.load(Ordering::SeqCst) {
            return false;
        }
        let script = self.script.lock();
        if script.output.is_empty() {
            return false;
        }
        match script.live_speed {
            None => true,
            Some(live) => speed == Some(live),
        }
    }

    fn take_counter(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn no_device() -> TransportError {
        DeviceError::new(DeviceErrorKind::NoDevice, "mock device unplugged").into()
    }
}

#[derive(Debug)]
struct ConnState {
    closed: bool,
    line_speed: Option<u32>,
    next_emit: Option<Instant>,
    pending: Vec<u8>,
}

/// Mock 设备连接
#[derive(Debug)]
pub struct MockConnection {
    device: Arc<MockDevice>,
    state: Mutex<ConnState>,
    wake: Condvar,
}

impl Connection for MockConnection {
    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(TransportError::Closed);
            }
            if !self.device.attached.load(Ordering::SeqCst) {
                return Err(MockDevice::no_device());
            }
            if MockDevice::take_counter(&self.device.read_errors) {
                return Err(std::io::Error::other("injected read error").into());
            }

            if !state.pending.is_empty() {
                let n = buf.len().min(state.pending.len());
                buf[..n].copy_from_slice(&state.pending[..n]);
                state.pending.drain(..n);
                return Ok(n);
            }

            let now = Instant::now();
            let mut wake_at = deadline;
            if self.device.is_live_at(state.line_speed) {
                let (output, interval) = {
                    let script = self.device.script.lock();
                    (script.output.clone(), script.interval)
                };
                match state.next_emit {
                    Some(at) if now >= at => {
                        state.pending = output;
                        state.next_emit = Some(now + interval);
                        continue;
                    },
                    Some(at) => wake_at = wake_at.min(at),
                    None => {
                        state.next_emit = Some(now + interval);
                        wake_at = wake_at.min(now + interval);
                    },
                }
            } else {
                state.next_emit = None;
                // 轮询设备脚本变化
                wake_at = wake_at.min(now + Duration::from_millis(10));
            }

            if now >= deadline {
                return Err(TransportError::Timeout);
            }
            self.wake.wait_until(&mut state, wake_at);
        }
    }

    fn write(&self, data: &[u8], _timeout: Duration) -> Result<usize, TransportError> {
        let state = self.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        if !self.device.attached.load(Ordering::SeqCst) {
            return Err(MockDevice::no_device());
        }
        let live = self.device.is_live_at(state.line_speed);
        self.device.writes.lock().push(MockWrite {
            bytes: data.to_vec(),
            line_speed: state.line_speed,
            device_live: live,
        });
        Ok(data.len())
    }

    fn control_transfer(&self, request: &ControlRequest) -> Result<usize, TransportError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        self.device.controls.lock().push(request.clone());
        if let Some(speed) = request.line_speed() {
            state.line_speed = Some(speed);
            state.next_emit = None;
            state.pending.clear();
            self.device.speeds.lock().push(speed);
        }
        Ok(request.data.len())
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.wake.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn chip(&self) -> SerialChip {
        self.device.info.chip
    }
}

/// Mock 传输 + 设备提供者
#[derive(Debug, Default)]
pub struct MockTransport {
    devices: Mutex<Vec<Arc<MockDevice>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_device(&self, device: Arc<MockDevice>) {
        self.devices.lock().push(device);
    }

    pub fn remove_device(&self, info: &UsbDeviceInfo) {
        self.devices.lock().retain(|d| d.info != *info);
    }

    fn get(&self, info: &UsbDeviceInfo) -> Option<Arc<MockDevice>> {
        self.devices.lock().iter().find(|d| d.info == *info).cloned()
    }
}

impl DeviceProvider for MockTransport {
    fn devices(&self) -> Result<Vec<UsbDeviceInfo>, TransportError> {
        Ok(self
            .devices
            .lock()
            .iter()
            .filter(|d| d.attached.load(Ordering::SeqCst))
            .map(|d| d.info)
            .collect())
    }

    fn has_permission(&self, device: &UsbDeviceInfo) -> bool {
        self.get(device)
            .map(|d| d.permission.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// 在独立线程上回调，模拟平台的异步授权对话框
    fn request_permission(&self, device: &UsbDeviceInfo, callback: PermissionCallback) {
        let granted = self.has_permission(device);
        let spawned = std::thread::Builder::new()
            .name("mock-permission".into())
            .spawn(move || {
                callback(if granted {
                    PermissionResult::Granted
                } else {
                    PermissionResult::Denied
                })
            });
        if let Err(e) = spawned {
            tracing::error!("Failed to spawn mock permission thread: {}", e);
        }
    }
}

impl Transport for MockTransport {
    fn open(&self, info: &UsbDeviceInfo) -> Result<Arc<dyn Connection>, TransportError> {
        let device = self.get(info).ok_or_else(|| {
            DeviceError::new(DeviceErrorKind::NotFound, format!("mock device {info} not found"))
        })?;
        device.opens.fetch_add(1, Ordering::SeqCst);
        if !device.attached.load(Ordering::SeqCst) {
            return Err(MockDevice::no_device());
        }
        if MockDevice::take_counter(&device.failing_opens) {
            return Err(DeviceError::new(DeviceErrorKind::Busy, "injected open failure").into());
        }
        Ok(Arc::new(MockConnection {
            device,
            state: Mutex::new(ConnState {
                closed: false,
                line_speed: None,
                next_emit: None,
                pending: Vec::new(),
            }),
            wake: Condvar::new(),
        }))
    }
}

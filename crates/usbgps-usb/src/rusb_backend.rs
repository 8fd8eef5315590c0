//! 基于 libusb（rusb）的传输实现
//!
//! 桌面系统上没有授权对话框：能打开设备即视为已授权。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rusb::{DeviceHandle, GlobalContext};
use tracing::{debug, trace, warn};

use crate::endpoints::{BulkEndpoints, EndpointDesc, EndpointDirection, TransferKind, select_bulk_endpoints};
use crate::serial::{ControlRequest, SerialChip};
use crate::{
    Connection, DeviceError, DeviceErrorKind, DeviceProvider, PermissionCallback,
    PermissionResult, Transport, TransportError, UsbDeviceInfo,
};

/// 控制传输超时
const CONTROL_TIMEOUT: Duration = Duration::from_millis(1000);

/// CDC 通信接口类
const CLASS_CDC_COMM: u8 = 0x02;

/// 把 rusb 错误映射为结构化传输错误
fn map_usb_error(err: rusb::Error) -> TransportError {
    let kind = match err {
        rusb::Error::Timeout => return TransportError::Timeout,
        rusb::Error::NoDevice => DeviceErrorKind::NoDevice,
        rusb::Error::Access => DeviceErrorKind::AccessDenied,
        rusb::Error::NotFound => DeviceErrorKind::NotFound,
        rusb::Error::Busy => DeviceErrorKind::Busy,
        rusb::Error::NotSupported => DeviceErrorKind::UnsupportedConfig,
        _ => DeviceErrorKind::Backend,
    };
    TransportError::Device(DeviceError::new(kind, err.to_string()))
}

fn convert_endpoint(endpoint: &rusb::EndpointDescriptor<'_>) -> EndpointDesc {
    let direction = match endpoint.direction() {
        rusb::Direction::In => EndpointDirection::In,
        rusb::Direction::Out => EndpointDirection::Out,
    };
    let kind = match endpoint.transfer_type() {
        rusb::TransferType::Control => TransferKind::Control,
        rusb::TransferType::Isochronous => TransferKind::Isochronous,
        rusb::TransferType::Bulk => TransferKind::Bulk,
        rusb::TransferType::Interrupt => TransferKind::Interrupt,
    };
    EndpointDesc::new(endpoint.address(), direction, kind)
}

/// 从配置描述符中找出数据接口、控制接口和批量端点
struct InterfaceLayout {
    data_interface: u8,
    control_interface: u8,
    endpoints: BulkEndpoints,
}

fn resolve_layout(config: &rusb::ConfigDescriptor) -> Option<InterfaceLayout> {
    let mut data = None;
    let mut comm = None;

    for interface in config.interfaces() {
        for desc in interface.descriptors() {
            if desc.class_code() == CLASS_CDC_COMM && comm.is_none() {
                comm = Some(desc.interface_number());
            }
            if data.is_none() {
                let endpoints: Vec<EndpointDesc> =
                    desc.endpoint_descriptors().map(|ep| convert_endpoint(&ep)).collect();
                if let Some(selected) = select_bulk_endpoints(&endpoints) {
                    data = Some((desc.interface_number(), selected));
                }
            }
        }
    }

    let (data_interface, endpoints) = data?;
    Some(InterfaceLayout {
        data_interface,
        control_interface: comm.unwrap_or(data_interface),
        endpoints,
    })
}

/// libusb 传输 + 设备枚举
#[derive(Debug, Default, Clone, Copy)]
pub struct RusbTransport;

impl RusbTransport {
    pub fn new() -> Self {
        Self
    }

    fn locate(device: &UsbDeviceInfo) -> Result<rusb::Device<GlobalContext>, TransportError> {
        for candidate in rusb::devices().map_err(map_usb_error)?.iter() {
            if candidate.bus_number() != device.bus || candidate.address() != device.address {
                continue;
            }
            let desc = candidate.device_descriptor().map_err(map_usb_error)?;
            if desc.vendor_id() == device.vendor_id && desc.product_id() == device.product_id {
                return Ok(candidate);
            }
        }
        Err(DeviceError::new(DeviceErrorKind::NotFound, format!("device {device} not attached")).into())
    }
}

impl DeviceProvider for RusbTransport {
    fn devices(&self) -> Result<Vec<UsbDeviceInfo>, TransportError> {
        let mut devices = Vec::new();
        for device in rusb::devices().map_err(map_usb_error)?.iter() {
            let desc = match device.device_descriptor() {
                Ok(desc) => desc,
                Err(_) => continue,
            };
            devices.push(UsbDeviceInfo::new(
                desc.vendor_id(),
                desc.product_id(),
                device.bus_number(),
                device.address(),
            ));
        }
        Ok(devices)
    }

    fn has_permission(&self, device: &UsbDeviceInfo) -> bool {
        match Self::locate(device).and_then(|d| d.open().map_err(map_usb_error)) {
            Ok(_) => true,
            Err(e) => {
                trace!("Permission probe for {} failed: {}", device, e);
                false
            },
        }
    }

    fn request_permission(&self, device: &UsbDeviceInfo, callback: PermissionCallback) {
        let result = if self.has_permission(device) {
            PermissionResult::Granted
        } else {
            PermissionResult::Denied
        };
        callback(result);
    }
}

impl Transport for RusbTransport {
    fn open(&self, device: &UsbDeviceInfo) -> Result<Arc<dyn Connection>, TransportError> {
        let usb_device = Self::locate(device)?;
        let config = usb_device.active_config_descriptor().map_err(map_usb_error)?;
        let layout = resolve_layout(&config).ok_or_else(|| {
            DeviceError::new(DeviceErrorKind::UnsupportedConfig, "no bulk IN/OUT endpoint pair")
        })?;
        let mut handle = usb_device.open().map_err(map_usb_error)?;

        let mut claimed = vec![layout.data_interface];
        if layout.control_interface != layout.data_interface {
            claimed.push(layout.control_interface);
        }

        for &interface in &claimed {
            // Linux/macOS 上需要先卸载内核驱动（cdc_acm / cp210x）
            #[cfg(any(target_os = "linux", target_os = "macos"))]
            {
                if handle.kernel_driver_active(interface).unwrap_or(false) {
                    handle.detach_kernel_driver(interface).map_err(map_usb_error)?;
                }
            }
            handle.claim_interface(interface).map_err(map_usb_error)?;
        }

        for endpoint in [layout.endpoints.endpoint_in, layout.endpoints.endpoint_out] {
            if let Err(e) = handle.clear_halt(endpoint) {
                trace!("Failed to clear halt on endpoint 0x{:02x}: {}", endpoint, e);
            }
        }

        let connection = RusbConnection {
            handle,
            claimed,
            endpoints: layout.endpoints,
            control_interface: layout.control_interface as u16,
            chip: device.chip,
            closed: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        };

        for request in device.chip.open_requests(connection.control_interface) {
            connection.control_transfer(&request)?;
        }

        debug!(
            "Opened {} (in=0x{:02x}, out=0x{:02x}, control interface {})",
            device,
            layout.endpoints.endpoint_in,
            layout.endpoints.endpoint_out,
            layout.control_interface
        );
        Ok(Arc::new(connection))
    }
}

/// libusb 设备连接
///
/// 接口在 `Drop` 时释放；`close()` 只置位标志，读循环在下一个读超时内看到它。
pub struct RusbConnection {
    handle: DeviceHandle<GlobalContext>,
    claimed: Vec<u8>,
    endpoints: BulkEndpoints,
    control_interface: u16,
    chip: SerialChip,
    closed: AtomicBool,
    /// 串行化写入，保证命令字节不交错
    write_lock: Mutex<()>,
}

impl RusbConnection {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Connection for RusbConnection {
    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        self.ensure_open()?;
        let result = self.handle.read_bulk(self.endpoints.endpoint_in, buf, timeout);
        // 读期间被关闭：丢弃结果
        self.ensure_open()?;
        result.map_err(map_usb_error)
    }

    fn write(&self, data: &[u8], timeout: Duration) -> Result<usize, TransportError> {
        let _guard = self.write_lock.lock();
        self.ensure_open()?;
        let mut written = 0;
        while written < data.len() {
            match self.handle.write_bulk(self.endpoints.endpoint_out, &data[written..], timeout) {
                Ok(n) => written += n,
                Err(rusb::Error::Timeout) => {
                    // 超时后端点可能进入 STALL 状态
                    if let Err(e) = self.handle.clear_halt(self.endpoints.endpoint_out) {
                        warn!("Failed to clear endpoint halt after timeout: {}", e);
                    }
                    return Err(TransportError::Timeout);
                },
                Err(e) => return Err(map_usb_error(e)),
            }
        }
        Ok(written)
    }

    fn control_transfer(&self, request: &ControlRequest) -> Result<usize, TransportError> {
        self.ensure_open()?;
        self.handle
            .write_control(
                request.request_type,
                request.request,
                request.value,
                request.index,
                &request.data,
                CONTROL_TIMEOUT,
            )
            .map_err(map_usb_error)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            trace!("USB connection closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn chip(&self) -> SerialChip {
        self.chip
    }

    fn control_interface(&self) -> u16 {
        self.control_interface
    }
}

impl Drop for RusbConnection {
    fn drop(&mut self) {
        // 忽略错误：设备可能已经拔出
        for &interface in &self.claimed {
            let _ = self.handle.release_interface(interface);
        }
        trace!("[Release] USB interfaces released");
    }
}

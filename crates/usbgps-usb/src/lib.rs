//! # USB GPS Transport Layer
//!
//! USB 串口传输抽象层：GPS 接收机通过 USB 批量端点收发字节流，
//! 通过控制传输设置串口线速率。
//!
//! ## 模块
//!
//! - `serial`: 串口芯片识别与线速率控制请求（CDC-ACM / CP210x）
//! - `endpoints`: 批量端点选择
//! - `rusb_backend`: 基于 libusb 的实现（feature `rusb`）
//! - `mock`: 内存中的可编程设备（feature `mock`，仅用于测试）
//!
//! ## 契约
//!
//! 核心只依赖三个 trait：[`DeviceProvider`]（枚举与授权）、[`Transport`]（打开设备）
//! 和 [`Connection`]（读、写、控制传输、关闭）。`Connection` 的所有方法都接受 `&self`，
//! 读线程、写线程和关闭方可以共享同一个连接。

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod endpoints;
pub mod serial;

#[cfg(feature = "rusb")]
pub mod rusb_backend;

#[cfg(feature = "mock")]
pub mod mock;

pub use endpoints::{BulkEndpoints, EndpointDesc, EndpointDirection, TransferKind, select_bulk_endpoints};
pub use serial::{ControlRequest, LineCoding, SerialChip};

#[cfg(feature = "rusb")]
pub use rusb_backend::{RusbConnection, RusbTransport};

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] DeviceError),
    #[error("Read timeout")]
    Timeout,
    #[error("Connection closed")]
    Closed,
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }

    /// 设备已拔出 / 无权限等无法通过重试恢复的错误
    pub fn is_fatal(&self) -> bool {
        match self {
            TransportError::Device(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    Unknown,
    NotFound,
    NoDevice,
    AccessDenied,
    Busy,
    UnsupportedConfig,
    InvalidResponse,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct DeviceError {
    pub kind: DeviceErrorKind,
    pub message: String,
}

impl DeviceError {
    pub fn new(kind: DeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            DeviceErrorKind::NoDevice | DeviceErrorKind::AccessDenied | DeviceErrorKind::NotFound
        )
    }
}

impl From<String> for DeviceError {
    fn from(message: String) -> Self {
        Self::new(DeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for DeviceError {
    fn from(message: &str) -> Self {
        Self::new(DeviceErrorKind::Unknown, message)
    }
}

/// 已连接的 USB 设备描述
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsbDeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus: u8,
    pub address: u8,
    pub chip: SerialChip,
}

impl UsbDeviceInfo {
    pub fn new(vendor_id: u16, product_id: u16, bus: u8, address: u8) -> Self {
        Self {
            vendor_id,
            product_id,
            bus,
            address,
            chip: SerialChip::detect(vendor_id),
        }
    }

    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl std::fmt::Display for UsbDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} (bus {:03} addr {:03}, {})",
            self.vendor_id, self.product_id, self.bus, self.address, self.chip
        )
    }
}

/// 一个已打开的设备连接
///
/// # 线程安全
///
/// 读循环、写入方和关闭方通常位于不同线程，因此所有方法只需要 `&self`。
/// `close()` 必须是幂等的，并保证阻塞中的 `read()` 在一个读超时内返回
/// [`TransportError::Closed`]。
pub trait Connection: Send + Sync {
    /// 从批量 IN 端点读取，超时返回 [`TransportError::Timeout`]
    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    /// 向批量 OUT 端点写入
    fn write(&self, data: &[u8], timeout: Duration) -> Result<usize, TransportError>;

    /// 执行一次控制 OUT 传输
    fn control_transfer(&self, request: &ControlRequest) -> Result<usize, TransportError>;

    fn close(&self);

    fn is_closed(&self) -> bool;

    /// 串口芯片类型（决定线速率请求的格式）
    fn chip(&self) -> SerialChip;

    /// 控制请求使用的接口号
    fn control_interface(&self) -> u16 {
        0
    }
}

/// 打开设备
pub trait Transport: Send + Sync {
    fn open(&self, device: &UsbDeviceInfo) -> Result<Arc<dyn Connection>, TransportError>;
}

/// 授权请求结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionResult {
    Granted,
    Denied,
}

/// 授权回调（可能在任意线程上被调用）
pub type PermissionCallback = Box<dyn FnOnce(PermissionResult) + Send + 'static>;

/// 设备热插拔事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    Attached(UsbDeviceInfo),
    Detached(UsbDeviceInfo),
}

impl DeviceEvent {
    pub fn device(&self) -> &UsbDeviceInfo {
        match self {
            DeviceEvent::Attached(d) | DeviceEvent::Detached(d) => d,
        }
    }
}

/// 设备枚举与授权
pub trait DeviceProvider: Send + Sync {
    fn devices(&self) -> Result<Vec<UsbDeviceInfo>, TransportError>;

    /// 按 VID/PID 查找第一个匹配的设备
    fn find(&self, vendor_id: u16, product_id: u16) -> Result<Option<UsbDeviceInfo>, TransportError> {
        Ok(self
            .devices()?
            .into_iter()
            .find(|d| d.matches(vendor_id, product_id)))
    }

    fn has_permission(&self, device: &UsbDeviceInfo) -> bool;

    /// 异步请求授权，结果通过回调返回
    fn request_permission(&self, device: &UsbDeviceInfo, callback: PermissionCallback);
}

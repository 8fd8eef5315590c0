//! USB 授权流程
//!
//! 每次 `enable()` 创建一个新的 [`PermissionFlow`]，保证同一运行周期内只弹出一次授权请求，
//! 之后到达的 Attached 事件不会重复请求。

use tracing::debug;
use usbgps_usb::{DeviceProvider, PermissionResult, UsbDeviceInfo};

#[derive(Debug, Default)]
pub struct PermissionFlow {
    asked: bool,
}

impl PermissionFlow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn asked(&self) -> bool {
        self.asked
    }

    /// 发起授权请求；已经请求过时返回 `false`
    ///
    /// 结果通过 `on_result` 异步返回，可能在任意线程上调用。
    pub fn request<F>(&mut self, provider: &dyn DeviceProvider, device: &UsbDeviceInfo, on_result: F) -> bool
    where
        F: FnOnce(PermissionResult) + Send + 'static,
    {
        if self.asked {
            debug!("Permission for {} already requested", device);
            return false;
        }
        self.asked = true;
        debug!("Requesting permission for {}", device);
        provider.request_permission(device, Box::new(on_result));
        true
    }
}

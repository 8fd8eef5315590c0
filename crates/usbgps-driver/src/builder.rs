//! Builder 模式实现
//!
//! 提供链式构造 [`LinkManager`] 的便捷方式。

use std::sync::Arc;

use usbgps_usb::{DeviceProvider, Transport};

use crate::error::LinkError;
use crate::manager::LinkManager;
use crate::sinks::{ClockSetter, DiagnosticsSink, LocationSink, TracingDiagnostics, TracingLocationSink};

/// LinkManager Builder（链式构造）
///
/// 未指定后端时使用 libusb 后端（feature `rusb`）；未指定的协作方使用写日志的默认实现。
///
/// # Example
///
/// ```no_run
/// use usbgps_driver::{LinkConfig, LinkManagerBuilder};
///
/// let manager = LinkManagerBuilder::new().build().unwrap();
/// if !manager.enable(LinkConfig::default()) {
///     eprintln!("not started: {:?}", manager.disable_reason());
/// }
/// ```
#[derive(Default)]
pub struct LinkManagerBuilder {
    transport: Option<Arc<dyn Transport>>,
    provider: Option<Arc<dyn DeviceProvider>>,
    location: Option<Arc<dyn LocationSink>>,
    diagnostics: Option<Arc<dyn DiagnosticsSink>>,
    clock: Option<Arc<dyn ClockSetter>>,
}

impl LinkManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同一个对象同时负责枚举和打开设备
    pub fn backend<B>(mut self, backend: Arc<B>) -> Self
    where
        B: Transport + DeviceProvider + 'static,
    {
        self.transport = Some(backend.clone());
        self.provider = Some(backend);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn device_provider(mut self, provider: Arc<dyn DeviceProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn location_sink(mut self, sink: Arc<dyn LocationSink>) -> Self {
        self.location = Some(sink);
        self
    }

    pub fn diagnostics_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    pub fn clock_setter(mut self, clock: Arc<dyn ClockSetter>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<LinkManager, LinkError> {
        let (transport, provider) = match (self.transport, self.provider) {
            (Some(transport), Some(provider)) => (transport, provider),
            (transport, provider) => {
                let (default_transport, default_provider) = default_backend()?;
                (
                    transport.unwrap_or(default_transport),
                    provider.unwrap_or(default_provider),
                )
            },
        };

        Ok(LinkManager::new(
            transport,
            provider,
            self.location.unwrap_or_else(|| Arc::new(TracingLocationSink)),
            self.diagnostics.unwrap_or_else(|| Arc::new(TracingDiagnostics)),
            self.clock,
        ))
    }
}

#[cfg(feature = "rusb")]
fn default_backend() -> Result<(Arc<dyn Transport>, Arc<dyn DeviceProvider>), LinkError> {
    let backend = Arc::new(usbgps_usb::RusbTransport::new());
    Ok((backend.clone(), backend))
}

#[cfg(not(feature = "rusb"))]
fn default_backend() -> Result<(Arc<dyn Transport>, Arc<dyn DeviceProvider>), LinkError> {
    Err(LinkError::Config(
        "no USB backend configured (enable the `rusb` feature or call backend())".to_string(),
    ))
}

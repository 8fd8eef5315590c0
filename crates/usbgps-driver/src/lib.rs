//! 链路驱动层
//!
//! 本模块管理 USB GPS 接收机的连接生命周期，包括：
//! - 链路状态机（启用、授权、协商、流式接收、重试、致命停止）
//! - 线速率自动协商
//! - 读线程（宽限期 / 空闲超时）
//! - 固定延迟的重试调度与重试预算
//! - 单线程事件分发（帧、定位结果、状态事件）
//!
//! # 使用场景
//!
//! 平台胶水层（位置服务、通知、热插拔广播）通过 [`LocationSink`]、[`DiagnosticsSink`]、
//! [`ClockSetter`] 和 [`LinkManager::handle_device_event`] 接入；
//! 命令行工具和测试直接使用 [`LinkManagerBuilder`]。

mod builder;
pub mod config;
pub mod dispatcher;
mod error;
pub mod init;
mod manager;
pub mod metrics;
pub mod negotiator;
mod permission;
pub mod reader;
pub mod retry;
pub mod session;
pub mod sinks;
pub mod state;
mod thread;
mod worker;

pub use builder::LinkManagerBuilder;
pub use config::{
    ConfigProvider, FeatureToggles, LinkConfig, LinkTimings, MapConfigProvider, SentenceFlags,
    SpeedSetting, TomlConfigProvider,
};
pub use dispatcher::{EventListener, FrameListener, LinkEvent, ListenerId, ListenerRegistry};
pub use error::{DisableReason, LinkError};
pub use manager::LinkManager;
pub use metrics::{LinkMetrics, LinkMetricsSnapshot};
pub use negotiator::{NegotiationOutcome, SpeedNegotiator};
pub use permission::PermissionFlow;
pub use retry::{RetryBudget, RetryDecision};
pub use sinks::{
    ClockSetter, DiagnosticsSink, LocationSink, LocationStatus, TracingDiagnostics,
    TracingLocationSink,
};
pub use state::LinkState;

pub use usbgps_protocol::{Fix, Frame, OutgoingCommand, ProtocolMode};
pub use usbgps_usb::{DeviceEvent, UsbDeviceInfo};

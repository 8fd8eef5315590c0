//! 驱动层错误类型定义

use std::fmt;

use thiserror::Error;
use usbgps_protocol::ProtocolError;
use usbgps_usb::TransportError;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum LinkError {
    /// 没有匹配 VID/PID 的设备（致命，不重试）
    #[error("No device {vendor_id:04x}:{product_id:04x} attached")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    /// USB 或定位权限被拒绝（致命）
    #[error("Permission denied")]
    PermissionDenied,

    /// 模拟位置功能未开启（致命，外部前置条件）
    #[error("Mock location is disabled")]
    MockLocationDisabled,

    /// 校验和错误（解码器内部静默处理，仅用于分类）
    #[error("Checksum mismatch")]
    ChecksumMismatch,

    /// IO 错误（瞬态，只影响空闲超时）
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 宽限期内没有任何有效帧
    #[error("Speed negotiation timed out")]
    NegotiationTimeout,

    /// 重试次数耗尽，链路进入 FatalStopped
    #[error("Retries exhausted")]
    RetriesExhausted,

    /// 链路已停止（等待中的调用被唤醒）
    #[error("Link is disabled")]
    Disabled,

    /// 操作超时
    #[error("Operation timeout")]
    Timeout,

    /// 传输层错误
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 协议编码错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 线程创建失败
    #[error("Thread error: {0}")]
    Thread(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LinkError {
    /// 需要用户干预、不会自动重试的错误
    pub fn is_fatal(&self) -> bool {
        match self {
            LinkError::DeviceNotFound { .. }
            | LinkError::PermissionDenied
            | LinkError::MockLocationDisabled
            | LinkError::RetriesExhausted => true,
            LinkError::Transport(e) => e.is_fatal(),
            _ => false,
        }
    }

    /// 在本地被吸收或交给重试调度器处理的错误
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LinkError::ChecksumMismatch
                | LinkError::Io(_)
                | LinkError::NegotiationTimeout
                | LinkError::Timeout
        ) || matches!(self, LinkError::Transport(e) if !e.is_fatal())
    }

    /// 对应的停止原因（如果该错误会导致链路停止）
    pub fn disable_reason(&self) -> Option<DisableReason> {
        match self {
            LinkError::DeviceNotFound { .. } => Some(DisableReason::DeviceNotFound),
            LinkError::PermissionDenied => Some(DisableReason::PermissionDenied),
            LinkError::MockLocationDisabled => Some(DisableReason::MockLocationDisabled),
            LinkError::NegotiationTimeout => Some(DisableReason::NegotiationTimeout),
            LinkError::RetriesExhausted => Some(DisableReason::RetriesExhausted),
            _ => None,
        }
    }
}

/// 链路停止 / 出错原因
///
/// `code()` 是稳定的数字编码，供 UI 和通知显示使用。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisableReason {
    /// 用户主动停止
    UserRequest,
    DeviceNotFound,
    PermissionDenied,
    MockLocationDisabled,
    /// 连接建立后数据中断（空闲超时 / 传输关闭）
    ConnectionLost,
    NegotiationTimeout,
    RetriesExhausted,
    DeviceDetached,
}

impl DisableReason {
    pub fn code(self) -> u8 {
        match self {
            DisableReason::UserRequest => 1,
            DisableReason::DeviceNotFound => 2,
            DisableReason::PermissionDenied => 3,
            DisableReason::MockLocationDisabled => 4,
            DisableReason::ConnectionLost => 5,
            DisableReason::NegotiationTimeout => 6,
            DisableReason::RetriesExhausted => 7,
            DisableReason::DeviceDetached => 8,
        }
    }
}

impl fmt::Display for DisableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DisableReason::UserRequest => "stopped by user",
            DisableReason::DeviceNotFound => "GPS device not found",
            DisableReason::PermissionDenied => "permission denied",
            DisableReason::MockLocationDisabled => "mock location disabled",
            DisableReason::ConnectionLost => "connection lost",
            DisableReason::NegotiationTimeout => "no data from device",
            DisableReason::RetriesExhausted => "too many connection problems",
            DisableReason::DeviceDetached => "device detached",
        };
        write!(f, "{text} (code {})", self.code())
    }
}

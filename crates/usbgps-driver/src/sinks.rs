//! 外部协作方接口
//!
//! 链路管理器不关心定位结果最终去了哪里：系统位置服务、诊断通知和系统时钟
//! 都通过这里的 trait 注入。

use tracing::{error, info, warn};
use usbgps_protocol::Fix;

use crate::error::DisableReason;

/// 位置服务前置条件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocationStatus {
    #[default]
    Ready,
    /// 模拟位置功能未开启
    MockLocationDisabled,
    /// 缺少定位权限
    PermissionMissing,
}

/// 定位结果的去向（通常是平台的模拟位置提供者）
pub trait LocationSink: Send + Sync {
    /// `enable()` 时检查的前置条件
    fn status(&self) -> LocationStatus {
        LocationStatus::Ready
    }

    fn report_fix(&self, fix: &Fix);

    /// 链路致命停止，位置提供者应标记为不可用
    fn out_of_service(&self);
}

/// 用户可见的诊断通知
pub trait DiagnosticsSink: Send + Sync {
    /// 瞬态问题：正在重试
    fn retrying(&self, reason: DisableReason, remaining: u32);

    /// 之前报告的瞬态问题已消失
    fn problem_cleared(&self);

    /// 致命停止
    fn fatal_stop(&self, reason: DisableReason);
}

/// 用 GPS 时间校准系统时钟（每个连接最多一次）
pub trait ClockSetter: Send + Sync {
    fn set_time(&self, timestamp_ms: u64);
}

/// 把诊断写入日志
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn retrying(&self, reason: DisableReason, remaining: u32) {
        warn!("GPS link problem: {} ({} retries left)", reason, remaining);
    }

    fn problem_cleared(&self) {
        info!("GPS link problem cleared");
    }

    fn fatal_stop(&self, reason: DisableReason) {
        error!("GPS link stopped: {}", reason);
    }
}

/// 把定位结果写入日志
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLocationSink;

impl LocationSink for TracingLocationSink {
    fn report_fix(&self, fix: &Fix) {
        info!(
            "Fix {:.6},{:.6} alt={:?} sats={:?} t={}",
            fix.latitude, fix.longitude, fix.altitude, fix.satellites, fix.timestamp_ms
        );
    }

    fn out_of_service(&self) {
        warn!("Location provider out of service");
    }
}

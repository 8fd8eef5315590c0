//! 链路运行指标
//!
//! 所有计数器都是无锁原子量，读线程、工作线程和分发线程可以并发更新。

use std::sync::atomic::{AtomicU64, Ordering};

/// 链路指标（零开销原子计数器）
#[derive(Debug, Default)]
pub struct LinkMetrics {
    /// 从设备读到的字节数
    pub bytes_read: AtomicU64,
    /// 通过校验的帧数
    pub frames_valid: AtomicU64,
    /// 校验和失败次数
    pub checksum_failures: AtomicU64,
    /// 传输 IO 错误次数（不含超时）
    pub io_errors: AtomicU64,
    /// 读超时次数
    pub read_timeouts: AtomicU64,
    /// 连接尝试次数
    pub connect_attempts: AtomicU64,
    /// 分发线程不可用时丢弃的帧
    pub frames_dropped: AtomicU64,
    /// 成功写入设备的命令数（含初始化命令）
    pub commands_sent: AtomicU64,
    /// 监听器 panic 次数
    pub listener_panics: AtomicU64,
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取指标快照
    pub fn snapshot(&self) -> LinkMetricsSnapshot {
        LinkMetricsSnapshot {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            frames_valid: self.frames_valid.load(Ordering::Relaxed),
            checksum_failures: self.checksum_failures.load(Ordering::Relaxed),
            io_errors: self.io_errors.load(Ordering::Relaxed),
            read_timeouts: self.read_timeouts.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            listener_panics: self.listener_panics.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        for counter in [
            &self.bytes_read,
            &self.frames_valid,
            &self.checksum_failures,
            &self.io_errors,
            &self.read_timeouts,
            &self.connect_attempts,
            &self.frames_dropped,
            &self.commands_sent,
            &self.listener_panics,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkMetricsSnapshot {
    pub bytes_read: u64,
    pub frames_valid: u64,
    pub checksum_failures: u64,
    pub io_errors: u64,
    pub read_timeouts: u64,
    pub connect_attempts: u64,
    pub frames_dropped: u64,
    pub commands_sent: u64,
    pub listener_panics: u64,
}

impl LinkMetricsSnapshot {
    /// 校验失败占全部候选帧的比例
    pub fn checksum_failure_rate(&self) -> f64 {
        let total = self.frames_valid + self.checksum_failures;
        if total == 0 {
            0.0
        } else {
            self.checksum_failures as f64 / total as f64
        }
    }
}

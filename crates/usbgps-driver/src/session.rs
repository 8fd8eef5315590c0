//! 单次连接会话
//!
//! 每次成功打开设备都会创建一个新的 [`LinkSession`]，读线程和速率协商共享它。
//! 会话关闭后不会被复用。

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use usbgps_usb::Connection;

/// 等待帧的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameWait {
    /// 计数超过基线，携带当前总数
    Frames(u64),
    TimedOut,
    Closed,
}

#[derive(Debug, Default)]
struct SignalState {
    frames: u64,
    closed: bool,
}

/// 读线程 → 协商方的帧到达信号
#[derive(Debug, Default)]
pub struct FrameSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl FrameSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify_frames(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut state = self.state.lock();
        state.frames += count as u64;
        self.cond.notify_all();
    }

    pub fn count(&self) -> u64 {
        self.state.lock().frames
    }

    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// 等待帧计数超过 `baseline`，最迟到 `deadline`
    pub fn wait_for_frames(&self, baseline: u64, deadline: Instant) -> FrameWait {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return FrameWait::Closed;
            }
            if state.frames > baseline {
                return FrameWait::Frames(state.frames);
            }
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return if state.closed {
                    FrameWait::Closed
                } else if state.frames > baseline {
                    FrameWait::Frames(state.frames)
                } else {
                    FrameWait::TimedOut
                };
            }
        }
    }
}

/// 一次连接
pub struct LinkSession {
    /// 单调递增的连接编号，用于丢弃过期的读线程退出通知
    pub generation: u64,
    pub connection: Arc<dyn Connection>,
    /// 连接开始时刻（宽限期起点）
    pub started: Instant,
    pub signal: FrameSignal,
}

impl LinkSession {
    pub fn new(generation: u64, connection: Arc<dyn Connection>) -> Self {
        Self {
            generation,
            connection,
            started: Instant::now(),
            signal: FrameSignal::new(),
        }
    }

    /// 关闭连接并唤醒所有等待方（幂等）
    pub fn close(&self) {
        self.signal.close();
        self.connection.close();
    }

    pub fn is_closed(&self) -> bool {
        self.signal.is_closed() || self.connection.is_closed()
    }
}

impl std::fmt::Debug for LinkSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkSession")
            .field("generation", &self.generation)
            .field("chip", &self.connection.chip())
            .field("closed", &self.is_closed())
            .finish()
    }
}

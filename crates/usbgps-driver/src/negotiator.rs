//! 线速率协商
//!
//! 自动模式下依次尝试候选速率：设置线速率后驻留一个窗口，窗口内读线程报告了
//! 有效帧就停在该速率。候选列表用完后从头循环，直到宽限期结束。
//! 指定速率时只设置一次，然后等待第一帧。

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use usbgps_usb::TransportError;

use crate::config::{LinkTimings, SpeedSetting};
use crate::session::{FrameWait, LinkSession};

/// 没有历史成功速率时的首选速率
pub const DEFAULT_SPEED: u32 = 4800;

/// 标准候选速率（升序）
pub const STANDARD_SPEEDS: [u32; 8] = [1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

/// 协商结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationOutcome {
    /// 在该速率上收到了有效帧
    Settled(u32),
    /// 宽限期内没有任何有效帧
    Failed,
    /// 会话被关闭
    Cancelled,
}

/// 速率协商器
#[derive(Debug, Clone)]
pub struct SpeedNegotiator {
    candidates: Vec<u32>,
    dwell: Duration,
    grace: Duration,
}

impl SpeedNegotiator {
    /// 候选顺序：上次成功的速率（没有则 4800），然后是标准速率，去重
    pub fn new(last_good: Option<u32>, timings: &LinkTimings) -> Self {
        let first = last_good.unwrap_or(DEFAULT_SPEED);
        let candidates = std::iter::once(first).chain(STANDARD_SPEEDS).collect();
        Self::with_candidates(candidates, timings.dwell(), timings.grace())
    }

    pub fn with_candidates(candidates: Vec<u32>, dwell: Duration, grace: Duration) -> Self {
        let mut unique: Vec<u32> = Vec::with_capacity(candidates.len());
        for speed in candidates {
            if speed > 0 && !unique.contains(&speed) {
                unique.push(speed);
            }
        }
        if unique.is_empty() {
            unique.push(DEFAULT_SPEED);
        }
        Self {
            candidates: unique,
            dwell,
            grace,
        }
    }

    pub fn candidates(&self) -> &[u32] {
        &self.candidates
    }

    /// 在当前会话上协商速率（阻塞，最长一个宽限期）
    pub fn negotiate(&self, session: &LinkSession, setting: SpeedSetting) -> NegotiationOutcome {
        let deadline = session.started + self.grace;
        match setting {
            SpeedSetting::Fixed(speed) => self.settle_fixed(session, speed, deadline),
            SpeedSetting::Auto => self.probe(session, deadline),
        }
    }

    fn settle_fixed(&self, session: &LinkSession, speed: u32, deadline: Instant) -> NegotiationOutcome {
        let baseline = session.signal.count();
        if let Err(e) = apply_speed(session, speed) {
            if matches!(e, TransportError::Closed) {
                return NegotiationOutcome::Cancelled;
            }
            warn!("Failed to set line speed {}: {}", speed, e);
        }
        match session.signal.wait_for_frames(baseline, deadline) {
            FrameWait::Frames(_) => {
                info!("Device streaming at configured speed {}", speed);
                NegotiationOutcome::Settled(speed)
            },
            FrameWait::TimedOut => NegotiationOutcome::Failed,
            FrameWait::Closed => NegotiationOutcome::Cancelled,
        }
    }

    fn probe(&self, session: &LinkSession, deadline: Instant) -> NegotiationOutcome {
        for &speed in self.candidates.iter().cycle() {
            let now = Instant::now();
            if now >= deadline {
                debug!("Speed negotiation grace period elapsed");
                return NegotiationOutcome::Failed;
            }

            let baseline = session.signal.count();
            debug!("Trying line speed {}", speed);
            if let Err(e) = apply_speed(session, speed) {
                if matches!(e, TransportError::Closed) {
                    return NegotiationOutcome::Cancelled;
                }
                warn!("Failed to set line speed {}: {}", speed, e);
            }

            // 窗口内一出现有效帧就结束，不必等满驻留时间
            let window_end = (now + self.dwell).min(deadline);
            match session.signal.wait_for_frames(baseline, window_end) {
                FrameWait::Frames(_) => {
                    info!("Device answered at {} baud", speed);
                    return NegotiationOutcome::Settled(speed);
                },
                FrameWait::TimedOut => {},
                FrameWait::Closed => return NegotiationOutcome::Cancelled,
            }
        }
        NegotiationOutcome::Failed
    }
}

fn apply_speed(session: &LinkSession, speed: u32) -> Result<(), TransportError> {
    let connection = &session.connection;
    let request = connection
        .chip()
        .line_speed_request(connection.control_interface(), speed);
    connection.control_transfer(&request).map(|_| ())
}

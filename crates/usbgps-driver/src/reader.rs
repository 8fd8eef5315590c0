//! 读循环
//!
//! 每个连接一个读线程：阻塞读取传输字节，交给解码器，把得到的帧交给回调。
//! 第一帧之前受宽限期约束，之后受空闲超时约束；IO 错误只暂停片刻，
//! 是否放弃连接完全由这两个期限决定。

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use tracing::{debug, trace};
use usbgps_protocol::{Frame, FrameDecoder, ProtocolMode};
use usbgps_usb::TransportError;

use crate::config::LinkTimings;
use crate::metrics::LinkMetrics;
use crate::session::LinkSession;

const READ_BUFFER_SIZE: usize = 4096;

/// 读循环退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    /// 宽限期内没有任何有效帧
    NoFrames,
    /// 收到过帧，但之后超过空闲超时
    IdleTimeout,
    /// 连接被关闭（停止、拔出或协商取消）
    Closed,
}

/// 单连接读循环
pub struct LinkReader {
    session: Arc<LinkSession>,
    decoder: FrameDecoder,
    timings: LinkTimings,
    metrics: Arc<LinkMetrics>,
}

impl LinkReader {
    pub fn new(
        session: Arc<LinkSession>,
        mode: ProtocolMode,
        timings: LinkTimings,
        metrics: Arc<LinkMetrics>,
    ) -> Self {
        Self {
            session,
            decoder: FrameDecoder::new(mode),
            timings,
            metrics,
        }
    }

    /// 运行直到退出条件成立，`on_frame` 在本线程上按到达顺序调用
    pub fn run(mut self, mut on_frame: impl FnMut(Frame)) -> ReaderExit {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut frames = Vec::new();
        let mut last_frame: Option<Instant> = None;
        let mut checksum_failures = 0u64;

        loop {
            let deadline = match last_frame {
                None => self.session.started + self.timings.grace(),
                Some(at) => at + self.timings.idle_timeout(),
            };
            let now = Instant::now();
            if now >= deadline {
                return if last_frame.is_some() {
                    debug!("No valid frame for {:?}, giving up connection", self.timings.idle_timeout());
                    ReaderExit::IdleTimeout
                } else {
                    debug!("No valid frame within grace period {:?}", self.timings.grace());
                    ReaderExit::NoFrames
                };
            }
            let timeout = self
                .timings
                .read_timeout()
                .min(deadline - now)
                .max(Duration::from_millis(1));

            match self.session.connection.read(&mut buf, timeout) {
                Ok(0) => {},
                Ok(n) => {
                    self.metrics.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
                    self.decoder.decode_into(&buf[..n], &mut frames);

                    let failures = self.decoder.stats().checksum_failures;
                    if failures > checksum_failures {
                        trace!("{} frame(s) failed checksum", failures - checksum_failures);
                        self.metrics
                            .checksum_failures
                            .fetch_add(failures - checksum_failures, Ordering::Relaxed);
                        checksum_failures = failures;
                    }

                    if !frames.is_empty() {
                        last_frame = Some(Instant::now());
                        self.metrics
                            .frames_valid
                            .fetch_add(frames.len() as u64, Ordering::Relaxed);
                        self.session.signal.notify_frames(frames.len());
                        for frame in frames.drain(..) {
                            on_frame(frame);
                        }
                    }
                },
                Err(TransportError::Timeout) => {
                    self.metrics.read_timeouts.fetch_add(1, Ordering::Relaxed);
                },
                Err(TransportError::Closed) => return ReaderExit::Closed,
                Err(e) => {
                    self.metrics.io_errors.fetch_add(1, Ordering::Relaxed);
                    trace!("Transport read error: {}", e);
                    let pause = self
                        .timings
                        .io_error_pause()
                        .min(deadline.saturating_duration_since(Instant::now()));
                    std::thread::sleep(pause);
                },
            }

            if self.session.is_closed() {
                return ReaderExit::Closed;
            }
        }
    }
}

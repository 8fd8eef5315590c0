//! 有状态字节流解码器
//!
//! 接收任意切分的字节块，输出零个或多个已校验的 [`Frame`]。
//!
//! # 重同步策略
//!
//! - NMEA：校验失败、行内出现不可打印字符或行过长时，丢弃 `$`，从下一个 `$` 继续
//! - UBX / SiRF：校验失败时只丢弃一个同步字节，逐字节重新扫描，
//!   因此紧跟在损坏帧之后（甚至嵌在其中）的有效帧仍能被识别
//!
//! UBX 与 SiRF 模式同样接受穿插的 NMEA 语句。

use bytes::{Buf, BytesMut};

use crate::checksum::{sirf_checksum, ubx_checksum};
use crate::error::ProtocolError;
use crate::nmea::{NMEA_MAX_LINE_LEN, NMEA_START, NmeaSentence};
use crate::sirf::{
    SIRF_END_1, SIRF_END_2, SIRF_MAX_PAYLOAD, SIRF_START_1, SIRF_START_2, SirfFrame,
};
use crate::ubx::{UBX_CHECKSUM_LEN, UBX_HEADER_LEN, UBX_MAX_PAYLOAD, UBX_SYNC_1, UBX_SYNC_2, UbxFrame};
use crate::{Frame, ProtocolMode};

const SIRF_HEADER_LEN: usize = 4;
const SIRF_TRAILER_LEN: usize = 4;

/// 解码统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// 成功解码的帧数
    pub frames: u64,
    /// 校验失败次数（已静默重同步）
    pub checksum_failures: u64,
    /// 被丢弃的字节数（帧间噪声 + 重同步跳过的字节）
    pub discarded_bytes: u64,
}

/// 单步解析结果
enum Step {
    /// 得到一帧，消费 `usize` 字节
    Frame(Frame, usize),
    /// 缓冲区内数据不足
    NeedMore,
    /// 当前位置不是有效帧，丢弃 `usize` 字节后继续扫描
    Skip { len: usize, checksum_failure: bool },
}

/// 字节流解码器
///
/// 只应由读线程持有；不是 `Sync` 的共享对象。
#[derive(Debug)]
pub struct FrameDecoder {
    mode: ProtocolMode,
    buf: BytesMut,
    stats: DecoderStats,
}

impl FrameDecoder {
    pub fn new(mode: ProtocolMode) -> Self {
        Self {
            mode,
            buf: BytesMut::with_capacity(1024),
            stats: DecoderStats::default(),
        }
    }

    pub fn mode(&self) -> ProtocolMode {
        self.mode
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// 当前缓冲的未解码字节数
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// 清空缓冲区（新连接开始时调用），统计保留
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// 输入一块字节，返回解出的帧
    pub fn feed(&mut self, data: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        self.decode_into(data, &mut frames);
        frames
    }

    /// 输入一块字节，把解出的帧追加到 `out`，返回新增帧数
    pub fn decode_into(&mut self, data: &[u8], out: &mut Vec<Frame>) -> usize {
        self.buf.extend_from_slice(data);
        let before = out.len();

        loop {
            let Some(start) = self.find_start() else {
                self.discard(self.buf.len());
                break;
            };
            self.discard(start);

            match self.step() {
                Step::Frame(frame, len) => {
                    self.buf.advance(len);
                    self.stats.frames += 1;
                    out.push(frame);
                },
                Step::NeedMore => break,
                Step::Skip {
                    len,
                    checksum_failure,
                } => {
                    if checksum_failure {
                        self.stats.checksum_failures += 1;
                    }
                    self.discard(len);
                },
            }
        }

        out.len() - before
    }

    fn discard(&mut self, len: usize) {
        if len > 0 {
            self.buf.advance(len);
            self.stats.discarded_bytes += len as u64;
        }
    }

    /// 下一个可能的帧起点
    fn find_start(&self) -> Option<usize> {
        let binary_sync = match self.mode {
            ProtocolMode::Nmea => None,
            ProtocolMode::Ubx => Some(UBX_SYNC_1),
            ProtocolMode::Sirf => Some(SIRF_START_1),
        };
        self.buf
            .iter()
            .position(|&b| b == NMEA_START || Some(b) == binary_sync)
    }

    /// 在缓冲区头部尝试解析一帧
    fn step(&self) -> Step {
        match self.buf.first() {
            Some(&NMEA_START) => self.step_nmea(),
            Some(&UBX_SYNC_1) if self.mode == ProtocolMode::Ubx => self.step_ubx(),
            Some(&SIRF_START_1) if self.mode == ProtocolMode::Sirf => self.step_sirf(),
            _ => Step::NeedMore,
        }
    }

    fn step_nmea(&self) -> Step {
        let limit = self.buf.len().min(NMEA_MAX_LINE_LEN);
        for i in 1..limit {
            match self.buf[i] {
                b'\n' => return Self::finish_nmea_line(&self.buf[..=i]),
                b'\r' => {},
                0x20..=0x7E if self.buf[i] != NMEA_START => {},
                // 不可打印字符或新的 '$'：当前行被截断
                _ => return Step::Skip { len: 1, checksum_failure: false },
            }
        }
        if self.buf.len() >= NMEA_MAX_LINE_LEN {
            Step::Skip { len: 1, checksum_failure: false }
        } else {
            Step::NeedMore
        }
    }

    fn finish_nmea_line(line: &[u8]) -> Step {
        // 行内已保证全部是可打印 ASCII
        let parsed = std::str::from_utf8(line)
            .map_err(|_| ProtocolError::Malformed("non-ASCII NMEA line"))
            .and_then(NmeaSentence::parse);
        match parsed {
            Ok(sentence) => Step::Frame(Frame::Nmea(sentence), line.len()),
            Err(ProtocolError::ChecksumMismatch { .. }) => Step::Skip {
                len: 1,
                checksum_failure: true,
            },
            Err(_) => Step::Skip { len: 1, checksum_failure: false },
        }
    }

    fn step_ubx(&self) -> Step {
        let buf = &self.buf;
        if buf.len() < 2 {
            return Step::NeedMore;
        }
        if buf[1] != UBX_SYNC_2 {
            return Step::Skip { len: 1, checksum_failure: false };
        }
        if buf.len() < UBX_HEADER_LEN {
            return Step::NeedMore;
        }
        let payload_len = u16::from_le_bytes([buf[4], buf[5]]) as usize;
        if payload_len > UBX_MAX_PAYLOAD {
            return Step::Skip { len: 1, checksum_failure: false };
        }
        let total = UBX_HEADER_LEN + payload_len + UBX_CHECKSUM_LEN;
        if buf.len() < total {
            return Step::NeedMore;
        }

        let body_end = UBX_HEADER_LEN + payload_len;
        let (ck_a, ck_b) = ubx_checksum(&buf[2..body_end]);
        if (ck_a, ck_b) != (buf[body_end], buf[body_end + 1]) {
            return Step::Skip { len: 1, checksum_failure: true };
        }

        let frame = UbxFrame::new(buf[2], buf[3], buf[UBX_HEADER_LEN..body_end].to_vec());
        Step::Frame(Frame::Ubx(frame), total)
    }

    fn step_sirf(&self) -> Step {
        let buf = &self.buf;
        if buf.len() < 2 {
            return Step::NeedMore;
        }
        if buf[1] != SIRF_START_2 {
            return Step::Skip { len: 1, checksum_failure: false };
        }
        if buf.len() < SIRF_HEADER_LEN {
            return Step::NeedMore;
        }
        let payload_len = (u16::from_be_bytes([buf[2], buf[3]]) & 0x7FFF) as usize;
        if payload_len > SIRF_MAX_PAYLOAD {
            return Step::Skip { len: 1, checksum_failure: false };
        }
        let total = SIRF_HEADER_LEN + payload_len + SIRF_TRAILER_LEN;
        if buf.len() < total {
            return Step::NeedMore;
        }

        let body_end = SIRF_HEADER_LEN + payload_len;
        let payload = &buf[SIRF_HEADER_LEN..body_end];
        let checksum = u16::from_be_bytes([buf[body_end], buf[body_end + 1]]);
        let trailer_ok = buf[body_end + 2] == SIRF_END_1 && buf[body_end + 3] == SIRF_END_2;
        if !trailer_ok {
            return Step::Skip { len: 1, checksum_failure: false };
        }
        if checksum != sirf_checksum(payload) {
            return Step::Skip { len: 1, checksum_failure: true };
        }

        Step::Frame(Frame::Sirf(SirfFrame::new(payload.to_vec())), total)
    }
}

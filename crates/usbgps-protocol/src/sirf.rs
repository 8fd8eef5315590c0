//! SiRF 二进制协议
//!
//! ```text
//! | 0xA0 | 0xA2 | len (u16 BE, 15 bit) | payload ... | checksum (u16 BE) | 0xB0 | 0xB3 |
//! ```
//!
//! 负载首字节为消息 ID。这里只关心 ACK/NACK 以及少量配置命令。

use crate::encoder::OutgoingCommand;

pub const SIRF_START_1: u8 = 0xA0;
pub const SIRF_START_2: u8 = 0xA2;
pub const SIRF_END_1: u8 = 0xB0;
pub const SIRF_END_2: u8 = 0xB3;

/// 协议规定的负载上限（长度字段只用低 15 位，实际设备不超过 1023）
pub const SIRF_MAX_PAYLOAD: usize = 1023;

pub const MID_ACK: u8 = 0x0B;
pub const MID_NACK: u8 = 0x0C;
pub const MID_SWITCH_TO_NMEA: u8 = 0x81;
pub const MID_STATIC_NAVIGATION: u8 = 0x8F;

/// 已校验的 SiRF 帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SirfFrame {
    payload: Vec<u8>,
}

impl SirfFrame {
    pub(crate) fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// 消息 ID（负载为空时返回 `None`）
    pub fn message_id(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    pub fn is_ack(&self) -> bool {
        self.message_id() == Some(MID_ACK)
    }

    pub fn is_nack(&self) -> bool {
        self.message_id() == Some(MID_NACK)
    }

    /// ACK/NACK 所确认的命令 ID
    pub fn acked_message_id(&self) -> Option<u8> {
        if self.is_ack() || self.is_nack() {
            self.payload.get(1).copied()
        } else {
            None
        }
    }
}

/// MID 0x8F：开关静态导航
pub fn static_navigation(enabled: bool) -> OutgoingCommand {
    OutgoingCommand::Sirf(vec![MID_STATIC_NAVIGATION, u8::from(enabled)])
}

/// MID 0x81：切换到 NMEA 输出
///
/// 每条标准语句一对 (周期, 校验开关)，顺序为 GGA GLL GSA GSV RMC VTG MSS EPE ZDA，
/// 之后是两个未使用字节和 2 字节波特率。
pub fn switch_to_nmea(gga: u8, rmc: u8, gsa: u8, gsv: u8, baud: u16) -> OutgoingCommand {
    let mut payload = vec![MID_SWITCH_TO_NMEA, 0x02]; // 0x02 = 保持当前调试模式
    let rates = [gga, 0, gsa, gsv, rmc, 0, 0, 0, 0];
    for rate in rates {
        payload.push(rate);
        payload.push(0x01);
    }
    payload.extend_from_slice(&[0x00, 0x00]);
    payload.extend_from_slice(&baud.to_be_bytes());
    OutgoingCommand::Sirf(payload)
}

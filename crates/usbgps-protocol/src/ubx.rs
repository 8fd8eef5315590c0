//! u-blox UBX 二进制协议
//!
//! 帧格式：
//!
//! ```text
//! | 0xB5 | 0x62 | class | id | len (u16 LE) | payload ... | CK_A | CK_B |
//! ```
//!
//! 校验范围为 class 到 payload 末尾（见 [`crate::ubx_checksum`]）。

use crate::encoder::OutgoingCommand;
use crate::error::ProtocolError;
use crate::nmea::StandardSentence;

/// 同步字节 1
pub const UBX_SYNC_1: u8 = 0xB5;
/// 同步字节 2
pub const UBX_SYNC_2: u8 = 0x62;
/// 帧头长度（sync 2 + class 1 + id 1 + len 2）
pub const UBX_HEADER_LEN: usize = 6;
/// 校验和长度
pub const UBX_CHECKSUM_LEN: usize = 2;
/// 解码器接受的最大负载长度，超过视为帧头损坏
pub const UBX_MAX_PAYLOAD: usize = 4096;

// ============================================================================
// Message classes / ids
// ============================================================================

pub const CLASS_NAV: u8 = 0x01;
pub const CLASS_ACK: u8 = 0x05;
pub const CLASS_CFG: u8 = 0x06;
/// NMEA 标准语句在 CFG-MSG 中使用的 class
pub const CLASS_NMEA_STD: u8 = 0xF0;

pub const ID_NAV_PVT: u8 = 0x07;
pub const ID_NAV_RESETODO: u8 = 0x10;
pub const ID_ACK_NAK: u8 = 0x00;
pub const ID_ACK_ACK: u8 = 0x01;
pub const ID_CFG_MSG: u8 = 0x01;
pub const ID_CFG_RATE: u8 = 0x08;
pub const ID_CFG_NAV5: u8 = 0x24;

/// NAV-PVT 负载长度
pub const NAV_PVT_LEN: usize = 92;

/// 已校验的 UBX 帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UbxFrame {
    class: u8,
    id: u8,
    payload: Vec<u8>,
}

impl UbxFrame {
    /// 仅供解码器在校验通过后调用
    pub(crate) fn new(class: u8, id: u8, payload: Vec<u8>) -> Self {
        Self { class, id, payload }
    }

    pub fn class(&self) -> u8 {
        self.class
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// 是否为 (class, id) 指定的消息
    pub fn is(&self, class: u8, id: u8) -> bool {
        self.class == class && self.id == id
    }

    /// 解析 ACK-ACK / ACK-NAK，返回 `(被确认的 class, id, 是否 ACK)`
    pub fn ack(&self) -> Option<(u8, u8, bool)> {
        if self.class != CLASS_ACK || self.payload.len() < 2 {
            return None;
        }
        match self.id {
            ID_ACK_ACK => Some((self.payload[0], self.payload[1], true)),
            ID_ACK_NAK => Some((self.payload[0], self.payload[1], false)),
            _ => None,
        }
    }

    /// 解析 NAV-PVT
    pub fn nav_pvt(&self) -> Result<NavPvt, ProtocolError> {
        if !self.is(CLASS_NAV, ID_NAV_PVT) {
            return Err(ProtocolError::Malformed("not a NAV-PVT message"));
        }
        NavPvt::parse(&self.payload)
    }
}

/// NAV-PVT 中用到的字段
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavPvt {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// 纳秒修正（可为负）
    pub nano: i32,
    /// 日期时间是否有效（valid 位 0 与 1）
    pub time_valid: bool,
    /// 0 = 无定位, 2 = 2D, 3 = 3D
    pub fix_type: u8,
    /// flags 位 0：gnssFixOK
    pub fix_ok: bool,
    pub satellites: u8,
    /// 度
    pub longitude: f64,
    /// 度
    pub latitude: f64,
    /// 海拔（米，MSL）
    pub altitude_msl: f64,
    /// 水平精度（米）
    pub horizontal_accuracy: f32,
    /// 地速（米/秒）
    pub ground_speed: f32,
    /// 运动航向（度）
    pub heading: f32,
}

impl NavPvt {
    fn parse(p: &[u8]) -> Result<Self, ProtocolError> {
        if p.len() < NAV_PVT_LEN {
            return Err(ProtocolError::Malformed("NAV-PVT payload too short"));
        }
        let u16_at = |i: usize| u16::from_le_bytes([p[i], p[i + 1]]);
        let u32_at = |i: usize| u32::from_le_bytes([p[i], p[i + 1], p[i + 2], p[i + 3]]);
        let i32_at = |i: usize| i32::from_le_bytes([p[i], p[i + 1], p[i + 2], p[i + 3]]);

        Ok(Self {
            year: u16_at(4),
            month: p[6],
            day: p[7],
            hour: p[8],
            minute: p[9],
            second: p[10],
            time_valid: p[11] & 0x03 == 0x03,
            nano: i32_at(16),
            fix_type: p[20],
            fix_ok: p[21] & 0x01 != 0,
            satellites: p[23],
            longitude: i32_at(24) as f64 * 1e-7,
            latitude: i32_at(28) as f64 * 1e-7,
            altitude_msl: i32_at(36) as f64 / 1000.0,
            horizontal_accuracy: u32_at(40) as f32 / 1000.0,
            ground_speed: i32_at(60) as f32 / 1000.0,
            heading: i32_at(64) as f32 * 1e-5,
        })
    }

    /// 是否为可用的 2D/3D 定位
    pub fn has_fix(&self) -> bool {
        self.fix_ok && (2..=4).contains(&self.fix_type)
    }
}

// ============================================================================
// 配置命令构建
// ============================================================================

/// CFG-RATE：设置测量频率
///
/// `nav_rate_hz` 会被限制在 1..=25 Hz（u-blox M8/M9 的上限），测量周期向下取整到毫秒。
pub fn cfg_rate(nav_rate_hz: u16) -> OutgoingCommand {
    let hz = nav_rate_hz.clamp(1, 25);
    let meas_rate_ms: u16 = 1000 / hz;
    let mut payload = Vec::with_capacity(6);
    payload.extend_from_slice(&meas_rate_ms.to_le_bytes());
    payload.extend_from_slice(&1u16.to_le_bytes()); // navRate：每次测量一次解算
    payload.extend_from_slice(&1u16.to_le_bytes()); // timeRef：GPS 时间
    OutgoingCommand::ubx(CLASS_CFG, ID_CFG_RATE, payload)
}

/// NAV-RESETODO：清零里程计
pub fn nav_reset_odometer() -> OutgoingCommand {
    OutgoingCommand::ubx(CLASS_NAV, ID_NAV_RESETODO, Vec::new())
}

/// CFG-NAV5：设置静态保持阈值（静态导航）
///
/// 开启时使用 0.5 m/s 阈值（staticHoldThresh 单位 cm/s），关闭时写 0。
/// 负载其余字段为 0，只有 mask 位 4（staticHoldMask）生效。
pub fn cfg_nav5_static_hold(enabled: bool) -> OutgoingCommand {
    let mut payload = vec![0u8; 36];
    payload[0..2].copy_from_slice(&0x0010u16.to_le_bytes());
    payload[22] = if enabled { 50 } else { 0 };
    OutgoingCommand::ubx(CLASS_CFG, ID_CFG_NAV5, payload)
}

/// CFG-MSG：设置当前端口上某条标准 NMEA 语句的输出周期（0 = 关闭）
pub fn cfg_msg_nmea(sentence: StandardSentence, rate: u8) -> OutgoingCommand {
    OutgoingCommand::ubx(
        CLASS_CFG,
        ID_CFG_MSG,
        vec![CLASS_NMEA_STD, sentence.message_number(), rate],
    )
}

//! # USB GPS Protocol
//!
//! GPS 接收机串口协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `checksum`: NMEA XOR / UBX Fletcher / SiRF 15-bit 校验和
//! - `decoder`: 有状态字节流解码器（校验 + 重同步）
//! - `encoder`: 无状态命令编码器
//! - `nmea`: NMEA 语句模型与 GGA/RMC 解析
//! - `ubx`: u-blox UBX 消息常量、配置命令构建、NAV-PVT 解析
//! - `sirf`: SiRF 二进制消息
//! - `fix`: 定位结果模型与 GGA+RMC 合并
//!
//! ## 不变量
//!
//! [`Frame`] 只能由 [`FrameDecoder`] 在校验和验证通过后构造，
//! 因此任何 `Frame` 值都保证是完整且校验正确的。

pub mod checksum;
pub mod decoder;
pub mod encoder;
mod error;
pub mod fix;
pub mod nmea;
pub mod sirf;
pub mod ubx;

pub use checksum::{nmea_checksum, nmea_checksum_hex, sirf_checksum, ubx_checksum};
pub use decoder::{DecoderStats, FrameDecoder};
pub use encoder::OutgoingCommand;
pub use error::ProtocolError;
pub use fix::{Fix, FixAssembler};
pub use nmea::NmeaSentence;
pub use sirf::SirfFrame;
pub use ubx::UbxFrame;

use std::fmt;

/// 设备协议模式
///
/// 决定解码器识别哪一种帧格式。UBX 模式下同时接受穿插在二进制流中的 NMEA 语句
/// （u-blox 接收机默认同时输出两种格式）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ProtocolMode {
    /// NMEA 0183 文本语句
    #[default]
    Nmea,
    /// u-blox UBX 二进制（+ NMEA）
    Ubx,
    /// SiRF 二进制
    Sirf,
}

impl ProtocolMode {
    /// 从配置字符串解析（大小写不敏感）
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "nmea" => Some(Self::Nmea),
            "ubx" => Some(Self::Ubx),
            "sirf" => Some(Self::Sirf),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nmea => write!(f, "nmea"),
            Self::Ubx => write!(f, "ubx"),
            Self::Sirf => write!(f, "sirf"),
        }
    }
}

/// 已校验的协议帧
///
/// # 设计特性
///
/// - **只能由解码器构造**：各变体内部字段私有，外部只能读取
/// - **不保留**：帧在分发之后即被丢弃，调用方需要时自行克隆
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UBX 二进制消息
    Ubx(UbxFrame),
    /// NMEA 文本语句
    Nmea(NmeaSentence),
    /// SiRF 二进制消息
    Sirf(SirfFrame),
}

impl Frame {
    /// 帧所属协议
    pub fn protocol(&self) -> ProtocolMode {
        match self {
            Frame::Ubx(_) => ProtocolMode::Ubx,
            Frame::Nmea(_) => ProtocolMode::Nmea,
            Frame::Sirf(_) => ProtocolMode::Sirf,
        }
    }

    pub fn as_ubx(&self) -> Option<&UbxFrame> {
        match self {
            Frame::Ubx(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn as_nmea(&self) -> Option<&NmeaSentence> {
        match self {
            Frame::Nmea(sentence) => Some(sentence),
            _ => None,
        }
    }

    pub fn as_sirf(&self) -> Option<&SirfFrame> {
        match self {
            Frame::Sirf(frame) => Some(frame),
            _ => None,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Ubx(frame) => write!(
                f,
                "UBX class=0x{:02X} id=0x{:02X} len={}",
                frame.class(),
                frame.id(),
                frame.payload().len()
            ),
            Frame::Nmea(sentence) => write!(f, "{}", sentence.raw()),
            Frame::Sirf(frame) => write!(
                f,
                "SiRF id=0x{:02X} len={}",
                frame.message_id().unwrap_or(0),
                frame.payload().len()
            ),
        }
    }
}

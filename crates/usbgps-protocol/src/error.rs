//! 协议层错误类型定义

use thiserror::Error;

/// 协议层错误
///
/// 解码过程中的校验失败由解码器静默吸收（重同步），只计入统计；
/// 这里的错误主要面向严格解析接口和编码器。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// 校验和不匹配
    #[error("Checksum mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    /// 帧结构不完整或格式错误
    #[error("Malformed frame: {0}")]
    Malformed(&'static str),

    /// 负载超出协议长度字段的表示范围
    #[error("Payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    /// NMEA 语句体包含非法字符（`$`、`*`、CR/LF 或非 ASCII）
    #[error("Invalid NMEA sentence body: {0:?}")]
    InvalidSentence(String),

    /// 字段解析失败
    #[error("Invalid field {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

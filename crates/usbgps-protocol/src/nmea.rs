//! NMEA 0183 语句
//!
//! 语句格式：`$<address>,<field>,...*<hex2>\r\n`，校验和为 `$` 与 `*` 之间所有字节的 XOR。
//!
//! 本模块只关心定位相关的 GGA / RMC 两种语句，其他语句以原始字段形式透传给监听者。

use crate::checksum::{nmea_checksum, parse_hex_byte};
use crate::error::ProtocolError;

/// 语句起始符 `$`
pub const NMEA_START: u8 = b'$';
/// 校验和分隔符 `*`
pub const NMEA_CHECKSUM_SEPARATOR: u8 = b'*';
/// 单条语句允许的最大长度（含 `$` 和 CR/LF）
///
/// 标准规定 82 字节，但 u-blox 的 PUBX 和部分 GSV 扩展会超出，这里放宽到 256。
pub const NMEA_MAX_LINE_LEN: usize = 256;

/// 已校验的 NMEA 语句
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NmeaSentence {
    talker_id: String,
    sentence_type: String,
    fields: Vec<String>,
    raw: String,
}

impl NmeaSentence {
    /// 严格解析一行 NMEA 语句（可带或不带结尾 CR/LF）
    ///
    /// # 错误
    /// - `ProtocolError::Malformed`: 缺少 `$`、`*`、校验位或地址字段
    /// - `ProtocolError::ChecksumMismatch`: 校验和不匹配
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let bytes = line.as_bytes();

        if bytes.first() != Some(&NMEA_START) {
            return Err(ProtocolError::Malformed("missing '$'"));
        }
        let star = bytes
            .iter()
            .rposition(|&b| b == NMEA_CHECKSUM_SEPARATOR)
            .ok_or(ProtocolError::Malformed("missing '*'"))?;
        if bytes.len() != star + 3 {
            return Err(ProtocolError::Malformed("checksum must be two hex digits"));
        }

        let body = &bytes[1..star];
        let expected = parse_hex_byte(bytes[star + 1], bytes[star + 2])
            .ok_or(ProtocolError::Malformed("checksum is not hex"))?;
        let actual = nmea_checksum(body);
        if expected != actual {
            return Err(ProtocolError::ChecksumMismatch {
                expected: expected as u16,
                actual: actual as u16,
            });
        }

        let body = &line[1..star];
        let mut parts = body.split(',');
        let address = parts.next().unwrap_or_default();
        if address.len() < 2 || !address.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(ProtocolError::Malformed("invalid address field"));
        }

        // 专有语句（$PUBX、$PSRF...）以 'P' 开头，没有两字符 talker
        let (talker_id, sentence_type) = if address.starts_with('P') {
            ("P".to_string(), address[1..].to_string())
        } else {
            (address[..2].to_string(), address[2..].to_string())
        };

        Ok(Self {
            talker_id,
            sentence_type,
            fields: parts.map(str::to_string).collect(),
            raw: line.to_string(),
        })
    }

    /// Talker ID（如 `GP`、`GN`，专有语句为 `P`）
    pub fn talker_id(&self) -> &str {
        &self.talker_id
    }

    /// 语句类型（如 `GGA`、`RMC`、`UBX`、`SRF103`）
    pub fn sentence_type(&self) -> &str {
        &self.sentence_type
    }

    /// 地址字段之后的数据字段
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// 单个字段（越界或为空时返回 `None`）
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields
            .get(index)
            .map(String::as_str)
            .filter(|f| !f.is_empty())
    }

    /// 完整原始语句（不含 CR/LF）
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// 解析 GGA（定位数据）
    pub fn parse_gga(&self) -> Result<GgaData, ProtocolError> {
        if self.sentence_type != "GGA" {
            return Err(ProtocolError::Malformed("not a GGA sentence"));
        }
        Ok(GgaData {
            time_of_day_ms: self.field(0).map(parse_time_of_day).transpose()?,
            latitude: parse_coordinate(self.field(1), self.field(2), "latitude")?,
            longitude: parse_coordinate(self.field(3), self.field(4), "longitude")?,
            quality: parse_opt::<u8>(self.field(5), "quality")?.unwrap_or(0),
            satellites: parse_opt::<u8>(self.field(6), "satellites")?,
            hdop: parse_opt::<f32>(self.field(7), "hdop")?,
            altitude: parse_opt::<f64>(self.field(8), "altitude")?,
        })
    }

    /// 解析 RMC（推荐最小定位数据）
    pub fn parse_rmc(&self) -> Result<RmcData, ProtocolError> {
        if self.sentence_type != "RMC" {
            return Err(ProtocolError::Malformed("not a RMC sentence"));
        }
        Ok(RmcData {
            time_of_day_ms: self.field(0).map(parse_time_of_day).transpose()?,
            valid: self.field(1) == Some("A"),
            latitude: parse_coordinate(self.field(2), self.field(3), "latitude")?,
            longitude: parse_coordinate(self.field(4), self.field(5), "longitude")?,
            speed_knots: parse_opt::<f32>(self.field(6), "speed")?,
            course_deg: parse_opt::<f32>(self.field(7), "course")?,
            date: self.field(8).map(parse_date).transpose()?,
        })
    }
}

/// GGA 语句内容
#[derive(Debug, Clone, PartialEq)]
pub struct GgaData {
    /// UTC 当日毫秒数
    pub time_of_day_ms: Option<u32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// 定位质量（0 = 无效）
    pub quality: u8,
    pub satellites: Option<u8>,
    pub hdop: Option<f32>,
    /// 海拔（米，MSL）
    pub altitude: Option<f64>,
}

impl GgaData {
    pub fn has_fix(&self) -> bool {
        self.quality > 0 && self.latitude.is_some() && self.longitude.is_some()
    }
}

/// RMC 语句内容
#[derive(Debug, Clone, PartialEq)]
pub struct RmcData {
    /// UTC 当日毫秒数
    pub time_of_day_ms: Option<u32>,
    /// 状态位 `A`（有效）/ `V`（无效）
    pub valid: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub speed_knots: Option<f32>,
    pub course_deg: Option<f32>,
    /// (年, 月, 日)
    pub date: Option<(u16, u8, u8)>,
}

/// 标准 NMEA 输出语句（用于逐条开关）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardSentence {
    Gga,
    Gll,
    Gsa,
    Gsv,
    Rmc,
    Vtg,
    Zda,
}

impl StandardSentence {
    pub const ALL: [StandardSentence; 7] = [
        Self::Gga,
        Self::Gll,
        Self::Gsa,
        Self::Gsv,
        Self::Rmc,
        Self::Vtg,
        Self::Zda,
    ];

    /// 消息编号
    ///
    /// SiRF `PSRF103` 的消息编号与 u-blox `CFG-MSG`（class 0xF0）的 id 恰好一致。
    pub fn message_number(self) -> u8 {
        match self {
            Self::Gga => 0x00,
            Self::Gll => 0x01,
            Self::Gsa => 0x02,
            Self::Gsv => 0x03,
            Self::Rmc => 0x04,
            Self::Vtg => 0x05,
            Self::Zda => 0x08,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gga => "GGA",
            Self::Gll => "GLL",
            Self::Gsa => "GSA",
            Self::Gsv => "GSV",
            Self::Rmc => "RMC",
            Self::Vtg => "VTG",
            Self::Zda => "ZDA",
        }
    }
}

/// SiRF `PSRF103` 语句体：设置某条标准语句的输出周期
///
/// `rate_secs = 0` 关闭输出。返回值不含 `$` 和校验和，交给编码器补全。
pub fn psrf103_body(sentence: StandardSentence, rate_secs: u8) -> String {
    format!(
        "PSRF103,{:02},00,{:02},01",
        sentence.message_number(),
        rate_secs
    )
}

/// 解析 `hhmmss[.sss]` 为当日毫秒数
fn parse_time_of_day(value: &str) -> Result<u32, ProtocolError> {
    let invalid = || ProtocolError::InvalidField {
        field: "time",
        value: value.to_string(),
    };
    if value.len() < 6 || !value.is_char_boundary(6) {
        return Err(invalid());
    }
    let hours: u32 = value[0..2].parse().map_err(|_| invalid())?;
    let minutes: u32 = value[2..4].parse().map_err(|_| invalid())?;
    let seconds: f64 = value[4..].parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 || !(0.0..61.0).contains(&seconds) {
        return Err(invalid());
    }
    Ok((hours * 3600 + minutes * 60) * 1000 + (seconds * 1000.0).round() as u32)
}

/// 解析 `ddmmyy` 日期（两位年份按 1980-2079 窗口展开）
fn parse_date(value: &str) -> Result<(u16, u8, u8), ProtocolError> {
    let invalid = || ProtocolError::InvalidField {
        field: "date",
        value: value.to_string(),
    };
    if value.len() != 6 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let day: u8 = value[0..2].parse().map_err(|_| invalid())?;
    let month: u8 = value[2..4].parse().map_err(|_| invalid())?;
    let yy: u16 = value[4..6].parse().map_err(|_| invalid())?;
    if !(1..=31).contains(&day) || !(1..=12).contains(&month) {
        return Err(invalid());
    }
    let year = if yy >= 80 { 1900 + yy } else { 2000 + yy };
    Ok((year, month, day))
}

/// 解析 `(d)ddmm.mmmm` + 半球为十进制度
fn parse_coordinate(
    value: Option<&str>,
    hemisphere: Option<&str>,
    field: &'static str,
) -> Result<Option<f64>, ProtocolError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let invalid = || ProtocolError::InvalidField {
        field,
        value: value.to_string(),
    };
    let raw: f64 = value.parse().map_err(|_| invalid())?;
    // f64 解析接受 NaN / inf，与 NaN 的比较总为 false
    if !raw.is_finite() || raw < 0.0 {
        return Err(invalid());
    }
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    if minutes >= 60.0 {
        return Err(invalid());
    }
    let decimal = degrees + minutes / 60.0;
    match hemisphere {
        Some("S") | Some("W") => Ok(Some(-decimal)),
        Some("N") | Some("E") => Ok(Some(decimal)),
        _ => Err(invalid()),
    }
}

fn parse_opt<T: std::str::FromStr>(
    value: Option<&str>,
    field: &'static str,
) -> Result<Option<T>, ProtocolError> {
    value
        .map(|v| {
            v.parse::<T>().map_err(|_| ProtocolError::InvalidField {
                field,
                value: v.to_string(),
            })
        })
        .transpose()
}

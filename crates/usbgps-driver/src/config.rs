//! 链路配置
//!
//! [`LinkConfig`] 在每次 `enable()` 时读取一次，之后对本次连接尝试不可变。
//! 外部配置来源只需实现简单的键值读取 [`ConfigProvider`]。

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use usbgps_protocol::ProtocolMode;

use crate::error::LinkError;

/// u-blox 7/8 的默认 VID/PID
pub const DEFAULT_VENDOR_ID: u16 = 0x1546;
pub const DEFAULT_PRODUCT_ID: u16 = 0x01A8;
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// 设备线速率设置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "SpeedRepr", into = "SpeedRepr")]
pub enum SpeedSetting {
    /// 自动探测
    #[default]
    Auto,
    /// 固定波特率
    Fixed(u32),
}

impl SpeedSetting {
    /// `auto` 或十进制波特率
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("auto") {
            return Some(SpeedSetting::Auto);
        }
        match value.parse::<u32>() {
            Ok(rate) if rate > 0 => Some(SpeedSetting::Fixed(rate)),
            _ => None,
        }
    }
}

impl fmt::Display for SpeedSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeedSetting::Auto => write!(f, "auto"),
            SpeedSetting::Fixed(rate) => write!(f, "{rate}"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum SpeedRepr {
    Rate(u32),
    Text(String),
}

impl TryFrom<SpeedRepr> for SpeedSetting {
    type Error = String;

    fn try_from(repr: SpeedRepr) -> Result<Self, Self::Error> {
        match repr {
            SpeedRepr::Rate(rate) if rate > 0 => Ok(SpeedSetting::Fixed(rate)),
            SpeedRepr::Rate(rate) => Err(format!("invalid device speed {rate}")),
            SpeedRepr::Text(text) => {
                SpeedSetting::parse(&text).ok_or_else(|| format!("invalid device speed {text:?}"))
            },
        }
    }
}

impl From<SpeedSetting> for SpeedRepr {
    fn from(setting: SpeedSetting) -> Self {
        match setting {
            SpeedSetting::Auto => SpeedRepr::Text("auto".to_string()),
            SpeedSetting::Fixed(rate) => SpeedRepr::Rate(rate),
        }
    }
}

/// 逐条 NMEA 语句开关
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentenceFlags {
    pub gga: bool,
    pub rmc: bool,
    pub gsa: bool,
    pub gsv: bool,
    pub vtg: bool,
    pub gll: bool,
    pub zda: bool,
}

impl Default for SentenceFlags {
    fn default() -> Self {
        Self {
            gga: true,
            rmc: true,
            gsa: true,
            gsv: true,
            vtg: false,
            gll: false,
            zda: false,
        }
    }
}

impl SentenceFlags {
    pub fn is_enabled(&self, sentence: usbgps_protocol::nmea::StandardSentence) -> bool {
        use usbgps_protocol::nmea::StandardSentence as S;
        match sentence {
            S::Gga => self.gga,
            S::Rmc => self.rmc,
            S::Gsa => self.gsa,
            S::Gsv => self.gsv,
            S::Vtg => self.vtg,
            S::Gll => self.gll,
            S::Zda => self.zda,
        }
    }
}

/// 设备特性开关
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureToggles {
    /// 导航解算频率（Hz），0 = 保持设备默认
    pub nav_rate_hz: u16,
    /// 连接后清零里程计
    pub reset_odometer: bool,
    /// 静态导航（静止时锁定位置）
    pub static_navigation: bool,
    /// 逐条语句开关，`None` = 不修改设备输出
    pub sentences: Option<SentenceFlags>,
}

/// 链路时序参数（毫秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkTimings {
    /// 每个候选速率的驻留窗口
    pub dwell_ms: u64,
    /// 从连接开始到第一帧的宽限期
    pub grace_ms: u64,
    /// 两帧之间允许的最长间隔
    pub idle_timeout_ms: u64,
    /// 重连前的固定延迟
    pub retry_delay_ms: u64,
    /// 单次传输读超时
    pub read_timeout_ms: u64,
    /// IO 错误后的暂停
    pub io_error_pause_ms: u64,
    /// 写超时
    pub write_timeout_ms: u64,
    /// 停止时等待线程退出的上限
    pub shutdown_timeout_ms: u64,
}

impl Default for LinkTimings {
    fn default() -> Self {
        Self {
            dwell_ms: 4_000,
            grace_ms: 45_000,
            idle_timeout_ms: 4_000,
            retry_delay_ms: 1_000,
            read_timeout_ms: 500,
            io_error_pause_ms: 100,
            write_timeout_ms: 1_000,
            shutdown_timeout_ms: 2_000,
        }
    }
}

impl LinkTimings {
    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    pub fn io_error_pause(&self) -> Duration {
        Duration::from_millis(self.io_error_pause_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// 链路配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    pub speed: SpeedSetting,
    pub max_retries: u32,
    pub protocol: ProtocolMode,
    pub features: FeatureToggles,
    pub timings: LinkTimings,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
            speed: SpeedSetting::Auto,
            max_retries: DEFAULT_MAX_RETRIES,
            protocol: ProtocolMode::Nmea,
            features: FeatureToggles::default(),
            timings: LinkTimings::default(),
        }
    }
}

impl LinkConfig {
    /// 从键值配置读取，缺失或格式错误的键使用默认值
    pub fn from_provider(provider: &dyn ConfigProvider) -> Self {
        let mut config = LinkConfig::default();

        if let Some(v) = read(provider, "vendor_id", parse_u16) {
            config.vendor_id = v;
        }
        if let Some(v) = read(provider, "product_id", parse_u16) {
            config.product_id = v;
        }
        if let Some(v) = read(provider, "device_speed", SpeedSetting::parse) {
            config.speed = v;
        }
        if let Some(v) = read(provider, "max_retries", |s| s.trim().parse().ok()) {
            config.max_retries = v;
        }
        if let Some(v) = read(provider, "protocol", ProtocolMode::parse) {
            config.protocol = v;
        }
        if let Some(v) = read(provider, "nav_rate_hz", |s| s.trim().parse().ok()) {
            config.features.nav_rate_hz = v;
        }
        if let Some(v) = read(provider, "reset_odometer", parse_bool) {
            config.features.reset_odometer = v;
        }
        if let Some(v) = read(provider, "static_navigation", parse_bool) {
            config.features.static_navigation = v;
        }
        if let Some(v) = read(provider, "retry_delay_ms", |s| s.trim().parse().ok()) {
            config.timings.retry_delay_ms = v;
        }

        // 只要出现任一 sentence_* 键就接管设备的语句输出
        let mut flags = SentenceFlags::default();
        let mut any = false;
        for (key, slot) in [
            ("sentence_gga", &mut flags.gga),
            ("sentence_rmc", &mut flags.rmc),
            ("sentence_gsa", &mut flags.gsa),
            ("sentence_gsv", &mut flags.gsv),
            ("sentence_vtg", &mut flags.vtg),
            ("sentence_gll", &mut flags.gll),
            ("sentence_zda", &mut flags.zda),
        ] {
            if let Some(v) = read(provider, key, parse_bool) {
                *slot = v;
                any = true;
            }
        }
        if any {
            config.features.sentences = Some(flags);
        }

        config
    }
}

fn read<T>(provider: &dyn ConfigProvider, key: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let raw = provider.get(key)?;
    let parsed = parse(&raw);
    if parsed.is_none() {
        warn!("Ignoring invalid value {:?} for config key {}", raw, key);
    }
    parsed
}

/// `0x1546` / `1546h` 按十六进制，其余按十进制
fn parse_u16(value: &str) -> Option<u16> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16).ok()
    } else if let Some(hex) = value.strip_suffix('h') {
        u16::from_str_radix(hex, 16).ok()
    } else {
        value.parse().ok()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// 键值配置来源
pub trait ConfigProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// 内存中的键值配置
#[derive(Debug, Clone, Default)]
pub struct MapConfigProvider {
    values: HashMap<String, String>,
}

impl MapConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl ConfigProvider for MapConfigProvider {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapConfigProvider {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// TOML 文件配置
///
/// 嵌套表展开为 `table.key` 形式；字符串、整数、浮点和布尔值都按文本提供。
#[derive(Debug, Clone, Default)]
pub struct TomlConfigProvider {
    values: HashMap<String, String>,
}

impl TomlConfigProvider {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LinkError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text).map_err(|e| LinkError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(text: &str) -> Result<Self, LinkError> {
        let table: toml::Table = toml::from_str(text).map_err(|e| LinkError::Config(e.to_string()))?;
        let mut values = HashMap::new();
        flatten("", &table, &mut values);
        Ok(Self { values })
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

fn flatten(prefix: &str, table: &toml::Table, out: &mut HashMap<String, String>) {
    for (key, value) in table {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            toml::Value::String(s) => {
                out.insert(name, s.clone());
            },
            toml::Value::Integer(i) => {
                out.insert(name, i.to_string());
            },
            toml::Value::Float(f) => {
                out.insert(name, f.to_string());
            },
            toml::Value::Boolean(b) => {
                out.insert(name, b.to_string());
            },
            toml::Value::Table(inner) => flatten(&name, inner, out),
            toml::Value::Datetime(_) | toml::Value::Array(_) => {},
        }
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

//! 命令间共用的工具：日志、配置合并、管理器构造、Ctrl+C

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;
use usbgps_driver::{
    ConfigProvider, Fix, LinkConfig, LinkManager, LinkManagerBuilder, LocationSink,
    MapConfigProvider, TomlConfigProvider,
};

/// 初始化日志（`RUST_LOG` 可覆盖）
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("usbgps=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// `<config_dir>/usbgps/config.toml`
pub fn config_path() -> Result<PathBuf> {
    let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("cannot determine config directory"))?;
    path.push("usbgps");
    path.push("config.toml");
    Ok(path)
}

/// 链路相关的命令行参数，覆盖配置文件中的同名键
#[derive(Args, Debug, Default, Clone)]
pub struct LinkArgs {
    /// USB vendor id（如 0x1546）
    #[arg(long)]
    pub vid: Option<String>,

    /// USB product id（如 0x01a8）
    #[arg(long)]
    pub pid: Option<String>,

    /// 线速率：auto 或波特率
    #[arg(long)]
    pub speed: Option<String>,

    /// 协议：nmea / ubx / sirf
    #[arg(long)]
    pub protocol: Option<String>,

    /// 连续失败后的重连次数
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// 配置文件（默认使用用户配置目录）
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// 命令行参数优先，其次配置文件
struct LayeredProvider {
    overrides: MapConfigProvider,
    file: Option<TomlConfigProvider>,
}

impl ConfigProvider for LayeredProvider {
    fn get(&self, key: &str) -> Option<String> {
        self.overrides
            .get(key)
            .or_else(|| self.file.as_ref().and_then(|file| file.get(key)))
    }
}

impl LinkArgs {
    pub fn resolve(&self) -> Result<LinkConfig> {
        let path = match &self.config {
            Some(path) => Some(path.clone()),
            None => config_path().ok().filter(|path| path.exists()),
        };
        let file = match path {
            Some(path) => Some(
                TomlConfigProvider::load(&path)
                    .with_context(|| format!("failed to load {}", path.display()))?,
            ),
            None => None,
        };

        let mut overrides = MapConfigProvider::new();
        if let Some(vid) = &self.vid {
            overrides.set("vendor_id", vid.as_str());
        }
        if let Some(pid) = &self.pid {
            overrides.set("product_id", pid.as_str());
        }
        if let Some(speed) = &self.speed {
            overrides.set("device_speed", speed.as_str());
        }
        if let Some(protocol) = &self.protocol {
            overrides.set("protocol", protocol.as_str());
        }
        if let Some(max_retries) = self.max_retries {
            overrides.set("max_retries", max_retries.to_string());
        }

        let config = LinkConfig::from_provider(&LayeredProvider { overrides, file });
        debug!("Effective link config: {:?}", config);
        Ok(config)
    }
}

/// 把定位结果打印到标准输出
pub struct PrintLocationSink;

impl LocationSink for PrintLocationSink {
    fn report_fix(&self, fix: &Fix) {
        println!("{}", format_fix(fix));
    }

    fn out_of_service(&self) {
        eprintln!("location provider out of service");
    }
}

pub fn format_fix(fix: &Fix) -> String {
    let mut line = format!(
        "fix t={} lat={:.6} lon={:.6}",
        fix.timestamp_ms, fix.latitude, fix.longitude
    );
    if let Some(alt) = fix.altitude {
        line.push_str(&format!(" alt={alt:.1}m"));
    }
    if let Some(speed) = fix.speed_mps {
        line.push_str(&format!(" speed={speed:.2}m/s"));
    }
    if let Some(sats) = fix.satellites {
        line.push_str(&format!(" sats={sats}"));
    }
    if let Some(acc) = fix.accuracy_m {
        line.push_str(&format!(" acc={acc:.1}m"));
    }
    line
}

pub fn build_manager(location: Option<Arc<dyn LocationSink>>) -> Result<LinkManager> {
    let mut builder = LinkManagerBuilder::new();
    if let Some(location) = location {
        builder = builder.location_sink(location);
    }
    builder.build().context("failed to create link manager")
}

/// 安装 Ctrl+C 处理，返回运行标志
pub fn install_interrupt() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived interrupt signal. Shutting down...");
        flag.store(false, Ordering::SeqCst);
    })
    .context("failed to install Ctrl-C handler")?;
    Ok(running)
}

/// `0x06` / `06h` / `6`
pub fn parse_u8(value: &str) -> Result<u8> {
    let value = value.trim();
    let parsed = if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16)
    } else if let Some(hex) = value.strip_suffix('h') {
        u8::from_str_radix(hex, 16)
    } else {
        value.parse()
    };
    parsed.with_context(|| format!("invalid byte value {value:?}"))
}

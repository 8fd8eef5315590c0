//! 配置管理命令
//!
//! 配置文件是扁平的键值 TOML（与 `LinkConfig::from_provider` 读取的键一致），
//! 默认位于 `<config_dir>/usbgps/config.toml`。

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Subcommand;

use crate::utils::{LinkArgs, config_path};

const TEMPLATE: &str = r#"# usbgps-cli configuration

vendor_id = "0x1546"
product_id = "0x01a8"

# "auto" or a baud rate
device_speed = "auto"
max_retries = 5

# nmea | ubx | sirf
protocol = "nmea"

# retry_delay_ms = 1000

# Device initialisation (written once the link is streaming)
# nav_rate_hz = 1
# reset_odometer = false
# static_navigation = false

# Any sentence_* key takes over the receiver's sentence output
# sentence_gga = true
# sentence_rmc = true
# sentence_gsa = true
# sentence_gsv = true
# sentence_vtg = false
# sentence_gll = false
# sentence_zda = false
"#;

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 显示合并命令行参数后的有效配置
    Show {
        #[command(flatten)]
        link: LinkArgs,
    },

    /// 写入配置模板
    Init {
        /// 目标文件（默认使用用户配置目录）
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// 覆盖已有文件
        #[arg(long)]
        force: bool,
    },

    /// 打印默认配置文件路径
    Path,
}

impl ConfigCommand {
    pub fn execute(self) -> Result<()> {
        match self {
            ConfigCommand::Show { link } => {
                let config = link.resolve()?;
                print!("{}", toml::to_string_pretty(&config).context("failed to render config")?);
                Ok(())
            },
            ConfigCommand::Init { path, force } => {
                let path = match path {
                    Some(path) => path,
                    None => config_path()?,
                };
                write_template(&path, force)?;
                println!("Wrote {}", path.display());
                Ok(())
            },
            ConfigCommand::Path => {
                println!("{}", config_path()?.display());
                Ok(())
            },
        }
    }
}

fn write_template(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    fs::write(path, TEMPLATE).with_context(|| format!("failed to write {}", path.display()))
}

//! # USB GPS CLI
//!
//! 命令行工具，代替平台胶水层驱动链路。
//!
//! ```bash
//! # 列出 USB 设备
//! usbgps-cli devices
//!
//! # 接收并打印语句（Ctrl+C 退出）
//! usbgps-cli stream --vid 0x1546 --pid 0x01a8 --speed auto
//!
//! # 发送一条 SiRF 查询
//! usbgps-cli send --nmea PSRF103,00,01,00,01
//!
//! # 配置文件
//! usbgps-cli config init
//! usbgps-cli config show
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod utils;

use commands::{ChecksumCommand, ConfigCommand, DevicesCommand, SendCommand, StreamCommand};

/// USB GPS 接收机命令行工具
#[derive(Parser, Debug)]
#[command(name = "usbgps-cli")]
#[command(about = "Command-line interface for USB GPS receivers", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 列出已连接的 USB 设备
    Devices {
        #[command(flatten)]
        args: DevicesCommand,
    },

    /// 启动链路并打印接收到的数据
    Stream {
        #[command(flatten)]
        args: StreamCommand,
    },

    /// 发送一条命令并打印随后的回复
    Send {
        #[command(flatten)]
        args: SendCommand,
    },

    /// 计算 NMEA 校验和
    Checksum {
        #[command(flatten)]
        args: ChecksumCommand,
    },

    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),
}

fn main() -> Result<()> {
    utils::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices { args } => args.execute(),
        Commands::Stream { args } => args.execute(),
        Commands::Send { args } => args.execute(),
        Commands::Checksum { args } => args.execute(),
        Commands::Config(cmd) => cmd.execute(),
    }
}

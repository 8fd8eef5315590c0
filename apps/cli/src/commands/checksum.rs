//! NMEA 校验和

use anyhow::{Result, bail};
use clap::Args;
use usbgps_protocol::{OutgoingCommand, nmea_checksum_hex};

/// 计算 `$` 与 `*` 之间内容的校验和
#[derive(Args, Debug)]
pub struct ChecksumCommand {
    /// 语句内容，可带或不带 `$` 前缀
    pub body: String,

    /// 输出完整语句
    #[arg(short, long)]
    pub full: bool,
}

impl ChecksumCommand {
    pub fn execute(self) -> Result<()> {
        println!("{}", self.render()?);
        Ok(())
    }

    fn render(&self) -> Result<String> {
        let body = self.body.trim().trim_start_matches('$');
        let body = body.split('*').next().unwrap_or(body);
        if body.is_empty() {
            bail!("empty sentence body");
        }
        if self.full {
            let bytes = OutgoingCommand::nmea(body).encode()?;
            Ok(String::from_utf8_lossy(&bytes).trim_end().to_string())
        } else {
            Ok(nmea_checksum_hex(body.as_bytes()))
        }
    }
}

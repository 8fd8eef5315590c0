//! 发送单条命令

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Args;
use usbgps_driver::{DisableReason, Frame, OutgoingCommand};

use crate::utils::{LinkArgs, build_manager, parse_u8};

/// 启动链路、等待进入 Streaming、写入一条命令并打印随后收到的帧
#[derive(Args, Debug)]
#[command(group(clap::ArgGroup::new("payload").required(true).args(["nmea", "ubx", "sirf"])))]
pub struct SendCommand {
    #[command(flatten)]
    pub link: LinkArgs,

    /// NMEA 语句内容（不含 `$` 和校验和）
    #[arg(long)]
    pub nmea: Option<String>,

    /// UBX 消息：class id payload-hex
    #[arg(long, num_args = 3, value_names = ["CLASS", "ID", "HEX"])]
    pub ubx: Option<Vec<String>>,

    /// SiRF 消息负载（十六进制，首字节为消息 id）
    #[arg(long, value_name = "HEX")]
    pub sirf: Option<String>,

    /// 等待链路就绪的最长时间（秒）
    #[arg(long, default_value_t = 60)]
    pub wait: u64,

    /// 写入后打印回复的时长（秒）
    #[arg(long, default_value_t = 3)]
    pub listen: u64,
}

impl SendCommand {
    pub fn execute(self) -> Result<()> {
        let command = self.command()?;
        let config = self.link.resolve()?;
        let manager = build_manager(None)?;
        manager.try_enable(config).context("failed to enable GPS link")?;

        let result = manager.send_timeout(&command, Duration::from_secs(self.wait));
        if let Err(e) = result {
            manager.disable(DisableReason::UserRequest);
            bail!("failed to send command: {}", e);
        }
        eprintln!("sent {:?}", command);

        // 只打印写入之后的帧
        manager.register_frame_listener(Arc::new(|frame: &Frame| println!("{}", frame)));
        let until = Instant::now() + Duration::from_secs(self.listen);
        while Instant::now() < until && manager.is_enabled() {
            std::thread::sleep(Duration::from_millis(50));
        }

        manager.disable(DisableReason::UserRequest);
        Ok(())
    }

    fn command(&self) -> Result<OutgoingCommand> {
        let command = if let Some(body) = &self.nmea {
            OutgoingCommand::nmea(body.trim().trim_start_matches('$'))
        } else if let Some(parts) = &self.ubx {
            let [class, id, payload] = parts.as_slice() else {
                bail!("--ubx expects CLASS ID HEX");
            };
            OutgoingCommand::ubx(parse_u8(class)?, parse_u8(id)?, decode_hex(payload)?)
        } else if let Some(payload) = &self.sirf {
            OutgoingCommand::Sirf(decode_hex(payload)?)
        } else {
            bail!("one of --nmea, --ubx or --sirf is required");
        };
        // 提前暴露编码错误，避免先打开设备
        command.encode()?;
        Ok(command)
    }
}

/// 允许空格和 `-`/`:` 分隔；`-` 表示空负载
fn decode_hex(text: &str) -> Result<Vec<u8>> {
    if text == "-" {
        return Ok(Vec::new());
    }
    let compact: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != '-')
        .collect();
    hex::decode(&compact).with_context(|| format!("invalid hex payload {text:?}"))
}

//! 列出 USB 设备

use anyhow::{Context, Result};
use clap::Args;
use usbgps_usb::{DeviceProvider, RusbTransport};

/// 列出设备
#[derive(Args, Debug)]
pub struct DevicesCommand {
    /// 只显示匹配该 vendor id 的设备（十六进制）
    #[arg(long, value_parser = parse_hex_u16)]
    pub vid: Option<u16>,
}

impl DevicesCommand {
    pub fn execute(self) -> Result<()> {
        let transport = RusbTransport::new();
        let devices = transport.devices().context("failed to enumerate USB devices")?;

        let mut shown = 0;
        for device in devices
            .iter()
            .filter(|d| self.vid.is_none_or(|vid| d.vendor_id == vid))
        {
            let permission = if transport.has_permission(device) { "" } else { " [no access]" };
            println!("{}{}", device, permission);
            shown += 1;
        }
        if shown == 0 {
            println!("(no devices)");
        }
        Ok(())
    }
}

fn parse_hex_u16(value: &str) -> Result<u16, String> {
    let hex = value.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(hex, 16).map_err(|e| format!("invalid vendor id {value:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_u16() {
        assert_eq!(parse_hex_u16("0x1546"), Ok(0x1546));
        assert_eq!(parse_hex_u16("10c4"), Ok(0x10C4));
        assert!(parse_hex_u16("xyz").is_err());
    }
}

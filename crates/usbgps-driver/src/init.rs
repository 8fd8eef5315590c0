//! 连接建立后的设备初始化命令
//!
//! 速率协商成功后，在任何用户命令之前按顺序写入设备。

use usbgps_protocol::nmea::{StandardSentence, psrf103_body};
use usbgps_protocol::{OutgoingCommand, ProtocolMode, sirf, ubx};

use crate::config::FeatureToggles;

/// 按协议模式和特性开关生成初始化命令
pub fn init_commands(protocol: ProtocolMode, features: &FeatureToggles) -> Vec<OutgoingCommand> {
    let mut commands = Vec::new();
    match protocol {
        ProtocolMode::Ubx => {
            if features.nav_rate_hz > 0 {
                commands.push(ubx::cfg_rate(features.nav_rate_hz));
            }
            if features.reset_odometer {
                commands.push(ubx::nav_reset_odometer());
            }
            if features.static_navigation {
                commands.push(ubx::cfg_nav5_static_hold(true));
            }
            if let Some(flags) = features.sentences {
                for sentence in StandardSentence::ALL {
                    commands.push(ubx::cfg_msg_nmea(sentence, flags.is_enabled(sentence) as u8));
                }
            }
        },
        ProtocolMode::Sirf => {
            if features.static_navigation {
                commands.push(sirf::static_navigation(true));
            }
        },
        ProtocolMode::Nmea => {
            // SiRF 芯片在 NMEA 模式下接受 PSRF103 查询/速率控制，其它芯片忽略
            if let Some(flags) = features.sentences {
                for sentence in StandardSentence::ALL {
                    let rate = if flags.is_enabled(sentence) { 1 } else { 0 };
                    commands.push(OutgoingCommand::nmea(psrf103_body(sentence, rate)));
                }
            }
        },
    }
    commands
}

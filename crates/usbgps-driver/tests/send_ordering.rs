//! 命令发送：阻塞到 Streaming、初始化命令优先、停止时立即失败

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{Harness, fast_config, wait_until};
use usbgps_driver::{DisableReason, LinkError, LinkState, OutgoingCommand, SentenceFlags};

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn test_send_before_enable_is_disabled() {
    let harness = Harness::new();
    let command = OutgoingCommand::nmea("PSRF101");
    assert!(matches!(harness.manager.send(&command), Err(LinkError::Disabled)));
    assert!(harness.device.writes().is_empty());
}

#[test]
fn test_init_commands_precede_user_command() {
    let harness = Harness::new();
    harness.produce(Some(9600));

    let mut config = fast_config(2);
    config.features.sentences = Some(SentenceFlags::default());
    assert!(harness.manager.enable(config));

    // 在协商完成前发出，阻塞到 Streaming
    let user = OutgoingCommand::nmea("PSRF125");
    harness.manager.send(&user).unwrap();
    assert_eq!(harness.manager.state(), LinkState::Streaming);

    let writes = harness.device.writes();
    assert_eq!(writes.len(), 8);
    for write in &writes[..7] {
        assert!(write.bytes.starts_with(b"$PSRF103,"));
    }
    assert_eq!(writes[7].bytes, user.encode().unwrap());
    for write in &writes {
        assert!(write.device_live);
        assert_eq!(write.line_speed, Some(9600));
    }
    assert_eq!(harness.manager.metrics().commands_sent, 8);

    harness.manager.disable(DisableReason::UserRequest);
}

#[test]
fn test_disable_unblocks_waiting_send() {
    let harness = Arc::new(Harness::new());
    // 设备不输出：链路停留在协商阶段
    assert!(harness.manager.enable(fast_config(5)));

    let sender = {
        let harness = harness.clone();
        thread::spawn(move || harness.manager.send(&OutgoingCommand::nmea("PSRF101")))
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!sender.is_finished());

    harness.manager.disable(DisableReason::UserRequest);
    let result = sender.join().unwrap();
    assert!(matches!(result, Err(LinkError::Disabled)));
    assert!(harness.device.writes().is_empty());
}

#[test]
fn test_send_timeout_while_negotiating() {
    let harness = Harness::new();
    assert!(harness.manager.enable(fast_config(5)));

    let result = harness
        .manager
        .send_timeout(&OutgoingCommand::nmea("PSRF101"), Duration::from_millis(30));
    assert!(matches!(result, Err(LinkError::Timeout)));

    harness.manager.disable(DisableReason::UserRequest);
}

#[test]
fn test_send_after_fatal_stop_is_disabled() {
    let harness = Harness::new();
    assert!(harness.manager.enable(fast_config(0)));
    assert!(harness.wait_for_state(LinkState::FatalStopped, WAIT));

    let result = harness.manager.send(&OutgoingCommand::nmea("PSRF101"));
    assert!(matches!(result, Err(LinkError::Disabled)));
}

#[test]
fn test_send_resumes_after_reconnect() {
    let harness = Harness::new();
    harness.produce(None);
    assert!(harness.manager.enable(fast_config(3)));
    assert!(harness.wait_for_state(LinkState::Streaming, WAIT));

    harness.device.stop_producing();
    assert!(wait_until(WAIT, || matches!(
        harness.manager.state(),
        LinkState::Retrying { .. }
    )));

    let resume = {
        let device = harness.device.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            device.resume_producing();
        })
    };
    harness.manager.send(&OutgoingCommand::nmea("PSRF101")).unwrap();
    resume.join().unwrap();

    assert_eq!(harness.device.open_count(), 2);
    assert_eq!(harness.device.writes().len(), 1);
    harness.manager.disable(DisableReason::UserRequest);
}

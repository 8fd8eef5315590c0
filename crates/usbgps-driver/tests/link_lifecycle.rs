//! 链路生命周期集成测试
//!
//! 启用前置条件、重试预算、速率协商、空闲超时、拔出重连与停止。

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::{Diagnostic, Harness, fast_config, wait_until};
use usbgps_driver::{
    DeviceEvent, DisableReason, LinkError, LinkEvent, LinkState, LocationStatus,
    MapConfigProvider,
};
use usbgps_usb::mock::{MockDevice, MockTransport};

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn test_enable_fails_closed_without_device() {
    let transport = MockTransport::new();
    let device = MockDevice::new(common::VID, common::PID);
    // 设备存在于脚本中但没有插入 transport
    let harness = Harness::with_transport(transport, device);

    assert!(!harness.manager.enable(fast_config(2)));
    assert_eq!(harness.manager.state(), LinkState::Disabled);
    assert_eq!(harness.manager.disable_reason(), Some(DisableReason::DeviceNotFound));
    assert_eq!(harness.manager.metrics().connect_attempts, 0);
    assert_eq!(harness.device.open_count(), 0);

    match harness.manager.try_enable(fast_config(2)) {
        Err(LinkError::DeviceNotFound { vendor_id, product_id }) => {
            assert_eq!((vendor_id, product_id), (common::VID, common::PID));
        },
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_enable_fails_closed_when_mock_location_disabled() {
    let harness = Harness::new();
    *harness.location.status.lock() = LocationStatus::MockLocationDisabled;

    assert!(!harness.manager.enable(fast_config(2)));
    assert_eq!(harness.manager.state(), LinkState::Disabled);
    assert_eq!(
        harness.manager.disable_reason(),
        Some(DisableReason::MockLocationDisabled)
    );
    assert_eq!(harness.device.open_count(), 0);

    *harness.location.status.lock() = LocationStatus::PermissionMissing;
    assert!(!harness.manager.enable(fast_config(2)));
    assert_eq!(harness.manager.disable_reason(), Some(DisableReason::PermissionDenied));
}

#[test]
fn test_retry_budget_exhaustion_sequence() {
    let harness = Harness::new();
    // 设备不输出任何数据：每次连接都在宽限期后失败

    assert!(harness.manager.enable(fast_config(2)));
    assert!(harness.wait_for_state(LinkState::FatalStopped, WAIT));
    assert!(wait_until(WAIT, || harness.state_changes().contains(&LinkState::FatalStopped)));

    let problems: Vec<LinkState> = harness
        .state_changes()
        .into_iter()
        .filter(|s| matches!(s, LinkState::Retrying { .. } | LinkState::FatalStopped))
        .collect();
    assert_eq!(
        problems,
        vec![
            LinkState::Retrying { remaining: 2 },
            LinkState::Retrying { remaining: 1 },
            LinkState::Retrying { remaining: 0 },
            LinkState::FatalStopped,
        ]
    );

    assert_eq!(harness.manager.disable_reason(), Some(DisableReason::RetriesExhausted));
    assert_eq!(
        harness.diagnostics.count(|d| matches!(d, Diagnostic::Fatal(_))),
        1
    );
    assert_eq!(
        harness
            .diagnostics
            .count(|d| *d == Diagnostic::Retrying(DisableReason::NegotiationTimeout, 1)),
        1
    );
    assert_eq!(*harness.location.out_of_service.lock(), 1);
    assert_eq!(harness.device.open_count(), 3);

    // 不再安排新的连接
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(harness.device.open_count(), 3);
    assert_eq!(harness.manager.state(), LinkState::FatalStopped);
}

#[test]
fn test_retry_budget_resets_on_first_frame() {
    let harness = Harness::new();
    harness.device.set_output(common::EPOCH.to_vec(), Duration::from_millis(5));
    harness.device.stop_producing();

    // 第二次失败（Retrying(1)）后设备恢复输出
    let resumed = Arc::new(AtomicBool::new(false));
    {
        let device = harness.device.clone();
        let resumed = resumed.clone();
        harness
            .manager
            .register_event_listener(Arc::new(move |event: &LinkEvent| {
                if *event == LinkEvent::StateChanged(LinkState::Retrying { remaining: 1 }) {
                    device.resume_producing();
                    resumed.store(true, Ordering::SeqCst);
                }
            }));
    }

    assert!(harness.manager.enable(fast_config(2)));
    assert!(harness.wait_for_state(LinkState::Streaming, WAIT));
    assert!(resumed.load(Ordering::SeqCst));
    assert_eq!(harness.manager.retries_remaining(), 2);

    assert!(wait_until(WAIT, || harness.events.lock().contains(&LinkEvent::ProblemCleared)));
    assert_eq!(harness.diagnostics.count(|d| *d == Diagnostic::Cleared), 1);
    assert_eq!(
        harness
            .events
            .lock()
            .iter()
            .filter(|e| **e == LinkEvent::ProblemCleared)
            .count(),
        1
    );

    harness.manager.disable(DisableReason::UserRequest);
}

#[test]
fn test_negotiation_settles_on_live_speed() {
    let harness = Harness::new();
    harness.produce(Some(9600));

    assert!(harness.manager.enable(fast_config(3)));
    assert!(harness.wait_for_state(LinkState::Streaming, WAIT));
    assert_eq!(harness.manager.selected_speed(), Some(9600));
    assert!(wait_until(WAIT, || harness.events.lock().contains(&LinkEvent::SpeedSelected(9600))));

    // 默认候选顺序 4800 → 1200 → 2400 → 9600，停在 9600
    assert_eq!(harness.device.applied_speeds(), vec![4800, 1200, 2400, 9600]);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(harness.device.applied_speeds(), vec![4800, 1200, 2400, 9600]);

    harness.manager.disable(DisableReason::UserRequest);
}

#[test]
fn test_reconnect_tries_last_good_speed_first() {
    let harness = Harness::new();
    harness.produce(Some(19200));

    assert!(harness.manager.enable(fast_config(3)));
    assert!(harness.wait_for_state(LinkState::Streaming, WAIT));
    let first_round = harness.device.applied_speeds().len();

    // 停止输出 → 空闲超时 → 重连
    harness.device.stop_producing();
    assert!(wait_until(WAIT, || matches!(
        harness.manager.state(),
        LinkState::Retrying { .. }
    )));
    harness.device.resume_producing();
    assert!(harness.wait_for_state(LinkState::Streaming, WAIT));

    let speeds = harness.device.applied_speeds();
    assert_eq!(speeds[first_round], 19200);
    assert_eq!(speeds.len(), first_round + 1);
    assert_eq!(
        harness
            .diagnostics
            .count(|d| *d == Diagnostic::Retrying(DisableReason::ConnectionLost, 3)),
        1
    );

    harness.manager.disable(DisableReason::UserRequest);
}

#[test]
fn test_fixed_speed_skips_probing() {
    let harness = Harness::new();
    harness.produce(None);

    let mut config = fast_config(1);
    config.speed = usbgps_driver::SpeedSetting::Fixed(57600);
    assert!(harness.manager.enable(config));
    assert!(harness.wait_for_state(LinkState::Streaming, WAIT));
    assert_eq!(harness.device.applied_speeds(), vec![57600]);
    assert_eq!(harness.manager.selected_speed(), Some(57600));

    harness.manager.disable(DisableReason::UserRequest);
}

#[test]
fn test_idle_timeout_triggers_retry() {
    let harness = Harness::new();
    harness.produce(None);

    assert!(harness.manager.enable(fast_config(2)));
    assert!(harness.wait_for_state(LinkState::Streaming, WAIT));

    harness.device.stop_producing();
    // 空闲超时前不应离开 Streaming
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(harness.manager.state(), LinkState::Streaming);

    assert!(wait_until(WAIT, || harness.diagnostics.count(|d| matches!(
        d,
        Diagnostic::Retrying(DisableReason::ConnectionLost, 2)
    )) == 1));

    harness.manager.disable(DisableReason::UserRequest);
}

#[test]
fn test_fixes_reach_location_sink_and_clock_once() {
    let harness = Harness::new();
    harness.produce(None);

    assert!(harness.manager.enable(fast_config(2)));
    assert!(harness.wait_for_state(LinkState::Streaming, WAIT));
    assert!(wait_until(WAIT, || !harness.location.fixes.lock().is_empty()));
    // 同一时刻的重复历元只产生一个定位结果
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(harness.location.fixes.lock().len(), 1);

    let fix = harness.location.fixes.lock()[0].clone();
    assert!((fix.latitude - 48.1173).abs() < 1e-4);
    assert_eq!(fix.satellites, Some(8));
    assert_eq!(harness.clock.times.lock().as_slice(), &[fix.timestamp_ms]);

    harness.manager.disable(DisableReason::UserRequest);
}

#[test]
fn test_detach_reconnects() {
    let harness = Harness::new();
    harness.produce(None);

    assert!(harness.manager.enable(fast_config(2)));
    assert!(harness.wait_for_state(LinkState::Streaming, WAIT));

    harness
        .manager
        .handle_device_event(&DeviceEvent::Detached(harness.device.info()));
    assert!(wait_until(WAIT, || harness.diagnostics.count(|d| matches!(
        d,
        Diagnostic::Retrying(DisableReason::DeviceDetached, _)
    )) == 1));

    // 设备仍然在：延迟后重新连接
    assert!(harness.wait_for_state(LinkState::Streaming, WAIT));
    assert_eq!(harness.device.open_count(), 2);

    harness.manager.disable(DisableReason::UserRequest);
}

#[test]
fn test_permission_denied_is_fatal() {
    let harness = Harness::new();
    harness.device.set_permission(false);

    assert!(harness.manager.enable(fast_config(2)));
    assert!(harness.wait_for_state(LinkState::FatalStopped, WAIT));
    assert_eq!(harness.manager.disable_reason(), Some(DisableReason::PermissionDenied));
    assert!(harness.state_changes().contains(&LinkState::AwaitingPermission));
    assert_eq!(harness.device.open_count(), 0);
    assert_eq!(*harness.location.out_of_service.lock(), 1);
}

#[test]
fn test_disable_is_idempotent() {
    let harness = Harness::new();
    harness.produce(None);

    assert!(harness.manager.enable(fast_config(2)));
    assert!(harness.wait_for_state(LinkState::Streaming, WAIT));
    let listener = harness
        .manager
        .register_frame_listener(Arc::new(|_: &usbgps_driver::Frame| {}));

    harness.manager.disable(DisableReason::UserRequest);
    harness.manager.disable(DisableReason::UserRequest);

    assert_eq!(harness.manager.state(), LinkState::Disabled);
    assert_eq!(harness.manager.disable_reason(), Some(DisableReason::UserRequest));
    // 监听器已被清空
    assert!(!harness.manager.unregister_frame_listener(listener));

    let opens = harness.device.open_count();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(harness.device.open_count(), opens);
}

#[test]
fn test_reenable_after_fatal_resets_budget() {
    let harness = Harness::new();

    assert!(harness.manager.enable(fast_config(0)));
    assert!(harness.wait_for_state(LinkState::FatalStopped, WAIT));
    assert_eq!(harness.manager.disable_reason(), Some(DisableReason::RetriesExhausted));

    harness.produce(None);
    assert!(harness.manager.enable(fast_config(1)));
    assert_eq!(harness.manager.disable_reason(), None);
    assert!(harness.wait_for_state(LinkState::Streaming, WAIT));
    assert_eq!(harness.manager.retries_remaining(), 1);

    harness.manager.disable(DisableReason::UserRequest);
}

#[test]
fn test_refused_reenable_after_fatal_is_disabled() {
    let harness = Harness::new();

    assert!(harness.manager.enable(fast_config(0)));
    assert!(harness.wait_for_state(LinkState::FatalStopped, WAIT));

    *harness.location.status.lock() = LocationStatus::MockLocationDisabled;
    assert!(!harness.manager.enable(fast_config(0)));
    assert_eq!(harness.manager.state(), LinkState::Disabled);
    assert!(!harness.manager.is_enabled());
    assert_eq!(
        harness.manager.disable_reason(),
        Some(DisableReason::MockLocationDisabled)
    );

    // 前置条件恢复后可以正常启动
    *harness.location.status.lock() = LocationStatus::Ready;
    harness.produce(None);
    assert!(harness.manager.enable(fast_config(1)));
    assert!(harness.wait_for_state(LinkState::Streaming, WAIT));

    harness.manager.disable(DisableReason::UserRequest);
}

#[test]
fn test_enable_from_key_value_config() {
    let harness = Harness::new();
    harness.produce(Some(4800));

    let mut provider = MapConfigProvider::new();
    provider
        .set("vendor_id", format!("{}", common::VID))
        .set("product_id", format!("{}", common::PID))
        .set("device_speed", "4800")
        .set("max_retries", "1");
    // 时序参数只能通过结构化配置缩短，这里只验证键值读取路径能启动链路
    assert!(harness.manager.enable_from(&provider));
    assert_eq!(harness.manager.config().max_retries, 1);
    assert!(harness.wait_for_state(LinkState::Streaming, WAIT));
    assert_eq!(harness.manager.selected_speed(), Some(4800));

    harness.manager.disable(DisableReason::UserRequest);
    assert_eq!(harness.manager.state(), LinkState::Disabled);
}

//! 接收并打印数据

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Args;
use usbgps_driver::{DisableReason, Frame, LinkEvent, LinkState, LocationSink};

use crate::utils::{LinkArgs, PrintLocationSink, build_manager, install_interrupt};

/// 启动链路并打印帧或定位结果，Ctrl+C 退出
#[derive(Args, Debug)]
pub struct StreamCommand {
    #[command(flatten)]
    pub link: LinkArgs,

    /// 打印定位结果而不是原始帧
    #[arg(long)]
    pub fixes: bool,

    /// 打印链路事件（状态变化、线速率）
    #[arg(long)]
    pub events: bool,
}

impl StreamCommand {
    pub fn execute(self) -> Result<()> {
        let config = self.link.resolve()?;
        let location: Option<Arc<dyn LocationSink>> = if self.fixes {
            Some(Arc::new(PrintLocationSink))
        } else {
            None
        };
        let manager = build_manager(location)?;

        if !self.fixes {
            manager.register_frame_listener(Arc::new(|frame: &Frame| println!("{}", frame)));
        }
        if self.events {
            manager.register_event_listener(Arc::new(|event: &LinkEvent| match event {
                LinkEvent::StateChanged(state) => eprintln!("state: {}", state),
                LinkEvent::SpeedSelected(speed) => eprintln!("line speed: {} baud", speed),
                LinkEvent::ProblemCleared => eprintln!("link recovered"),
            }));
        }

        let running = install_interrupt()?;
        if let Err(e) = manager.try_enable(config) {
            bail!("failed to enable GPS link: {}", e);
        }

        while running.load(Ordering::SeqCst) {
            if manager.state() == LinkState::FatalStopped {
                let reason = manager.disable_reason().unwrap_or(DisableReason::ConnectionLost);
                manager.disable(reason);
                bail!("GPS link stopped: {}", reason);
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        manager.disable(DisableReason::UserRequest);
        let metrics = manager.metrics();
        eprintln!(
            "{} bytes, {} frames, {} checksum failures, {} connects",
            metrics.bytes_read, metrics.frames_valid, metrics.checksum_failures, metrics.connect_attempts
        );
        Ok(())
    }
}

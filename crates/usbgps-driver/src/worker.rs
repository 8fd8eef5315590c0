//! 连接工作线程
//!
//! 一个运行周期对应一个 `usbgps-worker` 线程。它串行处理邮箱中的命令：
//! 打开设备、启动读线程、协商速率、处理读线程退出并按重试预算安排重连。
//! 重连延迟通过带截止时间的 `recv` 实现，停止命令可以立即打断等待。

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, warn};
use usbgps_usb::{DeviceErrorKind, PermissionResult, TransportError, UsbDeviceInfo};

use crate::config::LinkConfig;
use crate::dispatcher::{Dispatch, LinkEvent};
use crate::error::DisableReason;
use crate::init::init_commands;
use crate::manager::Shared;
use crate::negotiator::{NegotiationOutcome, SpeedNegotiator};
use crate::permission::PermissionFlow;
use crate::reader::{LinkReader, ReaderExit};
use crate::retry::RetryDecision;
use crate::session::LinkSession;
use crate::state::LinkState;
use crate::thread::{JoinTimeout, spawn_named};

/// 工作线程邮箱命令
#[derive(Debug)]
pub(crate) enum WorkerCommand {
    /// 立即尝试连接
    Connect,
    /// 请求 USB 授权
    RequestPermission(UsbDeviceInfo),
    Permission(PermissionResult),
    /// 读线程退出
    ReaderExited { generation: u64, exit: ReaderExit },
    DeviceAttached(UsbDeviceInfo),
    Shutdown,
}

pub(crate) struct Worker {
    shared: Arc<Shared>,
    config: LinkConfig,
    tx: Sender<WorkerCommand>,
    rx: Receiver<WorkerCommand>,
    dispatch: Sender<Dispatch>,
    permission: PermissionFlow,
    generation: u64,
    reader: Option<JoinHandle<()>>,
    next_connect: Option<Instant>,
    stopped: bool,
}

impl Worker {
    pub fn new(
        shared: Arc<Shared>,
        config: LinkConfig,
        tx: Sender<WorkerCommand>,
        rx: Receiver<WorkerCommand>,
        dispatch: Sender<Dispatch>,
    ) -> Self {
        Self {
            shared,
            config,
            tx,
            rx,
            dispatch,
            permission: PermissionFlow::new(),
            generation: 0,
            reader: None,
            next_connect: None,
            stopped: false,
        }
    }

    pub fn run(mut self) {
        debug!("Link worker started");
        while !self.stopped {
            let command = match self.next_connect {
                Some(at) => match self.rx.recv_deadline(at) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => WorkerCommand::Connect,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match self.rx.recv() {
                    Ok(command) => command,
                    Err(_) => break,
                },
            };

            match command {
                WorkerCommand::Connect => {
                    self.next_connect = None;
                    self.connect();
                },
                WorkerCommand::RequestPermission(device) => self.request_permission(device),
                WorkerCommand::Permission(PermissionResult::Granted) => {
                    if self.shared.state.get() == LinkState::AwaitingPermission {
                        info!("USB permission granted");
                        self.connect();
                    }
                },
                WorkerCommand::Permission(PermissionResult::Denied) => {
                    warn!("USB permission denied");
                    self.fatal(DisableReason::PermissionDenied);
                },
                WorkerCommand::ReaderExited { generation, exit } => {
                    if generation == self.generation {
                        self.on_reader_exit(exit);
                    } else {
                        debug!("Ignoring exit of stale reader #{}", generation);
                    }
                },
                WorkerCommand::DeviceAttached(device) => self.on_attached(device),
                WorkerCommand::Shutdown => break,
            }
        }
        self.teardown();
        debug!("Link worker exiting");
    }

    fn request_permission(&mut self, device: UsbDeviceInfo) {
        let tx = self.tx.clone();
        self.permission
            .request(self.shared.provider.as_ref(), &device, move |result| {
                let _ = tx.send(WorkerCommand::Permission(result));
            });
    }

    fn on_attached(&mut self, device: UsbDeviceInfo) {
        if !device.matches(self.config.vendor_id, self.config.product_id) {
            return;
        }
        match self.shared.state.get() {
            LinkState::AwaitingPermission => {
                if self.shared.provider.has_permission(&device) {
                    self.connect();
                } else {
                    self.request_permission(device);
                }
            },
            LinkState::Retrying { .. } if self.next_connect.is_some() => {
                debug!("Device {} re-attached, reconnecting now", device);
                self.next_connect = Some(Instant::now());
            },
            _ => {},
        }
    }

    /// 一次连接尝试：打开设备、启动读线程、协商速率（阻塞最长一个宽限期）
    fn connect(&mut self) {
        if !self.shared.transition(LinkState::Negotiating) {
            return;
        }
        self.shared.metrics.connect_attempts.fetch_add(1, Ordering::Relaxed);

        let device = match self
            .shared
            .provider
            .find(self.config.vendor_id, self.config.product_id)
        {
            Ok(Some(device)) => device,
            Ok(None) => {
                warn!(
                    "Device {:04x}:{:04x} not attached",
                    self.config.vendor_id, self.config.product_id
                );
                return self.on_failure(DisableReason::DeviceNotFound);
            },
            Err(e) => {
                warn!("Device enumeration failed: {}", e);
                return self.on_failure(DisableReason::DeviceNotFound);
            },
        };

        let connection = match self.shared.transport.open(&device) {
            Ok(connection) => connection,
            Err(TransportError::Device(e)) if e.kind == DeviceErrorKind::AccessDenied => {
                warn!("Access to {} denied: {}", device, e);
                return self.fatal(DisableReason::PermissionDenied);
            },
            Err(e) => {
                warn!("Failed to open {}: {}", device, e);
                return self.on_failure(DisableReason::ConnectionLost);
            },
        };

        self.generation += 1;
        let session = Arc::new(LinkSession::new(self.generation, connection));
        *self.shared.session.lock() = Some(session.clone());
        // disable() 可能在打开期间完成了 close_session()
        if !self.shared.state.get().is_active() {
            session.close();
            self.shared.session.lock().take();
            return;
        }
        let _ = self.dispatch.send(Dispatch::ConnectionOpened);

        if let Err(e) = self.spawn_reader(session.clone()) {
            error!("{}", e);
            session.close();
            self.shared.session.lock().take();
            return self.on_failure(DisableReason::ConnectionLost);
        }
        info!("Connected to {} (connection #{})", device, self.generation);

        let last_good = match self.shared.last_good_speed.load(Ordering::Acquire) {
            0 => None,
            speed => Some(speed),
        };
        let negotiator = SpeedNegotiator::new(last_good, &self.config.timings);
        match negotiator.negotiate(&session, self.config.speed) {
            NegotiationOutcome::Settled(speed) => self.on_settled(&session, speed),
            // 读线程在同一宽限期截止时退出，由 on_reader_exit 接手
            NegotiationOutcome::Failed => debug!("No valid frames at any line speed"),
            NegotiationOutcome::Cancelled => debug!("Speed negotiation cancelled"),
        }
    }

    fn spawn_reader(&mut self, session: Arc<LinkSession>) -> Result<(), crate::LinkError> {
        let reader = LinkReader::new(
            session,
            self.config.protocol,
            self.config.timings,
            self.shared.metrics.clone(),
        );
        let shared = self.shared.clone();
        let dispatch = self.dispatch.clone();
        let tx = self.tx.clone();
        let generation = self.generation;

        let handle = spawn_named("usbgps-reader", move || {
            let mut first = true;
            let exit = reader.run(|frame| {
                if first {
                    first = false;
                    shared.on_first_frame();
                }
                if dispatch.send(Dispatch::Frame(frame)).is_err() {
                    shared.metrics.frames_dropped.fetch_add(1, Ordering::Relaxed);
                }
            });
            debug!("Reader #{} exited: {:?}", generation, exit);
            let _ = tx.send(WorkerCommand::ReaderExited { generation, exit });
        })?;
        self.reader = Some(handle);
        Ok(())
    }

    /// 速率确定：进入 Streaming 并在任何用户命令之前写入初始化命令
    fn on_settled(&mut self, session: &LinkSession, speed: u32) {
        self.shared.selected_speed.store(speed, Ordering::Release);
        self.shared.last_good_speed.store(speed, Ordering::Release);
        self.shared.post(LinkEvent::SpeedSelected(speed));

        let _write = self.shared.write_lock.lock();
        if session.is_closed() || !self.shared.transition(LinkState::Streaming) {
            return;
        }

        let timeout = self.config.timings.write_timeout();
        for command in init_commands(self.config.protocol, &self.config.features) {
            let bytes = match command.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Skipping invalid init command {:?}: {}", command, e);
                    continue;
                },
            };
            match session.connection.write(&bytes, timeout) {
                Ok(_) => {
                    self.shared.metrics.commands_sent.fetch_add(1, Ordering::Relaxed);
                },
                Err(e) => warn!("Failed to write init command: {}", e),
            }
        }
    }

    fn on_reader_exit(&mut self, exit: ReaderExit) {
        if let Some(handle) = self.reader.take()
            && handle.join_timeout(self.config.timings.shutdown_timeout()).is_err()
        {
            error!("Reader thread did not stop in time");
        }
        if let Some(session) = self.shared.session.lock().take() {
            session.close();
        }
        if !self.shared.state.get().is_active() {
            return;
        }

        let reason = if self.shared.detached.swap(false, Ordering::AcqRel) {
            DisableReason::DeviceDetached
        } else {
            match exit {
                ReaderExit::NoFrames => DisableReason::NegotiationTimeout,
                ReaderExit::IdleTimeout | ReaderExit::Closed => DisableReason::ConnectionLost,
            }
        };
        info!("Connection #{} ended: {}", self.generation, reason);
        self.on_failure(reason);
    }

    /// 失败一次：进入 Retrying，按预算重连或致命停止
    fn on_failure(&mut self, reason: DisableReason) {
        let decision = self.shared.budget.lock().on_failure();
        let remaining = match decision {
            RetryDecision::Retry { remaining } => remaining,
            RetryDecision::Exhausted => 0,
        };
        if !self.shared.transition(LinkState::Retrying { remaining }) {
            return;
        }
        self.shared.problem_pending.store(true, Ordering::Release);
        self.shared.diagnostics.retrying(reason, remaining);

        match decision {
            RetryDecision::Retry { .. } => {
                let delay = self.config.timings.retry_delay();
                debug!("Reconnecting in {:?}", delay);
                self.next_connect = Some(Instant::now() + delay);
            },
            RetryDecision::Exhausted => self.fatal(DisableReason::RetriesExhausted),
        }
    }

    fn fatal(&mut self, reason: DisableReason) {
        self.next_connect = None;
        self.stopped = true;
        if !self.shared.transition(LinkState::FatalStopped) {
            return;
        }
        *self.shared.disable_reason.lock() = Some(reason);
        self.shared.close_session();
        self.shared.diagnostics.fatal_stop(reason);
        self.shared.location.out_of_service();
    }

    fn teardown(&mut self) {
        self.shared.close_session();
        if let Some(handle) = self.reader.take()
            && handle.join_timeout(self.config.timings.shutdown_timeout()).is_err()
        {
            error!("Reader thread did not stop within {:?}", self.config.timings.shutdown_timeout());
        }
    }
}

//! 链路管理器（对外 API）
//!
//! # 线程模型
//!
//! 一个运行周期（`enable()` 到 `disable()`）内有三个后台线程：
//!
//! - `usbgps-worker`：打开设备、速率协商、重试调度（唯一驱动状态机前进的线程）
//! - `usbgps-reader`：每个连接一个，阻塞读取并解码
//! - `usbgps-dispatch`：按顺序把帧和事件交给监听器
//!
//! 状态只保存在 [`StateCell`] 中，`send()` 通过条件变量等待 `Streaming`，不轮询。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use arc_swap::{ArcSwap, ArcSwapOption};
use crossbeam_channel::{Sender, unbounded};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use usbgps_protocol::OutgoingCommand;
use usbgps_usb::{DeviceEvent, DeviceProvider, Transport, TransportError};

use crate::config::{ConfigProvider, LinkConfig};
use crate::dispatcher::{
    Dispatch, DispatchContext, EventDispatcher, EventListener, FrameListener, LinkEvent, ListenerId,
    ListenerRegistry,
};
use crate::error::{DisableReason, LinkError};
use crate::metrics::{LinkMetrics, LinkMetricsSnapshot};
use crate::retry::RetryBudget;
use crate::session::LinkSession;
use crate::sinks::{ClockSetter, DiagnosticsSink, LocationSink, LocationStatus};
use crate::state::{LinkState, StateCell};
use crate::thread::{JoinTimeout, spawn_named};
use crate::worker::{Worker, WorkerCommand};

/// 所有线程共享的链路状态
pub(crate) struct Shared {
    pub state: StateCell,
    pub config: ArcSwap<LinkConfig>,
    pub registry: Arc<ListenerRegistry>,
    pub metrics: Arc<LinkMetrics>,
    pub transport: Arc<dyn Transport>,
    pub provider: Arc<dyn DeviceProvider>,
    pub location: Arc<dyn LocationSink>,
    pub diagnostics: Arc<dyn DiagnosticsSink>,
    pub clock: Option<Arc<dyn ClockSetter>>,
    pub budget: Mutex<RetryBudget>,
    pub disable_reason: Mutex<Option<DisableReason>>,
    pub session: Mutex<Option<Arc<LinkSession>>>,
    pub dispatch: ArcSwapOption<Sender<Dispatch>>,
    /// 已向诊断报告瞬态问题、尚未清除
    pub problem_pending: AtomicBool,
    /// 当前连接因拔出而关闭
    pub detached: AtomicBool,
    /// 0 = 无
    pub last_good_speed: AtomicU32,
    pub selected_speed: AtomicU32,
    /// 串行化设备写入：初始化命令总是先于用户命令
    pub write_lock: Mutex<()>,
}

impl Shared {
    pub fn post(&self, event: LinkEvent) {
        if let Some(tx) = self.dispatch.load().as_ref() {
            let _ = tx.send(Dispatch::Event(event));
        }
    }

    /// 后台线程的状态变更：链路已停止时拒绝
    pub fn transition(&self, new: LinkState) -> bool {
        match self.state.set_if_active(new) {
            Ok(Some(old)) => {
                debug!("Link state {} -> {}", old, new);
                self.post(LinkEvent::StateChanged(new));
                true
            },
            Ok(None) => true,
            Err(current) => {
                debug!("Ignoring transition to {} while {}", new, current);
                false
            },
        }
    }

    /// 任何连接的第一帧：重置重试预算，清除待处理的问题通知（恰好一次）
    pub fn on_first_frame(&self) {
        self.budget.lock().reset();
        // 诊断通知由分发线程发出
        if self.problem_pending.swap(false, Ordering::AcqRel) {
            self.post(LinkEvent::ProblemCleared);
        }
    }

    pub fn current_session(&self) -> Option<Arc<LinkSession>> {
        self.session.lock().clone()
    }

    /// 关闭当前连接，阻塞中的读取和协商随之返回
    pub fn close_session(&self) {
        if let Some(session) = self.current_session() {
            session.close();
        }
    }
}

/// 一个运行周期的后台线程
struct Runtime {
    worker_tx: Sender<WorkerCommand>,
    worker: Option<JoinHandle<()>>,
    dispatcher: EventDispatcher,
    shutdown_timeout: Duration,
}

impl Runtime {
    fn shutdown(mut self, shared: &Shared) {
        let _ = self.worker_tx.send(WorkerCommand::Shutdown);
        shared.close_session();
        if let Some(handle) = self.worker.take()
            && handle.join_timeout(self.shutdown_timeout).is_err()
        {
            error!("Worker thread did not stop within {:?}", self.shutdown_timeout);
        }
        shared.dispatch.store(None);
        self.dispatcher.shutdown(self.shutdown_timeout);
    }
}

/// USB GPS 链路管理器
///
/// 由 [`LinkManagerBuilder`](crate::LinkManagerBuilder) 创建。所有方法都可以从任意线程调用。
pub struct LinkManager {
    shared: Arc<Shared>,
    runtime: Mutex<Option<Runtime>>,
}

impl LinkManager {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        provider: Arc<dyn DeviceProvider>,
        location: Arc<dyn LocationSink>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        clock: Option<Arc<dyn ClockSetter>>,
    ) -> Self {
        let config = LinkConfig::default();
        Self {
            shared: Arc::new(Shared {
                state: StateCell::new(),
                budget: Mutex::new(RetryBudget::new(config.max_retries)),
                config: ArcSwap::from_pointee(config),
                registry: Arc::new(ListenerRegistry::new()),
                metrics: Arc::new(LinkMetrics::new()),
                transport,
                provider,
                location,
                diagnostics,
                clock,
                disable_reason: Mutex::new(None),
                session: Mutex::new(None),
                dispatch: ArcSwapOption::empty(),
                problem_pending: AtomicBool::new(false),
                detached: AtomicBool::new(false),
                last_good_speed: AtomicU32::new(0),
                selected_speed: AtomicU32::new(0),
                write_lock: Mutex::new(()),
            }),
            runtime: Mutex::new(None),
        }
    }

    /// 启动链路
    ///
    /// 前置条件不满足时返回 `false` 并保持 `Disabled`，原因见 [`disable_reason`](Self::disable_reason)。
    /// 链路已经在运行时直接返回 `true`。
    pub fn enable(&self, config: LinkConfig) -> bool {
        self.try_enable(config).is_ok()
    }

    /// 从键值配置读取后启动
    pub fn enable_from(&self, provider: &dyn ConfigProvider) -> bool {
        self.enable(LinkConfig::from_provider(provider))
    }

    /// 启动链路，失败时返回具体错误
    pub fn try_enable(&self, config: LinkConfig) -> Result<(), LinkError> {
        let mut runtime = self.runtime.lock();
        let shared = &self.shared;

        if shared.state.get().is_active() {
            debug!("GPS link already enabled");
            return Ok(());
        }
        // FatalStopped 之后重新启动：回收上一个周期的线程
        if let Some(old) = runtime.take() {
            old.shutdown(shared);
        }
        // 前置条件失败时必须停在 Disabled，而不是上一个周期的 FatalStopped
        if let Some(old) = shared.state.set(LinkState::Disabled) {
            debug!("Link state {} -> {} (re-enable)", old, LinkState::Disabled);
        }

        *shared.disable_reason.lock() = None;
        *shared.budget.lock() = RetryBudget::new(config.max_retries);
        shared.problem_pending.store(false, Ordering::Release);
        shared.detached.store(false, Ordering::Release);
        shared.selected_speed.store(0, Ordering::Release);

        match shared.location.status() {
            LocationStatus::Ready => {},
            LocationStatus::MockLocationDisabled => return Err(self.refuse(LinkError::MockLocationDisabled)),
            LocationStatus::PermissionMissing => return Err(self.refuse(LinkError::PermissionDenied)),
        }

        let device = match shared.provider.find(config.vendor_id, config.product_id) {
            Ok(Some(device)) => device,
            Ok(None) => {
                return Err(self.refuse(LinkError::DeviceNotFound {
                    vendor_id: config.vendor_id,
                    product_id: config.product_id,
                }));
            },
            Err(e) => {
                warn!("Device enumeration failed: {}", e);
                return Err(self.refuse(LinkError::DeviceNotFound {
                    vendor_id: config.vendor_id,
                    product_id: config.product_id,
                }));
            },
        };

        let dispatcher = EventDispatcher::spawn(DispatchContext {
            registry: shared.registry.clone(),
            location: shared.location.clone(),
            diagnostics: shared.diagnostics.clone(),
            clock: shared.clock.clone(),
            metrics: shared.metrics.clone(),
        })?;
        let dispatch_tx = dispatcher.sender();
        shared.dispatch.store(Some(Arc::new(dispatch_tx.clone())));
        shared.config.store(Arc::new(config.clone()));

        let (tx, rx) = unbounded();
        let (initial_state, first_command) = if shared.provider.has_permission(&device) {
            (LinkState::Negotiating, WorkerCommand::Connect)
        } else {
            (LinkState::AwaitingPermission, WorkerCommand::RequestPermission(device))
        };
        let _ = tx.send(first_command);

        // 状态在返回前就绪，随后的 send() 不会因为仍是 Disabled 而失败
        shared.state.set(initial_state);
        shared.post(LinkEvent::StateChanged(initial_state));

        let worker = Worker::new(shared.clone(), config.clone(), tx.clone(), rx, dispatch_tx);
        let handle = match spawn_named("usbgps-worker", move || worker.run()) {
            Ok(handle) => handle,
            Err(e) => {
                shared.state.set(LinkState::Disabled);
                shared.dispatch.store(None);
                dispatcher.shutdown(config.timings.shutdown_timeout());
                return Err(e);
            },
        };

        info!(
            "GPS link enabled for {} (speed {}, protocol {})",
            device, config.speed, config.protocol
        );
        *runtime = Some(Runtime {
            worker_tx: tx,
            worker: Some(handle),
            dispatcher,
            shutdown_timeout: config.timings.shutdown_timeout(),
        });
        Ok(())
    }

    fn refuse(&self, err: LinkError) -> LinkError {
        warn!("Not enabling GPS link: {}", err);
        if let Some(reason) = err.disable_reason() {
            *self.shared.disable_reason.lock() = Some(reason);
            self.shared.diagnostics.fatal_stop(reason);
        }
        err
    }

    /// 停止链路（幂等）
    ///
    /// 关闭当前连接、停止后台线程（各自最多等待关闭超时），清空监听器。
    pub fn disable(&self, reason: DisableReason) {
        let mut runtime = self.runtime.lock();
        let shared = &self.shared;

        *shared.disable_reason.lock() = Some(reason);
        if shared.state.set(LinkState::Disabled).is_some() {
            info!("GPS link disabled: {}", reason);
            shared.post(LinkEvent::StateChanged(LinkState::Disabled));
        }
        shared.close_session();

        if let Some(old) = runtime.take() {
            old.shutdown(shared);
        }
        shared.session.lock().take();
        shared.registry.clear();
    }

    /// 发送命令，阻塞直到链路进入 `Streaming`
    ///
    /// 链路停止时返回 [`LinkError::Disabled`]。
    pub fn send(&self, command: &OutgoingCommand) -> Result<(), LinkError> {
        self.send_inner(command, None)
    }

    /// 同 [`send`](Self::send)，最多等待 `timeout`
    pub fn send_timeout(&self, command: &OutgoingCommand, timeout: Duration) -> Result<(), LinkError> {
        self.send_inner(command, Some(Instant::now() + timeout))
    }

    fn send_inner(&self, command: &OutgoingCommand, deadline: Option<Instant>) -> Result<(), LinkError> {
        let bytes = command.encode()?;
        let write_timeout = self.shared.config.load().timings.write_timeout();

        loop {
            let version = self.shared.state.wait_until_streaming(deadline)?;
            {
                let _write = self.shared.write_lock.lock();
                if self.shared.state.get() == LinkState::Streaming
                    && let Some(session) = self.shared.current_session()
                {
                    match session.connection.write(&bytes, write_timeout) {
                        Ok(_) => {
                            self.shared.metrics.commands_sent.fetch_add(1, Ordering::Relaxed);
                            return Ok(());
                        },
                        // 连接刚断开：等待下一次 Streaming
                        Err(TransportError::Closed) => {},
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            // 连接已关闭但状态尚未更新：等待 reader 退出引起的状态变更
            self.shared.state.wait_for_change(version, deadline)?;
        }
    }

    pub fn register_frame_listener(&self, listener: Arc<dyn FrameListener>) -> ListenerId {
        self.shared.registry.add_frame_listener(listener)
    }

    pub fn unregister_frame_listener(&self, id: ListenerId) -> bool {
        self.shared.registry.remove_frame_listener(id)
    }

    pub fn register_event_listener(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        self.shared.registry.add_event_listener(listener)
    }

    pub fn unregister_event_listener(&self, id: ListenerId) -> bool {
        self.shared.registry.remove_event_listener(id)
    }

    /// 平台的热插拔通知
    pub fn handle_device_event(&self, event: &DeviceEvent) {
        let runtime = self.runtime.lock();
        let Some(runtime) = runtime.as_ref() else {
            return;
        };
        let config = self.shared.config.load();
        if !event.device().matches(config.vendor_id, config.product_id) {
            return;
        }
        match event {
            DeviceEvent::Detached(device) => {
                if self.shared.current_session().is_some() {
                    info!("Device {} detached", device);
                    self.shared.detached.store(true, Ordering::Release);
                    self.shared.close_session();
                }
            },
            DeviceEvent::Attached(device) => {
                let _ = runtime.worker_tx.send(WorkerCommand::DeviceAttached(*device));
            },
        }
    }

    pub fn state(&self) -> LinkState {
        self.shared.state.get()
    }

    pub fn is_enabled(&self) -> bool {
        self.state().is_active()
    }

    pub fn disable_reason(&self) -> Option<DisableReason> {
        *self.shared.disable_reason.lock()
    }

    /// 剩余的重连次数
    pub fn retries_remaining(&self) -> u32 {
        self.shared.budget.lock().remaining()
    }

    /// 当前连接协商得到的线速率
    pub fn selected_speed(&self) -> Option<u32> {
        match self.shared.selected_speed.load(Ordering::Acquire) {
            0 => None,
            speed => Some(speed),
        }
    }

    /// 最近一次 `enable()` 使用的配置
    pub fn config(&self) -> Arc<LinkConfig> {
        self.shared.config.load_full()
    }

    pub fn metrics(&self) -> LinkMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.shared.metrics.reset();
    }
}

impl Drop for LinkManager {
    fn drop(&mut self) {
        if self.runtime.lock().is_some() {
            self.disable(DisableReason::UserRequest);
        }
    }
}
